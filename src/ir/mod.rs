//! The Module IR: the typed, index-resolved representation of a WAT module
//! that parsing builds and validation checks.

pub mod instruction;
pub mod module;
pub mod numeric;

pub use instruction::{BlockSignature, BlockType, Instruction, InstructionKind, MemArg, MemoryOp, PackedLoad};
pub use module::{
    Export, ExportDesc, ExternKind, FuncType, Function, Global, GlobalType, Import, ImportDesc, Limits, Local, Memory,
    Module, Named, Param, StackTypes, Table, TableType, TypeDef, ValueType,
};
pub use numeric::NumericOp;
