//! Instructions of the IR.
//!
//! Block structure is a tree: `block`, `loop` and `if` own their bodies, and
//! `end`/`else` exist only as the boundaries of those bodies. Within a body
//! the sequence is flat, with folded operands already placed before the
//! instruction that consumes them.

use super::module::{FuncType, ValueType};
use super::numeric::NumericOp;
use crate::wat::Span;
use serde::{Deserialize, Serialize};

/// Block type as written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    TypeIndex(u32),
}

/// A block's written type plus the signature it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub declared: BlockType,
    pub ty: FuncType,
}

impl BlockSignature {
    pub fn empty() -> Self {
        Self {
            declared: BlockType::Empty,
            ty: FuncType::default(),
        }
    }
}

/// Memory immediate. `align` is stored as a power of two exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemArg {
    pub offset: u32,
    pub align: u32,
}

/// Width and signedness of a load that reads fewer bytes than its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedLoad {
    pub bits: u8,
    pub signed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub span: Span,
}

impl Instruction {
    pub fn new(kind: InstructionKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstructionKind {
    // Control
    Unreachable,
    Nop,
    Block {
        label: Option<String>,
        signature: BlockSignature,
        body: Vec<Instruction>,
    },
    Loop {
        label: Option<String>,
        signature: BlockSignature,
        body: Vec<Instruction>,
    },
    If {
        label: Option<String>,
        signature: BlockSignature,
        then_body: Vec<Instruction>,
        else_body: Vec<Instruction>,
    },
    Br {
        depth: u32,
    },
    BrIf {
        depth: u32,
    },
    BrTable {
        targets: Vec<u32>,
        default: u32,
    },
    Return,
    Call {
        func: u32,
    },
    CallIndirect {
        table: u32,
        type_index: u32,
    },

    // Parametric
    Drop,
    Select {
        result: Option<ValueType>,
    },

    // Variable
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory
    Load {
        ty: ValueType,
        packed: Option<PackedLoad>,
        memarg: MemArg,
    },
    Store {
        ty: ValueType,
        /// Bits written when narrower than `ty`.
        packed: Option<u8>,
        memarg: MemArg,
    },
    MemorySize,
    MemoryGrow,

    // Reference
    RefNull(ValueType),
    RefIsNull,
    RefFunc(u32),

    // Numeric
    I32Const(i32),
    I64Const(i64),
    /// Raw IEEE bits, so NaN payloads survive.
    F32Const(u32),
    F64Const(u64),
    Numeric(NumericOp),
}

impl InstructionKind {
    /// Text mnemonic for instructions that have a fixed one.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstructionKind::Unreachable => "unreachable",
            InstructionKind::Nop => "nop",
            InstructionKind::Block { .. } => "block",
            InstructionKind::Loop { .. } => "loop",
            InstructionKind::If { .. } => "if",
            InstructionKind::Br { .. } => "br",
            InstructionKind::BrIf { .. } => "br_if",
            InstructionKind::BrTable { .. } => "br_table",
            InstructionKind::Return => "return",
            InstructionKind::Call { .. } => "call",
            InstructionKind::CallIndirect { .. } => "call_indirect",
            InstructionKind::Drop => "drop",
            InstructionKind::Select { .. } => "select",
            InstructionKind::LocalGet(_) => "local.get",
            InstructionKind::LocalSet(_) => "local.set",
            InstructionKind::LocalTee(_) => "local.tee",
            InstructionKind::GlobalGet(_) => "global.get",
            InstructionKind::GlobalSet(_) => "global.set",
            InstructionKind::Load { ty, packed, .. } => load_mnemonic(*ty, *packed),
            InstructionKind::Store { ty, packed, .. } => store_mnemonic(*ty, *packed),
            InstructionKind::MemorySize => "memory.size",
            InstructionKind::MemoryGrow => "memory.grow",
            InstructionKind::RefNull(_) => "ref.null",
            InstructionKind::RefIsNull => "ref.is_null",
            InstructionKind::RefFunc(_) => "ref.func",
            InstructionKind::I32Const(_) => "i32.const",
            InstructionKind::I64Const(_) => "i64.const",
            InstructionKind::F32Const(_) => "f32.const",
            InstructionKind::F64Const(_) => "f64.const",
            InstructionKind::Numeric(op) => op.mnemonic(),
        }
    }
}

/// Every load and store the text format names, with the operand type and
/// packing each one implies.
pub const MEMORY_OPS: &[(&str, MemoryOp)] = &[
    ("i32.load", MemoryOp::Load(ValueType::I32, None)),
    ("i64.load", MemoryOp::Load(ValueType::I64, None)),
    ("f32.load", MemoryOp::Load(ValueType::F32, None)),
    ("f64.load", MemoryOp::Load(ValueType::F64, None)),
    ("i32.load8_s", MemoryOp::Load(ValueType::I32, Some(PackedLoad { bits: 8, signed: true }))),
    ("i32.load8_u", MemoryOp::Load(ValueType::I32, Some(PackedLoad { bits: 8, signed: false }))),
    ("i32.load16_s", MemoryOp::Load(ValueType::I32, Some(PackedLoad { bits: 16, signed: true }))),
    ("i32.load16_u", MemoryOp::Load(ValueType::I32, Some(PackedLoad { bits: 16, signed: false }))),
    ("i64.load8_s", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 8, signed: true }))),
    ("i64.load8_u", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 8, signed: false }))),
    ("i64.load16_s", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 16, signed: true }))),
    ("i64.load16_u", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 16, signed: false }))),
    ("i64.load32_s", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 32, signed: true }))),
    ("i64.load32_u", MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 32, signed: false }))),
    ("i32.store", MemoryOp::Store(ValueType::I32, None)),
    ("i64.store", MemoryOp::Store(ValueType::I64, None)),
    ("f32.store", MemoryOp::Store(ValueType::F32, None)),
    ("f64.store", MemoryOp::Store(ValueType::F64, None)),
    ("i32.store8", MemoryOp::Store(ValueType::I32, Some(8))),
    ("i32.store16", MemoryOp::Store(ValueType::I32, Some(16))),
    ("i64.store8", MemoryOp::Store(ValueType::I64, Some(8))),
    ("i64.store16", MemoryOp::Store(ValueType::I64, Some(16))),
    ("i64.store32", MemoryOp::Store(ValueType::I64, Some(32))),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    Load(ValueType, Option<PackedLoad>),
    Store(ValueType, Option<u8>),
}

impl MemoryOp {
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        MEMORY_OPS.iter().find(|(m, _)| *m == mnemonic).map(|(_, op)| *op)
    }

    /// Largest alignment exponent allowed: log2 of the bytes accessed.
    pub fn natural_align(self) -> u32 {
        let bytes = match self {
            MemoryOp::Load(_, Some(packed)) => u32::from(packed.bits) / 8,
            MemoryOp::Store(_, Some(bits)) => u32::from(bits) / 8,
            MemoryOp::Load(ty, None) | MemoryOp::Store(ty, None) => ty.byte_width(),
        };
        bytes.trailing_zeros()
    }
}

fn load_mnemonic(ty: ValueType, packed: Option<PackedLoad>) -> &'static str {
    MEMORY_OPS
        .iter()
        .find(|(_, op)| *op == MemoryOp::Load(ty, packed))
        .map_or("load", |(m, _)| *m)
}

fn store_mnemonic(ty: ValueType, packed: Option<u8>) -> &'static str {
    MEMORY_OPS
        .iter()
        .find(|(_, op)| *op == MemoryOp::Store(ty, packed))
        .map_or("store", |(m, _)| *m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_span() {
        let a = Instruction::new(InstructionKind::I32Const(1), Span::new(0, 3, 1, 1));
        let b = Instruction::new(InstructionKind::I32Const(1), Span::new(9, 12, 4, 2));
        assert_eq!(a, b);
        assert_ne!(a, Instruction::new(InstructionKind::I32Const(2), Span::ZERO));
    }

    #[test]
    fn memory_ops() {
        let op = MemoryOp::from_mnemonic("i64.load16_u").expect("known");
        assert_eq!(op, MemoryOp::Load(ValueType::I64, Some(PackedLoad { bits: 16, signed: false })));
        assert_eq!(op.natural_align(), 1);
        assert_eq!(MemoryOp::from_mnemonic("f64.store").map(MemoryOp::natural_align), Some(3));
        assert_eq!(MemoryOp::from_mnemonic("i32.store8").map(MemoryOp::natural_align), Some(0));
        assert_eq!(MemoryOp::from_mnemonic("i32.load32_s"), None);
    }

    #[test]
    fn load_store_mnemonics() {
        let memarg = MemArg { offset: 0, align: 2 };
        let load = InstructionKind::Load {
            ty: ValueType::I32,
            packed: Some(PackedLoad { bits: 8, signed: true }),
            memarg,
        };
        assert_eq!(load.mnemonic(), "i32.load8_s");
        let store = InstructionKind::Store {
            ty: ValueType::F32,
            packed: None,
            memarg,
        };
        assert_eq!(store.mnemonic(), "f32.store");
    }
}
