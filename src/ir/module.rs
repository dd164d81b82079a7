//! Module-level entities of the IR.
//!
//! Every cross reference is a `u32` index. For functions, tables, memories
//! and globals the index space starts with the imports of that kind, in
//! import order, followed by the definitions.

use super::instruction::Instruction;
use crate::wat::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    // Number types
    I32,
    I64,
    F32,
    F64,
    // Reference types
    FuncRef,
    ExternRef,
}

impl ValueType {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "i32" => Some(ValueType::I32),
            "i64" => Some(ValueType::I64),
            "f32" => Some(ValueType::F32),
            "f64" => Some(ValueType::F64),
            "funcref" => Some(ValueType::FuncRef),
            "externref" => Some(ValueType::ExternRef),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
        }
    }

    pub fn is_num(self) -> bool {
        !self.is_ref()
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValueType::FuncRef | ValueType::ExternRef)
    }

    /// Size in bytes of a numeric type; loads and stores use it as the
    /// natural alignment.
    pub fn byte_width(self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
            ValueType::FuncRef | ValueType::ExternRef => 0,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// `[params] -> [results]`, compared structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FuncType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self { params, results }
    }
}

fn write_types(f: &mut fmt::Formatter, types: &[ValueType]) -> fmt::Result {
    write!(f, "[")?;
    for (i, t) in types.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", t)?;
    }
    write!(f, "]")
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_types(f, &self.params)?;
        write!(f, " -> ")?;
        write_types(f, &self.results)
    }
}

/// Display helper for a bare stack type such as `[i32 f64]`.
pub struct StackTypes<'a>(pub &'a [ValueType]);

impl fmt::Display for StackTypes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_types(f, self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableType {
    pub limits: Limits,
    /// `FuncRef` or `ExternRef`.
    pub element: ValueType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

/// Something that may carry a `$name` from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named<T> {
    pub id: Option<String>,
    pub item: T,
}

impl<T> Named<T> {
    pub fn new(id: Option<String>, item: T) -> Self {
        Self { id, item }
    }

    pub fn anonymous(item: T) -> Self {
        Self { id: None, item }
    }
}

pub type Param = Named<ValueType>;
pub type Local = Named<ValueType>;
pub type TypeDef = Named<FuncType>;

/// A defined function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: Option<String>,
    pub type_index: u32,
    /// One entry per parameter of the function's type, naming it or not.
    pub params: Vec<Param>,
    pub locals: Vec<Local>,
    pub body: Vec<Instruction>,
    pub span: Span,
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.type_index == other.type_index
            && self.params == other.params
            && self.locals == other.locals
            && self.body == other.body
    }
}

impl Function {
    /// Type of local `index`, counting parameters first.
    pub fn local_type(&self, index: u32) -> Option<ValueType> {
        let index = index as usize;
        match self.params.get(index) {
            Some(param) => Some(param.item),
            None => self.locals.get(index - self.params.len()).map(|l| l.item),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
    pub span: Span,
}

impl PartialEq for Import {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name && self.desc == other.desc
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportDesc {
    Func { id: Option<String>, type_index: u32 },
    Table { id: Option<String>, ty: TableType },
    Memory { id: Option<String>, limits: Limits },
    Global { id: Option<String>, ty: GlobalType },
}

impl ImportDesc {
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportDesc::Func { .. } => ExternKind::Func,
            ImportDesc::Table { .. } => ExternKind::Table,
            ImportDesc::Memory { .. } => ExternKind::Memory,
            ImportDesc::Global { .. } => ExternKind::Global,
        }
    }
}

/// The four index spaces that imports and exports refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ExternKind::Func => "func",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
        }
    }
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportDesc {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

impl ExportDesc {
    pub fn new(kind: ExternKind, index: u32) -> Self {
        match kind {
            ExternKind::Func => ExportDesc::Func(index),
            ExternKind::Table => ExportDesc::Table(index),
            ExternKind::Memory => ExportDesc::Memory(index),
            ExternKind::Global => ExportDesc::Global(index),
        }
    }

    pub fn kind(self) -> ExternKind {
        match self {
            ExportDesc::Func(_) => ExternKind::Func,
            ExportDesc::Table(_) => ExternKind::Table,
            ExportDesc::Memory(_) => ExternKind::Memory,
            ExportDesc::Global(_) => ExternKind::Global,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            ExportDesc::Func(i) | ExportDesc::Table(i) | ExportDesc::Memory(i) | ExportDesc::Global(i) => i,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
    pub span: Span,
}

impl PartialEq for Export {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.desc == other.desc
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Option<String>,
    pub ty: TableType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Option<String>,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub id: Option<String>,
    pub ty: GlobalType,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: Option<String>,
    pub types: Vec<TypeDef>,
    pub imports: Vec<Import>,
    pub functions: Vec<Function>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
}

impl Module {
    pub fn imports_of(&self, kind: ExternKind) -> impl Iterator<Item = &ImportDesc> {
        self.imports.iter().map(|i| &i.desc).filter(move |d| d.kind() == kind)
    }

    pub fn imported_count(&self, kind: ExternKind) -> u32 {
        self.imports_of(kind).count() as u32
    }

    /// Size of the index space for `kind`.
    pub fn count(&self, kind: ExternKind) -> u32 {
        let defined = match kind {
            ExternKind::Func => self.functions.len(),
            ExternKind::Table => self.tables.len(),
            ExternKind::Memory => self.memories.len(),
            ExternKind::Global => self.globals.len(),
        };
        self.imported_count(kind) + defined as u32
    }

    pub fn func_type(&self, type_index: u32) -> Option<&FuncType> {
        self.types.get(type_index as usize).map(|t| &t.item)
    }

    /// Type index of function `func_index` in the function index space.
    pub fn func_type_index(&self, func_index: u32) -> Option<u32> {
        let imported = self.imported_count(ExternKind::Func);
        if func_index < imported {
            self.imports_of(ExternKind::Func)
                .nth(func_index as usize)
                .and_then(|desc| match desc {
                    ImportDesc::Func { type_index, .. } => Some(*type_index),
                    _ => None,
                })
        } else {
            self.functions
                .get((func_index - imported) as usize)
                .map(|f| f.type_index)
        }
    }

    /// Signature of function `func_index` in the function index space.
    pub fn func_signature(&self, func_index: u32) -> Option<&FuncType> {
        self.func_type_index(func_index).and_then(|t| self.func_type(t))
    }

    pub fn table_type(&self, table_index: u32) -> Option<TableType> {
        let imported = self.imported_count(ExternKind::Table);
        if table_index < imported {
            self.imports_of(ExternKind::Table)
                .nth(table_index as usize)
                .and_then(|desc| match desc {
                    ImportDesc::Table { ty, .. } => Some(*ty),
                    _ => None,
                })
        } else {
            self.tables.get((table_index - imported) as usize).map(|t| t.ty)
        }
    }

    /// Type of global `global_index`, and whether it is imported.
    pub fn global_type(&self, global_index: u32) -> Option<(GlobalType, bool)> {
        let imported = self.imported_count(ExternKind::Global);
        if global_index < imported {
            self.imports_of(ExternKind::Global)
                .nth(global_index as usize)
                .and_then(|desc| match desc {
                    ImportDesc::Global { ty, .. } => Some((*ty, true)),
                    _ => None,
                })
        } else {
            self.globals
                .get((global_index - imported) as usize)
                .map(|g| (g.ty, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(name: &str, desc: ImportDesc) -> Import {
        Import {
            module: "env".into(),
            name: name.into(),
            desc,
            span: Span::ZERO,
        }
    }

    fn sample() -> Module {
        let i32_global = GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        };
        Module {
            types: vec![
                TypeDef::anonymous(FuncType::new(vec![ValueType::I32], vec![])),
                TypeDef::anonymous(FuncType::new(vec![], vec![ValueType::F64])),
            ],
            imports: vec![
                import("f", ImportDesc::Func {
                    id: None,
                    type_index: 1,
                }),
                import("g", ImportDesc::Global {
                    id: None,
                    ty: i32_global,
                }),
            ],
            functions: vec![Function {
                id: Some("main".into()),
                type_index: 0,
                params: vec![Param::anonymous(ValueType::I32)],
                locals: vec![Local::new(Some("x".into()), ValueType::F32)],
                body: vec![],
                span: Span::ZERO,
            }],
            globals: vec![Global {
                id: None,
                ty: GlobalType {
                    value_type: ValueType::I64,
                    mutable: true,
                },
                init: vec![],
            }],
            ..Module::default()
        }
    }

    #[test]
    fn index_spaces_put_imports_first() {
        let module = sample();
        assert_eq!(module.count(ExternKind::Func), 2);
        assert_eq!(module.func_type_index(0), Some(1));
        assert_eq!(module.func_type_index(1), Some(0));
        assert_eq!(module.func_type_index(2), None);
        assert_eq!(module.func_signature(1).map(|t| t.params.len()), Some(1));

        assert_eq!(module.global_type(0).map(|(t, imported)| (t.mutable, imported)), Some((false, true)));
        assert_eq!(module.global_type(1).map(|(t, _)| t.value_type), Some(ValueType::I64));
        assert_eq!(module.count(ExternKind::Memory), 0);
        assert_eq!(module.table_type(0), None);
    }

    #[test]
    fn local_types_count_params_first() {
        let module = sample();
        let f = &module.functions[0];
        assert_eq!(f.local_type(0), Some(ValueType::I32));
        assert_eq!(f.local_type(1), Some(ValueType::F32));
        assert_eq!(f.local_type(2), None);
    }

    #[test]
    fn equality_ignores_spans() {
        let mut a = sample();
        let b = sample();
        a.functions[0].span = Span::new(5, 9, 2, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn func_type_display() {
        let t = FuncType::new(vec![ValueType::I32, ValueType::I64], vec![ValueType::FuncRef]);
        assert_eq!(t.to_string(), "[i32 i64] -> [funcref]");
        assert_eq!(FuncType::default().to_string(), "[] -> []");
        assert_eq!(StackTypes(&[ValueType::F32]).to_string(), "[f32]");
    }

    #[test]
    fn value_type_keywords() {
        for t in [
            ValueType::I32,
            ValueType::I64,
            ValueType::F32,
            ValueType::F64,
            ValueType::FuncRef,
            ValueType::ExternRef,
        ] {
            assert_eq!(ValueType::from_keyword(t.keyword()), Some(t));
        }
        assert_eq!(ValueType::from_keyword("v128"), None);
        assert!(ValueType::ExternRef.is_ref());
        assert!(ValueType::F64.is_num());
    }
}
