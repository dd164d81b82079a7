//! Print a [`Module`] back to WAT.
//!
//! The output is flat-form WAT that parses back to an equal module: every
//! type section entry is written out explicitly, so inline signatures that
//! were interned keep their indices, and every reference is a numeric index.
//! Identifiers on definitions and block labels are kept.

use crate::ir::{
    BlockSignature, BlockType, ExportDesc, FuncType, Function, ImportDesc, Instruction, InstructionKind, Limits,
    MemArg, MemoryOp, Module, TableType, ValueType,
};
use std::fmt;

/// WAT text for `module`.
///
/// ```
/// let module = watfront::wat::parse("(func $id (param i32) (result i32) local.get 0)").unwrap();
/// let text = watfront::print::print(&module);
/// assert_eq!(watfront::wat::parse(&text).unwrap(), module);
/// ```
pub fn print(module: &Module) -> String {
    Wat(module).to_string()
}

/// Display adapter that writes a module as WAT.
pub struct Wat<'a>(pub &'a Module);

impl fmt::Display for Wat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Printer { f, depth: 0 }.module(self.0)
    }
}

struct Printer<'a, 'b> {
    f: &'a mut fmt::Formatter<'b>,
    depth: usize,
}

impl Printer<'_, '_> {
    fn line(&mut self, args: fmt::Arguments) -> fmt::Result {
        write!(self.f, "{:width$}", "", width = self.depth * 2)?;
        self.f.write_fmt(args)?;
        writeln!(self.f)
    }

    fn module(&mut self, module: &Module) -> fmt::Result {
        match &module.id {
            Some(id) => self.line(format_args!("(module ${}", id))?,
            None => self.line(format_args!("(module"))?,
        }
        self.depth += 1;

        for ty in &module.types {
            self.line(format_args!("(type{} (func{}))", id_text(&ty.id), signature_text(&ty.item)))?;
        }
        for import in &module.imports {
            let desc = match &import.desc {
                ImportDesc::Func { id, type_index } => format!("(func{} (type {}))", id_text(id), type_index),
                ImportDesc::Table { id, ty } => format!("(table{} {})", id_text(id), table_type_text(ty)),
                ImportDesc::Memory { id, limits } => format!("(memory{} {})", id_text(id), limits_text(limits)),
                ImportDesc::Global { id, ty } => {
                    format!("(global{} {})", id_text(id), global_type_text(ty.value_type, ty.mutable))
                }
            };
            self.line(format_args!(
                "(import {} {} {})",
                string_text(&import.module),
                string_text(&import.name),
                desc
            ))?;
        }
        for func in &module.functions {
            self.function(module, func)?;
        }
        for table in &module.tables {
            self.line(format_args!("(table{} {})", id_text(&table.id), table_type_text(&table.ty)))?;
        }
        for memory in &module.memories {
            self.line(format_args!("(memory{} {})", id_text(&memory.id), limits_text(&memory.limits)))?;
        }
        for global in &module.globals {
            self.line(format_args!(
                "(global{} {}",
                id_text(&global.id),
                global_type_text(global.ty.value_type, global.ty.mutable)
            ))?;
            self.nested(&global.init)?;
            self.line(format_args!(")"))?;
        }
        for export in &module.exports {
            let (kind, index) = match export.desc {
                ExportDesc::Func(i) => ("func", i),
                ExportDesc::Table(i) => ("table", i),
                ExportDesc::Memory(i) => ("memory", i),
                ExportDesc::Global(i) => ("global", i),
            };
            self.line(format_args!("(export {} ({} {}))", string_text(&export.name), kind, index))?;
        }
        if let Some(start) = module.start {
            self.line(format_args!("(start {})", start))?;
        }

        self.depth -= 1;
        self.line(format_args!(")"))
    }

    fn function(&mut self, module: &Module, func: &Function) -> fmt::Result {
        let mut header = format!("(func{} (type {})", id_text(&func.id), func.type_index);
        for param in &func.params {
            header.push_str(&format!(" (param{} {})", id_text(&param.id), param.item));
        }
        if let Some(ty) = module.func_type(func.type_index) {
            if !ty.results.is_empty() {
                header.push_str(&format!(" (result{})", types_text(&ty.results)));
            }
        }
        self.line(format_args!("{}", header))?;

        self.depth += 1;
        for local in &func.locals {
            self.line(format_args!("(local{} {})", id_text(&local.id), local.item))?;
        }
        self.depth -= 1;
        self.nested(&func.body)?;
        self.line(format_args!(")"))
    }

    /// `body` one level deeper than the current line.
    fn nested(&mut self, body: &[Instruction]) -> fmt::Result {
        self.depth += 1;
        for inst in body {
            self.instruction(inst)?;
        }
        self.depth -= 1;
        Ok(())
    }

    fn instruction(&mut self, inst: &Instruction) -> fmt::Result {
        match &inst.kind {
            InstructionKind::Block {
                label,
                signature,
                body,
            }
            | InstructionKind::Loop {
                label,
                signature,
                body,
            } => {
                self.line(format_args!(
                    "{}{}{}",
                    inst.kind.mnemonic(),
                    id_text(label),
                    block_type_text(signature)
                ))?;
                self.nested(body)?;
                self.line(format_args!("end"))
            }
            InstructionKind::If {
                label,
                signature,
                then_body,
                else_body,
            } => {
                self.line(format_args!("if{}{}", id_text(label), block_type_text(signature)))?;
                self.nested(then_body)?;
                if !else_body.is_empty() {
                    self.line(format_args!("else"))?;
                    self.nested(else_body)?;
                }
                self.line(format_args!("end"))
            }
            kind => self.line(format_args!("{}", plain_text(kind))),
        }
    }
}

/// Text of an instruction with no body, immediates included.
fn plain_text(kind: &InstructionKind) -> String {
    use InstructionKind as I;

    let mnemonic = kind.mnemonic();
    match kind {
        I::Br { depth } | I::BrIf { depth } => format!("{} {}", mnemonic, depth),
        I::BrTable { targets, default } => {
            let mut text = mnemonic.to_string();
            for target in targets.iter().chain(std::iter::once(default)) {
                text.push_str(&format!(" {}", target));
            }
            text
        }
        I::Call { func } => format!("{} {}", mnemonic, func),
        I::CallIndirect { table, type_index } => format!("{} {} (type {})", mnemonic, table, type_index),
        I::Select { result: Some(ty) } => format!("{} (result {})", mnemonic, ty),
        I::LocalGet(i) | I::LocalSet(i) | I::LocalTee(i) | I::GlobalGet(i) | I::GlobalSet(i) | I::RefFunc(i) => {
            format!("{} {}", mnemonic, i)
        }
        I::Load { ty, packed, memarg } => format!("{}{}", mnemonic, memarg_text(MemoryOp::Load(*ty, *packed), memarg)),
        I::Store { ty, packed, memarg } => {
            format!("{}{}", mnemonic, memarg_text(MemoryOp::Store(*ty, *packed), memarg))
        }
        I::RefNull(ty) => {
            let heap = if *ty == ValueType::ExternRef { "extern" } else { "func" };
            format!("{} {}", mnemonic, heap)
        }
        I::I32Const(v) => format!("{} {}", mnemonic, v),
        I::I64Const(v) => format!("{} {}", mnemonic, v),
        I::F32Const(bits) => format!("{} {}", mnemonic, f32_text(*bits)),
        I::F64Const(bits) => format!("{} {}", mnemonic, f64_text(*bits)),
        _ => mnemonic.to_string(),
    }
}

fn id_text(id: &Option<String>) -> String {
    id.as_ref().map_or_else(String::new, |id| format!(" ${}", id))
}

fn types_text(types: &[ValueType]) -> String {
    types.iter().map(|t| format!(" {}", t)).collect()
}

fn signature_text(ty: &FuncType) -> String {
    let mut text = String::new();
    if !ty.params.is_empty() {
        text.push_str(&format!(" (param{})", types_text(&ty.params)));
    }
    if !ty.results.is_empty() {
        text.push_str(&format!(" (result{})", types_text(&ty.results)));
    }
    text
}

fn block_type_text(signature: &BlockSignature) -> String {
    match signature.declared {
        BlockType::Empty => String::new(),
        BlockType::Value(ty) => format!(" (result {})", ty),
        BlockType::TypeIndex(index) => format!(" (type {})", index),
    }
}

fn limits_text(limits: &Limits) -> String {
    match limits.max {
        Some(max) => format!("{} {}", limits.min, max),
        None => limits.min.to_string(),
    }
}

fn table_type_text(ty: &TableType) -> String {
    format!("{} {}", limits_text(&ty.limits), ty.element)
}

fn global_type_text(ty: ValueType, mutable: bool) -> String {
    if mutable {
        format!("(mut {})", ty)
    } else {
        ty.to_string()
    }
}

/// `offset=` and `align=` only where they differ from the defaults.
fn memarg_text(op: MemoryOp, memarg: &MemArg) -> String {
    let mut text = String::new();
    if memarg.offset != 0 {
        text.push_str(&format!(" offset={}", memarg.offset));
    }
    if memarg.align != op.natural_align() {
        text.push_str(&format!(" align={}", 1u64 << memarg.align));
    }
    text
}

/// A string literal, escaping anything outside printable ASCII.
fn string_text(s: &str) -> String {
    let mut text = String::from("\"");
    for &b in s.as_bytes() {
        if (b.is_ascii_graphic() || b == b' ') && b != b'"' && b != b'\\' {
            text.push(b as char);
        } else {
            text.push_str(&format!("\\{:02x}", b));
        }
    }
    text.push('"');
    text
}

fn f32_text(bits: u32) -> String {
    let sign = if bits >> 31 == 1 { "-" } else { "" };
    let value = f32::from_bits(bits);
    if value.is_nan() {
        let payload = bits & 0x007f_ffff;
        if payload == 0x0040_0000 {
            format!("{}nan", sign)
        } else {
            format!("{}nan:0x{:x}", sign, payload)
        }
    } else if value.is_infinite() {
        format!("{}inf", sign)
    } else {
        // Debug output is the shortest text that reads back to the same bits.
        format!("{:?}", value)
    }
}

fn f64_text(bits: u64) -> String {
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let value = f64::from_bits(bits);
    if value.is_nan() {
        let payload = bits & 0x000f_ffff_ffff_ffff;
        if payload == 0x0008_0000_0000_0000 {
            format!("{}nan", sign)
        } else {
            format!("{}nan:0x{:x}", sign, payload)
        }
    } else if value.is_infinite() {
        format!("{}inf", sign)
    } else {
        format!("{:?}", value)
    }
}
