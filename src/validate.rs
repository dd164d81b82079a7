//! Stack-typing validation of a parsed [`Module`].
//!
//! Each function body is checked with the operand and control stacks of the
//! WebAssembly validation algorithm. A mismatch is recorded and checking goes
//! on, with the failed pop standing in as an unknown value. An index that
//! does not exist (local, global, function, type, table, memory or label)
//! makes the rest of that body meaningless, so it ends the function's check;
//! other functions are still checked.
//!
//! ```
//! use watfront::{validate::validate, wat};
//!
//! let module = wat::parse("(func (result i32) i32.const 1 i32.const 2)").unwrap();
//! let errors = validate(module).unwrap_err();
//! assert_eq!(errors.len(), 1);
//! ```

use crate::diagnostic::DiagnosticKind;
use crate::ir::{
    ExternKind, FuncType, Function, Global, GlobalType, ImportDesc, Instruction, InstructionKind, Module, StackTypes,
    ValueType,
};
use crate::wat::{Namespace, Span};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use MaybeValue::{Unknown, Val};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unknown {namespace} {index}")]
    UnknownIndex {
        namespace: Namespace,
        index: u32,
        span: Span,
    },

    #[error("duplicate export name {name:?}")]
    DuplicateExport { name: String, span: Span },

    #[error("start function {index} has type {found}, expected [] -> []")]
    StartSignature { index: u32, found: FuncType, span: Span },

    #[error("global {index} is immutable")]
    ImmutableGlobal { index: u32, span: Span },

    #[error("constant expression required, found {instruction}")]
    NotConstant { instruction: String, span: Span },
}

impl ValidationError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            ValidationError::TypeMismatch { .. }
            | ValidationError::ImmutableGlobal { .. }
            | ValidationError::NotConstant { .. } => DiagnosticKind::TypeMismatch,
            ValidationError::UnknownIndex { .. } => DiagnosticKind::UnresolvedIdentifier,
            ValidationError::DuplicateExport { .. } => DiagnosticKind::DuplicateIdentifier,
            ValidationError::StartSignature { .. } => DiagnosticKind::SignatureMismatch,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ValidationError::TypeMismatch { span, .. }
            | ValidationError::UnknownIndex { span, .. }
            | ValidationError::DuplicateExport { span, .. }
            | ValidationError::StartSignature { span, .. }
            | ValidationError::ImmutableGlobal { span, .. }
            | ValidationError::NotConstant { span, .. } => *span,
        }
    }
}

// ============================================================================
// Module Validation
// ============================================================================

/// Validate every function and module-level constraint, returning the module
/// untouched when nothing is wrong.
pub fn validate(module: Module) -> Result<Module, Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_imports(&module, &mut errors);
    for (i, global) in module.globals.iter().enumerate() {
        validate_global(&module, i, global, &mut errors);
    }
    for index in 0..module.functions.len() {
        if let Err(function_errors) = validate_function(&module, index as u32) {
            errors.extend(function_errors);
        }
    }
    validate_exports(&module, &mut errors);
    validate_start(&module, &mut errors);

    log::debug!(
        "validated {} functions, {} errors",
        module.functions.len(),
        errors.len()
    );
    if errors.is_empty() {
        Ok(module)
    } else {
        errors.sort_by_key(|e| e.span().start);
        Err(errors)
    }
}

fn validate_imports(module: &Module, errors: &mut Vec<ValidationError>) {
    for import in &module.imports {
        if let ImportDesc::Func { type_index, .. } = import.desc {
            if module.func_type(type_index).is_none() {
                errors.push(ValidationError::UnknownIndex {
                    namespace: Namespace::Type,
                    index: type_index,
                    span: import.span,
                });
            }
        }
    }
}

/// A global's initialiser must be one constant instruction of the global's
/// type. `global.get` may only read immutable imported globals.
fn validate_global(module: &Module, defined_index: usize, global: &Global, errors: &mut Vec<ValidationError>) {
    let mut produced = Vec::new();
    for inst in &global.init {
        let ty = match &inst.kind {
            InstructionKind::I32Const(_) => ValueType::I32,
            InstructionKind::I64Const(_) => ValueType::I64,
            InstructionKind::F32Const(_) => ValueType::F32,
            InstructionKind::F64Const(_) => ValueType::F64,
            InstructionKind::RefNull(t) => *t,
            InstructionKind::RefFunc(index) => {
                if *index >= module.count(ExternKind::Func) {
                    errors.push(ValidationError::UnknownIndex {
                        namespace: Namespace::Func,
                        index: *index,
                        span: inst.span,
                    });
                    return;
                }
                ValueType::FuncRef
            }
            InstructionKind::GlobalGet(index) => match module.global_type(*index) {
                Some((ty, true)) if !ty.mutable => ty.value_type,
                Some(_) => {
                    errors.push(ValidationError::NotConstant {
                        instruction: format!("global.get {}", index),
                        span: inst.span,
                    });
                    return;
                }
                None => {
                    errors.push(ValidationError::UnknownIndex {
                        namespace: Namespace::Global,
                        index: *index,
                        span: inst.span,
                    });
                    return;
                }
            },
            other => {
                errors.push(ValidationError::NotConstant {
                    instruction: other.mnemonic().to_string(),
                    span: inst.span,
                });
                return;
            }
        };
        produced.push(ty);
    }

    if produced != [global.ty.value_type] {
        let index = module.imported_count(ExternKind::Global) as usize + defined_index;
        errors.push(ValidationError::TypeMismatch {
            context: format!("initialiser of global {}", index),
            expected: StackTypes(&[global.ty.value_type]).to_string(),
            found: StackTypes(&produced).to_string(),
            span: global.init.first().map_or(Span::ZERO, |i| i.span),
        });
    }
}

fn validate_exports(module: &Module, errors: &mut Vec<ValidationError>) {
    let mut seen: HashMap<&str, Span> = HashMap::new();
    for export in &module.exports {
        if seen.insert(export.name.as_str(), export.span).is_some() {
            errors.push(ValidationError::DuplicateExport {
                name: export.name.clone(),
                span: export.span,
            });
        }
        let kind = export.desc.kind();
        if export.desc.index() >= module.count(kind) {
            errors.push(ValidationError::UnknownIndex {
                namespace: extern_namespace(kind),
                index: export.desc.index(),
                span: export.span,
            });
        }
    }
}

fn validate_start(module: &Module, errors: &mut Vec<ValidationError>) {
    let Some(index) = module.start else {
        return;
    };
    let imported = module.imported_count(ExternKind::Func);
    let span = index
        .checked_sub(imported)
        .and_then(|i| module.functions.get(i as usize))
        .map_or(Span::ZERO, |f| f.span);
    match module.func_signature(index) {
        None => errors.push(ValidationError::UnknownIndex {
            namespace: Namespace::Func,
            index,
            span,
        }),
        Some(ty) if !ty.params.is_empty() || !ty.results.is_empty() => {
            errors.push(ValidationError::StartSignature {
                index,
                found: ty.clone(),
                span,
            })
        }
        Some(_) => {}
    }
}

fn extern_namespace(kind: ExternKind) -> Namespace {
    match kind {
        ExternKind::Func => Namespace::Func,
        ExternKind::Table => Namespace::Table,
        ExternKind::Memory => Namespace::Memory,
        ExternKind::Global => Namespace::Global,
    }
}

// ============================================================================
// Function Validation
// ============================================================================

/// Validate the body of defined function `defined_index` (counting from the
/// first non-imported function).
pub fn validate_function(module: &Module, defined_index: u32) -> Result<(), Vec<ValidationError>> {
    let index = module.imported_count(ExternKind::Func) + defined_index;
    let Some(func) = module.functions.get(defined_index as usize) else {
        return Err(vec![ValidationError::UnknownIndex {
            namespace: Namespace::Func,
            index,
            span: Span::ZERO,
        }]);
    };
    let Some(ty) = module.func_type(func.type_index) else {
        return Err(vec![ValidationError::UnknownIndex {
            namespace: Namespace::Type,
            index: func.type_index,
            span: func.span,
        }]);
    };
    log::trace!(
        "validating function {} ({})",
        index,
        func.id.as_deref().unwrap_or("anonymous")
    );

    let mut validator = CodeValidator::new(module, func, ty);
    match validator.validate_body(&func.body) {
        Ok(()) => validator.check_frame_end("end of function", func.span),
        Err(abort) => validator.errors.push(abort),
    }

    if validator.errors.is_empty() {
        Ok(())
    } else {
        Err(validator.errors)
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum MaybeValue {
    Val(ValueType),
    /// Popped from an unreachable stack; matches anything.
    Unknown,
}

impl MaybeValue {
    fn matches(self, expected: ValueType) -> bool {
        match self {
            Val(t) => t == expected,
            Unknown => true,
        }
    }
}

impl fmt::Display for MaybeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Val(t) => write!(f, "{}", t),
            Unknown => write!(f, "_"),
        }
    }
}

fn describe(values: &[MaybeValue]) -> String {
    let inner: Vec<String> = values.iter().map(MaybeValue::to_string).collect();
    format!("[{}]", inner.join(" "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
}

#[derive(Debug, Clone)]
struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

impl CtrlFrame {
    /// Types a branch to this frame carries.
    fn label_types(&self) -> &[ValueType] {
        if self.kind == FrameKind::Loop {
            &self.start_types
        } else {
            &self.end_types
        }
    }
}

struct CodeValidator<'a> {
    module: &'a Module,
    /// Params followed by declared locals.
    locals: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
    errors: Vec<ValidationError>,
}

impl<'a> CodeValidator<'a> {
    fn new(module: &'a Module, func: &Function, ty: &FuncType) -> Self {
        let locals = ty
            .params
            .iter()
            .copied()
            .chain(func.locals.iter().map(|l| l.item))
            .collect();
        // Params are locals, not operands: the function frame starts empty.
        let frame = CtrlFrame {
            kind: FrameKind::Function,
            start_types: Vec::new(),
            end_types: ty.results.clone(),
            height: 0,
            unreachable: false,
        };
        Self {
            module,
            locals,
            vals: Vec::new(),
            ctrls: vec![frame],
            errors: Vec::new(),
        }
    }

    fn mismatch(&mut self, context: &str, span: Span, expected: String, found: String) {
        self.errors.push(ValidationError::TypeMismatch {
            context: context.to_string(),
            expected,
            found,
            span,
        });
    }

    fn push_val(&mut self, ty: ValueType) {
        self.vals.push(Val(ty));
    }

    fn push_vals(&mut self, types: &[ValueType]) {
        self.vals.extend(types.iter().map(|t| Val(*t)));
    }

    fn current(&self) -> &CtrlFrame {
        // The function frame is never popped.
        &self.ctrls[self.ctrls.len() - 1]
    }

    /// `None` when the current frame's operands are exhausted and it is
    /// reachable.
    fn pop_val(&mut self) -> Option<MaybeValue> {
        let frame = self.current();
        if self.vals.len() == frame.height {
            return frame.unreachable.then_some(Unknown);
        }
        self.vals.pop()
    }

    /// Pop `expected` (last type on top), recording one mismatch for the whole
    /// group if anything is missing or different.
    fn pop_expects(&mut self, expected: &[ValueType], inst: &Instruction) -> Vec<MaybeValue> {
        let mut popped = Vec::with_capacity(expected.len());
        let mut ok = true;
        for &want in expected.iter().rev() {
            match self.pop_val() {
                Some(value) => {
                    ok &= value.matches(want);
                    popped.push(value);
                }
                None => ok = false,
            }
        }
        popped.reverse();
        if !ok {
            self.mismatch(inst.kind.mnemonic(), inst.span, StackTypes(expected).to_string(), describe(&popped));
        }
        popped
    }

    fn pop_expect(&mut self, expected: ValueType, inst: &Instruction) {
        self.pop_expects(&[expected], inst);
    }

    /// Pop an operand of any type.
    fn pop_any(&mut self, inst: &Instruction) -> MaybeValue {
        match self.pop_val() {
            Some(value) => value,
            None => {
                self.mismatch(inst.kind.mnemonic(), inst.span, "a value".to_string(), "[]".to_string());
                Unknown
            }
        }
    }

    fn push_ctrl(&mut self, kind: FrameKind, ty: &FuncType, inst: &Instruction) {
        self.pop_expects(&ty.params, inst);
        self.ctrls.push(CtrlFrame {
            kind,
            start_types: ty.params.clone(),
            end_types: ty.results.clone(),
            height: self.vals.len(),
            unreachable: false,
        });
        self.push_vals(&ty.params);
    }

    /// Check the operands left in the current frame against its results and
    /// drop them. An unreachable frame may be missing a prefix of them.
    fn check_frame_end(&mut self, context: &str, span: Span) {
        let frame = self.current();
        let expected = &frame.end_types;
        let actual = &self.vals[frame.height..];

        let fits = actual.len() <= expected.len()
            && actual
                .iter()
                .zip(&expected[expected.len() - actual.len()..])
                .all(|(value, want)| value.matches(*want));
        let ok = fits && (frame.unreachable || actual.len() == expected.len());

        if !ok {
            let expected = StackTypes(expected).to_string();
            let found = describe(actual);
            self.mismatch(context, span, expected, found);
        }
        let height = self.current().height;
        self.vals.truncate(height);
    }

    fn pop_ctrl(&mut self, inst: &Instruction) {
        self.check_frame_end(&format!("end of {}", inst.kind.mnemonic()), inst.span);
        if let Some(frame) = self.ctrls.pop() {
            self.push_vals(&frame.end_types);
        }
    }

    fn unreachable(&mut self) {
        let height = self.current().height;
        self.vals.truncate(height);
        if let Some(frame) = self.ctrls.last_mut() {
            frame.unreachable = true;
        }
    }

    fn label_types(&self, depth: u32, span: Span) -> Result<Vec<ValueType>, ValidationError> {
        self.ctrls
            .len()
            .checked_sub(depth as usize + 1)
            .map(|i| self.ctrls[i].label_types().to_vec())
            .ok_or(ValidationError::UnknownIndex {
                namespace: Namespace::Label,
                index: depth,
                span,
            })
    }

    fn local(&self, index: u32, span: Span) -> Result<ValueType, ValidationError> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or(ValidationError::UnknownIndex {
                namespace: Namespace::Local,
                index,
                span,
            })
    }

    fn require_memory(&self, span: Span) -> Result<(), ValidationError> {
        if self.module.count(ExternKind::Memory) == 0 {
            return Err(ValidationError::UnknownIndex {
                namespace: Namespace::Memory,
                index: 0,
                span,
            });
        }
        Ok(())
    }

    fn validate_body(&mut self, body: &[Instruction]) -> Result<(), ValidationError> {
        for inst in body {
            self.validate_instruction(inst)?;
        }
        Ok(())
    }

    fn validate_instruction(&mut self, inst: &Instruction) -> Result<(), ValidationError> {
        use InstructionKind as I;

        match &inst.kind {
            I::Unreachable => self.unreachable(),
            I::Nop => {}

            I::Block { signature, body, .. } => {
                self.push_ctrl(FrameKind::Block, &signature.ty, inst);
                self.validate_body(body)?;
                self.pop_ctrl(inst);
            }
            I::Loop { signature, body, .. } => {
                self.push_ctrl(FrameKind::Loop, &signature.ty, inst);
                self.validate_body(body)?;
                self.pop_ctrl(inst);
            }
            I::If {
                signature,
                then_body,
                else_body,
                ..
            } => {
                self.pop_expect(ValueType::I32, inst);
                self.push_ctrl(FrameKind::If, &signature.ty, inst);
                self.validate_body(then_body)?;
                // A missing else behaves as an empty one.
                self.check_frame_end("end of if branch", inst.span);
                if let Some(frame) = self.ctrls.last_mut() {
                    frame.unreachable = false;
                }
                self.push_vals(&signature.ty.params);
                self.validate_body(else_body)?;
                self.pop_ctrl(inst);
            }

            I::Br { depth } => {
                let types = self.label_types(*depth, inst.span)?;
                self.pop_expects(&types, inst);
                self.unreachable();
            }
            I::BrIf { depth } => {
                let types = self.label_types(*depth, inst.span)?;
                self.pop_expect(ValueType::I32, inst);
                self.pop_expects(&types, inst);
                self.push_vals(&types);
            }
            I::BrTable { targets, default } => {
                self.pop_expect(ValueType::I32, inst);
                let default_types = self.label_types(*default, inst.span)?;
                for &target in targets {
                    let types = self.label_types(target, inst.span)?;
                    if types.len() != default_types.len() {
                        self.mismatch(
                            "br_table",
                            inst.span,
                            format!("label {} with arity {}", target, default_types.len()),
                            StackTypes(&types).to_string(),
                        );
                        continue;
                    }
                    let popped = self.pop_expects(&types, inst);
                    self.vals.extend(popped);
                }
                self.pop_expects(&default_types, inst);
                self.unreachable();
            }
            I::Return => {
                let results = self.ctrls[0].end_types.clone();
                self.pop_expects(&results, inst);
                self.unreachable();
            }

            I::Call { func } => {
                let ty = self
                    .module
                    .func_signature(*func)
                    .ok_or(ValidationError::UnknownIndex {
                        namespace: Namespace::Func,
                        index: *func,
                        span: inst.span,
                    })?;
                self.pop_expects(&ty.params, inst);
                self.push_vals(&ty.results);
            }
            I::CallIndirect { table, type_index } => {
                let table_type = self
                    .module
                    .table_type(*table)
                    .ok_or(ValidationError::UnknownIndex {
                        namespace: Namespace::Table,
                        index: *table,
                        span: inst.span,
                    })?;
                if table_type.element != ValueType::FuncRef {
                    self.mismatch(
                        "call_indirect",
                        inst.span,
                        "funcref table".to_string(),
                        format!("{} table", table_type.element),
                    );
                }
                let ty = self
                    .module
                    .func_type(*type_index)
                    .ok_or(ValidationError::UnknownIndex {
                        namespace: Namespace::Type,
                        index: *type_index,
                        span: inst.span,
                    })?;
                self.pop_expect(ValueType::I32, inst);
                self.pop_expects(&ty.params, inst);
                self.push_vals(&ty.results);
            }

            I::Drop => {
                self.pop_any(inst);
            }
            I::Select { result: Some(ty) } => {
                self.pop_expect(ValueType::I32, inst);
                self.pop_expects(&[*ty, *ty], inst);
                self.push_val(*ty);
            }
            I::Select { result: None } => {
                self.pop_expect(ValueType::I32, inst);
                let second = self.pop_any(inst);
                let first = self.pop_any(inst);
                let chosen = match (first, second) {
                    (Val(a), Val(b)) if a != b || a.is_ref() => {
                        self.mismatch(
                            "select",
                            inst.span,
                            "two operands of one numeric type".to_string(),
                            describe(&[first, second]),
                        );
                        Unknown
                    }
                    (Val(t), _) | (_, Val(t)) if t.is_ref() => {
                        self.mismatch(
                            "select",
                            inst.span,
                            "numeric operands".to_string(),
                            describe(&[first, second]),
                        );
                        Unknown
                    }
                    (Val(t), _) | (_, Val(t)) => Val(t),
                    (Unknown, Unknown) => Unknown,
                };
                self.vals.push(chosen);
            }

            I::LocalGet(index) => {
                let ty = self.local(*index, inst.span)?;
                self.push_val(ty);
            }
            I::LocalSet(index) => {
                let ty = self.local(*index, inst.span)?;
                self.pop_expect(ty, inst);
            }
            I::LocalTee(index) => {
                let ty = self.local(*index, inst.span)?;
                self.pop_expect(ty, inst);
                self.push_val(ty);
            }
            I::GlobalGet(index) => {
                let (ty, _) = self.global(*index, inst.span)?;
                self.push_val(ty.value_type);
            }
            I::GlobalSet(index) => {
                let (ty, _) = self.global(*index, inst.span)?;
                if !ty.mutable {
                    self.errors.push(ValidationError::ImmutableGlobal {
                        index: *index,
                        span: inst.span,
                    });
                }
                self.pop_expect(ty.value_type, inst);
            }

            I::Load { ty, .. } => {
                self.require_memory(inst.span)?;
                self.pop_expect(ValueType::I32, inst);
                self.push_val(*ty);
            }
            I::Store { ty, .. } => {
                self.require_memory(inst.span)?;
                self.pop_expects(&[ValueType::I32, *ty], inst);
            }
            I::MemorySize => {
                self.require_memory(inst.span)?;
                self.push_val(ValueType::I32);
            }
            I::MemoryGrow => {
                self.require_memory(inst.span)?;
                self.pop_expect(ValueType::I32, inst);
                self.push_val(ValueType::I32);
            }

            I::RefNull(ty) => self.push_val(*ty),
            I::RefIsNull => {
                let value = self.pop_any(inst);
                if let Val(t) = value {
                    if !t.is_ref() {
                        self.mismatch("ref.is_null", inst.span, "a reference".to_string(), t.to_string());
                    }
                }
                self.push_val(ValueType::I32);
            }
            I::RefFunc(index) => {
                if *index >= self.module.count(ExternKind::Func) {
                    return Err(ValidationError::UnknownIndex {
                        namespace: Namespace::Func,
                        index: *index,
                        span: inst.span,
                    });
                }
                self.push_val(ValueType::FuncRef);
            }

            I::I32Const(_) => self.push_val(ValueType::I32),
            I::I64Const(_) => self.push_val(ValueType::I64),
            I::F32Const(_) => self.push_val(ValueType::F32),
            I::F64Const(_) => self.push_val(ValueType::F64),
            I::Numeric(op) => {
                self.pop_expects(op.params(), inst);
                self.push_val(op.result());
            }
        }
        Ok(())
    }

    fn global(&self, index: u32, span: Span) -> Result<(GlobalType, bool), ValidationError> {
        self.module.global_type(index).ok_or(ValidationError::UnknownIndex {
            namespace: Namespace::Global,
            index,
            span,
        })
    }
}
