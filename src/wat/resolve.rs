//! Name resolution for WAT.
//!
//! Resolution happens in two passes. [`SymbolTable::collect`] walks the
//! module's fields once, in order, and gives every type, function, table,
//! memory and global its index, binding any `$name` it carries. The parser
//! then resolves references against the finished table, so a `call $f` may
//! appear before `$f` is defined.
//!
//! Function-local names live in a [`LocalScope`] and labels in a
//! [`LabelStack`]; the parser creates those per function body.

use super::error::ParseError;
use super::sexpr::SExpr;
use super::token::Span;
use std::collections::HashMap;
use std::fmt;

/// The namespaces an identifier can be bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Type,
    Func,
    Table,
    Memory,
    Global,
    Local,
    Label,
}

impl Namespace {
    /// The namespace a module field or import descriptor keyword binds in.
    pub fn from_field(keyword: &str) -> Option<Self> {
        match keyword {
            "type" => Some(Namespace::Type),
            "func" => Some(Namespace::Func),
            "table" => Some(Namespace::Table),
            "memory" => Some(Namespace::Memory),
            "global" => Some(Namespace::Global),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Namespace::Type => "type",
            Namespace::Func => "function",
            Namespace::Table => "table",
            Namespace::Memory => "memory",
            Namespace::Global => "global",
            Namespace::Local => "local",
            Namespace::Label => "label",
        })
    }
}

/// One namespace: `$name -> (index, span of the binding)` plus the next free
/// index.
#[derive(Debug, Default, Clone)]
struct Bindings {
    names: HashMap<String, (u32, Span)>,
    next: u32,
}

impl Bindings {
    fn bind(&mut self, namespace: Namespace, id: Option<&str>, span: Span) -> Result<u32, ParseError> {
        let index = self.next;
        self.next += 1;
        if let Some(name) = id {
            if let Some(&(_, first)) = self.names.get(name) {
                return Err(ParseError::DuplicateIdentifier {
                    namespace,
                    name: name.to_string(),
                    first,
                    span,
                });
            }
            self.names.insert(name.to_string(), (index, span));
        }
        Ok(index)
    }

    fn lookup(&self, namespace: Namespace, name: &str, span: Span) -> Result<u32, ParseError> {
        self.names
            .get(name)
            .map(|&(index, _)| index)
            .ok_or_else(|| ParseError::UnresolvedIdentifier {
                namespace,
                name: name.to_string(),
                span,
            })
    }
}

// ============================================================================
// Module Symbol Table
// ============================================================================

/// Module-level bindings for the five index spaces that can be named.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    types: Bindings,
    funcs: Bindings,
    tables: Bindings,
    memories: Bindings,
    globals: Bindings,
}

impl SymbolTable {
    /// First pass: bind every named type, function, table, memory and global
    /// across `fields`. Fields that are not lists, or not binding forms, are
    /// left for the parser to report.
    pub fn collect(fields: &[SExpr]) -> (SymbolTable, Vec<ParseError>) {
        let mut table = SymbolTable::default();
        let mut errors = Vec::new();

        for field in fields {
            let Some(list) = field.as_list() else {
                continue;
            };
            let Some(keyword) = list.head_keyword() else {
                continue;
            };

            // An import binds in the namespace of its descriptor.
            let binder = if keyword == "import" {
                list.get(3).and_then(SExpr::as_list)
            } else {
                Some(list)
            };
            let Some(binder) = binder else {
                continue;
            };
            let Some(namespace) = binder.head_keyword().and_then(Namespace::from_field) else {
                continue;
            };
            if keyword == "import" && namespace == Namespace::Type {
                continue;
            }

            let (id, span) = match binder.get(1) {
                Some(expr @ SExpr::Atom(_)) if expr.as_id().is_some() => (expr.as_id(), expr.span()),
                _ => (None, binder.span),
            };
            if let Err(e) = table.bind(namespace, id, span) {
                errors.push(e);
            }
        }

        log::debug!(
            "collected symbols: {} types, {} funcs, {} tables, {} memories, {} globals",
            table.types.next,
            table.funcs.next,
            table.tables.next,
            table.memories.next,
            table.globals.next
        );
        (table, errors)
    }

    fn space(&self, namespace: Namespace) -> Option<&Bindings> {
        match namespace {
            Namespace::Type => Some(&self.types),
            Namespace::Func => Some(&self.funcs),
            Namespace::Table => Some(&self.tables),
            Namespace::Memory => Some(&self.memories),
            Namespace::Global => Some(&self.globals),
            Namespace::Local | Namespace::Label => None,
        }
    }

    fn space_mut(&mut self, namespace: Namespace) -> Option<&mut Bindings> {
        match namespace {
            Namespace::Type => Some(&mut self.types),
            Namespace::Func => Some(&mut self.funcs),
            Namespace::Table => Some(&mut self.tables),
            Namespace::Memory => Some(&mut self.memories),
            Namespace::Global => Some(&mut self.globals),
            Namespace::Local | Namespace::Label => None,
        }
    }

    /// Bind the next index of `namespace`, naming it `id` if given.
    pub fn bind(&mut self, namespace: Namespace, id: Option<&str>, span: Span) -> Result<u32, ParseError> {
        match self.space_mut(namespace) {
            Some(space) => space.bind(namespace, id, span),
            None => Err(ParseError::syntax("module-level namespace", namespace.to_string(), span)),
        }
    }

    /// Index bound to `$name` in `namespace`.
    pub fn resolve(&self, namespace: Namespace, name: &str, span: Span) -> Result<u32, ParseError> {
        match self.space(namespace) {
            Some(space) => space.lookup(namespace, name, span),
            None => Err(ParseError::UnresolvedIdentifier {
                namespace,
                name: name.to_string(),
                span,
            }),
        }
    }

    /// Number of indices handed out in `namespace`.
    pub fn count(&self, namespace: Namespace) -> u32 {
        self.space(namespace).map_or(0, |space| space.next)
    }
}

// ============================================================================
// Function Scopes
// ============================================================================

/// Parameter and local names of one function, indexed params first.
#[derive(Debug, Default, Clone)]
pub struct LocalScope {
    bindings: Bindings,
}

impl LocalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, id: Option<&str>, span: Span) -> Result<u32, ParseError> {
        self.bindings.bind(Namespace::Local, id, span)
    }

    pub fn resolve(&self, name: &str, span: Span) -> Result<u32, ParseError> {
        self.bindings.lookup(Namespace::Local, name, span)
    }

    pub fn len(&self) -> usize {
        self.bindings.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.next == 0
    }
}

/// Labels of the enclosing blocks, outermost first.
#[derive(Debug, Default, Clone)]
pub struct LabelStack {
    labels: Vec<Option<String>>,
}

impl LabelStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: Option<String>) {
        self.labels.push(label);
    }

    pub fn pop(&mut self) -> Option<Option<String>> {
        self.labels.pop()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Branch depth of the innermost block labelled `name`.
    pub fn resolve(&self, name: &str, span: Span) -> Result<u32, ParseError> {
        self.labels
            .iter()
            .rev()
            .position(|label| label.as_deref() == Some(name))
            .map(|depth| depth as u32)
            .ok_or_else(|| ParseError::UnresolvedIdentifier {
                namespace: Namespace::Label,
                name: name.to_string(),
                span,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat::sexpr::read_all;

    fn fields(source: &str) -> Vec<SExpr> {
        read_all(source).expect("well-formed")
    }

    #[test]
    fn collect_assigns_indices_in_declaration_order() {
        let fields = fields(
            r#"(type $t (func))
               (import "env" "g" (global $g i32))
               (import "env" "f" (func $imported))
               (func $a) (func) (func $b)
               (memory $m 1)
               (global $h i32 (i32.const 0))"#,
        );
        let (table, errors) = SymbolTable::collect(&fields);
        assert!(errors.is_empty());

        let at = Span::ZERO;
        assert_eq!(table.resolve(Namespace::Type, "t", at), Ok(0));
        assert_eq!(table.resolve(Namespace::Func, "imported", at), Ok(0));
        assert_eq!(table.resolve(Namespace::Func, "a", at), Ok(1));
        assert_eq!(table.resolve(Namespace::Func, "b", at), Ok(3));
        assert_eq!(table.resolve(Namespace::Global, "g", at), Ok(0));
        assert_eq!(table.resolve(Namespace::Global, "h", at), Ok(1));
        assert_eq!(table.resolve(Namespace::Memory, "m", at), Ok(0));
        assert_eq!(table.count(Namespace::Func), 4);
        assert_eq!(table.count(Namespace::Table), 0);
    }

    #[test]
    fn duplicate_names_report_both_spans() {
        let fields = fields("(func $f)\n(func $f)");
        let (_, errors) = SymbolTable::collect(&fields);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ParseError::DuplicateIdentifier {
                namespace, name, first, span,
            } => {
                assert_eq!(*namespace, Namespace::Func);
                assert_eq!(name, "f");
                assert_eq!(first.line, 1);
                assert_eq!(span.line, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn same_name_in_different_namespaces() {
        let fields = fields("(func $x) (global $x i32 (i32.const 0)) (type $x (func))");
        let (table, errors) = SymbolTable::collect(&fields);
        assert!(errors.is_empty());
        assert_eq!(table.resolve(Namespace::Global, "x", Span::ZERO), Ok(0));
    }

    #[test]
    fn unknown_name() {
        let (table, _) = SymbolTable::collect(&[]);
        assert!(matches!(
            table.resolve(Namespace::Func, "missing", Span::ZERO),
            Err(ParseError::UnresolvedIdentifier { namespace: Namespace::Func, ref name, .. }) if name == "missing"
        ));
    }

    #[test]
    fn locals_are_unique_per_function() {
        let mut scope = LocalScope::new();
        assert_eq!(scope.bind(Some("a"), Span::ZERO), Ok(0));
        assert_eq!(scope.bind(None, Span::ZERO), Ok(1));
        assert_eq!(scope.bind(Some("b"), Span::ZERO), Ok(2));
        assert!(scope.bind(Some("a"), Span::ZERO).is_err());
        assert_eq!(scope.resolve("b", Span::ZERO), Ok(2));
        assert!(scope.resolve("c", Span::ZERO).is_err());
    }

    #[test]
    fn labels_resolve_innermost_first() {
        let mut labels = LabelStack::new();
        labels.push(Some("outer".into()));
        labels.push(None);
        labels.push(Some("inner".into()));
        assert_eq!(labels.resolve("inner", Span::ZERO), Ok(0));
        assert_eq!(labels.resolve("outer", Span::ZERO), Ok(2));

        // shadowing picks the nearest
        labels.push(Some("outer".into()));
        assert_eq!(labels.resolve("outer", Span::ZERO), Ok(0));
        labels.pop();
        assert_eq!(labels.resolve("outer", Span::ZERO), Ok(2));
        assert!(labels.resolve("nowhere", Span::ZERO).is_err());
    }
}
