//! WAT parser: turns the reader's S-expressions into a [`Module`].
//!
//! Parsing runs in three steps over the module's fields:
//!
//! 1. [`SymbolTable::collect`] binds every `$name` at module level, so
//!    references may point forward.
//! 2. All `(type ...)` fields are parsed, giving explicit type definitions the
//!    first indices of the type section. Inline signatures met later reuse a
//!    structurally equal entry if there is one, or are appended.
//! 3. Every other field is parsed in source order.
//!
//! A field that fails to parse is dropped and its error recorded; parsing
//! continues with the next field. Instructions may be written flat
//! (`local.get 0 local.get 1 i32.add`), folded (`(i32.add (local.get 0)
//! (local.get 1))`), or mixed. Folded operands are emitted ahead of the
//! instruction that consumes them, so the IR only ever holds the flat order.
//!
//! Types are not checked here; see [`crate::validate`].

use super::error::{LexError, ParseError};
use super::lexer::Lexer;
use super::resolve::{LabelStack, LocalScope, Namespace, SymbolTable};
use super::sexpr::{self, Document, SExpr, SExprList};
use super::token::{FloatLit, SignedValue, Span, Token, TokenKind};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::ir::{
    BlockSignature, BlockType, Export, ExportDesc, ExternKind, FuncType, Function, Global, GlobalType, Import,
    ImportDesc, Instruction, InstructionKind, Limits, Local, MemArg, Memory, MemoryOp, Module, Named, NumericOp, Param,
    Table, TableType, ValueType,
};
use crate::limits::{
    MAX_BR_TABLE_LABELS, MAX_FUNCTION_LOCALS, MAX_FUNCTION_PARAMS, MAX_FUNCTION_RESULTS, MAX_MEMORIES,
    MAX_MEMORY_PAGES, MAX_NESTING_DEPTH,
};

// ============================================================================
// Entry Points
// ============================================================================

/// Parse WAT source into an unvalidated [`Module`].
///
/// Returns every lexical, reader and parse error found, in source order.
///
/// ```
/// let module = watfront::wat::parse("(module (func $f (param i32) (result i32) local.get 0))").unwrap();
/// assert_eq!(module.functions.len(), 1);
/// assert_eq!(module.types.len(), 1);
/// ```
pub fn parse(source: &str) -> Result<Module, Diagnostics> {
    parse_document(sexpr::read_document(source))
}

/// Parse an already tokenised source.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Module, Diagnostics> {
    let reader = sexpr::Reader::new(tokens.into_iter().map(Ok::<Token, LexError>));
    parse_document(reader.read_document())
}

fn parse_document(document: Document) -> Result<Module, Diagnostics> {
    let (module, parse_errors) = ModuleParser::parse(&document.forms);

    let mut diagnostics: Vec<Diagnostic> = document.errors.into_iter().map(Diagnostic::from).collect();
    diagnostics.extend(parse_errors.into_iter().map(Diagnostic::from));
    if diagnostics.is_empty() {
        Ok(module)
    } else {
        diagnostics.sort_by_key(|d| d.span.start);
        log::debug!("parse failed with {} diagnostics", diagnostics.len());
        Err(Diagnostics(diagnostics))
    }
}

// ============================================================================
// Item Cursor
// ============================================================================

/// Walks the items of one list. Immediates, labels and flat instructions are
/// all read through it, so a flat sequence and a folded form's operands share
/// one code path.
#[derive(Debug, Clone)]
struct Items<'a> {
    items: &'a [SExpr],
    pos: usize,
    /// Where "expected X" errors point when the list runs out.
    end: Span,
}

impl<'a> Items<'a> {
    fn new(items: &'a [SExpr], end: Span) -> Self {
        Self { items, pos: 0, end }
    }

    /// The items of `list` from `start` on.
    fn of(list: SExprList<'a>, start: usize) -> Self {
        Self::new(list.rest(start), list.end_span())
    }

    fn peek(&self) -> Option<&'a SExpr> {
        self.items.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a SExpr> {
        let item = self.items.get(self.pos)?;
        self.pos += 1;
        Some(item)
    }

    fn expect(&mut self, expected: &str) -> Result<&'a SExpr, ParseError> {
        self.bump().ok_or_else(|| ParseError::missing(expected, self.end))
    }

    fn peek_keyword(&self) -> Option<&'a str> {
        self.peek().and_then(SExpr::as_keyword)
    }

    fn peek_list_headed(&self, keyword: &str) -> Option<SExprList<'a>> {
        self.peek()
            .and_then(SExpr::as_list)
            .filter(|list| list.head_keyword() == Some(keyword))
    }

    /// Consume a `$name` if one is next.
    fn take_id(&mut self) -> Option<String> {
        let id = self.peek()?.as_id()?.to_string();
        self.pos += 1;
        Some(id)
    }

    /// Span of the last item consumed.
    fn prev_span(&self) -> Span {
        self.items[..self.pos].last().map_or(self.end, SExpr::span)
    }

    /// Fail if anything is left.
    fn finish(&self) -> Result<(), ParseError> {
        match self.peek() {
            Some(extra) => Err(ParseError::unexpected("')'", extra)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Module Parser
// ============================================================================

/// Next free index in each extern index space, claimed as fields are parsed
/// in the same order [`SymbolTable::collect`] saw them.
#[derive(Debug, Default)]
struct IndexCounters {
    func: u32,
    table: u32,
    memory: u32,
    global: u32,
}

struct ModuleParser {
    symbols: SymbolTable,
    module: Module,
    errors: Vec<ParseError>,
    counters: IndexCounters,
    /// First non-import definition seen; imports after it are rejected.
    first_definition: Option<ExternKind>,
    // Per function body
    locals: LocalScope,
    labels: LabelStack,
}

impl ModuleParser {
    fn parse(forms: &[SExpr]) -> (Module, Vec<ParseError>) {
        let mut errors = Vec::new();
        let (id, fields) = split_module(forms, &mut errors);

        let (symbols, symbol_errors) = SymbolTable::collect(fields);
        errors.extend(symbol_errors);

        let mut parser = ModuleParser {
            symbols,
            module: Module {
                id,
                ..Module::default()
            },
            errors,
            counters: IndexCounters::default(),
            first_definition: None,
            locals: LocalScope::new(),
            labels: LabelStack::new(),
        };

        // Explicit type definitions take the first type indices.
        for list in fields.iter().filter_map(SExpr::as_list) {
            if list.head_keyword() != Some("type") {
                continue;
            }
            if let Err(e) = parser.parse_type_def(list) {
                // Keep later type indices aligned with the symbol table.
                parser.module.types.push(Named::anonymous(FuncType::default()));
                parser.errors.push(e);
            }
        }

        for field in fields {
            if let Err(e) = parser.parse_field(field) {
                parser.errors.push(e);
            }
        }

        log::debug!(
            "parsed module: {} types, {} imports, {} functions, {} tables, {} memories, {} globals, {} exports",
            parser.module.types.len(),
            parser.module.imports.len(),
            parser.module.functions.len(),
            parser.module.tables.len(),
            parser.module.memories.len(),
            parser.module.globals.len(),
            parser.module.exports.len()
        );
        (parser.module, parser.errors)
    }

    fn parse_field(&mut self, field: &SExpr) -> Result<(), ParseError> {
        let list = field
            .as_list()
            .ok_or_else(|| ParseError::unexpected("module field", field))?;
        log::trace!("parsing field {} at {}", field.describe(), list.span);

        match list.head_keyword() {
            Some("type") => Ok(()),
            Some("import") => self.parse_import(list),
            Some("func") => self.parse_func(list),
            Some("table") => self.parse_table(list),
            Some("memory") => self.parse_memory(list),
            Some("global") => self.parse_global(list),
            Some("export") => self.parse_export(list),
            Some("start") => self.parse_start(list),
            Some(kw @ ("elem" | "data")) => Err(ParseError::syntax(
                "module field",
                format!("unsupported field '{}'", kw),
                list.span,
            )),
            _ => Err(ParseError::unexpected("module field", field)),
        }
    }

    fn claim(&mut self, kind: ExternKind) -> u32 {
        let slot = match kind {
            ExternKind::Func => &mut self.counters.func,
            ExternKind::Table => &mut self.counters.table,
            ExternKind::Memory => &mut self.counters.memory,
            ExternKind::Global => &mut self.counters.global,
        };
        let index = *slot;
        *slot += 1;
        index
    }

    /// Imported and defined memories share one index space of at most
    /// `MAX_MEMORIES` entries.
    fn check_memory_count(&self, span: Span) -> Result<(), ParseError> {
        if self.counters.memory as usize > MAX_MEMORIES {
            return Err(ParseError::syntax(
                format!("at most {} memory", MAX_MEMORIES),
                format!("memory {}", self.counters.memory - 1),
                span,
            ));
        }
        Ok(())
    }

    fn note_definition(&mut self, kind: ExternKind) {
        self.first_definition.get_or_insert(kind);
    }

    fn check_import_order(&self, span: Span) -> Result<(), ParseError> {
        match self.first_definition {
            Some(kind) => Err(ParseError::syntax(
                "imports before all definitions",
                format!("import after {} definition", kind),
                span,
            )),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------------

    /// Grammar: `type ::= (type id? (func (param ...)* (result ...)*))`
    fn parse_type_def(&mut self, list: SExprList) -> Result<(), ParseError> {
        let mut items = Items::of(list, 1);
        let id = items.take_id();
        let func = items.expect("'(func ...)'")?;
        let func_list = func
            .as_list()
            .filter(|l| l.head_keyword() == Some("func"))
            .ok_or_else(|| ParseError::unexpected("'(func ...)'", func))?;
        items.finish()?;

        let mut inner = Items::of(func_list, 1);
        let (params, results) = parse_signature(&mut inner, true)?;
        inner.finish()?;

        let params = params.into_iter().map(|(p, _)| p.item).collect();
        self.module.types.push(Named::new(id, FuncType::new(params, results)));
        Ok(())
    }

    /// Index of the first type structurally equal to `ty`, appending one if
    /// there is none.
    fn intern_type(&mut self, ty: FuncType) -> u32 {
        if let Some(index) = self.module.types.iter().position(|t| t.item == ty) {
            return index as u32;
        }
        self.module.types.push(Named::anonymous(ty));
        (self.module.types.len() - 1) as u32
    }

    /// Consume an optional `(type x)`, returning the index and the form's span.
    fn parse_type_ref(&self, items: &mut Items) -> Result<Option<(u32, Span)>, ParseError> {
        let Some(list) = items.peek_list_headed("type") else {
            return Ok(None);
        };
        items.bump();
        let mut inner = Items::of(list, 1);
        let index = self.parse_index(inner.expect("type index")?, Namespace::Type)?;
        inner.finish()?;
        Ok(Some((index, list.span)))
    }

    /// Settle an explicit type reference against an inline signature.
    ///
    /// With both present they must agree. With only the inline form the type
    /// is interned.
    fn resolve_signature(
        &mut self,
        explicit: Option<(u32, Span)>,
        inline: FuncType,
        inline_written: bool,
    ) -> Result<(u32, FuncType), ParseError> {
        let Some((index, span)) = explicit else {
            let index = self.intern_type(inline.clone());
            return Ok((index, inline));
        };
        let declared = self
            .module
            .func_type(index)
            .cloned()
            .ok_or(ParseError::UnknownIndex {
                namespace: Namespace::Type,
                index,
                span,
            })?;
        if inline_written && declared != inline {
            return Err(ParseError::SignatureMismatch {
                index,
                declared,
                inline,
                span,
            });
        }
        Ok((index, declared))
    }

    /// Grammar: `typeuse ::= (type x)? (param id? t*)* (result t*)*`
    ///
    /// Returns the type index and one parameter per param of the type, with
    /// the span each was written at.
    fn parse_type_use(&mut self, items: &mut Items, named_params: bool) -> Result<TypeUse, ParseError> {
        let explicit = self.parse_type_ref(items)?;
        let (params, results) = parse_signature(items, named_params)?;
        let inline_written = !params.is_empty() || !results.is_empty();
        let inline = FuncType::new(params.iter().map(|(p, _)| p.item).collect(), results);

        let (type_index, ty) = self.resolve_signature(explicit, inline, inline_written)?;
        let params = if inline_written {
            params
        } else {
            let span = explicit.map_or(items.end, |(_, span)| span);
            ty.params.iter().map(|t| (Named::anonymous(*t), span)).collect()
        };
        Ok(TypeUse { type_index, params })
    }

    /// Grammar: `blocktype ::= (type x)? (param t*)* (result t*)*`
    ///
    /// A lone result, or nothing, is kept in its short form; anything else
    /// refers to the type section.
    fn parse_block_type(&mut self, items: &mut Items) -> Result<BlockSignature, ParseError> {
        let explicit = self.parse_type_ref(items)?;
        let (params, results) = parse_signature(items, false)?;
        let inline_written = !params.is_empty() || !results.is_empty();
        let inline = FuncType::new(params.into_iter().map(|(p, _)| p.item).collect(), results);

        if explicit.is_none() && inline.params.is_empty() && inline.results.len() <= 1 {
            let declared = inline.results.first().map_or(BlockType::Empty, |t| BlockType::Value(*t));
            return Ok(BlockSignature { declared, ty: inline });
        }
        let (index, ty) = self.resolve_signature(explicit, inline, inline_written)?;
        Ok(BlockSignature {
            declared: BlockType::TypeIndex(index),
            ty,
        })
    }

    // ------------------------------------------------------------------------
    // Imports and Exports
    // ------------------------------------------------------------------------

    /// Grammar: `import ::= (import name name importdesc)`
    fn parse_import(&mut self, list: SExprList) -> Result<(), ParseError> {
        let mut items = Items::of(list, 1);
        let module = parse_name(items.expect("module name")?)?;
        let name = parse_name(items.expect("import name")?)?;
        let desc_expr = items.expect("import descriptor")?;
        items.finish()?;

        let desc_list = desc_expr
            .as_list()
            .ok_or_else(|| ParseError::unexpected("import descriptor", desc_expr))?;
        let kind = match desc_list.head_keyword() {
            Some("func") => ExternKind::Func,
            Some("table") => ExternKind::Table,
            Some("memory") => ExternKind::Memory,
            Some("global") => ExternKind::Global,
            _ => return Err(ParseError::unexpected("import descriptor", desc_expr)),
        };
        self.claim(kind);
        self.check_import_order(list.span)?;
        if kind == ExternKind::Memory {
            self.check_memory_count(desc_expr.span())?;
        }

        let mut desc_items = Items::of(desc_list, 1);
        let id = desc_items.take_id();
        let desc = self.parse_import_desc(kind, id, &mut desc_items)?;
        desc_items.finish()?;
        self.module.imports.push(Import {
            module,
            name,
            desc,
            span: list.span,
        });
        Ok(())
    }

    fn parse_import_desc(
        &mut self,
        kind: ExternKind,
        id: Option<String>,
        items: &mut Items,
    ) -> Result<ImportDesc, ParseError> {
        Ok(match kind {
            ExternKind::Func => ImportDesc::Func {
                id,
                type_index: self.parse_type_use(items, true)?.type_index,
            },
            ExternKind::Table => ImportDesc::Table {
                id,
                ty: parse_table_type(items)?,
            },
            ExternKind::Memory => ImportDesc::Memory {
                id,
                limits: parse_memory_limits(items)?,
            },
            ExternKind::Global => ImportDesc::Global {
                id,
                ty: parse_global_type(items)?,
            },
        })
    }

    /// Consume an inline `(import "m" "n")`.
    fn take_inline_import(&self, items: &mut Items) -> Result<Option<(String, String)>, ParseError> {
        let Some(list) = items.peek_list_headed("import") else {
            return Ok(None);
        };
        items.bump();
        self.check_import_order(list.span)?;
        let mut inner = Items::of(list, 1);
        let module = parse_name(inner.expect("module name")?)?;
        let name = parse_name(inner.expect("import name")?)?;
        inner.finish()?;
        Ok(Some((module, name)))
    }

    /// Consume inline `(export "n")` forms, exporting `index` under each name.
    fn parse_inline_exports(&mut self, items: &mut Items, kind: ExternKind, index: u32) -> Result<(), ParseError> {
        while let Some(list) = items.peek_list_headed("export") {
            items.bump();
            let mut inner = Items::of(list, 1);
            let name = parse_name(inner.expect("export name")?)?;
            inner.finish()?;
            self.module.exports.push(Export {
                name,
                desc: ExportDesc::new(kind, index),
                span: list.span,
            });
        }
        Ok(())
    }

    /// Grammar: `export ::= (export name (func|table|memory|global x))`
    fn parse_export(&mut self, list: SExprList) -> Result<(), ParseError> {
        let mut items = Items::of(list, 1);
        let name = parse_name(items.expect("export name")?)?;
        let desc_expr = items.expect("export descriptor")?;
        items.finish()?;

        let desc_list = desc_expr
            .as_list()
            .ok_or_else(|| ParseError::unexpected("export descriptor", desc_expr))?;
        let (kind, namespace) = match desc_list.head_keyword() {
            Some("func") => (ExternKind::Func, Namespace::Func),
            Some("table") => (ExternKind::Table, Namespace::Table),
            Some("memory") => (ExternKind::Memory, Namespace::Memory),
            Some("global") => (ExternKind::Global, Namespace::Global),
            _ => return Err(ParseError::unexpected("export descriptor", desc_expr)),
        };
        let mut inner = Items::of(desc_list, 1);
        let index = self.parse_index(inner.expect(&format!("{} index", namespace))?, namespace)?;
        inner.finish()?;

        self.module.exports.push(Export {
            name,
            desc: ExportDesc::new(kind, index),
            span: list.span,
        });
        Ok(())
    }

    /// Grammar: `start ::= (start funcidx)`
    fn parse_start(&mut self, list: SExprList) -> Result<(), ParseError> {
        let mut items = Items::of(list, 1);
        let index = self.parse_index(items.expect("function index")?, Namespace::Func)?;
        items.finish()?;
        if self.module.start.is_some() {
            return Err(ParseError::syntax("a single start field", "'(start ...)'", list.span));
        }
        self.module.start = Some(index);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------------

    /// Grammar: `func ::= (func id? (export name)* (import name name)? typeuse local* instr*)`
    fn parse_func(&mut self, list: SExprList) -> Result<(), ParseError> {
        let index = self.claim(ExternKind::Func);
        let mut items = Items::of(list, 1);
        let id = items.take_id();
        self.parse_inline_exports(&mut items, ExternKind::Func, index)?;

        if let Some((module, name)) = self.take_inline_import(&mut items)? {
            let type_index = self.parse_type_use(&mut items, true)?.type_index;
            items.finish()?;
            self.module.imports.push(Import {
                module,
                name,
                desc: ImportDesc::Func { id, type_index },
                span: list.span,
            });
            return Ok(());
        }
        self.note_definition(ExternKind::Func);

        self.locals = LocalScope::new();
        self.labels = LabelStack::new();

        let type_use = self.parse_type_use(&mut items, true)?;
        let mut params = Vec::with_capacity(type_use.params.len());
        for (param, span) in type_use.params {
            self.locals.bind(param.id.as_deref(), span)?;
            params.push(param);
        }

        let mut locals = Vec::new();
        while let Some(local_list) = items.peek_list_headed("local") {
            items.bump();
            for local in parse_local(local_list)? {
                self.locals.bind(local.id.as_deref(), local_list.span)?;
                locals.push(local);
            }
        }
        if locals.len() > MAX_FUNCTION_LOCALS {
            return Err(ParseError::syntax(
                format!("at most {} locals", MAX_FUNCTION_LOCALS),
                format!("{} locals", locals.len()),
                list.span,
            ));
        }

        let body = self.parse_instructions(&mut items)?;
        self.module.functions.push(Function {
            id,
            type_index: type_use.type_index,
            params,
            locals,
            body,
            span: list.span,
        });
        Ok(())
    }

    /// Grammar: `table ::= (table id? (export name)* (import name name)? limits reftype)`
    fn parse_table(&mut self, list: SExprList) -> Result<(), ParseError> {
        let index = self.claim(ExternKind::Table);
        let mut items = Items::of(list, 1);
        let id = items.take_id();
        self.parse_inline_exports(&mut items, ExternKind::Table, index)?;
        let import = self.take_inline_import(&mut items)?;

        let ty = parse_table_type(&mut items)?;
        items.finish()?;
        match import {
            Some((module, name)) => self.module.imports.push(Import {
                module,
                name,
                desc: ImportDesc::Table { id, ty },
                span: list.span,
            }),
            None => {
                self.note_definition(ExternKind::Table);
                self.module.tables.push(Table { id, ty });
            }
        }
        Ok(())
    }

    /// Grammar: `mem ::= (memory id? (export name)* (import name name)? limits)`
    fn parse_memory(&mut self, list: SExprList) -> Result<(), ParseError> {
        let index = self.claim(ExternKind::Memory);
        self.check_memory_count(list.span)?;
        let mut items = Items::of(list, 1);
        let id = items.take_id();
        self.parse_inline_exports(&mut items, ExternKind::Memory, index)?;
        let import = self.take_inline_import(&mut items)?;

        let limits = parse_memory_limits(&mut items)?;
        items.finish()?;
        match import {
            Some((module, name)) => self.module.imports.push(Import {
                module,
                name,
                desc: ImportDesc::Memory { id, limits },
                span: list.span,
            }),
            None => {
                self.note_definition(ExternKind::Memory);
                self.module.memories.push(Memory { id, limits });
            }
        }
        Ok(())
    }

    /// Grammar: `global ::= (global id? (export name)* (import name name)? globaltype expr)`
    fn parse_global(&mut self, list: SExprList) -> Result<(), ParseError> {
        let index = self.claim(ExternKind::Global);
        let mut items = Items::of(list, 1);
        let id = items.take_id();
        self.parse_inline_exports(&mut items, ExternKind::Global, index)?;

        if let Some((module, name)) = self.take_inline_import(&mut items)? {
            let ty = parse_global_type(&mut items)?;
            items.finish()?;
            self.module.imports.push(Import {
                module,
                name,
                desc: ImportDesc::Global { id, ty },
                span: list.span,
            });
            return Ok(());
        }
        self.note_definition(ExternKind::Global);

        let ty = parse_global_type(&mut items)?;
        self.locals = LocalScope::new();
        self.labels = LabelStack::new();
        let init = self.parse_instructions(&mut items)?;
        self.module.globals.push(Global { id, ty, init });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Indices
    // ------------------------------------------------------------------------

    /// A numeric index, or a `$name` resolved in `namespace`.
    fn parse_index(&self, expr: &SExpr, namespace: Namespace) -> Result<u32, ParseError> {
        match expr.as_atom().map(|t| &t.kind) {
            Some(TokenKind::Integer(value)) => value
                .to_u32()
                .ok_or_else(|| ParseError::unexpected(format!("{} index", namespace), expr)),
            Some(TokenKind::Id(name)) => match namespace {
                Namespace::Local => self.locals.resolve(name, expr.span()),
                Namespace::Label => self.labels.resolve(name, expr.span()),
                _ => self.symbols.resolve(namespace, name, expr.span()),
            },
            _ => Err(ParseError::unexpected(format!("{} index", namespace), expr)),
        }
    }

    fn expect_index(&self, items: &mut Items, namespace: Namespace) -> Result<u32, ParseError> {
        let expr = items.expect(&format!("{} index", namespace))?;
        self.parse_index(expr, namespace)
    }

    // ------------------------------------------------------------------------
    // Instruction Sequences
    // ------------------------------------------------------------------------

    /// Parse instructions to the end of `items`. A stray `end` or `else` is an
    /// error.
    fn parse_instructions(&mut self, items: &mut Items) -> Result<Vec<Instruction>, ParseError> {
        let (body, terminator) = self.parse_sequence(items)?;
        match terminator {
            Some(stray) => Err(ParseError::unexpected("instruction", stray)),
            None => Ok(body),
        }
    }

    /// Parse instructions until an `end` or `else` keyword or the end of
    /// `items`. The keyword is returned, not consumed.
    fn parse_sequence<'a>(
        &mut self,
        items: &mut Items<'a>,
    ) -> Result<(Vec<Instruction>, Option<&'a SExpr>), ParseError> {
        let mut body = Vec::new();
        while let Some(expr) = items.peek() {
            if matches!(expr.as_keyword(), Some("end" | "else")) {
                return Ok((body, Some(expr)));
            }
            self.parse_instruction(items, &mut body)?;
        }
        Ok((body, None))
    }

    /// Parse the instruction at the front of `items`, appending it (and for
    /// folded forms, its operands) to `out`.
    fn parse_instruction(&mut self, items: &mut Items, out: &mut Vec<Instruction>) -> Result<(), ParseError> {
        let Some(expr) = items.bump() else {
            return Ok(());
        };
        let (keyword, start) = match expr {
            SExpr::List { .. } => return self.parse_folded(expr, out),
            SExpr::Atom(Token {
                kind: TokenKind::Keyword(kw),
                span,
            }) => (kw.as_str(), *span),
            SExpr::Atom(_) => return Err(ParseError::unexpected("instruction", expr)),
        };

        let instruction = match keyword {
            "block" | "loop" => self.parse_flat_block(keyword, start, items)?,
            "if" => self.parse_flat_if(start, items)?,
            _ => {
                let kind = self.parse_plain(keyword, start, items)?;
                Instruction::new(kind, start.to(items.prev_span()))
            }
        };
        out.push(instruction);
        Ok(())
    }

    fn enter_block(&mut self, label: Option<String>, span: Span) -> Result<(), ParseError> {
        if self.labels.len() >= MAX_NESTING_DEPTH {
            return Err(ParseError::syntax(
                format!("at most {} nested blocks", MAX_NESTING_DEPTH),
                "deeper nesting",
                span,
            ));
        }
        self.labels.push(label);
        Ok(())
    }

    /// Grammar: `block label blocktype instr* end id?` (and the same for `loop`)
    fn parse_flat_block(&mut self, keyword: &str, start: Span, items: &mut Items) -> Result<Instruction, ParseError> {
        let label = items.take_id();
        let signature = self.parse_block_type(items)?;

        self.enter_block(label.clone(), start)?;
        let sequence = self.parse_sequence(items);
        self.labels.pop();
        let (body, terminator) = sequence?;

        expect_end(items, terminator, label.as_deref())?;
        let span = start.to(items.prev_span());
        Ok(Instruction::new(block_kind(keyword, label, signature, body), span))
    }

    /// Grammar: `if label blocktype instr* (else id? instr*)? end id?`
    fn parse_flat_if(&mut self, start: Span, items: &mut Items) -> Result<Instruction, ParseError> {
        let label = items.take_id();
        let signature = self.parse_block_type(items)?;

        self.enter_block(label.clone(), start)?;
        let branches = self.parse_flat_branches(items, label.as_deref());
        self.labels.pop();
        let (then_body, else_body, terminator) = branches?;

        expect_end(items, terminator, label.as_deref())?;
        let span = start.to(items.prev_span());
        Ok(Instruction::new(
            InstructionKind::If {
                label,
                signature,
                then_body,
                else_body,
            },
            span,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn parse_flat_branches<'a>(
        &mut self,
        items: &mut Items<'a>,
        label: Option<&str>,
    ) -> Result<(Vec<Instruction>, Vec<Instruction>, Option<&'a SExpr>), ParseError> {
        let (then_body, terminator) = self.parse_sequence(items)?;
        match terminator {
            Some(t) if t.as_keyword() == Some("else") => {
                items.bump();
                check_end_label(items, label)?;
                let (else_body, terminator) = self.parse_sequence(items)?;
                Ok((then_body, else_body, terminator))
            }
            _ => Ok((then_body, Vec::new(), terminator)),
        }
    }

    /// Grammar:
    /// - `(block label blocktype instr*)`, `(loop label blocktype instr*)`
    /// - `(if label blocktype foldedinstr* (then instr*) (else instr*)?)`
    /// - `(plaininstr foldedinstr*)`
    fn parse_folded(&mut self, expr: &SExpr, out: &mut Vec<Instruction>) -> Result<(), ParseError> {
        let Some(list) = expr.as_list() else {
            return Err(ParseError::unexpected("folded instruction", expr));
        };
        let Some(keyword) = list.head_keyword() else {
            return Err(ParseError::unexpected("instruction", expr));
        };
        let mut items = Items::of(list, 1);

        match keyword {
            "block" | "loop" => {
                let label = items.take_id();
                let signature = self.parse_block_type(&mut items)?;
                self.enter_block(label.clone(), list.span)?;
                let body = self.parse_instructions(&mut items);
                self.labels.pop();
                out.push(Instruction::new(block_kind(keyword, label, signature, body?), list.span));
            }
            "if" => {
                let label = items.take_id();
                let signature = self.parse_block_type(&mut items)?;

                // The condition is evaluated outside the if's own label scope.
                while let Some(operand) = items.peek() {
                    if operand.is_list_headed_by("then") {
                        break;
                    }
                    if operand.as_list().is_none() {
                        return Err(ParseError::unexpected("'(then ...)'", operand));
                    }
                    items.bump();
                    self.parse_folded(operand, out)?;
                }
                let then_list = items
                    .peek_list_headed("then")
                    .ok_or_else(|| ParseError::missing("'(then ...)'", items.end))?;
                items.bump();
                let else_list = items.peek_list_headed("else");
                if else_list.is_some() {
                    items.bump();
                }
                items.finish()?;

                self.enter_block(label.clone(), list.span)?;
                let branches = self.parse_folded_branches(then_list, else_list);
                self.labels.pop();
                let (then_body, else_body) = branches?;
                out.push(Instruction::new(
                    InstructionKind::If {
                        label,
                        signature,
                        then_body,
                        else_body,
                    },
                    list.span,
                ));
            }
            _ => {
                let kind = self.parse_plain(keyword, list.items[0].span(), &mut items)?;
                while let Some(operand) = items.bump() {
                    if operand.as_list().is_none() {
                        return Err(ParseError::unexpected("folded instruction", operand));
                    }
                    self.parse_folded(operand, out)?;
                }
                out.push(Instruction::new(kind, list.span));
            }
        }
        Ok(())
    }

    fn parse_folded_branches(
        &mut self,
        then_list: SExprList,
        else_list: Option<SExprList>,
    ) -> Result<(Vec<Instruction>, Vec<Instruction>), ParseError> {
        let then_body = self.parse_instructions(&mut Items::of(then_list, 1))?;
        let else_body = match else_list {
            Some(list) => self.parse_instructions(&mut Items::of(list, 1))?,
            None => Vec::new(),
        };
        Ok((then_body, else_body))
    }

    // ------------------------------------------------------------------------
    // Plain Instructions
    // ------------------------------------------------------------------------

    /// Parse a non-block instruction's immediates from `items`.
    fn parse_plain(&mut self, keyword: &str, span: Span, items: &mut Items) -> Result<InstructionKind, ParseError> {
        use InstructionKind as I;

        let kind = match keyword {
            "unreachable" => I::Unreachable,
            "nop" => I::Nop,
            "return" => I::Return,
            "drop" => I::Drop,
            "br" => I::Br {
                depth: self.expect_index(items, Namespace::Label)?,
            },
            "br_if" => I::BrIf {
                depth: self.expect_index(items, Namespace::Label)?,
            },
            "br_table" => self.parse_br_table(items)?,
            "call" => I::Call {
                func: self.expect_index(items, Namespace::Func)?,
            },
            "call_indirect" => {
                let table = match items.peek() {
                    Some(expr) if is_index(expr) => {
                        items.bump();
                        self.parse_index(expr, Namespace::Table)?
                    }
                    _ => 0,
                };
                let type_use = self.parse_type_use(items, false)?;
                I::CallIndirect {
                    table,
                    type_index: type_use.type_index,
                }
            }
            "select" => I::Select {
                result: parse_select_result(items)?,
            },
            "local.get" => I::LocalGet(self.expect_index(items, Namespace::Local)?),
            "local.set" => I::LocalSet(self.expect_index(items, Namespace::Local)?),
            "local.tee" => I::LocalTee(self.expect_index(items, Namespace::Local)?),
            "global.get" => I::GlobalGet(self.expect_index(items, Namespace::Global)?),
            "global.set" => I::GlobalSet(self.expect_index(items, Namespace::Global)?),
            "memory.size" => I::MemorySize,
            "memory.grow" => I::MemoryGrow,
            "ref.null" => {
                let heap = items.expect("heap type")?;
                match heap.as_keyword() {
                    Some("func") => I::RefNull(ValueType::FuncRef),
                    Some("extern") => I::RefNull(ValueType::ExternRef),
                    _ => return Err(ParseError::unexpected("heap type", heap)),
                }
            }
            "ref.is_null" => I::RefIsNull,
            "ref.func" => I::RefFunc(self.expect_index(items, Namespace::Func)?),
            "i32.const" => {
                let literal = items.expect("i32 literal")?;
                let value = integer_literal(literal)
                    .and_then(SignedValue::to_i32_bits)
                    .ok_or_else(|| ParseError::unexpected("i32 literal", literal))?;
                I::I32Const(value)
            }
            "i64.const" => {
                let literal = items.expect("i64 literal")?;
                let value = integer_literal(literal)
                    .and_then(SignedValue::to_i64_bits)
                    .ok_or_else(|| ParseError::unexpected("i64 literal", literal))?;
                I::I64Const(value)
            }
            "f32.const" => {
                let literal = items.expect("f32 literal")?;
                let bits = float_literal(literal)
                    .and_then(|f| f.to_f32_bits())
                    .ok_or_else(|| ParseError::unexpected("f32 literal", literal))?;
                I::F32Const(bits)
            }
            "f64.const" => {
                let literal = items.expect("f64 literal")?;
                let bits = float_literal(literal)
                    .and_then(|f| f.to_f64_bits())
                    .ok_or_else(|| ParseError::unexpected("f64 literal", literal))?;
                I::F64Const(bits)
            }
            _ => {
                if let Some(op) = MemoryOp::from_mnemonic(keyword) {
                    let memarg = parse_memarg(items, op)?;
                    match op {
                        MemoryOp::Load(ty, packed) => I::Load { ty, packed, memarg },
                        MemoryOp::Store(ty, packed) => I::Store { ty, packed, memarg },
                    }
                } else if let Some(op) = NumericOp::from_mnemonic(keyword) {
                    I::Numeric(op)
                } else {
                    return Err(ParseError::syntax("instruction", format!("keyword '{}'", keyword), span));
                }
            }
        };
        Ok(kind)
    }

    /// Grammar: `br_table l* l_default`
    fn parse_br_table(&self, items: &mut Items) -> Result<InstructionKind, ParseError> {
        let mut targets = Vec::new();
        while let Some(expr) = items.peek() {
            if !is_index(expr) {
                break;
            }
            items.bump();
            targets.push(self.parse_index(expr, Namespace::Label)?);
        }
        let default = match targets.pop() {
            Some(default) => default,
            None => {
                return Err(match items.peek() {
                    Some(found) => ParseError::unexpected("label index", found),
                    None => ParseError::missing("label index", items.end),
                })
            }
        };
        if targets.len() > MAX_BR_TABLE_LABELS {
            return Err(ParseError::syntax(
                format!("at most {} br_table targets", MAX_BR_TABLE_LABELS),
                format!("{} targets", targets.len()),
                items.prev_span(),
            ));
        }
        Ok(InstructionKind::BrTable { targets, default })
    }
}

/// A resolved type use: the type index plus each parameter and where it was
/// written.
struct TypeUse {
    type_index: u32,
    params: Vec<(Param, Span)>,
}

// ============================================================================
// Module Shape
// ============================================================================

/// The module's id and its fields: either the contents of the single
/// `(module ...)` form, or the top-level forms themselves.
fn split_module<'a>(forms: &'a [SExpr], errors: &mut Vec<ParseError>) -> (Option<String>, &'a [SExpr]) {
    let Some(position) = forms.iter().position(|f| f.is_list_headed_by("module")) else {
        return (None, forms);
    };
    for (i, other) in forms.iter().enumerate() {
        if i != position {
            errors.push(ParseError::unexpected("a single module", other));
        }
    }

    let Some(module) = forms[position].as_list() else {
        return (None, &[]);
    };
    match module.get(1).and_then(SExpr::as_id) {
        Some(id) => (Some(id.to_string()), module.rest(2)),
        None => (None, module.rest(1)),
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

fn block_kind(keyword: &str, label: Option<String>, signature: BlockSignature, body: Vec<Instruction>) -> InstructionKind {
    if keyword == "loop" {
        InstructionKind::Loop { label, signature, body }
    } else {
        InstructionKind::Block { label, signature, body }
    }
}

/// Consume the `end` that closes a flat block, and its optional label.
fn expect_end(items: &mut Items, terminator: Option<&SExpr>, label: Option<&str>) -> Result<(), ParseError> {
    match terminator {
        Some(t) if t.as_keyword() == Some("end") => {
            items.bump();
            check_end_label(items, label)
        }
        Some(t) => Err(ParseError::unexpected("'end'", t)),
        None => Err(ParseError::missing("'end'", items.end)),
    }
}

/// An `end` or `else` may repeat the block's label, and nothing else.
fn check_end_label(items: &mut Items, label: Option<&str>) -> Result<(), ParseError> {
    let Some(expr) = items.peek() else {
        return Ok(());
    };
    let Some(id) = expr.as_id() else {
        return Ok(());
    };
    if label != Some(id) {
        let expected = match label {
            Some(label) => format!("label ${}", label),
            None => "no label".to_string(),
        };
        return Err(ParseError::syntax(expected, format!("${}", id), expr.span()));
    }
    items.bump();
    Ok(())
}

fn is_index(expr: &SExpr) -> bool {
    matches!(
        expr.as_atom().map(|t| &t.kind),
        Some(TokenKind::Integer(_) | TokenKind::Id(_))
    )
}

fn integer_literal(expr: &SExpr) -> Option<SignedValue<u64>> {
    match expr.as_atom()?.kind {
        TokenKind::Integer(value) => Some(value),
        _ => None,
    }
}

/// Float immediates also accept integer literals.
fn float_literal(expr: &SExpr) -> Option<FloatLit> {
    match &expr.as_atom()?.kind {
        TokenKind::Float(lit) => Some(lit.clone()),
        TokenKind::Integer(value) => Some(FloatLit::Decimal {
            negative: value.negative,
            digits: value.value.to_string(),
        }),
        _ => None,
    }
}

/// A string that must be valid UTF-8.
fn parse_name(expr: &SExpr) -> Result<String, ParseError> {
    let bytes = expr.as_string().ok_or_else(|| ParseError::unexpected("string", expr))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ParseError::syntax("UTF-8 name", "invalid UTF-8 string", expr.span()))
}

fn parse_valtype(expr: &SExpr) -> Result<ValueType, ParseError> {
    expr.as_keyword()
        .and_then(ValueType::from_keyword)
        .ok_or_else(|| ParseError::unexpected("value type", expr))
}

/// Grammar: `(param id? t*)* (result t*)*`
///
/// A named param declares exactly one type. `named_params` is false where
/// names are not allowed: block types and `call_indirect`.
#[allow(clippy::type_complexity)]
fn parse_signature(
    items: &mut Items,
    named_params: bool,
) -> Result<(Vec<(Param, Span)>, Vec<ValueType>), ParseError> {
    let mut params = Vec::new();
    while let Some(list) = items.peek_list_headed("param") {
        items.bump();
        let mut inner = Items::of(list, 1);
        match inner.peek().filter(|e| e.as_id().is_some()) {
            Some(id_expr) if !named_params => {
                return Err(ParseError::unexpected("value type", id_expr));
            }
            Some(_) => {
                let id = inner.take_id();
                let ty = parse_valtype(inner.expect("value type")?)?;
                inner.finish()?;
                params.push((Named::new(id, ty), list.span));
            }
            None => {
                while let Some(expr) = inner.bump() {
                    params.push((Named::anonymous(parse_valtype(expr)?), list.span));
                }
            }
        }
    }

    let mut results = Vec::new();
    while let Some(list) = items.peek_list_headed("result") {
        items.bump();
        for expr in list.rest(1) {
            results.push(parse_valtype(expr)?);
        }
    }
    if let Some(late) = items.peek_list_headed("param") {
        return Err(ParseError::syntax("params before results", "'(param ...)' after '(result ...)'", late.span));
    }

    if params.len() > MAX_FUNCTION_PARAMS {
        return Err(ParseError::syntax(
            format!("at most {} params", MAX_FUNCTION_PARAMS),
            format!("{} params", params.len()),
            items.prev_span(),
        ));
    }
    if results.len() > MAX_FUNCTION_RESULTS {
        return Err(ParseError::syntax(
            format!("at most {} results", MAX_FUNCTION_RESULTS),
            format!("{} results", results.len()),
            items.prev_span(),
        ));
    }
    Ok((params, results))
}

/// Grammar: `(local id t) | (local t*)`
fn parse_local(list: SExprList) -> Result<Vec<Local>, ParseError> {
    let mut items = Items::of(list, 1);
    if let Some(id) = items.take_id() {
        let ty = parse_valtype(items.expect("value type")?)?;
        items.finish()?;
        return Ok(vec![Named::new(Some(id), ty)]);
    }
    let mut locals = Vec::new();
    while let Some(expr) = items.bump() {
        locals.push(Named::anonymous(parse_valtype(expr)?));
    }
    Ok(locals)
}

/// Grammar: `(result t)*`, at most one type in total.
fn parse_select_result(items: &mut Items) -> Result<Option<ValueType>, ParseError> {
    let mut types = Vec::new();
    let mut written = None;
    while let Some(list) = items.peek_list_headed("result") {
        items.bump();
        written.get_or_insert(list.span);
        for expr in list.rest(1) {
            types.push(parse_valtype(expr)?);
        }
    }
    match (written, types.as_slice()) {
        (None, _) => Ok(None),
        (Some(_), [ty]) => Ok(Some(*ty)),
        (Some(span), _) => Err(ParseError::syntax(
            "one select result type",
            format!("{} types", types.len()),
            span,
        )),
    }
}

fn parse_u32(expr: &SExpr, expected: &str) -> Result<u32, ParseError> {
    integer_literal(expr)
        .and_then(SignedValue::to_u32)
        .ok_or_else(|| ParseError::unexpected(expected, expr))
}

/// Grammar: `limits ::= n m?`
fn parse_limits(items: &mut Items) -> Result<Limits, ParseError> {
    let min_expr = items.expect("minimum size")?;
    let min = parse_u32(min_expr, "minimum size")?;
    let max = match items.peek() {
        Some(expr) if integer_literal(expr).is_some() => {
            items.bump();
            Some(parse_u32(expr, "maximum size")?)
        }
        _ => None,
    };
    if let Some(max) = max {
        if max < min {
            return Err(ParseError::syntax(
                "maximum size at least the minimum",
                format!("min {} > max {}", min, max),
                min_expr.span().to(items.prev_span()),
            ));
        }
    }
    Ok(Limits { min, max })
}

fn parse_memory_limits(items: &mut Items) -> Result<Limits, ParseError> {
    if let Some(data) = items.peek_list_headed("data") {
        return Err(ParseError::syntax("memory limits", "unsupported inline '(data ...)'", data.span));
    }
    let start = items.peek().map(SExpr::span);
    let limits = parse_limits(items)?;
    let largest = limits.max.unwrap_or(limits.min);
    if largest > MAX_MEMORY_PAGES {
        return Err(ParseError::syntax(
            format!("at most {} pages", MAX_MEMORY_PAGES),
            format!("{} pages", largest),
            start.map_or(items.end, |s| s.to(items.prev_span())),
        ));
    }
    Ok(limits)
}

/// Grammar: `tabletype ::= limits reftype`
fn parse_table_type(items: &mut Items) -> Result<TableType, ParseError> {
    if let Some(reftype) = items.peek_keyword() {
        // (table funcref (elem ...)) declares its size through segments
        if ValueType::from_keyword(reftype).is_some_and(ValueType::is_ref) {
            let span = items.peek().map_or(items.end, SExpr::span);
            return Err(ParseError::syntax("table limits", "unsupported inline '(elem ...)'", span));
        }
    }
    let limits = parse_limits(items)?;
    let element_expr = items.expect("reference type")?;
    let element = parse_valtype(element_expr)?;
    if !element.is_ref() {
        return Err(ParseError::unexpected("reference type", element_expr));
    }
    Ok(TableType { limits, element })
}

/// Grammar: `globaltype ::= t | (mut t)`
fn parse_global_type(items: &mut Items) -> Result<GlobalType, ParseError> {
    let expr = items.expect("global type")?;
    if let Some(list) = expr.as_list().filter(|l| l.head_keyword() == Some("mut")) {
        let mut inner = Items::of(list, 1);
        let value_type = parse_valtype(inner.expect("value type")?)?;
        inner.finish()?;
        return Ok(GlobalType {
            value_type,
            mutable: true,
        });
    }
    Ok(GlobalType {
        value_type: parse_valtype(expr)?,
        mutable: false,
    })
}

/// Grammar: `memarg ::= (offset=u32)? (align=u32)?`
///
/// `align` is written in bytes and stored as its log2.
fn parse_memarg(items: &mut Items, op: MemoryOp) -> Result<MemArg, ParseError> {
    let natural = op.natural_align();
    let mut memarg = MemArg {
        offset: 0,
        align: natural,
    };

    if let Some(value) = items.peek_keyword().and_then(|kw| kw.strip_prefix("offset=")) {
        items.bump();
        memarg.offset = memarg_value(value, items.prev_span())?;
    }
    if let Some(value) = items.peek_keyword().and_then(|kw| kw.strip_prefix("align=")) {
        items.bump();
        let span = items.prev_span();
        let bytes = memarg_value(value, span)?;
        if !bytes.is_power_of_two() {
            return Err(ParseError::syntax("power of two alignment", format!("align={}", value), span));
        }
        let align = bytes.trailing_zeros();
        if align > natural {
            return Err(ParseError::syntax(
                format!("alignment at most natural ({})", 1u32 << natural),
                format!("align={}", value),
                span,
            ));
        }
        memarg.align = align;
    }
    Ok(memarg)
}

/// The number after `offset=` or `align=`, in any integer syntax the lexer
/// accepts.
fn memarg_value(text: &str, span: Span) -> Result<u32, ParseError> {
    let value = match Lexer::tokenise(text).as_deref() {
        Ok([token]) => match token.kind {
            TokenKind::Integer(value) => value.to_u32(),
            _ => None,
        },
        _ => None,
    };
    value.ok_or_else(|| ParseError::syntax("u32 literal", format!("'{}'", text), span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use rstest::rstest;

    fn parse_ok(source: &str) -> Module {
        match parse(source) {
            Ok(module) => module,
            Err(e) => panic!("{} failed to parse: {}", source, e),
        }
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        match parse(source) {
            Ok(_) => panic!("{} parsed", source),
            Err(e) => e.0,
        }
    }

    fn body(source: &str) -> Vec<InstructionKind> {
        parse_ok(source).functions[0]
            .body
            .iter()
            .map(|i| i.kind.clone())
            .collect()
    }

    #[test]
    fn empty_module() {
        let module = parse_ok("(module)");
        assert_eq!(module, Module::default());
        assert_eq!(parse_ok(""), Module::default());
    }

    #[test]
    fn module_id_and_abbreviation() {
        assert_eq!(parse_ok("(module $m)").id.as_deref(), Some("m"));
        let module = parse_ok("(func) (memory 1)");
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.memories.len(), 1);
    }

    #[test]
    fn second_module_is_an_error() {
        let errors = parse_err("(module) (module)");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::ParseError);
    }

    #[test]
    fn function_with_inline_signature() {
        let module = parse_ok("(module (func $add (param $a i32) (param i32) (result i32) local.get $a local.get 1 i32.add))");
        let func = &module.functions[0];
        assert_eq!(func.id.as_deref(), Some("add"));
        assert_eq!(func.params[0].id.as_deref(), Some("a"));
        assert_eq!(func.params[1].id, None);
        assert_eq!(
            module.types[0].item,
            FuncType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32])
        );
        assert_eq!(
            func.body.iter().map(|i| i.kind.clone()).collect::<Vec<_>>(),
            vec![
                InstructionKind::LocalGet(0),
                InstructionKind::LocalGet(1),
                InstructionKind::Numeric(NumericOp::I32Add),
            ]
        );
    }

    #[test]
    fn folded_operands_come_first() {
        let flat = body("(func (result i32) i32.const 1 i32.const 2 i32.add)");
        let folded = body("(func (result i32) (i32.add (i32.const 1) (i32.const 2)))");
        assert_eq!(flat, folded);
    }

    #[test]
    fn identical_inline_signatures_share_a_type() {
        let module = parse_ok("(func (param i32) (result i32) local.get 0) (func (param i32) (result i32) local.get 0)");
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions[0].type_index, 0);
        assert_eq!(module.functions[1].type_index, 0);
    }

    #[test]
    fn explicit_types_are_not_deduplicated() {
        let module = parse_ok("(type $a (func)) (type $b (func)) (func (type $b))");
        assert_eq!(module.types.len(), 2);
        assert_eq!(module.functions[0].type_index, 1);
    }

    #[test]
    fn inline_signature_reuses_explicit_type() {
        let module = parse_ok("(func (param f32)) (type (func (param f32)))");
        // the type field is parsed first even though it comes later
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions[0].type_index, 0);
    }

    #[test]
    fn type_use_with_matching_inline_signature() {
        let module = parse_ok("(type $t (func (param i32))) (func (type $t) (param $x i32) local.get $x drop)");
        assert_eq!(module.functions[0].params[0].id.as_deref(), Some("x"));
    }

    #[test]
    fn type_use_signature_mismatch() {
        let errors = parse_err("(type $t (func (param i32))) (func (type $t) (param i64))");
        assert_eq!(errors[0].kind, DiagnosticKind::SignatureMismatch);
    }

    #[test]
    fn unknown_type_index() {
        let errors = parse_err("(func (type 3))");
        assert_eq!(errors[0].kind, DiagnosticKind::UnresolvedIdentifier);
    }

    #[test]
    fn forward_call_resolves() {
        let module = parse_ok("(func $a call $b) (func $b)");
        assert_eq!(module.functions[0].body[0].kind, InstructionKind::Call { func: 1 });
    }

    #[test]
    fn unresolved_call() {
        let errors = parse_err("(module (func $f (call $missing)))");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::UnresolvedIdentifier);
        assert!(errors[0].message.contains("$missing"));
    }

    #[test]
    fn duplicate_local() {
        let errors = parse_err("(func (param $x i32) (local $x i64))");
        assert_eq!(errors[0].kind, DiagnosticKind::DuplicateIdentifier);
    }

    #[test]
    fn locals_follow_params() {
        let module = parse_ok("(func (param i32) (local $a i64) (local f32 f64) local.get $a drop)");
        let func = &module.functions[0];
        assert_eq!(func.locals.len(), 3);
        assert_eq!(func.body[0].kind, InstructionKind::LocalGet(1));
        assert_eq!(func.local_type(3), Some(ValueType::F64));
    }

    #[test]
    fn flat_block_with_labels() {
        let kinds = body("(func block $outer loop $inner br $outer br 0 end $inner end)");
        let InstructionKind::Block { label, body, .. } = &kinds[0] else {
            panic!("expected block, got {:?}", kinds[0]);
        };
        assert_eq!(label.as_deref(), Some("outer"));
        let InstructionKind::Loop { body: inner, .. } = &body[0].kind else {
            panic!("expected loop");
        };
        assert_eq!(inner[0].kind, InstructionKind::Br { depth: 1 });
        assert_eq!(inner[1].kind, InstructionKind::Br { depth: 0 });
    }

    #[test]
    fn end_label_must_match() {
        let errors = parse_err("(func block $a end $b)");
        assert_eq!(errors[0].kind, DiagnosticKind::ParseError);
        parse_err("(func block end $b)");
    }

    #[test]
    fn missing_end_and_stray_end() {
        parse_err("(func block nop)");
        parse_err("(func nop end)");
        parse_err("(func else)");
        parse_err("(func block else end)");
    }

    #[test]
    fn flat_if_else() {
        let kinds = body("(func (param i32) (result i32) local.get 0 if (result i32) i32.const 1 else i32.const 2 end)");
        let InstructionKind::If {
            signature,
            then_body,
            else_body,
            ..
        } = &kinds[1]
        else {
            panic!("expected if");
        };
        assert_eq!(signature.declared, BlockType::Value(ValueType::I32));
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.len(), 1);
    }

    #[test]
    fn folded_if_condition_precedes_if() {
        let kinds = body("(func (param i32) (if (local.get 0) (then nop)))");
        assert_eq!(kinds[0], InstructionKind::LocalGet(0));
        let InstructionKind::If { else_body, .. } = &kinds[1] else {
            panic!("expected if");
        };
        assert!(else_body.is_empty());
    }

    #[test]
    fn folded_if_requires_then() {
        parse_err("(func (if (i32.const 0)))");
        parse_err("(func (if (i32.const 0) (then) (else) (then)))");
    }

    #[test]
    fn multi_value_block_type_is_interned() {
        let module = parse_ok("(func (block (param i32) (result i32 i32) unreachable))");
        let InstructionKind::Block { signature, .. } = &module.functions[0].body[0].kind else {
            panic!("expected block");
        };
        assert_eq!(signature.declared, BlockType::TypeIndex(1));
        assert_eq!(module.types.len(), 2);
        assert_eq!(module.types[1].item.results.len(), 2);
    }

    #[test]
    fn named_block_params_are_rejected() {
        parse_err("(func (block (param $x i32)))");
    }

    #[test]
    fn br_table_targets() {
        let kinds = body("(func block block i32.const 0 br_table 0 1 0 end end)");
        let InstructionKind::Block { body, .. } = &kinds[0] else {
            panic!("expected block");
        };
        let InstructionKind::Block { body: inner, .. } = &body[0].kind else {
            panic!("expected block");
        };
        assert_eq!(
            inner[1].kind,
            InstructionKind::BrTable {
                targets: vec![0, 1],
                default: 0
            }
        );
    }

    #[test]
    fn call_indirect_with_inline_type() {
        let module = parse_ok("(table 1 funcref) (func (call_indirect (param i32) (i32.const 7) (i32.const 0)))");
        let body = &module.functions[0].body;
        assert_eq!(
            body[2].kind,
            InstructionKind::CallIndirect {
                table: 0,
                type_index: 1
            }
        );
    }

    #[test]
    fn constants() {
        let kinds = body(
            "(func i32.const 0xffffffff i32.const -2147483648 i64.const -1 \
             f32.const 1.5 f64.const -0x1p-1 f32.const nan:0x200000 f64.const 3)",
        );
        assert_eq!(kinds[0], InstructionKind::I32Const(-1));
        assert_eq!(kinds[1], InstructionKind::I32Const(i32::MIN));
        assert_eq!(kinds[2], InstructionKind::I64Const(-1));
        assert_eq!(kinds[3], InstructionKind::F32Const(1.5f32.to_bits()));
        assert_eq!(kinds[4], InstructionKind::F64Const((-0.5f64).to_bits()));
        assert_eq!(kinds[5], InstructionKind::F32Const(0x7fa0_0000));
        assert_eq!(kinds[6], InstructionKind::F64Const(3.0f64.to_bits()));
    }

    #[test]
    fn out_of_range_constants() {
        parse_err("(func i32.const 0x100000000)");
        parse_err("(func i32.const -2147483649)");
        parse_err("(func f32.const 1e39)");
        parse_err("(func i32.const 1.0)");
    }

    #[test]
    fn memory_instructions() {
        let kinds = body("(memory 1) (func i32.const 0 i64.load16_s offset=0x10 align=2 drop)");
        assert_eq!(
            kinds[1],
            InstructionKind::Load {
                ty: ValueType::I64,
                packed: Some(crate::ir::PackedLoad { bits: 16, signed: true }),
                memarg: MemArg { offset: 16, align: 1 },
            }
        );
    }

    #[test]
    fn alignment_checks() {
        parse_err("(memory 1) (func i32.const 0 i32.load align=8 drop)");
        parse_err("(memory 1) (func i32.const 0 i32.load align=3 drop)");
    }

    #[test]
    fn limits_checks() {
        parse_err("(memory 2 1)");
        parse_err("(memory 65537)");
        parse_err("(table 3 2 funcref)");
        parse_err("(table 1 i32)");
        let module = parse_ok("(memory 1 65536) (table 0 externref)");
        assert_eq!(module.memories[0].limits, Limits { min: 1, max: Some(65536) });
        assert_eq!(module.tables[0].ty.element, ValueType::ExternRef);
    }

    #[rstest]
    #[case::params("(func (param ", "i32 ", "))", MAX_FUNCTION_PARAMS)]
    #[case::results("(func (result ", "i64 ", "))", MAX_FUNCTION_RESULTS)]
    #[case::locals("(func (local ", "f32 ", "))", MAX_FUNCTION_LOCALS)]
    #[case::br_table_targets("(func (block (br_table ", "0 ", "0 (i32.const 0))))", MAX_BR_TABLE_LABELS)]
    fn implementation_limits(#[case] open: &str, #[case] unit: &str, #[case] close: &str, #[case] limit: usize) {
        let source = |n: usize| format!("{}{}{}", open, unit.repeat(n), close);

        let at_limit = parse_ok(&source(limit));
        assert_eq!(at_limit.functions.len(), 1);

        let errors = parse_err(&source(limit + 1));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::ParseError);
        assert!(
            errors[0].message.starts_with(&format!("expected at most {} ", limit)),
            "{}",
            errors[0].message
        );
    }

    #[rstest]
    #[case("(memory 1) (memory 1)")]
    #[case(r#"(import "env" "mem" (memory 1)) (memory 1)"#)]
    #[case(r#"(import "a" "m" (memory 1)) (import "b" "m" (memory 1))"#)]
    #[case(r#"(memory 1) (memory (import "env" "mem") 1)"#)]
    fn one_memory_per_module(#[case] source: &str) {
        let errors = parse_err(source);
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert_eq!(errors[0].kind, DiagnosticKind::ParseError);
        assert_eq!(errors[0].message, "expected at most 1 memory, found memory 1");
    }

    #[test]
    fn tables_are_not_limited_to_one() {
        let module = parse_ok(r#"(import "env" "t" (table 1 funcref)) (table 1 externref) (table 2 funcref)"#);
        assert_eq!(module.count(ExternKind::Table), 3);
    }

    #[test]
    fn imports_and_exports() {
        let module = parse_ok(
            r#"(import "env" "log" (func $log (param i32)))
               (import "env" "mem" (memory 1))
               (func $main (export "main") (export "start") i32.const 0 call $log)
               (global $g (export "g") (mut i64) (i64.const 0))
               (export "memory" (memory 0))"#,
        );
        assert_eq!(module.imports.len(), 2);
        assert_eq!(module.functions[0].body[1].kind, InstructionKind::Call { func: 0 });
        let exports: Vec<_> = module.exports.iter().map(|e| (e.name.as_str(), e.desc)).collect();
        assert_eq!(
            exports,
            vec![
                ("main", ExportDesc::Func(1)),
                ("start", ExportDesc::Func(1)),
                ("g", ExportDesc::Global(0)),
                ("memory", ExportDesc::Memory(0)),
            ]
        );
    }

    #[test]
    fn inline_import() {
        let module = parse_ok(r#"(func $f (import "m" "f") (param i32)) (func call $f)"#);
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].body[0].kind, InstructionKind::Call { func: 0 });
    }

    #[test]
    fn import_after_definition() {
        let errors = parse_err(r#"(func) (import "m" "f" (func))"#);
        assert!(errors[0].message.contains("import after func"));
        parse_err(r#"(memory 1) (global (import "m" "g") i32)"#);
    }

    #[test]
    fn start_field() {
        let module = parse_ok("(func $main) (start $main)");
        assert_eq!(module.start, Some(0));
        parse_err("(func $main) (start $main) (start 0)");
    }

    #[test]
    fn unsupported_fields() {
        let errors = parse_err("(elem) (data)");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("unsupported"));
    }

    #[test]
    fn unknown_instruction() {
        let errors = parse_err("(module (func (not.an.instruction)))");
        assert!(errors[0].message.contains("not.an.instruction"));
    }

    #[test]
    fn errors_in_separate_fields_are_all_reported() {
        let errors = parse_err("(func bogus) (func (local.get $nope)) (func $ok)");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, DiagnosticKind::ParseError);
        assert_eq!(errors[1].kind, DiagnosticKind::UnresolvedIdentifier);
    }

    #[test]
    fn spans_point_at_the_source() {
        let module = parse_ok("(func\n  i32.const 7\n  drop)");
        let span = module.functions[0].body[0].span;
        assert_eq!((span.line, span.column), (2, 3));
    }

    #[test]
    fn select_forms() {
        let kinds = body("(func (select (result f64) (f64.const 1) (f64.const 2) (i32.const 0)) drop)");
        assert_eq!(kinds[3], InstructionKind::Select { result: Some(ValueType::F64) });
        parse_err("(func select (result i32 i32))");
    }

    #[test]
    fn parse_tokens_matches_parse() {
        let source = "(module (func (result i32) i32.const 5))";
        let tokens = Lexer::tokenise(source).unwrap();
        assert_eq!(parse_tokens(tokens).unwrap(), parse(source).unwrap());
    }
}
