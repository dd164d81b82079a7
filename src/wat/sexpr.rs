//! S-expression reader for WAT.
//!
//! WAT is an S-expression language, so parsing happens in two steps: the
//! reader matches parentheses and builds a tree of tokens, then the parser
//! walks that tree. With the tree in hand the parser can look at every child
//! of a form without consuming tokens speculatively.
//!
//! The reader recovers from errors one top-level field at a time. A broken
//! field (a direct child of `(module ...)`, or a bare form at the top of the
//! input) is dropped, its error recorded, and reading continues after the
//! field's closing parenthesis.
//!
//! ```
//! use watfront::wat::sexpr::read_document;
//!
//! let doc = read_document("(module (func $f) (memory 1))");
//! assert!(doc.errors.is_empty());
//! let module = doc.forms[0].as_list().unwrap();
//! assert_eq!(module.head_keyword(), Some("module"));
//! assert_eq!(module.len(), 3);
//! ```

use super::error::{LexError, ReadError};
use super::lexer::Lexer;
use super::token::{Span, Token, TokenKind};
use crate::limits::MAX_NESTING_DEPTH;
use std::iter::Peekable;

// ============================================================================
// S-Expression Types
// ============================================================================

/// An atom (one token) or a parenthesised list.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Atom(Token),
    /// The span runs from the opening to the closing parenthesis.
    List { span: Span, items: Vec<SExpr> },
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(token) => token.span,
            SExpr::List { span, .. } => *span,
        }
    }

    pub fn as_atom(&self) -> Option<&Token> {
        match self {
            SExpr::Atom(token) => Some(token),
            SExpr::List { .. } => None,
        }
    }

    pub fn as_list(&self) -> Option<SExprList<'_>> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List { span, items } => Some(SExprList { span: *span, items }),
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::Keyword(kw),
                ..
            }) => Some(kw),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::Id(id),
                ..
            }) => Some(id),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::String(bytes),
                ..
            }) => Some(bytes),
            _ => None,
        }
    }

    /// Whether this is a list whose head is `keyword`.
    pub fn is_list_headed_by(&self, keyword: &str) -> bool {
        self.as_list().is_some_and(|list| list.head_keyword() == Some(keyword))
    }

    /// How this expression reads in an error message.
    pub fn describe(&self) -> String {
        match self {
            SExpr::Atom(token) => token.kind.describe(),
            SExpr::List { items, .. } => match items.first().and_then(SExpr::as_keyword) {
                Some(kw) => format!("'({} ...)'", kw),
                None => "list".to_string(),
            },
        }
    }
}

// ============================================================================
// List View
// ============================================================================

/// A borrowed view of a list, for picking forms of the shape
/// `(keyword arg ...)` apart.
#[derive(Debug, Clone, Copy)]
pub struct SExprList<'a> {
    pub span: Span,
    pub items: &'a [SExpr],
}

impl<'a> SExprList<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a SExpr> {
        self.items.get(index)
    }

    pub fn head_keyword(&self) -> Option<&'a str> {
        self.items.first().and_then(SExpr::as_keyword)
    }

    /// Items from `start` on.
    pub fn rest(&self, start: usize) -> &'a [SExpr] {
        self.items.get(start..).unwrap_or(&[])
    }

    /// Span just inside the closing parenthesis, for "expected X" errors
    /// reported when a form ends too early.
    pub fn end_span(&self) -> Span {
        let at = self.span.end.saturating_sub(1);
        match self.items.last() {
            Some(last) => Span { start: at, end: at, ..last.span() },
            None => Span { start: at, end: at, ..self.span },
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// The top-level forms of a source, plus every error met while reading.
#[derive(Debug, Default)]
pub struct Document {
    pub forms: Vec<SExpr>,
    pub errors: Vec<ReadError>,
}

/// Read all top-level forms from `source`, recovering from errors.
#[must_use]
pub fn read_document(source: &str) -> Document {
    Reader::new(Lexer::new(source)).read_document()
}

/// Read all top-level forms, stopping at the first error.
pub fn read_all(source: &str) -> Result<Vec<SExpr>, ReadError> {
    let mut doc = read_document(source);
    if doc.errors.is_empty() {
        Ok(doc.forms)
    } else {
        Err(doc.errors.swap_remove(0))
    }
}

/// Builds S-expressions from any stream of lexer results.
pub struct Reader<I: Iterator<Item = Result<Token, LexError>>> {
    tokens: Peekable<I>,
    /// Parentheses opened and not yet closed.
    depth: usize,
    errors: Vec<ReadError>,
    /// Set once the input is known to be exhausted by an error; later
    /// failures are consequences of it and are not reported.
    halted: bool,
}

impl<I: Iterator<Item = Result<Token, LexError>>> Reader<I> {
    pub fn new(tokens: I) -> Self {
        Self {
            tokens: tokens.peekable(),
            depth: 0,
            errors: Vec::new(),
            halted: false,
        }
    }

    pub fn read_document(mut self) -> Document {
        let mut forms = Vec::new();
        loop {
            match self.tokens.peek() {
                None => break,
                Some(Ok(Token {
                    kind: TokenKind::RightParen,
                    span,
                })) => {
                    let span = *span;
                    self.tokens.next();
                    self.record(ReadError::UnbalancedClose { span });
                }
                Some(_) => {
                    if let Some(form) = self.read_field() {
                        forms.push(form);
                    }
                }
            }
            if self.halted {
                break;
            }
        }
        Document {
            forms,
            errors: self.errors,
        }
    }

    /// Read one recoverable unit. On failure the error is recorded and the
    /// rest of the unit is skipped.
    fn read_field(&mut self) -> Option<SExpr> {
        let outer = self.depth;
        match self.read_sexpr() {
            Ok(sexpr) => Some(sexpr),
            Err(e) => {
                self.record(e);
                self.skip_to_depth(outer);
                None
            }
        }
    }

    fn read_sexpr(&mut self) -> Result<SExpr, ReadError> {
        let token = match self.tokens.next() {
            Some(Ok(token)) => token,
            Some(Err(e)) => return Err(self.lex_failure(e)),
            None => {
                return Err(ReadError::Unclosed { span: Span::ZERO });
            }
        };
        match token.kind {
            TokenKind::LeftParen => self.read_list(token.span),
            TokenKind::RightParen => Err(ReadError::UnbalancedClose { span: token.span }),
            _ => Ok(SExpr::Atom(token)),
        }
    }

    /// Read the rest of a list whose `(` has been consumed. The module form
    /// recovers field by field; other lists fail as a whole.
    fn read_list(&mut self, open: Span) -> Result<SExpr, ReadError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ReadError::TooDeep {
                span: open,
                limit: MAX_NESTING_DEPTH,
            });
        }

        let top_level = self.depth == 1;
        let mut items: Vec<SExpr> = Vec::new();
        loop {
            let recover = top_level && items.first().and_then(SExpr::as_keyword) == Some("module");
            match self.tokens.peek() {
                None => {
                    if recover && self.halted {
                        return Ok(SExpr::List { span: open, items });
                    }
                    let err = ReadError::Unclosed { span: open };
                    self.record(err.clone());
                    self.halted = true;
                    return Err(err);
                }
                Some(Ok(Token {
                    kind: TokenKind::RightParen,
                    span,
                })) => {
                    let span = open.to(*span);
                    self.tokens.next();
                    self.depth -= 1;
                    return Ok(SExpr::List { span, items });
                }
                Some(_) if recover => {
                    if let Some(field) = self.read_field() {
                        items.push(field);
                    }
                }
                Some(_) => items.push(self.read_sexpr()?),
            }
        }
    }

    fn lex_failure(&mut self, e: LexError) -> ReadError {
        if e.reaches_eof() {
            let err = ReadError::Lex(e);
            self.record(err.clone());
            self.halted = true;
            return err;
        }
        ReadError::Lex(e)
    }

    /// Consume tokens until the paren depth is back to `target`.
    fn skip_to_depth(&mut self, target: usize) {
        while self.depth > target {
            match self.tokens.next() {
                None => {
                    self.halted = true;
                    return;
                }
                Some(Ok(Token {
                    kind: TokenKind::LeftParen,
                    ..
                })) => self.depth += 1,
                Some(Ok(Token {
                    kind: TokenKind::RightParen,
                    ..
                })) => self.depth -= 1,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if e.reaches_eof() {
                        self.halted = true;
                        return;
                    }
                }
            }
        }
    }

    fn record(&mut self, error: ReadError) {
        if self.halted || self.errors.contains(&error) {
            return;
        }
        self.errors.push(error);
    }
}

// ============================================================================
// Tests
// ============================================================================
