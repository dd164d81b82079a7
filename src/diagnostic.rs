//! Diagnostics: the one error shape every stage reports through.
//!
//! Each stage has its own error type; a [`Diagnostic`] flattens any of them
//! into a kind, a message and a source span. Rendering is left to the caller.

use crate::validate::ValidationError;
use crate::wat::{LexError, ParseError, ReadError, Span};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    LexError,
    ParseError,
    UnresolvedIdentifier,
    DuplicateIdentifier,
    SignatureMismatch,
    TypeMismatch,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DiagnosticKind::LexError => "lex error",
            DiagnosticKind::ParseError => "parse error",
            DiagnosticKind::UnresolvedIdentifier => "unresolved identifier",
            DiagnosticKind::DuplicateIdentifier => "duplicate identifier",
            DiagnosticKind::SignatureMismatch => "signature mismatch",
            DiagnosticKind::TypeMismatch => "type mismatch",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{span}: {kind}: {message}")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }

    pub fn column(&self) -> u32 {
        self.span.column
    }
}

impl From<LexError> for Diagnostic {
    fn from(e: LexError) -> Self {
        Diagnostic::new(DiagnosticKind::LexError, e.to_string(), e.span)
    }
}

impl From<ReadError> for Diagnostic {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Lex(lex) => lex.into(),
            other => Diagnostic::new(DiagnosticKind::ParseError, other.to_string(), other.span()),
        }
    }
}

impl From<ParseError> for Diagnostic {
    fn from(e: ParseError) -> Self {
        let kind = match e {
            ParseError::Syntax { .. } => DiagnosticKind::ParseError,
            ParseError::UnresolvedIdentifier { .. } | ParseError::UnknownIndex { .. } => {
                DiagnosticKind::UnresolvedIdentifier
            }
            ParseError::DuplicateIdentifier { .. } => DiagnosticKind::DuplicateIdentifier,
            ParseError::SignatureMismatch { .. } => DiagnosticKind::SignatureMismatch,
        };
        Diagnostic::new(kind, e.to_string(), e.span())
    }
}

impl From<ValidationError> for Diagnostic {
    fn from(e: ValidationError) -> Self {
        Diagnostic::new(e.kind(), e.to_string(), e.span())
    }
}

/// Every diagnostic from one run, in source order.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any diagnostic is of `kind`.
    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.0.iter().any(|d| d.kind == kind)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Diagnostics(diagnostics)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
