//! Errors raised while reading and parsing WAT.
//!
//! Messages carry no location; every error exposes its [`Span`] and the
//! diagnostic built from it places the message in the source.

use super::resolve::Namespace;
use super::token::Span;
use crate::ir::FuncType;
use thiserror::Error;

/// Why a stretch of source could not be tokenised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexErrorReason {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("invalid escape sequence: {0}")]
    InvalidEscape(String),
    #[error("malformed number: {0}")]
    MalformedNumber(String),
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("expected identifier after '$'")]
    EmptyIdentifier,
}

/// A lexical error and where it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
#[must_use]
pub struct LexError {
    pub reason: LexErrorReason,
    pub span: Span,
}

impl LexError {
    pub fn new(reason: LexErrorReason, span: Span) -> Self {
        Self { reason, span }
    }

    /// Whether the lexer consumed the rest of the input while failing, so no
    /// further tokens will follow.
    pub fn reaches_eof(&self) -> bool {
        matches!(
            self.reason,
            LexErrorReason::UnterminatedString | LexErrorReason::UnterminatedComment
        )
    }
}

/// Failure to build a well-formed S-expression tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected ')'")]
    UnbalancedClose { span: Span },
    #[error("unclosed '(' at end of input")]
    Unclosed { span: Span },
    #[error("nesting deeper than {limit} levels")]
    TooDeep { span: Span, limit: usize },
}

impl ReadError {
    pub fn span(&self) -> Span {
        match self {
            ReadError::Lex(e) => e.span,
            ReadError::UnbalancedClose { span } | ReadError::Unclosed { span } | ReadError::TooDeep { span, .. } => {
                *span
            }
        }
    }
}

/// A well-formed S-expression that is not valid module syntax, or a name
/// that does not resolve.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    Syntax {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("unknown {namespace} ${name}")]
    UnresolvedIdentifier {
        namespace: Namespace,
        name: String,
        span: Span,
    },
    #[error("unknown {namespace} {index}")]
    UnknownIndex {
        namespace: Namespace,
        index: u32,
        span: Span,
    },
    #[error("duplicate {namespace} ${name}, first bound at {first}")]
    DuplicateIdentifier {
        namespace: Namespace,
        name: String,
        /// Where the name was first bound; `span` is the clashing binding.
        first: Span,
        span: Span,
    },
    #[error("inline signature {inline} does not match type {index} {declared}")]
    SignatureMismatch {
        index: u32,
        declared: FuncType,
        inline: FuncType,
        span: Span,
    },
}

impl ParseError {
    /// `expected`, found the expression `found`.
    pub fn unexpected(expected: impl Into<String>, found: &super::sexpr::SExpr) -> Self {
        ParseError::Syntax {
            expected: expected.into(),
            found: found.describe(),
            span: found.span(),
        }
    }

    /// `expected`, but the enclosing form ended at `span`.
    pub fn missing(expected: impl Into<String>, span: Span) -> Self {
        ParseError::Syntax {
            expected: expected.into(),
            found: "')'".to_string(),
            span,
        }
    }

    pub fn syntax(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        ParseError::Syntax {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ParseError::Syntax { span, .. }
            | ParseError::UnresolvedIdentifier { span, .. }
            | ParseError::UnknownIndex { span, .. }
            | ParseError::DuplicateIdentifier { span, .. }
            | ParseError::SignatureMismatch { span, .. } => *span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    #[test]
    fn lex_error_display() {
        let err = LexError::new(LexErrorReason::UnexpectedCharacter('{'), Span::new(10, 11, 3, 5));
        assert_eq!(format!("{}", err), "unexpected character '{'");
        assert!(!err.reaches_eof());
        assert!(LexError::new(LexErrorReason::UnterminatedComment, Span::ZERO).reaches_eof());
    }

    #[test]
    fn read_error_span_passes_through() {
        let span = Span::new(3, 4, 1, 4);
        let lex: ReadError = LexError::new(LexErrorReason::EmptyIdentifier, span).into();
        assert_eq!(lex.span(), span);
        assert_eq!(format!("{}", lex), "expected identifier after '$'");
        assert_eq!(format!("{}", ReadError::UnbalancedClose { span }), "unexpected ')'");
    }

    #[test]
    fn parse_error_messages() {
        let span = Span::new(0, 1, 2, 3);
        let err = ParseError::missing("value type", span);
        assert_eq!(err.to_string(), "expected value type, found ')'");

        let dup = ParseError::DuplicateIdentifier {
            namespace: Namespace::Func,
            name: "f".into(),
            first: Span::new(0, 2, 1, 9),
            span,
        };
        assert_eq!(dup.to_string(), "duplicate function $f, first bound at 1:9");
        assert_eq!(dup.span(), span);

        let mismatch = ParseError::SignatureMismatch {
            index: 0,
            declared: FuncType::new(vec![ValueType::I32], vec![]),
            inline: FuncType::new(vec![ValueType::I64], vec![]),
            span,
        };
        assert_eq!(
            mismatch.to_string(),
            "inline signature [i64] -> [] does not match type 0 [i32] -> []"
        );
    }
}
