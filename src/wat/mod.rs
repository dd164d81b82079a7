//! WebAssembly Text Format (WAT) front end.
//!
//! Source text goes through three stages here:
//!
//! - [`Lexer`] turns characters into [`Token`]s, each carrying a [`Span`].
//! - [`sexpr`] matches parentheses into a tree of atoms and lists,
//!   recovering one top-level field at a time.
//! - [`parse`] resolves names (see [`resolve`]) and builds the
//!   [`Module`](crate::ir::Module) IR.
//!
//! # Example
//!
//! ```
//! use watfront::wat::{Lexer, TokenKind};
//!
//! let source = "(module (func $main (result i32) (i32.const 42)))";
//! let tokens: Vec<_> = Lexer::new(source).collect::<Result<_, _>>().unwrap();
//!
//! assert!(matches!(tokens[0].kind, TokenKind::LeftParen));
//! assert!(matches!(tokens[1].kind, TokenKind::Keyword(ref k) if k == "module"));
//!
//! let module = watfront::wat::parse(source).unwrap();
//! assert_eq!(module.functions[0].id.as_deref(), Some("main"));
//! ```
//!
//! # Error Handling
//!
//! The lexer yields `Result<Token, LexError>` for each token and stops at the
//! first error. [`parse`] keeps going past broken fields and reports every
//! problem it found:
//!
//! ```
//! let errors = watfront::wat::parse("(func (call $nowhere)) (func $f) (func $f)").unwrap_err();
//! assert_eq!(errors.len(), 2);
//! ```

mod cursor;
mod error;
mod lexer;
mod parser;
pub mod resolve;
pub mod sexpr;
mod token;

pub use error::{LexError, LexErrorReason, ParseError, ReadError};
pub use lexer::Lexer;
pub use parser::{parse, parse_tokens};
pub use resolve::{LabelStack, LocalScope, Namespace, SymbolTable};
pub use token::{FloatLit, SignedValue, Span, Token, TokenKind};
