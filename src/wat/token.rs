//! Lexical tokens of the WebAssembly text format.

use fhex::FromHex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in source text.
///
/// Byte offsets slice the source; line and column (both 1-based, columns
/// counting characters) locate it for a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    /// Position used for diagnostics that have no better location.
    pub const ZERO: Span = Span {
        start: 0,
        end: 0,
        line: 1,
        column: 1,
    };

    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Span from the start of `self` to the end of `other`.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span {
            end: other.end.max(self.start),
            ..self
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A token and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The literal source text of this token.
    ///
    /// ```
    /// use watfront::wat::Lexer;
    ///
    /// let source = "(func $f)";
    /// let tokens = Lexer::tokenise(source).unwrap();
    /// assert_eq!(tokens[2].text(source), "$f");
    /// ```
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

/// Token classes. Literals are told apart by their lexical shape alone.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    /// Bare word such as `func`, `i32.add` or `offset=8`.
    Keyword(String),
    /// `$name`, stored without the `$`.
    Id(String),
    /// String literal with escapes decoded. WAT strings may hold arbitrary
    /// bytes, so this is not a `String`.
    String(Vec<u8>),
    Integer(SignedValue<u64>),
    Float(FloatLit),
}

impl TokenKind {
    /// Short description used in "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::LeftParen => "'('".to_string(),
            TokenKind::RightParen => "')'".to_string(),
            TokenKind::Keyword(k) => format!("keyword '{}'", k),
            TokenKind::Id(id) => format!("identifier '${}'", id),
            TokenKind::String(_) => "string literal".to_string(),
            TokenKind::Integer(_) => format!("integer '{}'", self),
            TokenKind::Float(_) => format!("float '{}'", self),
        }
    }
}

/// An integer magnitude with the sign kept apart.
///
/// Keeping the sign separate lets one token represent the whole of both the
/// `u64` and `i64` ranges, and tells `+1` apart from `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedValue<T> {
    pub value: T,
    pub negative: bool,
    pub has_sign: bool,
}

impl<T> SignedValue<T> {
    pub fn signed(value: T, negative: bool) -> Self {
        Self {
            value,
            negative,
            has_sign: true,
        }
    }

    pub fn unsigned(value: T) -> Self {
        Self {
            value,
            negative: false,
            has_sign: false,
        }
    }
}

impl SignedValue<u64> {
    /// The value as a `u32` index or immediate. Signed literals are never
    /// indices.
    #[must_use]
    pub fn to_u32(self) -> Option<u32> {
        if self.has_sign {
            return None;
        }
        u32::try_from(self.value).ok()
    }

    /// Two's-complement bits for an `i32.const` immediate: accepts
    /// `-2^31..2^32`.
    #[must_use]
    pub fn to_i32_bits(self) -> Option<i32> {
        if self.negative {
            if self.value <= 1 << 31 {
                Some((self.value as i64).wrapping_neg() as i32)
            } else {
                None
            }
        } else {
            u32::try_from(self.value).ok().map(|v| v as i32)
        }
    }

    /// Two's-complement bits for an `i64.const` immediate: accepts
    /// `-2^63..2^64`.
    #[must_use]
    pub fn to_i64_bits(self) -> Option<i64> {
        if self.negative {
            if self.value <= 1 << 63 {
                Some(self.value.wrapping_neg() as i64)
            } else {
                None
            }
        } else {
            Some(self.value as i64)
        }
    }
}

/// A floating-point literal, kept as text until its width is known.
///
/// f32 and f64 each round from the source digits, so converting one never
/// goes through the other.
#[derive(Debug, Clone, PartialEq)]
pub enum FloatLit {
    Decimal { negative: bool, digits: String },
    /// Hex digits including the `0x` prefix, as `fhex` expects them.
    Hex { negative: bool, digits: String },
    Inf { negative: bool },
    Nan { negative: bool, payload: Option<u64> },
}

const F32_SIGN: u32 = 1 << 31;
const F32_INF: u32 = 0x7f80_0000;
const F32_CANONICAL_NAN: u32 = 0x7fc0_0000;
const F32_PAYLOAD_MASK: u64 = 0x007f_ffff;

const F64_SIGN: u64 = 1 << 63;
const F64_INF: u64 = 0x7ff0_0000_0000_0000;
const F64_CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;
const F64_PAYLOAD_MASK: u64 = 0x000f_ffff_ffff_ffff;

impl FloatLit {
    /// IEEE bits of this literal as an f32, or `None` when the literal is out
    /// of range (finite digits rounding to infinity, or a NaN payload that is
    /// zero or wider than the significand).
    #[must_use]
    pub fn to_f32_bits(&self) -> Option<u32> {
        let (negative, magnitude) = match self {
            FloatLit::Decimal { negative, digits } => {
                let v: f32 = digits.parse().ok()?;
                (*negative, finite_bits32(v)?)
            }
            FloatLit::Hex { negative, digits } => {
                let v = f32::from_hex(digits)?;
                (*negative, finite_bits32(v)?)
            }
            FloatLit::Inf { negative } => (*negative, F32_INF),
            FloatLit::Nan { negative, payload: None } => (*negative, F32_CANONICAL_NAN),
            FloatLit::Nan {
                negative,
                payload: Some(p),
            } => {
                if *p == 0 || *p & !F32_PAYLOAD_MASK != 0 {
                    return None;
                }
                (*negative, F32_INF | *p as u32)
            }
        };
        Some(if negative { magnitude | F32_SIGN } else { magnitude })
    }

    /// IEEE bits of this literal as an f64; see [`FloatLit::to_f32_bits`].
    #[must_use]
    pub fn to_f64_bits(&self) -> Option<u64> {
        let (negative, magnitude) = match self {
            FloatLit::Decimal { negative, digits } => {
                let v: f64 = digits.parse().ok()?;
                (*negative, finite_bits64(v)?)
            }
            FloatLit::Hex { negative, digits } => {
                let v = f64::from_hex(digits)?;
                (*negative, finite_bits64(v)?)
            }
            FloatLit::Inf { negative } => (*negative, F64_INF),
            FloatLit::Nan { negative, payload: None } => (*negative, F64_CANONICAL_NAN),
            FloatLit::Nan {
                negative,
                payload: Some(p),
            } => {
                if *p == 0 || *p & !F64_PAYLOAD_MASK != 0 {
                    return None;
                }
                (*negative, F64_INF | *p)
            }
        };
        Some(if negative { magnitude | F64_SIGN } else { magnitude })
    }
}

fn finite_bits32(v: f32) -> Option<u32> {
    v.is_finite().then(|| v.abs().to_bits())
}

fn finite_bits64(v: f64) -> Option<u64> {
    v.is_finite().then(|| v.abs().to_bits())
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Keyword(k) => write!(f, "{}", k),
            TokenKind::Id(id) => write!(f, "${}", id),
            TokenKind::String(bytes) => {
                write!(f, "\"")?;
                for &b in bytes {
                    if (b.is_ascii_graphic() && b != b'"' && b != b'\\') || b == b' ' {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "\\{:02x}", b)?;
                    }
                }
                write!(f, "\"")
            }
            TokenKind::Integer(sv) => {
                let sign = if sv.negative {
                    "-"
                } else if sv.has_sign {
                    "+"
                } else {
                    ""
                };
                write!(f, "{}{}", sign, sv.value)
            }
            TokenKind::Float(lit) => write!(f, "{}", lit),
        }
    }
}

impl fmt::Display for FloatLit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, body) = match self {
            FloatLit::Decimal { negative, digits } | FloatLit::Hex { negative, digits } => {
                (*negative, digits.clone())
            }
            FloatLit::Inf { negative } => (*negative, "inf".to_string()),
            FloatLit::Nan { negative, payload: None } => (*negative, "nan".to_string()),
            FloatLit::Nan {
                negative,
                payload: Some(p),
            } => (*negative, format!("nan:0x{:x}", p)),
        };
        if negative {
            write!(f, "-{}", body)
        } else {
            write!(f, "{}", body)
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}
