//! Lexer for WebAssembly Text Format.
//!
//! Source text becomes a lazy stream of [`Token`]s. Everything that is not a
//! parenthesis or a string is read as one maximal run of identifier
//! characters and then classified by its shape: `$`-prefixed runs are
//! identifiers, runs that start like a number are numeric literals, and runs
//! that start with a lowercase letter are keywords. There is no keyword table
//! at this level.
//!
//! ```
//! use watfront::wat::{Lexer, TokenKind};
//!
//! let tokens = Lexer::tokenise("(i32.add (local.get $x) (i32.const -1))").unwrap();
//! assert_eq!(tokens[1].kind, TokenKind::Keyword("i32.add".into()));
//! assert_eq!(tokens[4].kind, TokenKind::Id("x".into()));
//! ```

use super::cursor::{Cursor, Mark};
use super::error::{LexError, LexErrorReason};
use super::token::{FloatLit, SignedValue, Token, TokenKind};

// ============================================================================
// Lexer
// ============================================================================

/// Tokeniser for one WAT source.
///
/// An error does not end iteration: the lexer resumes after the offending
/// text, so a caller can skip ahead and keep going. Unterminated strings and
/// comments consume the remaining input.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Tokenise the whole source, returning all tokens or the first error.
    pub fn tokenise(source: &str) -> Result<Vec<Token>, LexError> {
        Lexer::new(source).collect()
    }

    fn error_from(&self, reason: LexErrorReason, start: Mark) -> LexError {
        LexError::new(reason, start.span_to(self.cursor.mark()))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.skip_trivia() {
            return Some(Err(e));
        }
        if self.cursor.is_eof() {
            return None;
        }

        let start = self.cursor.mark();
        Some(
            self.lex_token(start)
                .map(|kind| Token::new(kind, start.span_to(self.cursor.mark()))),
        )
    }
}

// ============================================================================
// Token dispatch
// ============================================================================

impl<'a> Lexer<'a> {
    fn lex_token(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        let Some(c) = self.cursor.peek() else {
            return Err(self.error_from(LexErrorReason::UnexpectedCharacter('\0'), start));
        };
        match c {
            '(' => {
                self.cursor.bump();
                Ok(TokenKind::LeftParen)
            }
            ')' => {
                self.cursor.bump();
                Ok(TokenKind::RightParen)
            }
            '"' => {
                let bytes = self.lex_string(start)?;
                self.check_token_boundary(start)?;
                Ok(TokenKind::String(bytes))
            }
            c if is_idchar(c) => {
                let kind = self.lex_atom(start)?;
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            c => {
                self.cursor.bump();
                Err(self.error_from(LexErrorReason::UnexpectedCharacter(c), start))
            }
        }
    }

    /// Read a run of idchars and decide what it is.
    fn lex_atom(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        let text = self.cursor.eat_while(is_idchar);

        if let Some(name) = text.strip_prefix('$') {
            if name.is_empty() {
                return Err(self.error_from(LexErrorReason::EmptyIdentifier, start));
            }
            return Ok(TokenKind::Id(name.to_string()));
        }

        if looks_numeric(text) {
            return parse_number(text)
                .ok_or_else(|| self.error_from(LexErrorReason::MalformedNumber(text.to_string()), start));
        }

        match text.chars().next() {
            Some('a'..='z') => Ok(TokenKind::Keyword(text.to_string())),
            Some(c) => Err(self.error_from(LexErrorReason::UnexpectedCharacter(c), start)),
            None => Err(self.error_from(LexErrorReason::UnexpectedCharacter('\0'), start)),
        }
    }

    /// Tokens other than parentheses must be followed by whitespace, a
    /// parenthesis, a comment or the end of input: `"a""b"` and `$x"y"` are
    /// errors. The offending text is consumed so lexing can resume after it.
    fn check_token_boundary(&mut self, start: Mark) -> Result<(), LexError> {
        match self.cursor.peek() {
            None => Ok(()),
            Some(c) if c.is_ascii_whitespace() => Ok(()),
            Some('(' | ')' | ';') => Ok(()),
            Some(c) => {
                if c == '"' {
                    self.skip_string();
                } else {
                    self.cursor.bump();
                    self.cursor.eat_while(is_idchar);
                }
                Err(self.error_from(LexErrorReason::UnexpectedCharacter(c), start))
            }
        }
    }
}

// ============================================================================
// Whitespace and comments
// ============================================================================

impl<'a> Lexer<'a> {
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            self.cursor.eat_while(|c| c.is_ascii_whitespace());
            match (self.cursor.peek(), self.cursor.peek_nth(1)) {
                (Some(';'), Some(';')) => {
                    self.cursor.eat_while(|c| c != '\n');
                }
                (Some('('), Some(';')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// Block comments nest: `(; a (; b ;) c ;)` is one comment.
    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.cursor.mark();
        self.cursor.bump();
        self.cursor.bump();

        let mut depth = 1usize;
        while depth > 0 {
            match (self.cursor.peek(), self.cursor.peek_nth(1)) {
                (None, _) => return Err(self.error_from(LexErrorReason::UnterminatedComment, start)),
                (Some('('), Some(';')) => {
                    self.cursor.bump();
                    self.cursor.bump();
                    depth += 1;
                }
                (Some(';'), Some(')')) => {
                    self.cursor.bump();
                    self.cursor.bump();
                    depth -= 1;
                }
                _ => {
                    self.cursor.bump();
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// String literals
// ============================================================================

impl<'a> Lexer<'a> {
    /// Step over a string glued to the previous token. The boundary error
    /// already covers it, so its contents and any error of its own are
    /// discarded.
    fn skip_string(&mut self) {
        let start = self.cursor.mark();
        self.lex_string(start).ok();
    }

    /// Read a string literal. A bad escape is reported only after the closing
    /// quote has been consumed, so lexing resumes after the string.
    fn lex_string(&mut self, start: Mark) -> Result<Vec<u8>, LexError> {
        self.cursor.bump();

        let mut bytes = Vec::new();
        let mut first_error = None;
        loop {
            match self.cursor.bump() {
                None => return Err(self.error_from(LexErrorReason::UnterminatedString, start)),
                Some('"') => break,
                Some('\\') => {
                    let escape_start = self.cursor.mark();
                    if let Err(reason) = self.lex_escape(&mut bytes) {
                        first_error.get_or_insert_with(|| self.error_from(reason, escape_start));
                    }
                }
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(bytes),
        }
    }

    fn lex_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexErrorReason> {
        let Some(c) = self.cursor.peek() else {
            return Err(LexErrorReason::InvalidEscape("\\".to_string()));
        };
        match c {
            't' => bytes.push(b'\t'),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            '"' => bytes.push(b'"'),
            '\'' => bytes.push(b'\''),
            '\\' => bytes.push(b'\\'),
            'u' => {
                self.cursor.bump();
                return self.lex_unicode_escape(bytes);
            }
            hi if hi.is_ascii_hexdigit() => {
                self.cursor.bump();
                let lo = self.cursor.peek().and_then(|c| c.to_digit(16));
                let (Some(hi), Some(lo)) = (hi.to_digit(16), lo) else {
                    return Err(LexErrorReason::InvalidEscape(format!("\\{}", c)));
                };
                self.cursor.bump();
                bytes.push(((hi << 4) | lo) as u8);
                return Ok(());
            }
            other => {
                // Leave a quote for the string loop so the literal still ends.
                if other != '"' {
                    self.cursor.bump();
                }
                return Err(LexErrorReason::InvalidEscape(format!("\\{}", other)));
            }
        }
        self.cursor.bump();
        Ok(())
    }

    /// `\u{hex}` escapes, encoded as UTF-8.
    fn lex_unicode_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexErrorReason> {
        if !self.cursor.eat('{') {
            return Err(LexErrorReason::InvalidEscape("\\u".to_string()));
        }
        let digits = self.cursor.eat_while(|c| c.is_ascii_hexdigit() || c == '_');
        if !self.cursor.eat('}') {
            return Err(LexErrorReason::InvalidEscape(format!("\\u{{{}", digits)));
        }
        let c = is_num(digits, 16)
            .then(|| u32::from_str_radix(&strip_underscores(digits), 16).ok())
            .flatten()
            .and_then(char::from_u32)
            .ok_or_else(|| LexErrorReason::InvalidEscape(format!("\\u{{{}}}", digits)))?;
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

// ============================================================================
// Number literals
// ============================================================================

/// Whether a run of idchars should be read as a number: a digit after an
/// optional sign, or one of the special float forms.
fn looks_numeric(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    body.starts_with(|c: char| c.is_ascii_digit()) || body == "inf" || body == "nan" || body.starts_with("nan:")
}

/// Classify a numeric run as an integer or float literal.
///
/// Integers too large for `u64` become float literals; they are only valid
/// where a float is expected.
fn parse_number(text: &str) -> Option<TokenKind> {
    let (negative, has_sign, body) = match text.as_bytes().first()? {
        b'+' => (false, true, &text[1..]),
        b'-' => (true, true, &text[1..]),
        _ => (false, false, text),
    };

    if let Some(special) = parse_special_float(body, negative) {
        return Some(TokenKind::Float(special));
    }

    let integer = |value: u64| {
        TokenKind::Integer(if has_sign {
            SignedValue::signed(value, negative)
        } else {
            SignedValue::unsigned(value)
        })
    };

    if let Some(hex) = body.strip_prefix("0x") {
        if hex.contains(['.', 'p', 'P']) {
            return parse_hex_float(hex, negative).map(TokenKind::Float);
        }
        if !is_num(hex, 16) {
            return None;
        }
        let clean = strip_underscores(hex);
        return Some(match u64::from_str_radix(&clean, 16) {
            Ok(value) => integer(value),
            Err(_) => TokenKind::Float(FloatLit::Hex {
                negative,
                digits: format!("0x{}.0p0", clean),
            }),
        });
    }

    if body.contains(['.', 'e', 'E']) {
        return parse_decimal_float(body, negative).map(TokenKind::Float);
    }
    if !is_num(body, 10) {
        return None;
    }
    let clean = strip_underscores(body);
    Some(match clean.parse::<u64>() {
        Ok(value) => integer(value),
        Err(_) => TokenKind::Float(FloatLit::Decimal {
            negative,
            digits: clean,
        }),
    })
}

/// `num ('.' frac?)? (('e'|'E') sign? num)?`, normalised to
/// `int.fracEexp` for `str::parse`.
fn parse_decimal_float(body: &str, negative: bool) -> Option<FloatLit> {
    let (mantissa, exponent) = split_exponent(body, ['e', 'E'])?;
    let (int, frac) = split_fraction(mantissa, 10)?;
    Some(FloatLit::Decimal {
        negative,
        digits: format!("{}.{}e{}", int, frac, exponent),
    })
}

/// `hexnum ('.' hexfrac?)? (('p'|'P') sign? num)?` after the `0x`,
/// normalised to `0xint.fracpexp` for `fhex`.
fn parse_hex_float(body: &str, negative: bool) -> Option<FloatLit> {
    let (mantissa, exponent) = split_exponent(body, ['p', 'P'])?;
    let (int, frac) = split_fraction(mantissa, 16)?;
    Some(FloatLit::Hex {
        negative,
        digits: format!("0x{}.{}p{}", int, frac, exponent),
    })
}

/// Split off and validate the exponent; a missing exponent is `0`.
fn split_exponent(body: &str, markers: [char; 2]) -> Option<(&str, String)> {
    match body.find(markers) {
        None => Some((body, "0".to_string())),
        Some(at) => {
            let exp = &body[at + 1..];
            let (sign, digits) = match exp.as_bytes().first() {
                Some(b'+') => ("", &exp[1..]),
                Some(b'-') => ("-", &exp[1..]),
                _ => ("", exp),
            };
            is_num(digits, 10).then(|| (&body[..at], format!("{}{}", sign, strip_underscores(digits))))
        }
    }
}

/// Split and validate `int ('.' frac?)?`; a missing fraction is `0`.
fn split_fraction(mantissa: &str, radix: u32) -> Option<(String, String)> {
    let (int, frac) = match mantissa.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (mantissa, ""),
    };
    if !is_num(int, radix) || !(frac.is_empty() || is_num(frac, radix)) {
        return None;
    }
    let frac = if frac.is_empty() {
        "0".to_string()
    } else {
        strip_underscores(frac)
    };
    Some((strip_underscores(int), frac))
}

/// `inf`, `nan` and `nan:0xN` (sign already removed).
fn parse_special_float(body: &str, negative: bool) -> Option<FloatLit> {
    match body {
        "inf" => Some(FloatLit::Inf { negative }),
        "nan" => Some(FloatLit::Nan {
            negative,
            payload: None,
        }),
        _ => {
            let payload = body.strip_prefix("nan:0x")?;
            if !is_num(payload, 16) {
                return None;
            }
            let payload = u64::from_str_radix(&strip_underscores(payload), 16).ok()?;
            Some(FloatLit::Nan {
                negative,
                payload: Some(payload),
            })
        }
    }
}

/// Digits of `radix` with single `_` separators strictly between digits.
fn is_num(s: &str, radix: u32) -> bool {
    let digit = |c: char| c.is_digit(radix);
    s.starts_with(digit)
        && s.ends_with(digit)
        && !s.contains("__")
        && s.chars().all(|c| digit(c) || c == '_')
}

fn strip_underscores(s: &str) -> String {
    s.chars().filter(|&c| c != '_').collect()
}

/// Characters that may appear in keywords, identifiers and numbers.
fn is_idchar(c: char) -> bool {
    matches!(
        c,
        '0'..='9'
            | 'a'..='z'
            | 'A'..='Z'
            | '!'
            | '#'
            | '$'
            | '%'
            | '&'
            | '\''
            | '*'
            | '+'
            | '-'
            | '.'
            | '/'
            | ':'
            | '<'
            | '='
            | '>'
            | '?'
            | '@'
            | '\\'
            | '^'
            | '_'
            | '`'
            | '|'
            | '~'
    )
}

// ============================================================================
// Tests
// ============================================================================
