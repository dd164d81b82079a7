//! Character cursor over WAT source text.
//!
//! Tracks byte offset, line and column while the lexer walks the source, so
//! every token and every error can carry an exact position.

use super::token::Span;

/// A remembered point in the source.
///
/// Taken before a token is consumed so a [`Span`] covering the token can be
/// built once it has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

impl Mark {
    /// Span from this mark up to `end`.
    #[must_use]
    pub fn span_to(self, end: Mark) -> Span {
        Span::new(self.offset, end.offset, self.line, self.column)
    }

    /// Zero-length span at this mark.
    #[must_use]
    pub fn point(self) -> Span {
        Span::new(self.offset, self.offset, self.line, self.column)
    }
}

/// Walks source text one `char` at a time.
///
/// Columns count characters rather than bytes, matching what an editor shows.
pub struct Cursor<'a> {
    source: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    /// The current position.
    pub fn mark(&self) -> Mark {
        Mark {
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.source.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Look `n` characters ahead without consuming (`peek_nth(0) == peek()`).
    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    /// Consume one character, updating line and column.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume `expected` if it is next.
    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Consume characters while `predicate` holds, returning the consumed text.
    pub fn eat_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.offset;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.bump();
        }
        &self.source[start..self.offset]
    }

    /// Source text between `mark` and the current position.
    pub fn slice_from(&self, mark: Mark) -> &'a str {
        &self.source[mark.offset..self.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_line_one_column_one() {
        let cursor = Cursor::new("abc");
        assert_eq!(
            cursor.mark(),
            Mark {
                offset: 0,
                line: 1,
                column: 1
            }
        );
        assert!(!cursor.is_eof());
        assert!(Cursor::new("").is_eof());
    }

    #[test]
    fn peeking_does_not_consume() {
        let cursor = Cursor::new("xyz");
        assert_eq!(cursor.peek(), Some('x'));
        assert_eq!(cursor.peek_nth(1), Some('y'));
        assert_eq!(cursor.peek_nth(3), None);
        assert_eq!(cursor.mark().offset, 0);
    }

    #[test]
    fn newline_resets_column() {
        let mut cursor = Cursor::new("a\nbc");
        cursor.bump();
        cursor.bump();
        let mark = cursor.mark();
        assert_eq!((mark.line, mark.column), (2, 1));
        cursor.bump();
        assert_eq!(cursor.mark().column, 2);
    }

    #[test]
    fn columns_count_chars_not_bytes() {
        let mut cursor = Cursor::new("é🦀x");
        cursor.bump();
        cursor.bump();
        let mark = cursor.mark();
        assert_eq!(mark.offset, 6);
        assert_eq!(mark.column, 3);
        assert_eq!(cursor.bump(), Some('x'));
        assert_eq!(cursor.bump(), None);
    }

    #[test]
    fn eat_while_returns_consumed_text() {
        let mut cursor = Cursor::new("i32.add 1");
        assert_eq!(cursor.eat_while(|c| !c.is_whitespace()), "i32.add");
        assert!(cursor.eat(' '));
        assert!(!cursor.eat(' '));
        assert_eq!(cursor.peek(), Some('1'));
    }

    #[test]
    fn span_between_marks() {
        let mut cursor = Cursor::new("(module)");
        cursor.bump();
        let start = cursor.mark();
        cursor.eat_while(|c| c.is_ascii_alphabetic());
        let span = start.span_to(cursor.mark());
        assert_eq!(span, Span::new(1, 7, 1, 2));
        assert_eq!(cursor.slice_from(start), "module");
        assert_eq!(start.point().len(), 0);
    }
}
