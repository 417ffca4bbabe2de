//! Lexical analyzer.
//!
//! The whole source lives in one addressable buffer so the parser can save a
//! cursor, re-scan a previously seen span (method bodies, `while` conditions),
//! and jump back.  Line numbers are recomputed on demand from a table of
//! line-start offsets, so rewinding never corrupts error locations.

use crate::diag::{ErrorKind, Line};
use crate::token::{Token, TokenKind};

/// Turn a source buffer into a sequence of tokens, with absolute positioning.
#[derive(Debug)]
pub struct Scanner {
    text: String,
    pos: usize,
    token_start: usize,
    line_starts: Vec<usize>,
    error: Option<ErrorKind>,
}

impl Scanner {
    /// Creates a new scanner over `source`.
    pub fn new(source: &str) -> Scanner {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Scanner {
            text: source.to_string(),
            pos: 0,
            token_start: 0,
            line_starts,
            error: None,
        }
    }

    /// Scan the next token and return it.
    ///
    /// Malformed input yields a [`TokenKind::Error`] token; the cause is left
    /// in [`Scanner::take_error`] and scanning may continue past it.
    pub fn scan(&mut self) -> Token {
        self.error = None;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
        self.token_start = self.pos;

        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Token::new("", TokenKind::End),
        };
        if ch.is_ascii_digit() {
            return self.scan_number();
        }
        if ch.is_ascii_alphabetic() {
            return self.scan_identifier();
        }

        self.pos += 1;
        let kind = match ch {
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b'{' => TokenKind::LeftBrace,
            b'}' => TokenKind::RightBrace,
            b'=' => {
                if self.eat(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Assign
                }
            }
            b'+' => {
                if self.eat(b'=') {
                    TokenKind::PlusAssign
                } else if self.eat(b'+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.eat(b'=') {
                    TokenKind::MinusAssign
                } else if self.eat(b'-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    TokenKind::NotEqual
                } else {
                    self.error = Some(ErrorKind::UnknownCharacter(self.lexeme()));
                    TokenKind::Error
                }
            }
            _ => {
                self.error = Some(ErrorKind::UnknownCharacter(self.lexeme()));
                TokenKind::Error
            }
        };
        self.token(kind)
    }

    fn scan_number(&mut self) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() != Some(b'.') {
            return self.token(TokenKind::ConstInt);
        }
        self.pos += 1;
        if !matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.error = Some(ErrorKind::MalformedNumber(self.lexeme()));
            return self.token(TokenKind::Error);
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.token(TokenKind::ConstDouble)
    }

    fn scan_identifier(&mut self) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let lexeme = self.lexeme();
        let kind = keyword(&lexeme).unwrap_or(TokenKind::Identifier);
        Token::new(lexeme, kind)
    }

    /// Returns the cursor position (the offset scanning resumes from).
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Moves the cursor to an absolute offset previously obtained from
    /// [`Scanner::pos`] or [`Scanner::token_start`].
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Start offset of the most recently scanned token.
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    /// Line number of the most recently scanned token.
    pub fn line(&self) -> Line {
        self.line_starts
            .partition_point(|&start| start <= self.token_start) as Line
    }

    /// Full text of the line containing the most recently scanned token.
    pub fn current_line_text(&self) -> String {
        let line = self.line() as usize;
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .map(|&next| next - 1)
            .unwrap_or(self.text.len());
        String::from_utf8_lossy(&self.text.as_bytes()[start..end]).into_owned()
    }

    /// Cause of the last [`TokenKind::Error`] token.
    pub fn take_error(&mut self) -> Option<ErrorKind> {
        self.error.take()
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> String {
        String::from_utf8_lossy(&self.text.as_bytes()[self.token_start..self.pos]).into_owned()
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token::new(self.lexeme(), kind)
    }
}

fn keyword(name: &str) -> Option<TokenKind> {
    match name {
        "int" => Some(TokenKind::Int),
        "double" => Some(TokenKind::Double),
        "void" => Some(TokenKind::Void),
        "class" => Some(TokenKind::Class),
        "while" => Some(TokenKind::While),
        "return" => Some(TokenKind::Return),
        "main" => Some(TokenKind::Main),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(input: &str) -> Vec<TokenKind> {
        let mut s = Scanner::new(input);
        let mut kinds = vec![];
        loop {
            let t = s.scan();
            let done = t.kind == TokenKind::End || t.kind == TokenKind::Error;
            kinds.push(t.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn scan_single_token() {
        assert_eq!(scan("+"), vec![TokenKind::Plus, TokenKind::End]);
    }

    #[test]
    fn fixed_tokens() {
        assert_eq!(
            scan("+ - * / % ( ) { } ; , ."),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn two_char_operators_are_greedy() {
        assert_eq!(
            scan("== != <= >= < > += -= *= /= %= ++ -- ="),
            vec![
                TokenKind::EqualEqual,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::PlusAssign,
                TokenKind::MinusAssign,
                TokenKind::StarAssign,
                TokenKind::SlashAssign,
                TokenKind::PercentAssign,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Assign,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn adjacent_operators_without_blanks() {
        assert_eq!(
            scan("x+=1;"),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusAssign,
                TokenKind::ConstInt,
                TokenKind::Semicolon,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn numeric_constants() {
        let mut s = Scanner::new("42 4.2");
        assert_eq!(s.scan(), Token::new("42", TokenKind::ConstInt));
        assert_eq!(s.scan(), Token::new("4.2", TokenKind::ConstDouble));
        assert_eq!(s.scan().kind, TokenKind::End);
    }

    #[test]
    fn trailing_dot_is_malformed() {
        let mut s = Scanner::new("3.");
        assert_eq!(s.scan().kind, TokenKind::Error);
        assert_eq!(s.take_error(), Some(ErrorKind::MalformedNumber("3.".to_string())));
    }

    #[test]
    fn lone_bang_is_an_error() {
        let mut s = Scanner::new("!x");
        assert_eq!(s.scan().kind, TokenKind::Error);
        assert_eq!(s.take_error(), Some(ErrorKind::UnknownCharacter("!".to_string())));
    }

    #[test]
    fn identifiers_and_keywords() {
        let mut s = Scanner::new("int double void class while return main foo t42");
        let kinds = [
            TokenKind::Int,
            TokenKind::Double,
            TokenKind::Void,
            TokenKind::Class,
            TokenKind::While,
            TokenKind::Return,
            TokenKind::Main,
            TokenKind::Identifier,
            TokenKind::Identifier,
        ];
        for k in kinds {
            assert_eq!(s.scan().kind, k);
        }
        let last = Scanner::new("t42").scan();
        assert_eq!(last, Token::new("t42", TokenKind::Identifier));
    }

    #[test]
    fn rewind_rescans_the_same_tokens() {
        let mut s = Scanner::new("a = b + c;");
        assert_eq!(s.scan().lexeme, "a");
        assert_eq!(s.scan().kind, TokenKind::Assign);
        let mark = s.pos();
        assert_eq!(s.scan().lexeme, "b");
        assert_eq!(s.scan().kind, TokenKind::Plus);
        assert_eq!(s.scan().lexeme, "c");
        s.set_pos(mark);
        assert_eq!(s.scan().lexeme, "b");
        assert_eq!(s.scan().kind, TokenKind::Plus);
    }

    #[test]
    fn token_start_addresses_the_token() {
        let mut s = Scanner::new("  foo bar");
        s.scan();
        assert_eq!(s.token_start(), 2);
        s.scan();
        assert_eq!(s.token_start(), 6);
        s.set_pos(2);
        assert_eq!(s.scan().lexeme, "foo");
    }

    #[test]
    fn lines_are_recomputed_after_rewind() {
        let mut s = Scanner::new("one\ntwo three\nfour");
        s.scan();
        assert_eq!(s.line(), 1);
        s.scan();
        assert_eq!(s.line(), 2);
        let mark = s.pos();
        s.scan();
        assert_eq!(s.line(), 2);
        s.scan();
        assert_eq!(s.line(), 3);
        s.set_pos(mark);
        s.scan();
        assert_eq!(s.line(), 2);
        assert_eq!(s.current_line_text(), "two three");
    }

    #[test]
    fn line_text_of_last_line() {
        let mut s = Scanner::new("a\nb c");
        s.scan();
        s.scan();
        assert_eq!(s.current_line_text(), "b c");
    }
}
