//! 扫描器：把源代码切分成 token 流
//!
//! 换行是有意义的 token（语句分隔符），其余空白与注释被丢弃。
//! 块注释 `/* */` 支持嵌套。

use super::token_kind::TokenKind;
use super::types::{Coordinate, Span};

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 标识符名 / 解码后的字符串内容 / 错误信息
    pub text: String,
    /// 数字字面量的值
    pub number: f64,
    pub span: Span,
}

impl Token {
    pub fn line(&self) -> usize {
        self.span.start.line
    }
}

pub struct Scanner<'a> {
    source: &'a [u8],
    /// 当前 token 的起始字节
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_coord: Coordinate,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_coord: Coordinate::default(),
        }
    }

    /// 扫描全部 token，最后一个总是 Eof
    pub fn scan_all(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;
        self.start_coord = Coordinate {
            line: self.line,
            column: self.column,
        };

        let Some(c) = self.advance() else {
            return self.make(TokenKind::Eof);
        };

        match c {
            b'(' => self.make(TokenKind::LeftParen),
            b')' => self.make(TokenKind::RightParen),
            b'[' => self.make(TokenKind::LeftBracket),
            b']' => self.make(TokenKind::RightBracket),
            b'{' => self.make(TokenKind::LeftBrace),
            b'}' => self.make(TokenKind::RightBrace),
            b':' => self.make(TokenKind::Colon),
            b',' => self.make(TokenKind::Comma),
            b'*' => self.make(TokenKind::Star),
            b'/' => self.make(TokenKind::Slash),
            b'%' => self.make(TokenKind::Percent),
            b'+' => self.make(TokenKind::Plus),
            b'-' => self.make(TokenKind::Minus),
            b'^' => self.make(TokenKind::Caret),
            b'~' => self.make(TokenKind::Tilde),
            b'?' => self.make(TokenKind::Question),
            b'\n' => {
                let token = self.make(TokenKind::Line);
                self.line += 1;
                self.column = 1;
                token
            }
            b'.' => {
                if self.match_byte(b'.') {
                    if self.match_byte(b'.') {
                        self.make(TokenKind::DotDotDot)
                    } else {
                        self.make(TokenKind::DotDot)
                    }
                } else {
                    self.make(TokenKind::Dot)
                }
            }
            b'|' => self.two(b'|', TokenKind::PipePipe, TokenKind::Pipe),
            b'&' => self.two(b'&', TokenKind::AmpAmp, TokenKind::Amp),
            b'!' => self.two(b'=', TokenKind::BangEq, TokenKind::Bang),
            b'=' => self.two(b'=', TokenKind::EqEq, TokenKind::Eq),
            b'<' => {
                if self.match_byte(b'<') {
                    self.make(TokenKind::LtLt)
                } else {
                    self.two(b'=', TokenKind::LtEq, TokenKind::Lt)
                }
            }
            b'>' => {
                if self.match_byte(b'>') {
                    self.make(TokenKind::GtGt)
                } else {
                    self.two(b'=', TokenKind::GtEq, TokenKind::Gt)
                }
            }
            b'"' => self.string(),
            b'_' => {
                let kind = if self.match_byte(b'_') {
                    TokenKind::StaticField
                } else {
                    TokenKind::Field
                };
                self.identifier(kind)
            }
            b'0' if self.peek() == Some(b'x') => self.hex_number(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_ascii_alphabetic() => self.identifier(TokenKind::Name),
            c => {
                if c.is_ascii() {
                    self.error(format!("Invalid character '{}'.", c as char))
                } else {
                    // 跳过剩余的 UTF-8 续字节
                    while matches!(self.peek(), Some(b) if b & 0xC0 == 0x80) {
                        self.advance();
                    }
                    let text = String::from_utf8_lossy(&self.source[self.start..self.current]);
                    self.error(format!("Invalid character '{text}'."))
                }
            }
        }
    }

    // ==================== 字符流 ====================

    fn peek(&self) -> Option<u8> {
        self.source.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.current += 1;
        self.column += 1;
        Some(c)
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn two(&mut self, second: u8, matched: TokenKind, single: TokenKind) -> Token {
        if self.match_byte(second) {
            self.make(matched)
        } else {
            self.make(single)
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_next() == Some(b'*') => self.block_comment(),
                _ => return,
            }
        }
    }

    fn block_comment(&mut self) {
        self.advance();
        self.advance();
        let mut depth = 1;
        while depth > 0 {
            match self.advance() {
                None => return,
                Some(b'\n') => {
                    self.line += 1;
                    self.column = 1;
                }
                Some(b'/') if self.peek() == Some(b'*') => {
                    self.advance();
                    depth += 1;
                }
                Some(b'*') if self.peek() == Some(b'/') => {
                    self.advance();
                    depth -= 1;
                }
                Some(_) => {}
            }
        }
    }

    // ==================== token 构造 ====================

    fn make(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            text: String::new(),
            number: 0.0,
            span: Span::new(
                self.start_coord,
                Coordinate {
                    line: self.line,
                    column: self.column,
                },
            ),
        }
    }

    fn error(&self, message: String) -> Token {
        let mut token = self.make(TokenKind::Error);
        token.text = message;
        token
    }

    fn identifier(&mut self, kind: TokenKind) -> Token {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.source[self.start..self.current]).into_owned();
        let kind = if kind == TokenKind::Name {
            TokenKind::keyword(&text).unwrap_or(TokenKind::Name)
        } else {
            kind
        };
        let mut token = self.make(kind);
        token.text = text;
        token
    }

    fn number(&mut self) -> Token {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        // `1..2` 中的点属于范围运算符
        if self.peek() == Some(b'.') && matches!(self.peek_next(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            if !matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                return self.error("Unterminated scientific notation.".to_string());
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = String::from_utf8_lossy(&self.source[self.start..self.current]);
        match text.parse::<f64>() {
            Ok(value) => {
                let mut token = self.make(TokenKind::Number);
                token.number = value;
                token
            }
            Err(_) => self.error(format!("Invalid number literal '{text}'.")),
        }
    }

    fn hex_number(&mut self) -> Token {
        self.advance();
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            self.advance();
        }
        let digits = String::from_utf8_lossy(&self.source[self.start + 2..self.current]);
        match u64::from_str_radix(&digits, 16) {
            Ok(value) => {
                let mut token = self.make(TokenKind::Number);
                token.number = value as f64;
                token
            }
            Err(_) => self.error(format!("Invalid hex literal '0x{digits}'.")),
        }
    }

    fn string(&mut self) -> Token {
        let mut text = String::new();
        let mut segment_start = self.current;
        loop {
            let Some(c) = self.advance() else {
                return self.error("Unterminated string.".to_string());
            };
            match c {
                b'"' => {
                    text.push_str(&String::from_utf8_lossy(
                        &self.source[segment_start..self.current - 1],
                    ));
                    break;
                }
                b'\\' => {
                    text.push_str(&String::from_utf8_lossy(
                        &self.source[segment_start..self.current - 1],
                    ));
                    match self.escape() {
                        Ok(ch) => text.push(ch),
                        Err(message) => return self.error(message),
                    }
                    segment_start = self.current;
                }
                b'\n' => {
                    self.line += 1;
                    self.column = 1;
                }
                _ => {}
            }
        }
        let mut token = self.make(TokenKind::String);
        token.text = text;
        token
    }

    fn escape(&mut self) -> Result<char, String> {
        let Some(c) = self.advance() else {
            return Err("Unterminated string.".to_string());
        };
        let ch = match c {
            b'"' => '"',
            b'\\' => '\\',
            b'%' => '%',
            b'0' => '\0',
            b'a' => '\u{07}',
            b'b' => '\u{08}',
            b'e' => '\u{1b}',
            b'f' => '\u{0c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'v' => '\u{0b}',
            b'u' => return self.unicode_escape(4),
            b'U' => return self.unicode_escape(8),
            other => return Err(format!("Invalid escape character '{}'.", other as char)),
        };
        Ok(ch)
    }

    fn unicode_escape(&mut self, digits: usize) -> Result<char, String> {
        let mut value: u32 = 0;
        for _ in 0..digits {
            let digit = self
                .peek()
                .and_then(|c| (c as char).to_digit(16))
                .ok_or_else(|| "Incomplete Unicode escape sequence.".to_string())?;
            self.advance();
            value = value * 16 + digit;
        }
        char::from_u32(value).ok_or_else(|| format!("Invalid Unicode code point {value:#x}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).scan_all().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_ranges() {
        assert_eq!(
            kinds("1..2 ... == != <= >>"),
            vec![
                TokenKind::Number,
                TokenKind::DotDot,
                TokenKind::Number,
                TokenKind::DotDotDot,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LtEq,
                TokenKind::GtGt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_fields_and_keywords() {
        assert_eq!(
            kinds("class _a __b foo"),
            vec![
                TokenKind::Class,
                TokenKind::Field,
                TokenKind::StaticField,
                TokenKind::Name,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = Scanner::new("0xff 1.5e2 3").scan_all();
        assert_eq!(tokens[0].number, 255.0);
        assert_eq!(tokens[1].number, 150.0);
        assert_eq!(tokens[2].number, 3.0);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Scanner::new(r#""a\tb\u0041\"""#).scan_all();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, "a\tbA\"");
    }

    #[test]
    fn test_utf8_string_passthrough() {
        let tokens = Scanner::new("\"héllo\"").scan_all();
        assert_eq!(tokens[0].text, "héllo");
    }

    #[test]
    fn test_nested_block_comment_and_lines() {
        let tokens = Scanner::new("a /* x /* y */ z\n */ b\nc").scan_all();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::Line,
                TokenKind::Name,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[1].line(), 2);
        assert_eq!(tokens[3].line(), 3);
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = Scanner::new("\"abc").scan_all();
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens[0].text, "Unterminated string.");
    }
}
