//! Scanner for Rill source code.
//!
//! Tokens are produced lazily, one `scan_token` call at a time; the parser
//! keeps a single token of lookahead and nothing else is retained.

use crate::error::LexError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

/// The scanner transforms source text into a stream of tokens.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
    start_pos: usize,
    start_line: usize,
    start_column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Scan all remaining tokens. Used by tests and the token dumper; the
    /// parser pulls tokens one at a time instead.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.scan_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    /// Scan the next token.
    pub fn scan_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments()?;
        self.mark_start();

        let Some((_, c)) = self.advance() else {
            return Ok(Token::eof(self.current_pos, self.line, self.column));
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            '.' => Ok(self.make_token(TokenKind::Dot)),
            ':' => Ok(self.make_token(TokenKind::Colon)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),

            '+' => {
                if self.match_char('+') {
                    Ok(self.make_token(TokenKind::PlusPlus))
                } else if self.match_char('=') {
                    Ok(self.make_token(TokenKind::PlusAssign))
                } else {
                    Ok(self.make_token(TokenKind::Plus))
                }
            }
            '-' => {
                if self.match_char('-') {
                    Ok(self.make_token(TokenKind::MinusMinus))
                } else if self.match_char('=') {
                    Ok(self.make_token(TokenKind::MinusAssign))
                } else {
                    Ok(self.make_token(TokenKind::Minus))
                }
            }
            '*' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::StarAssign))
                } else {
                    Ok(self.make_token(TokenKind::Star))
                }
            }
            '/' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::SlashAssign))
                } else {
                    Ok(self.make_token(TokenKind::Slash))
                }
            }
            '%' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::PercentAssign))
                } else {
                    Ok(self.make_token(TokenKind::Percent))
                }
            }
            '=' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::EqEq))
                } else {
                    Ok(self.make_token(TokenKind::Assign))
                }
            }
            '!' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::BangEq))
                } else {
                    Ok(self.make_token(TokenKind::Bang))
                }
            }
            '<' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::LessEq))
                } else {
                    Ok(self.make_token(TokenKind::Less))
                }
            }
            '>' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::GreaterEq))
                } else {
                    Ok(self.make_token(TokenKind::Greater))
                }
            }
            '&' => {
                if self.match_char('&') {
                    Ok(self.make_token(TokenKind::AndAnd))
                } else {
                    Err(LexError::unexpected_char(c, self.current_span()))
                }
            }
            '|' => {
                if self.match_char('|') {
                    Ok(self.make_token(TokenKind::OrOr))
                } else {
                    Err(LexError::unexpected_char(c, self.current_span()))
                }
            }

            // Escaped string literal
            '"' => self.scan_string(),
            // Raw/verbatim string literal, no escapes
            '\'' => self.scan_raw_string(),

            c if c.is_ascii_digit() => self.scan_number(c),

            c if c.is_alphabetic() || c == '_' => Ok(self.scan_identifier(c)),

            _ => Err(LexError::unexpected_char(c, self.current_span())),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some('/') => {
                    if self.peek_next() == Some('/') {
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    } else if self.peek_next() == Some('*') {
                        self.mark_start();
                        self.advance(); // consume /
                        self.advance(); // consume *
                        let mut closed = false;
                        while !closed {
                            match self.peek() {
                                None => {
                                    return Err(LexError::UnterminatedComment(self.current_span()));
                                }
                                Some('*') if self.peek_next() == Some('/') => {
                                    self.advance();
                                    self.advance();
                                    closed = true;
                                }
                                Some('\n') => {
                                    self.advance();
                                    self.line += 1;
                                    self.column = 1;
                                }
                                _ => {
                                    self.advance();
                                }
                            }
                        }
                    } else {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scan a double-quoted string with escape processing.
    fn scan_string(&mut self) -> Result<Token, LexError> {
        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::unterminated_string(self.current_span()));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => {
                            self.advance();
                            value.push('\n');
                        }
                        Some('r') => {
                            self.advance();
                            value.push('\r');
                        }
                        Some('t') => {
                            self.advance();
                            value.push('\t');
                        }
                        Some('e') => {
                            self.advance();
                            value.push('\x1b');
                        }
                        Some('\\') => {
                            self.advance();
                            value.push('\\');
                        }
                        Some('"') => {
                            self.advance();
                            value.push('"');
                        }
                        Some('x') => {
                            self.advance();
                            value.push(self.scan_hex_escape()?);
                        }
                        Some(c) => {
                            return Err(LexError::invalid_escape(c, self.current_span()));
                        }
                        None => {
                            return Err(LexError::unterminated_string(self.current_span()));
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        Ok(self.make_token(TokenKind::Str(value)))
    }

    /// Scan the `{...}` part of a `\x{...}` escape: a bracketed hex run
    /// naming one Unicode code point.
    fn scan_hex_escape(&mut self) -> Result<char, LexError> {
        if self.peek() != Some('{') {
            return Err(LexError::invalid_escape('x', self.current_span()));
        }
        self.advance();
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() != Some('}') || digits.is_empty() {
            return Err(LexError::invalid_escape('x', self.current_span()));
        }
        self.advance();
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| LexError::invalid_escape('x', self.current_span()))
    }

    /// Scan a single-quoted string verbatim: no escapes, terminated by the
    /// next quote. Newlines are allowed.
    fn scan_raw_string(&mut self) -> Result<Token, LexError> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError::unterminated_string(self.current_span()));
                }
                Some('\'') => {
                    self.advance();
                    break;
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                    value.push('\n');
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
        Ok(self.make_token(TokenKind::Str(value)))
    }

    /// Scan a numeric literal. A leading zero selects an alternate base:
    /// `0b` binary, `0x` hexadecimal, or bare octal digits; otherwise the
    /// literal is decimal with an optional fraction and `e`/`E` exponent.
    fn scan_number(&mut self, first: char) -> Result<Token, LexError> {
        if first == '0' {
            match self.peek() {
                Some('b') | Some('B') => {
                    self.advance();
                    return self.scan_radix_digits(2, |c| c == '0' || c == '1');
                }
                Some('x') | Some('X') => {
                    self.advance();
                    return self.scan_radix_digits(16, |c| c.is_ascii_hexdigit());
                }
                Some(c) if ('0'..='7').contains(&c) => {
                    return self.scan_radix_digits(8, |c| ('0'..='7').contains(&c));
                }
                Some(c) if c.is_ascii_digit() => {
                    // 08 / 09 select octal but carry a non-octal digit
                    return Err(LexError::invalid_number(
                        format!("0{}", c),
                        self.current_span(),
                    ));
                }
                _ => {}
            }
        }

        let mut value = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            value.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    value.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let after_e = self.peek_next();
            let after_sign = self.peek_at(2);
            let has_exponent = match after_e {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => after_sign.is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if has_exponent {
                value.push('e');
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    value.push(self.peek().unwrap());
                    self.advance();
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        value.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let n: f64 = value
            .parse()
            .map_err(|_| LexError::invalid_number(value.clone(), self.current_span()))?;
        Ok(self.make_token(TokenKind::Number(n)))
    }

    fn scan_radix_digits(
        &mut self,
        radix: u32,
        is_digit: fn(char) -> bool,
    ) -> Result<Token, LexError> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if is_digit(c) {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(LexError::invalid_number(
                self.lexeme().to_string(),
                self.current_span(),
            ));
        }
        let n = u64::from_str_radix(&digits, radix)
            .map_err(|_| LexError::invalid_number(digits.clone(), self.current_span()))?;
        Ok(self.make_token(TokenKind::Number(n as f64)))
    }

    fn scan_identifier(&mut self, first: char) -> Token {
        let mut value = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&value).unwrap_or(TokenKind::Ident(value));
        self.make_token(kind)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        if let Some((pos, c)) = self.chars.next() {
            self.current_pos = pos + c.len_utf8();
            self.column += 1;
            Some((pos, c))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        self.source[self.current_pos..].chars().nth(1)
    }

    /// Peek at the character n positions past the current peek position.
    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.current_pos..].chars().nth(n)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn lexeme(&self) -> &str {
        &self.source[self.start_pos..self.current_pos]
    }

    fn current_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            scan("(){}[];"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            scan("42 3.14 1e3 2.5e-2"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.14),
                TokenKind::Number(1000.0),
                TokenKind::Number(0.025),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_alternate_bases() {
        assert_eq!(
            scan("0b101 0xff 017 0"),
            vec![
                TokenKind::Number(5.0),
                TokenKind::Number(255.0),
                TokenKind::Number(15.0),
                TokenKind::Number(0.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_leading_zero_fraction_is_decimal() {
        assert_eq!(
            scan("0.5"),
            vec![TokenKind::Number(0.5), TokenKind::Eof]
        );
    }

    #[test]
    fn test_bad_octal_digit() {
        assert!(Scanner::new("09").scan_tokens().is_err());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            scan(r#""a\tb\n\x{41}""#),
            vec![TokenKind::Str("a\tb\nA".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_raw_string_keeps_backslashes() {
        assert_eq!(
            scan(r"'a\nb'"),
            vec![TokenKind::Str(r"a\nb".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_hex_escape_code_point() {
        assert_eq!(
            scan(r#""\x{1F600}""#),
            vec![TokenKind::Str("\u{1F600}".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            scan("var sub if else while foreach spawn"),
            vec![
                TokenKind::Var,
                TokenKind::Sub,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Foreach,
                TokenKind::Spawn,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            scan("+ ++ += == != <= >= && ||"),
            vec![
                TokenKind::Plus,
                TokenKind::PlusPlus,
                TokenKind::PlusAssign,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            scan("1 // comment\n/* block\ncomment */ 2"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(Scanner::new("/* nope").scan_tokens().is_err());
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Scanner::new("a\n  b").scan_tokens().unwrap();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 3);
    }

    #[test]
    fn test_unexpected_char() {
        assert!(Scanner::new("@").scan_tokens().is_err());
    }
}
