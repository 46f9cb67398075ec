//! FHIRPath lexer - tokenizes input strings
//!
//! Converts FHIRPath expression strings into a stream of tokens.
//! Date and time literals are normalized while lexing: a `Txx:yy:zz` time is
//! padded to full length, a length-10 date passes through unchanged, and
//! longer forms are coerced to UTC ISO-8601 when possible.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::token::{Token, TokenKind};

/// The FHIRPath lexer
pub struct Lexer {
    position: usize,
    line: usize,
    column: usize,
    chars: Vec<char>,
    current_char: Option<char>,
}

impl Lexer {
    /// Create a new lexer for the given input
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            position: 0,
            line: 1,
            column: 1,
            chars,
            current_char,
        }
    }

    /// Tokenize the whole input, dropping comment tokens.
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            if token.kind != TokenKind::Comment {
                tokens.push(token);
            }
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Advance to the next character
    fn advance(&mut self) {
        if let Some(c) = self.current_char {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.position += 1;
        self.current_char = self.chars.get(self.position).copied();
    }

    /// Peek at the next character without advancing
    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current_char {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Produce the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        let Some(c) = self.current_char else {
            return Ok(Token::eof(line, column));
        };

        match c {
            '/' if self.peek() == Some('/') => self.read_line_comment(line, column),
            '/' if self.peek() == Some('*') => self.read_block_comment(line, column),
            '\'' => self.read_string(line, column),
            '`' => self.read_delimited_identifier(line, column),
            '@' => self.read_temporal(line, column),
            '$' => self.read_dollar_identifier(line, column),
            c if c.is_ascii_digit() => self.read_number(line, column),
            c if c.is_alphabetic() || c == '_' => Ok(Token::new(
                TokenKind::Identifier,
                self.read_identifier(),
                line,
                column,
            )),
            _ => self.read_symbol(line, column),
        }
    }

    fn read_line_comment(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip first '/'
        self.advance(); // Skip second '/'

        let mut value = String::new();
        while let Some(c) = self.current_char {
            if c == '\n' {
                break;
            }
            value.push(c);
            self.advance();
        }
        Ok(Token::new(TokenKind::Comment, value, line, column))
    }

    fn read_block_comment(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip '/'
        self.advance(); // Skip '*'

        let mut value = String::new();
        while let Some(c) = self.current_char {
            if c == '*' && self.peek() == Some('/') {
                self.advance(); // Skip '*'
                self.advance(); // Skip '/'
                return Ok(Token::new(TokenKind::Comment, value, line, column));
            }
            value.push(c);
            self.advance();
        }
        Err(Error::ParseError(format!(
            "Unterminated block comment at line {}, column {}",
            line, column
        )))
    }

    fn read_string(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip opening quote

        let mut value = String::new();
        while let Some(c) = self.current_char {
            match c {
                '\'' => {
                    self.advance(); // Skip closing quote
                    return Ok(Token::new(TokenKind::String, value, line, column));
                }
                '\\' => {
                    self.advance(); // Skip backslash
                    let Some(escaped) = self.current_char else {
                        return Err(Error::ParseError(
                            "Incomplete escape sequence in string literal".into(),
                        ));
                    };
                    match escaped {
                        '\'' => value.push('\''),
                        '"' => value.push('"'),
                        '`' => value.push('`'),
                        '\\' => value.push('\\'),
                        '/' => value.push('/'),
                        'f' => value.push('\x0C'),
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        'u' => {
                            self.advance(); // Skip 'u'
                            let mut hex = String::new();
                            for _ in 0..4 {
                                match self.current_char {
                                    Some(h) if h.is_ascii_hexdigit() => {
                                        hex.push(h);
                                        self.advance();
                                    }
                                    _ => {
                                        return Err(Error::ParseError(
                                            "Invalid unicode escape sequence".into(),
                                        ))
                                    }
                                }
                            }
                            let code = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| {
                                    Error::ParseError("Invalid unicode escape sequence".into())
                                })?;
                            value.push(code);
                            continue;
                        }
                        other => {
                            return Err(Error::ParseError(format!(
                                "Invalid escape sequence '\\{}'",
                                other
                            )))
                        }
                    }
                    self.advance();
                }
                _ => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Err(Error::ParseError(format!(
            "Unterminated string literal at line {}, column {}",
            line, column
        )))
    }

    fn read_delimited_identifier(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip opening backtick

        let mut value = String::new();
        while let Some(c) = self.current_char {
            if c == '`' {
                self.advance(); // Skip closing backtick
                return Ok(Token::new(TokenKind::Identifier, value, line, column));
            }
            value.push(c);
            self.advance();
        }

        Err(Error::ParseError(format!(
            "Unterminated delimited identifier at line {}, column {}",
            line, column
        )))
    }

    fn read_dollar_identifier(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip '$'
        let name = self.read_identifier();
        if name.is_empty() {
            return Err(Error::ParseError(format!(
                "Expected identifier after '$' at line {}, column {}",
                line, column
            )));
        }
        Ok(Token::new(
            TokenKind::Identifier,
            format!("${}", name),
            line,
            column,
        ))
    }

    fn read_identifier(&mut self) -> String {
        let start_pos = self.position;

        while let Some(c) = self.current_char {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        self.chars[start_pos..self.position].iter().collect()
    }

    fn read_number(&mut self, line: usize, column: usize) -> Result<Token> {
        let start_pos = self.position;

        while matches!(self.current_char, Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        // Decimal point only when followed by another digit ('.' alone is the
        // path operator, as in `1.convertsToString()`).
        if self.current_char == Some('.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance(); // Skip '.'
            while matches!(self.current_char, Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let value: String = self.chars[start_pos..self.position].iter().collect();
        Ok(Token::new(TokenKind::Number, value, line, column))
    }

    fn read_temporal(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // Skip '@'

        let start_pos = self.position;
        while matches!(
            self.current_char,
            Some(c) if c.is_ascii_digit()
                || matches!(c, '-' | ':' | 'T' | 'Z' | '+' | '.')
        ) {
            self.advance();
        }

        let raw: String = self.chars[start_pos..self.position].iter().collect();
        if raw.is_empty() {
            return Err(Error::ParseError(format!(
                "Expected date/time literal after '@' at line {}, column {}",
                line, column
            )));
        }

        Ok(Token::new(
            TokenKind::DateTime,
            normalize_temporal(&raw),
            line,
            column,
        ))
    }

    fn read_symbol(&mut self, line: usize, column: usize) -> Result<Token> {
        let c = self.current_char.unwrap();

        // Two-character operators first
        if let Some(next) = self.peek() {
            let pair = match (c, next) {
                ('<', '=') => Some("<="),
                ('>', '=') => Some(">="),
                ('!', '=') => Some("!="),
                ('!', '~') => Some("!~"),
                _ => None,
            };
            if let Some(op) = pair {
                self.advance();
                self.advance();
                return Ok(Token::new(TokenKind::Symbol, op.to_string(), line, column));
            }
        }

        match c {
            '.' | ',' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '-' | '*' | '/' | '|' | '&'
            | '<' | '>' | '=' | '~' | '%' => {
                self.advance();
                Ok(Token::new(TokenKind::Symbol, c.to_string(), line, column))
            }
            other => Err(Error::ParseError(format!(
                "Unexpected character '{}' at line {}, column {}",
                other, line, column
            ))),
        }
    }
}

/// Normalize a date/time literal (without the leading `@`).
///
/// - `Txx[:yy[:zz]]` times are padded to `Thh:mm:ss`.
/// - A length-10 `YYYY-MM-DD` date passes through.
/// - Longer forms are coerced to UTC ISO-8601 when parseable, else kept
///   verbatim (partial dates such as `2020-03`).
fn normalize_temporal(raw: &str) -> String {
    if let Some(time) = raw.strip_prefix('T') {
        return format!("T{}", pad_time(time));
    }

    if raw.len() == 10 {
        return raw.to_string();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
    }

    // Zone-less datetimes are interpreted as UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Utc
                .from_utc_datetime(&naive)
                .to_rfc3339_opts(SecondsFormat::Millis, true);
        }
    }

    raw.to_string()
}

/// Pad a partial `hh[:mm[:ss]]` time to full `hh:mm:ss` length.
fn pad_time(time: &str) -> String {
    let mut parts: Vec<String> = time.splitn(3, ':').map(|p| p.to_string()).collect();
    while parts.len() < 3 {
        parts.push("00".to_string());
    }
    parts.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_partial_times() {
        assert_eq!(normalize_temporal("T12"), "T12:00:00");
        assert_eq!(normalize_temporal("T12:30"), "T12:30:00");
        assert_eq!(normalize_temporal("T12:30:05"), "T12:30:05");
    }

    #[test]
    fn passes_through_plain_dates() {
        assert_eq!(normalize_temporal("2020-03-15"), "2020-03-15");
        assert_eq!(normalize_temporal("2020-03"), "2020-03");
    }

    #[test]
    fn coerces_datetimes_to_utc() {
        assert_eq!(
            normalize_temporal("2020-03-15T10:00:00+02:00"),
            "2020-03-15T08:00:00.000Z"
        );
        assert_eq!(
            normalize_temporal("2020-03-15T10:00:00"),
            "2020-03-15T10:00:00.000Z"
        );
    }
}
