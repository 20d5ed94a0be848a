//! Lexical buffer and transactional token readers for `.proto` source.
//!
//! Every reader either consumes a token and returns it, or restores the
//! buffer to its pre-call offset and returns a typed error, so entity parsers
//! can probe alternatives freely.

use crate::ParseError;

/// A cursor over `.proto` source text.
#[derive(Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

/// A resolved source position, for error reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    /// 1-based line number.
    pub line: usize,
    /// 1-based byte column within the line.
    pub col: usize,
    /// The full text of the offending line.
    pub line_text: String,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer { src, pos: 0 }
    }

    /// Current byte offset into the source.
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Computes the line/column of a byte offset.
    pub fn location_of(&self, pos: usize) -> Location {
        let pos = pos.min(self.src.len());
        let before = &self.src[..pos];
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = self.src[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(self.src.len());
        Location {
            line: before.matches('\n').count() + 1,
            col: pos - line_start + 1,
            line_text: self.src[line_start..line_end].to_string(),
        }
    }

    /// Skips whitespace and `//` / `/* */` comments. Block comments do not
    /// nest; an unterminated block comment is an error.
    pub fn skip_ws_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.pos += 1;
                }
                Some(b'/') => match self.peek_at(1) {
                    Some(b'/') => {
                        while let Some(byte) = self.advance() {
                            if byte == b'\n' {
                                break;
                            }
                        }
                    }
                    Some(b'*') => {
                        self.pos += 2;
                        loop {
                            match self.peek() {
                                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                    self.pos += 2;
                                    break;
                                }
                                Some(_) => self.pos += 1,
                                None => return Err(ParseError::EndOfBuffer),
                            }
                        }
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    /// True when only whitespace and comments remain.
    pub fn at_end(&mut self) -> Result<bool, ParseError> {
        self.skip_ws_and_comments()?;
        Ok(self.peek().is_none())
    }

    fn transactional<T>(
        &mut self,
        read: impl FnOnce(&mut Lexer<'a>) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let start = self.pos;
        match read(self) {
            Ok(token) => Ok(token),
            Err(error) => {
                self.pos = start;
                Err(error)
            }
        }
    }

    /// Reads an identifier: `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn read_ident(&mut self) -> Result<&'a str, ParseError> {
        self.transactional(|lexer| {
            lexer.skip_ws_and_comments()?;
            let start = lexer.pos;
            match lexer.peek() {
                Some(byte) if byte == b'_' || byte.is_ascii_alphabetic() => lexer.pos += 1,
                Some(_) => return Err(ParseError::UnknownToken),
                None => return Err(ParseError::EndOfBuffer),
            }
            while let Some(byte) = lexer.peek() {
                if byte == b'_' || byte.is_ascii_alphanumeric() {
                    lexer.pos += 1;
                } else {
                    break;
                }
            }
            Ok(&lexer.src[start..lexer.pos])
        })
    }

    /// Reads a dotted identifier; a leading `.` marks the name absolute.
    pub fn read_scoped_ident(&mut self) -> Result<(String, bool), ParseError> {
        self.transactional(|lexer| {
            lexer.skip_ws_and_comments()?;
            let absolute = lexer.peek() == Some(b'.');
            if absolute {
                lexer.pos += 1;
            }
            let mut name = String::from(lexer.read_ident()?);
            while lexer.peek() == Some(b'.') {
                lexer.pos += 1;
                name.push('.');
                name.push_str(lexer.read_ident()?);
            }
            Ok((name, absolute))
        })
    }

    /// Reads an unsigned integer literal: decimal, `0x` hex, or leading-zero
    /// octal. A leading sign is the caller's business.
    pub fn read_int(&mut self) -> Result<u64, ParseError> {
        self.transactional(|lexer| {
            lexer.skip_ws_and_comments()?;
            let start = lexer.pos;
            let (radix, digits_start) = if lexer.peek() == Some(b'0')
                && matches!(lexer.peek_at(1), Some(b'x') | Some(b'X'))
            {
                lexer.pos += 2;
                (16, lexer.pos)
            } else if lexer.peek() == Some(b'0') && matches!(lexer.peek_at(1), Some(b'0'..=b'7')) {
                lexer.pos += 1;
                (8, lexer.pos)
            } else {
                (10, lexer.pos)
            };

            while let Some(byte) = lexer.peek() {
                if (byte as char).is_digit(radix) {
                    lexer.pos += 1;
                } else {
                    break;
                }
            }
            if lexer.pos == digits_start {
                return Err(if lexer.peek().is_none() {
                    ParseError::EndOfBuffer
                } else if start != digits_start {
                    ParseError::InvalidNumber
                } else {
                    ParseError::UnknownToken
                });
            }
            // An integer may not run straight into identifier characters.
            if matches!(lexer.peek(), Some(byte) if byte == b'_' || byte.is_ascii_alphanumeric()) {
                return Err(ParseError::InvalidNumber);
            }
            u64::from_str_radix(&lexer.src[digits_start..lexer.pos], radix)
                .map_err(|_| ParseError::InvalidNumber)
        })
    }

    /// Reads a float literal: `digits [. digits] [(e|E) [sign] digits]`, or a
    /// bare `. digits` form. Fails (and restores) when the text is really an
    /// integer, so callers can try `read_int` first.
    pub fn read_float(&mut self) -> Result<f64, ParseError> {
        self.transactional(|lexer| {
            lexer.skip_ws_and_comments()?;
            let start = lexer.pos;
            let mut saw_digit = false;
            while matches!(lexer.peek(), Some(b'0'..=b'9')) {
                lexer.pos += 1;
                saw_digit = true;
            }
            let mut is_float = false;
            if lexer.peek() == Some(b'.') {
                lexer.pos += 1;
                is_float = true;
                while matches!(lexer.peek(), Some(b'0'..=b'9')) {
                    lexer.pos += 1;
                    saw_digit = true;
                }
            }
            if matches!(lexer.peek(), Some(b'e') | Some(b'E')) && saw_digit {
                lexer.pos += 1;
                is_float = true;
                if matches!(lexer.peek(), Some(b'+') | Some(b'-')) {
                    lexer.pos += 1;
                }
                if !matches!(lexer.peek(), Some(b'0'..=b'9')) {
                    return Err(ParseError::InvalidNumber);
                }
                while matches!(lexer.peek(), Some(b'0'..=b'9')) {
                    lexer.pos += 1;
                }
            }
            if !saw_digit {
                return Err(match lexer.peek() {
                    Some(_) => ParseError::UnknownToken,
                    None => ParseError::EndOfBuffer,
                });
            }
            if !is_float {
                return Err(ParseError::UnknownToken);
            }
            lexer.src[start..lexer.pos]
                .parse()
                .map_err(|_| ParseError::InvalidNumber)
        })
    }

    /// Reads a `true` / `false` literal.
    pub fn read_bool(&mut self) -> Result<bool, ParseError> {
        self.transactional(|lexer| match lexer.read_ident()? {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ParseError::UnknownToken),
        })
    }

    /// Reads a string literal, decoding backslash escapes. Adjacent literals
    /// concatenate, as in C.
    pub fn read_string(&mut self) -> Result<String, ParseError> {
        self.transactional(|lexer| {
            let mut value = lexer.read_string_once()?;
            loop {
                let more = lexer.pos;
                match lexer.read_string_once() {
                    Ok(next) => value.push_str(&next),
                    Err(_) => {
                        lexer.pos = more;
                        return Ok(value);
                    }
                }
            }
        })
    }

    fn read_string_once(&mut self) -> Result<String, ParseError> {
        self.skip_ws_and_comments()?;
        let quote = match self.peek() {
            Some(byte @ (b'"' | b'\'')) => byte,
            Some(_) => return Err(ParseError::UnknownToken),
            None => return Err(ParseError::EndOfBuffer),
        };
        self.pos += 1;

        let mut value = String::new();
        loop {
            match self.advance() {
                Some(byte) if byte == quote => return Ok(value),
                Some(b'\n') | None => return Err(ParseError::InvalidString),
                Some(b'\\') => value.push(self.read_escape()?),
                Some(byte) if byte.is_ascii() => value.push(byte as char),
                Some(_) => {
                    // Multi-byte UTF-8: re-take the full character.
                    self.pos -= 1;
                    let ch = self.src[self.pos..]
                        .chars()
                        .next()
                        .ok_or(ParseError::InvalidString)?;
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn read_escape(&mut self) -> Result<char, ParseError> {
        match self.advance() {
            Some(b'n') => Ok('\n'),
            Some(b'r') => Ok('\r'),
            Some(b't') => Ok('\t'),
            Some(b'\\') => Ok('\\'),
            Some(b'"') => Ok('"'),
            Some(b'\'') => Ok('\''),
            Some(b'x') | Some(b'X') => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match self.peek() {
                        Some(byte) if (byte as char).is_ascii_hexdigit() => {
                            value = value * 16 + (byte as char).to_digit(16).unwrap_or(0);
                            self.pos += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                if digits == 0 {
                    return Err(ParseError::InvalidString);
                }
                char::from_u32(value).ok_or(ParseError::InvalidString)
            }
            Some(byte @ b'0'..=b'7') => {
                let mut value = u32::from(byte - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match self.peek() {
                        Some(byte @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(byte - b'0');
                            self.pos += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                char::from_u32(value).ok_or(ParseError::InvalidString)
            }
            Some(_) => Err(ParseError::InvalidString),
            None => Err(ParseError::EndOfBuffer),
        }
    }

    /// Reads a balanced `{ ... }` region verbatim, string literals included.
    /// Used for aggregate option values and for group bodies, which are
    /// accepted but not modeled.
    pub fn read_balanced_braces(&mut self) -> Result<&'a str, ParseError> {
        self.transactional(|lexer| {
            lexer.skip_ws_and_comments()?;
            let start = lexer.pos;
            if lexer.peek() != Some(b'{') {
                return Err(ParseError::Unexpected("`{`".to_string()));
            }
            lexer.pos += 1;
            let mut depth = 1usize;
            while depth > 0 {
                lexer.skip_ws_and_comments()?;
                match lexer.peek() {
                    Some(b'{') => {
                        lexer.pos += 1;
                        depth += 1;
                    }
                    Some(b'}') => {
                        lexer.pos += 1;
                        depth -= 1;
                    }
                    Some(b'"') | Some(b'\'') => {
                        lexer.read_string_once()?;
                    }
                    Some(_) => lexer.pos += 1,
                    None => return Err(ParseError::EndOfBuffer),
                }
            }
            Ok(&lexer.src[start..lexer.pos])
        })
    }

    /// Consumes `punct` if it is the next token; never fails.
    pub fn try_punct(&mut self, punct: char) -> bool {
        let start = self.pos;
        if self.skip_ws_and_comments().is_err() {
            self.pos = start;
            return false;
        }
        if self.peek() == Some(punct as u8) {
            self.pos += 1;
            true
        } else {
            self.pos = start;
            false
        }
    }

    /// Consumes `punct` or fails with `Unexpected`.
    pub fn expect_punct(&mut self, punct: char) -> Result<(), ParseError> {
        if self.try_punct(punct) {
            Ok(())
        } else if self.clone().at_end().unwrap_or(false) {
            Err(ParseError::EndOfBuffer)
        } else {
            Err(ParseError::Unexpected(format!("`{}`", punct)))
        }
    }

    /// Consumes `keyword` only when the next identifier equals it exactly.
    pub fn try_keyword(&mut self, keyword: &str) -> bool {
        let start = self.pos;
        match self.read_ident() {
            Ok(ident) if ident == keyword => true,
            _ => {
                self.pos = start;
                false
            }
        }
    }

    /// Consumes `keyword` or fails with `Unexpected`.
    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.try_keyword(keyword) {
            Ok(())
        } else {
            Err(ParseError::Unexpected(format!("`{}`", keyword)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idents() {
        let mut lexer = Lexer::new("  foo _bar9 ");
        assert_eq!(lexer.read_ident().unwrap(), "foo");
        assert_eq!(lexer.read_ident().unwrap(), "_bar9");
        assert_eq!(lexer.read_ident().unwrap_err(), ParseError::EndOfBuffer);
    }

    #[test]
    fn ident_failure_restores_offset() {
        let mut lexer = Lexer::new(" 42");
        let before = lexer.pos();
        assert_eq!(lexer.read_ident().unwrap_err(), ParseError::UnknownToken);
        assert_eq!(lexer.pos(), before);
        assert_eq!(lexer.read_int().unwrap(), 42);
    }

    #[test]
    fn scoped_idents() {
        let mut lexer = Lexer::new(".google.protobuf.Any foo.Bar");
        assert_eq!(
            lexer.read_scoped_ident().unwrap(),
            ("google.protobuf.Any".to_string(), true)
        );
        assert_eq!(
            lexer.read_scoped_ident().unwrap(),
            ("foo.Bar".to_string(), false)
        );
    }

    #[test]
    fn comments_are_whitespace() {
        let mut lexer = Lexer::new("// line\n/* block\n * more */ package");
        assert_eq!(lexer.read_ident().unwrap(), "package");
    }

    #[test]
    fn unterminated_block_comment() {
        let mut lexer = Lexer::new("/* nope");
        assert_eq!(
            lexer.skip_ws_and_comments().unwrap_err(),
            ParseError::EndOfBuffer
        );
    }

    #[test]
    fn integers() {
        let mut lexer = Lexer::new("0 15 0x1F 017 1garbage");
        assert_eq!(lexer.read_int().unwrap(), 0);
        assert_eq!(lexer.read_int().unwrap(), 15);
        assert_eq!(lexer.read_int().unwrap(), 31);
        assert_eq!(lexer.read_int().unwrap(), 15);
        assert_eq!(lexer.read_int().unwrap_err(), ParseError::InvalidNumber);
    }

    #[test]
    fn floats() {
        let mut lexer = Lexer::new("3.25 1e3 7");
        assert_eq!(lexer.read_float().unwrap(), 3.25);
        assert_eq!(lexer.read_float().unwrap(), 1000.0);
        // A plain integer is not a float; the offset must be restored.
        assert_eq!(lexer.read_float().unwrap_err(), ParseError::UnknownToken);
        assert_eq!(lexer.read_int().unwrap(), 7);
    }

    #[test]
    fn strings() {
        let mut lexer = Lexer::new(r#""a\tb\x41\101" 'single' "ab" "cd" ;"#);
        assert_eq!(lexer.read_string().unwrap(), "a\tbAA");
        assert_eq!(lexer.read_string().unwrap(), "single");
        // Adjacent literals concatenate.
        assert_eq!(lexer.read_string().unwrap(), "abcd");
        assert!(lexer.try_punct(';'));
    }

    #[test]
    fn bad_escape() {
        let mut lexer = Lexer::new(r#""\q""#);
        assert_eq!(lexer.read_string().unwrap_err(), ParseError::InvalidString);
    }

    #[test]
    fn unterminated_string() {
        let mut lexer = Lexer::new("\"abc\n\"");
        assert_eq!(lexer.read_string().unwrap_err(), ParseError::InvalidString);
    }

    #[test]
    fn locations() {
        let lexer = Lexer::new("line one\nline two\n");
        let location = lexer.location_of(14);
        assert_eq!(location.line, 2);
        assert_eq!(location.col, 6);
        assert_eq!(location.line_text, "line two");
    }

    #[test]
    fn punct_and_keywords() {
        let mut lexer = Lexer::new("syntax = \"proto3\";");
        assert!(lexer.try_keyword("syntax"));
        assert!(!lexer.try_keyword("package"));
        lexer.expect_punct('=').unwrap();
        assert_eq!(lexer.read_string().unwrap(), "proto3");
        lexer.expect_punct(';').unwrap();
        assert!(lexer.at_end().unwrap());
    }
}
