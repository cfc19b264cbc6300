//! Byte-oriented lexer with one token of lookahead.
//!
//! `get_token` peeks the current token; `retire_token` advances. The
//! scanner tracks line and column for diagnostics and records, per source
//! line, the original text plus the first code offset emitted for it (the
//! annotation stream consumed by the decompiler).
//!
//! Lexical oddities are deliberate: an invalid escape becomes `?`, a
//! malformed hex literal becomes `Unknown`, and an unterminated string is
//! returned with its partial contents rather than aborting the scan.

use crate::token::{Token, TokenValue};

const C_EOF: u8 = 0xff;

/// Longest identifier the scanner keeps; extra characters are dropped.
pub const MAX_ID_LENGTH: usize = 32;

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_hex(c: u8) -> bool {
    matches!(c, b'a'..=b'f' | b'A'..=b'F')
}

fn is_id_first(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'$' || c == b'_'
}

fn is_id_other(c: u8) -> bool {
    is_id_first(c) || is_digit(c)
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\r' | b'\x0c' | b'\t' | b'\x0b')
}

fn is_special(c: u8) -> bool {
    // '$' and '_' start identifiers, not punctuation.
    !matches!(c, b'$' | b'_')
        && matches!(c, b'!'..=b'/' | b':'..=b'@' | b'['..=b'`' | b'{'..=b'~')
}

/// One source line paired with the first code offset emitted for it
/// (-1 when the line produced no code).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub first_offset: i32,
    pub text: String,
}

/// The lexer.
pub struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    putback: Option<u8>,
    lineno: u32,
    charno: u32,
    ignore_newlines: bool,
    current: Option<Token>,
    value: TokenValue,
    annotations: Vec<Annotation>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            putback: None,
            lineno: 1,
            charno: 1,
            ignore_newlines: false,
            current: None,
            value: TokenValue::default(),
            annotations: vec![Annotation {
                first_offset: -1,
                text: String::new(),
            }],
        }
    }

    /// When set, newline tokens are elided. The Clover front-end sets it.
    pub fn set_ignore_newlines(&mut self, ignore: bool) {
        self.ignore_newlines = ignore;
    }

    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    pub fn charno(&self) -> u32 {
        self.charno
    }

    /// The current token, scanning it if necessary. Does not advance.
    pub fn get_token(&mut self) -> Token {
        if let Some(token) = self.current {
            return token;
        }
        let mut value = TokenValue::default();
        let token = self.scan_token(&mut value);
        self.value = value;
        self.current = Some(token);
        token
    }

    /// The payload of the current token.
    pub fn token_value(&mut self) -> &TokenValue {
        self.get_token();
        &self.value
    }

    /// Identifier text of the current token, or empty.
    pub fn token_string(&mut self) -> String {
        if self.get_token() == Token::Identifier {
            String::from_utf8_lossy(&self.value.text).into_owned()
        } else {
            String::new()
        }
    }

    /// Consume the current token.
    pub fn retire_token(&mut self) {
        self.current = None;
    }

    /// First code offset recorded for the current line, -1 if none yet.
    pub fn annotation(&self) -> i32 {
        self.annotations.last().map(|a| a.first_offset).unwrap_or(-1)
    }

    /// Record the first code offset for the current line.
    pub fn set_annotation(&mut self, offset: i32) {
        if let Some(a) = self.annotations.last_mut() {
            a.first_offset = offset;
        }
    }

    pub fn take_annotations(&mut self) -> Vec<Annotation> {
        std::mem::take(&mut self.annotations)
    }

    fn get(&mut self) -> u8 {
        if let Some(c) = self.putback.take() {
            return c;
        }
        if self.pos >= self.src.len() {
            return C_EOF;
        }
        let c = self.src[self.pos];
        self.pos += 1;
        self.charno += 1;
        if let Some(a) = self.annotations.last_mut() {
            a.text.push(c as char);
        }
        if c == b'\n' {
            self.lineno += 1;
            self.charno = 1;
            self.annotations.push(Annotation {
                first_offset: -1,
                text: String::new(),
            });
        }
        c
    }

    fn putback(&mut self, c: u8) {
        debug_assert!(self.putback.is_none() && c != C_EOF);
        self.putback = Some(c);
    }

    fn scan_token(&mut self, value: &mut TokenValue) -> Token {
        loop {
            let c = self.get();
            if c == C_EOF {
                return Token::EndOfFile;
            }
            if is_space(c) {
                continue;
            }
            match c {
                b'\n' => {
                    if self.ignore_newlines {
                        continue;
                    }
                    return Token::NewLine;
                }
                b'/' => match self.scan_comment() {
                    Some(Token::EndOfFile) => return Token::EndOfFile,
                    Some(t) => return t,
                    None => continue, // comment stripped
                },
                b'"' | b'\'' => {
                    value.text = self.scan_string(c);
                    return Token::String;
                }
                _ => {
                    self.putback(c);
                    if let Some(t) = self.scan_special() {
                        return t;
                    }
                    if let Some(t) = self.scan_number(value) {
                        return t;
                    }
                    if let Some(t) = self.scan_identifier(value) {
                        return t;
                    }
                    // Consume the offending byte so the scan makes progress.
                    self.get();
                    return Token::Unknown;
                }
            }
        }
    }

    /// Scan a string body after the opening delimiter. Returns the raw
    /// bytes; stops at the delimiter or EOF (partial contents survive).
    fn scan_string(&mut self, terminal: u8) -> Vec<u8> {
        let mut text = Vec::new();
        loop {
            let c = self.get();
            if c == C_EOF || c == terminal {
                break;
            }
            if c != b'\\' {
                text.push(c);
                continue;
            }
            let e = self.get();
            match e {
                C_EOF => {
                    text.push(b'?');
                    break;
                }
                b'a' => text.push(0x07),
                b'b' => text.push(0x08),
                b'f' => text.push(0x0c),
                b'n' => text.push(0x0a),
                b'r' => text.push(0x0d),
                b't' => text.push(0x09),
                b'v' => text.push(0x0b),
                b'\\' => text.push(b'\\'),
                b'\'' => text.push(b'\''),
                b'"' => text.push(b'"'),
                b'?' => text.push(b'?'),
                b'u' | b'x' => {
                    let first = self.get();
                    if first == C_EOF {
                        break;
                    }
                    if !is_hex(first) && !is_digit(first) {
                        text.push(b'?');
                        continue;
                    }
                    self.putback(first);
                    let mut num: u32 = 0;
                    loop {
                        let d = self.get();
                        if d == C_EOF {
                            break;
                        }
                        let v = match d {
                            b'0'..=b'9' => u32::from(d - b'0'),
                            b'a'..=b'f' => u32::from(d - b'a') + 10,
                            b'A'..=b'F' => u32::from(d - b'A') + 10,
                            _ => {
                                self.putback(d);
                                break;
                            }
                        };
                        num = (num << 4) | v;
                    }
                    // Wide escapes expand to as many bytes as the value
                    // needs, most significant first.
                    if num > 0xff_ffff {
                        text.push((num >> 24) as u8);
                    }
                    if num > 0xffff {
                        text.push((num >> 16) as u8);
                    }
                    if num > 0xff {
                        text.push((num >> 8) as u8);
                    }
                    text.push(num as u8);
                }
                _ => text.push(b'?'),
            }
        }
        text
    }

    fn scan_identifier(&mut self, value: &mut TokenValue) -> Option<Token> {
        let mut text = Vec::new();
        let mut first = true;
        loop {
            let c = self.get();
            if c == C_EOF {
                break;
            }
            let ok = if first { is_id_first(c) } else { is_id_other(c) };
            if !ok {
                self.putback(c);
                break;
            }
            if text.len() < MAX_ID_LENGTH {
                text.push(c);
            }
            first = false;
        }
        if text.is_empty() {
            return None;
        }
        value.text = text;
        Some(Token::Identifier)
    }

    /// Accumulate digits into `number`; returns how many were scanned.
    fn scan_digits(&mut self, number: &mut i64, hex: bool) -> i32 {
        let radix: i64 = if hex { 16 } else { 10 };
        let mut count = 0;
        loop {
            let c = self.get();
            if c == C_EOF {
                break;
            }
            let digit = match c {
                b'0'..=b'9' => i64::from(c - b'0'),
                b'a'..=b'f' if hex => i64::from(c - b'a') + 10,
                b'A'..=b'F' if hex => i64::from(c - b'A') + 10,
                _ => {
                    self.putback(c);
                    break;
                }
            };
            *number = number.wrapping_mul(radix).wrapping_add(digit);
            count += 1;
        }
        count
    }

    /// Scan the fractional part and exponent, if present.
    fn scan_float(&mut self, mantissa: &mut i64, exp: &mut i32) -> bool {
        let mut have_float = false;
        let mut c = self.get();
        if c == C_EOF {
            return false;
        }
        if c == b'.' {
            have_float = true;
            *exp = -self.scan_digits(mantissa, false);
            c = self.get();
            if c == C_EOF {
                return true;
            }
        }
        if c == b'e' || c == b'E' {
            have_float = true;
            let c2 = self.get();
            if c2 == C_EOF {
                return false;
            }
            let mut neg = 1;
            if c2 == b'+' || c2 == b'-' {
                if c2 == b'-' {
                    neg = -1;
                }
            } else {
                self.putback(c2);
            }
            let mut real_exp: i64 = 0;
            self.scan_digits(&mut real_exp, false);
            *exp += neg * real_exp as i32;
        } else {
            self.putback(c);
        }
        have_float
    }

    fn scan_number(&mut self, value: &mut TokenValue) -> Option<Token> {
        let c = self.get();
        if c == C_EOF {
            return None;
        }
        if !is_digit(c) {
            self.putback(c);
            return None;
        }

        let mut hex = false;
        let mut number: i64 = i64::from(c - b'0');
        let mut exp: i32 = 0;

        if c == b'0' {
            let c2 = self.get();
            if c2 == C_EOF {
                value.integer = 0;
                return Some(Token::Integer);
            }
            if c2 == b'x' || c2 == b'X' {
                let c3 = self.get();
                if c3 == C_EOF {
                    return Some(Token::Unknown);
                }
                if !is_digit(c3) && !is_hex(c3) {
                    self.putback(c3);
                    return Some(Token::Unknown);
                }
                hex = true;
                self.putback(c3);
            } else {
                self.putback(c2);
            }
        }

        self.scan_digits(&mut number, hex);
        if self.scan_float(&mut number, &mut exp) {
            value.number = number as f32 * 10f32.powi(exp);
            return Some(Token::Float);
        }
        value.integer = number as u32;
        Some(Token::Integer)
    }

    /// Comments are stripped (`None`); anything else starting with `/`
    /// is a token.
    fn scan_comment(&mut self) -> Option<Token> {
        let c = self.get();
        if c == b'*' {
            // Block comment, non-nesting.
            loop {
                let c = self.get();
                if c == C_EOF {
                    return Some(Token::EndOfFile);
                }
                if c == b'*' {
                    let c2 = self.get();
                    if c2 == b'/' {
                        return None;
                    }
                    if c2 == C_EOF {
                        return Some(Token::EndOfFile);
                    }
                    self.putback(c2);
                }
            }
        }
        if c == b'/' {
            // Line comment; the newline is not consumed.
            loop {
                let c = self.get();
                if c == C_EOF {
                    return Some(Token::EndOfFile);
                }
                if c == b'\n' {
                    self.putback(c);
                    return None;
                }
            }
        }
        if c != C_EOF {
            self.putback(c);
        }
        Some(Token::Div)
    }

    fn scan_special(&mut self) -> Option<Token> {
        let c = self.get();
        if !is_special(c) {
            if c != C_EOF {
                self.putback(c);
            }
            return None;
        }
        let c2 = self.get();
        let two = match (c, c2) {
            (b'+', b'+') => Some(Token::Inc),
            (b'-', b'-') => Some(Token::Dec),
            (b'+', b'=') => Some(Token::AddSto),
            (b'-', b'=') => Some(Token::SubSto),
            (b'*', b'=') => Some(Token::MulSto),
            (b'/', b'=') => Some(Token::DivSto),
            (b'&', b'=') => Some(Token::AndSto),
            (b'|', b'=') => Some(Token::OrSto),
            (b'^', b'=') => Some(Token::XorSto),
            (b'|', b'|') => Some(Token::LOr),
            (b'&', b'&') => Some(Token::LAnd),
            (b'=', b'=') => Some(Token::Eq),
            (b'!', b'=') => Some(Token::Ne),
            (b'<', b'=') => Some(Token::Le),
            (b'>', b'=') => Some(Token::Ge),
            _ => None,
        };
        if let Some(t) = two {
            return Some(t);
        }
        if c2 != C_EOF {
            self.putback(c2);
        }
        Some(Token::from_punct(c).unwrap_or(Token::Unknown))
    }
}
