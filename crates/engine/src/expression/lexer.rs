//! Tokenizer for condition and compute expressions.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    /// Bare reference path such as `fetch.data.items[0]`.
    Path(String),
    /// Contents of a `{{ ... }}` placeholder.
    Placeholder(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Contains,
    Matches,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source.
    pub position: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let kind = match c {
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b'[' => {
                pos += 1;
                TokenKind::LBracket
            }
            b']' => {
                pos += 1;
                TokenKind::RBracket
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b'+' => {
                pos += 1;
                TokenKind::Plus
            }
            b'-' => {
                pos += 1;
                TokenKind::Minus
            }
            b'*' => {
                pos += 1;
                TokenKind::Star
            }
            b'/' => {
                pos += 1;
                TokenKind::Slash
            }
            b'%' => {
                pos += 1;
                TokenKind::Percent
            }
            b'=' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Eq
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Ne
            }
            b'!' => {
                pos += 1;
                TokenKind::Not
            }
            b'<' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Le
            }
            b'<' => {
                pos += 1;
                TokenKind::Lt
            }
            b'>' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Ge
            }
            b'>' => {
                pos += 1;
                TokenKind::Gt
            }
            b'&' if bytes.get(pos + 1) == Some(&b'&') => {
                pos += 2;
                TokenKind::And
            }
            b'|' if bytes.get(pos + 1) == Some(&b'|') => {
                pos += 2;
                TokenKind::Or
            }
            b'{' if bytes.get(pos + 1) == Some(&b'{') => {
                let rest = &source[pos + 2..];
                let end = rest
                    .find("}}")
                    .ok_or_else(|| syntax(start, "unterminated placeholder"))?;
                let inner = rest[..end].trim().to_string();
                pos += 2 + end + 2;
                TokenKind::Placeholder(inner)
            }
            b'"' | b'\'' => {
                let (text, next) = lex_string(source, pos)?;
                pos = next;
                TokenKind::Str(text)
            }
            b'0'..=b'9' => {
                let (kind, next) = lex_number(source, pos)?;
                pos = next;
                kind
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let next = lex_path(bytes, pos);
                let word = &source[pos..next];
                pos = next;
                keyword(word).unwrap_or_else(|| TokenKind::Path(word.to_string()))
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(syntax(start, format!("unexpected character '{ch}'")));
            }
        };

        tokens.push(Token {
            kind,
            position: start,
        });
    }

    Ok(tokens)
}

/// Words the lexer reads as operators or literals rather than references.
pub fn is_keyword(word: &str) -> bool {
    keyword(word).is_some()
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "contains" => TokenKind::Contains,
        "matches" => TokenKind::Matches,
        _ => return None,
    })
}

/// A path continues through identifier characters, dots, and bracketed
/// indexes written directly after a segment.
fn lex_path(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
            pos += 1;
        } else if c == b'[' {
            let mut end = pos + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > pos + 1 && bytes.get(end) == Some(&b']') {
                pos = end + 1;
            } else {
                break;
            }
        } else {
            break;
        }
    }
    pos
}

fn lex_number(source: &str, start: usize) -> Result<(TokenKind, usize), ExpressionError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let mut is_float = false;
    if bytes.get(pos) == Some(&b'.') && bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit()) {
        is_float = true;
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    let text = &source[start..pos];
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok((TokenKind::Int(n), pos));
        }
    }
    text.parse::<f64>()
        .map(|n| (TokenKind::Float(n), pos))
        .map_err(|_| syntax(start, format!("invalid number '{text}'")))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExpressionError> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(syntax(start, "expected string")),
    };
    let mut out = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((out, start + offset + c.len_utf8())),
            c => out.push(c),
        }
    }
    Err(syntax(start, "unterminated string literal"))
}
