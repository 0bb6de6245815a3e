//! Scanners shared by the text parser and the expression tokenizer.
//!
//! All syntax characters are ASCII, so byte offsets taken at syntax
//! positions are always valid `str` boundaries.

use serde_json::Value;

use super::ast::{Formatter, PathSegment, Span};

pub(crate) fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub(crate) fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Scan an identifier starting at `pos`. Returns the name and the end offset.
pub(crate) fn scan_ident(src: &str, pos: usize) -> Option<(String, usize)> {
    let bytes = src.as_bytes();
    if pos >= bytes.len() || !is_ident_start(bytes[pos]) {
        return None;
    }
    let mut end = pos + 1;
    while end < bytes.len() && is_ident_char(bytes[end]) {
        end += 1;
    }
    Some((src[pos..end].to_string(), end))
}

/// Scan a quoted string (`"..."` or `'...'`) whose opening quote is at `pos`.
pub(crate) fn scan_string(src: &str, pos: usize) -> Result<(String, usize), String> {
    let bytes = src.as_bytes();
    let quote = bytes[pos];
    let mut out = String::new();
    let mut chars = src[pos + 1..].char_indices();

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c as u32 == quote as u32 => return Ok((out, pos + 1 + offset + 1)),
            c => out.push(c),
        }
    }
    Err("unterminated string literal".to_string())
}

/// Scan a number literal. Integers stay integers.
pub(crate) fn scan_number(src: &str, pos: usize) -> Option<(Value, usize)> {
    let bytes = src.as_bytes();
    let mut end = pos;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == pos {
        return None;
    }
    let mut is_float = false;
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            is_float = true;
            end = exp;
        }
    }

    let text = &src[pos..end];
    if !is_float && let Ok(i) = text.parse::<i64>() {
        return Some((Value::from(i), end));
    }
    text.parse::<f64>().ok().map(|f| (Value::from(f), end))
}

/// Scan `.field`, `[0]` and `["key"]` steps following a variable name.
///
/// A `.` not followed by an identifier ends the path without consuming it.
pub(crate) fn scan_path(src: &str, mut pos: usize) -> Result<(Vec<PathSegment>, usize), String> {
    let bytes = src.as_bytes();
    let mut path = Vec::new();

    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => match scan_ident(src, pos + 1) {
                Some((field, end)) => {
                    path.push(PathSegment::Field(field));
                    pos = end;
                }
                None => break,
            },
            b'[' => {
                let inner = pos + 1;
                if inner >= bytes.len() {
                    return Err("unterminated '[' in reference".to_string());
                }
                let (segment, after) = if bytes[inner] == b'"' || bytes[inner] == b'\'' {
                    let (key, end) = scan_string(src, inner)?;
                    (PathSegment::Key(key), end)
                } else {
                    let mut end = inner;
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                    if end == inner {
                        return Err("expected index or quoted key after '['".to_string());
                    }
                    let index = src[inner..end]
                        .parse::<usize>()
                        .map_err(|e| format!("bad index: {e}"))?;
                    (PathSegment::Index(index), end)
                };
                if after >= bytes.len() || bytes[after] != b']' {
                    return Err("unterminated '[' in reference".to_string());
                }
                path.push(segment);
                pos = after + 1;
            }
            _ => break,
        }
    }
    Ok((path, pos))
}

/// Scan a `|name(args)` chain.
///
/// With `spaced`, whitespace is allowed around `|` and inside argument lists
/// (expression blocks); in running text the chain must be tight.
pub(crate) fn scan_formatters(
    src: &str,
    mut pos: usize,
    spaced: bool,
) -> Result<(Vec<Formatter>, usize), String> {
    let bytes = src.as_bytes();
    let mut formatters = Vec::new();

    loop {
        let mut cursor = pos;
        if spaced {
            cursor = skip_ws(src, cursor);
        }
        if cursor >= bytes.len() || bytes[cursor] != b'|' {
            break;
        }
        // `||` is boolean or, never a formatter pipe
        if cursor + 1 < bytes.len() && bytes[cursor + 1] == b'|' {
            break;
        }
        let mut name_pos = cursor + 1;
        if spaced {
            name_pos = skip_ws(src, name_pos);
        }
        let Some((name, mut end)) = scan_ident(src, name_pos) else {
            if spaced {
                return Err("expected formatter name after '|'".to_string());
            }
            break;
        };

        let mut args = Vec::new();
        if end < bytes.len() && bytes[end] == b'(' {
            let (parsed, after) = scan_args(src, end + 1)?;
            args = parsed;
            end = after;
        }
        formatters.push(Formatter { name, args });
        pos = end;
    }
    Ok((formatters, pos))
}

fn scan_args(src: &str, mut pos: usize) -> Result<(Vec<Value>, usize), String> {
    let bytes = src.as_bytes();
    let mut args = Vec::new();

    pos = skip_ws(src, pos);
    if pos < bytes.len() && bytes[pos] == b')' {
        return Ok((args, pos + 1));
    }

    loop {
        pos = skip_ws(src, pos);
        if pos >= bytes.len() {
            return Err("unterminated formatter arguments".to_string());
        }
        let (value, end) = match bytes[pos] {
            b'"' | b'\'' => {
                let (s, end) = scan_string(src, pos)?;
                (Value::String(s), end)
            }
            b'-' => match scan_number(src, pos + 1) {
                Some((Value::Number(n), end)) => (negate(&n), end),
                _ => return Err("expected number after '-'".to_string()),
            },
            b if b.is_ascii_digit() => {
                scan_number(src, pos).ok_or_else(|| "bad number".to_string())?
            }
            b if is_ident_start(b) => {
                let (word, end) = scan_ident(src, pos).ok_or_else(|| "bad argument".to_string())?;
                let value = match word.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => Value::String(word),
                };
                (value, end)
            }
            _ => return Err("unexpected character in formatter arguments".to_string()),
        };
        args.push(value);
        pos = skip_ws(src, end);
        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b')') => return Ok((args, pos + 1)),
            _ => return Err("unterminated formatter arguments".to_string()),
        }
    }
}

fn negate(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(-i)
    } else {
        Value::from(-n.as_f64().unwrap_or(0.0))
    }
}

pub(crate) fn skip_ws(src: &str, mut pos: usize) -> usize {
    let bytes = src.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Expression token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(Value),
    Str(String),
    True,
    False,
    Null,
    Var { name: String, path: Vec<PathSegment> },
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    /// Start of a trailing formatter chain; the chain itself is scanned
    /// directly from the source.
    Pipe,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Lexed {
    pub token: Token,
    pub span: Span,
}

/// Tokenize the inside of an expression block.
///
/// Stops at the first single `|`, which starts the formatter chain; its
/// offset is reported as a `Pipe` token.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Lexed>, (String, Span)> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let two = bytes.get(pos + 1).copied();
        let (token, end) = match (b, two) {
            (b'=', Some(b'=')) => (Token::EqEq, pos + 2),
            (b'!', Some(b'=')) => (Token::NotEq, pos + 2),
            (b'<', Some(b'=')) => (Token::Le, pos + 2),
            (b'>', Some(b'=')) => (Token::Ge, pos + 2),
            (b'&', Some(b'&')) => (Token::AndAnd, pos + 2),
            (b'|', Some(b'|')) => (Token::OrOr, pos + 2),
            (b'|', _) => {
                tokens.push(Lexed { token: Token::Pipe, span: Span::new(pos, pos + 1) });
                return Ok(tokens);
            }
            (b'<', _) => (Token::Lt, pos + 1),
            (b'>', _) => (Token::Gt, pos + 1),
            (b'!', _) => (Token::Bang, pos + 1),
            (b'(', _) => (Token::LParen, pos + 1),
            (b')', _) => (Token::RParen, pos + 1),
            (b'+', _) => (Token::Plus, pos + 1),
            (b'-', _) => (Token::Minus, pos + 1),
            (b'*', _) => (Token::Star, pos + 1),
            (b'/', _) => (Token::Slash, pos + 1),
            (b'%', _) => (Token::Percent, pos + 1),
            (b'"', _) | (b'\'', _) => {
                let (s, end) = scan_string(src, pos).map_err(|m| (m, Span::new(start, bytes.len())))?;
                (Token::Str(s), end)
            }
            (b'@', _) => {
                let Some((name, after_name)) = scan_ident(src, pos + 1) else {
                    return Err(("expected variable name after '@'".into(), Span::new(pos, pos + 1)));
                };
                let (path, end) =
                    scan_path(src, after_name).map_err(|m| (m, Span::new(start, after_name)))?;
                (Token::Var { name, path }, end)
            }
            (d, _) if d.is_ascii_digit() => match scan_number(src, pos) {
                Some((n, end)) => (Token::Number(n), end),
                None => return Err(("bad number".into(), Span::new(pos, pos + 1))),
            },
            (c, _) if is_ident_start(c) => {
                let (word, end) = scan_ident(src, pos).unwrap_or_default();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    "not" => Token::Bang,
                    _ => {
                        return Err((
                            format!("unknown word '{word}' (variables need '@')"),
                            Span::new(start, end),
                        ));
                    }
                };
                (token, end)
            }
            _ => {
                let ch = src[pos..].chars().next().unwrap_or('?');
                return Err((format!("unexpected character '{ch}'"), Span::new(pos, pos + ch.len_utf8())));
            }
        };
        tokens.push(Lexed { token, span: Span::new(start, end) });
        pos = end;
    }
    Ok(tokens)
}
