//! The EBNF lexer, built with `nom` combinators over `&str`.
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::pair,
    IResult,
};

use crate::utf8::decode_escape;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    RuleName(String),
    Identifier(String),
    StringLiteral(Vec<u8>),
    IntegerLiteral(u64),
    CharClass { negated: bool, ranges: Vec<(u32, u32)> },
    Boolean(bool),
    Assign,     // ::=
    Pipe,       // |
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Star,
    Plus,
    Question,
    Eq,
    LookaheadOpen, // (=
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub tok: Tok,
    pub pos: Pos,
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("lexing failed at byte offset {0}")]
    Failed(usize),
}

fn skip_ws_and_comments(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    let mut rest = input;
    loop {
        if let Some(stripped) = rest.strip_prefix('#') {
            let end = stripped.find('\n').map(|i| i + 1).unwrap_or(stripped.len());
            rest = &stripped[end..];
            let (r, _) = multispace0(rest)?;
            rest = r;
        } else {
            break;
        }
    }
    Ok((rest, ()))
}

fn identifier_str(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_' || c == '-'),
        many0(one_of(
            "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_.-",
        )),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, Vec<u8>> {
    alt((quoted('"'), quoted('\'')))(input)
}

fn quoted(q: char) -> impl Fn(&str) -> IResult<&str, Vec<u8>> {
    move |input: &str| {
        let (input, _) = char(q)(input)?;
        let mut rest = input;
        let mut bytes = Vec::new();
        loop {
            if let Some(r) = rest.strip_prefix(q) {
                return Ok((r, bytes));
            }
            if let Some(r) = rest.strip_prefix('\\') {
                if let Some((decoded, consumed_chars)) = decode_escape(r) {
                    bytes.extend(decoded);
                    rest = skip_chars(r, consumed_chars);
                    continue;
                }
                return Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::EscapedTransform)));
            }
            let mut chars = rest.chars();
            match chars.next() {
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend(c.encode_utf8(&mut buf).as_bytes());
                    rest = chars.as_str();
                }
                None => {
                    return Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Eof)));
                }
            }
        }
    }
}

fn skip_chars(s: &str, n: usize) -> &str {
    let mut chars = s.chars();
    for _ in 0..n {
        chars.next();
    }
    chars.as_str()
}

fn char_class(input: &str) -> IResult<&str, Tok> {
    let (input, _) = char('[')(input)?;
    let (input, negated) = map(opt(char('^')), |o| o.is_some())(input)?;
    let mut rest = input;
    let mut ranges = Vec::new();
    loop {
        if let Some(r) = rest.strip_prefix(']') {
            return Ok((r, Tok::CharClass { negated, ranges }));
        }
        let (next_rest, cp) = class_char(rest)?;
        if let Some(after_dash) = next_rest.strip_prefix('-') {
            if !after_dash.starts_with(']') {
                let (after_hi, hi) = class_char(after_dash)?;
                ranges.push((cp, hi));
                rest = after_hi;
                continue;
            }
        }
        ranges.push((cp, cp));
        rest = next_rest;
    }
}

fn class_char(input: &str) -> IResult<&str, u32> {
    if let Some(rest) = input.strip_prefix('\\') {
        if let Some(c) = rest.chars().next() {
            if matches!(c, 'd' | 'D' | 's' | 'S' | 'w' | 'W') {
                // shorthand classes are expanded by the parser, not the lexer;
                // represent them with a private-use sentinel codepoint range
                // that the parser recognises by checking the raw escape.
                return Ok((&rest[1..], shorthand_sentinel(c)));
            }
        }
        if let Some((decoded, consumed_chars)) = decode_escape(rest) {
            let s = String::from_utf8(decoded).unwrap_or_default();
            let cp = s.chars().next().unwrap_or('\0') as u32;
            return Ok((skip_chars(rest, consumed_chars), cp));
        }
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Escaped)));
    }
    let mut chars = input.chars();
    match chars.next() {
        Some(c) => Ok((chars.as_str(), c as u32)),
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

/// Shorthand classes (`\d \D \s \S \w \W`) are encoded as codepoints in the
/// Unicode private-use area so the lexer can stay allocation-free; the
/// parser expands them back into their real range lists immediately.
fn shorthand_sentinel(c: char) -> u32 {
    0xF0000 + c as u32
}

pub fn shorthand_ranges(sentinel: u32) -> Option<Vec<(u32, u32)>> {
    if !(0xF0000..0xF0100).contains(&sentinel) {
        return None;
    }
    let c = char::from_u32(sentinel - 0xF0000)?;
    Some(match c {
        'd' => vec![('0' as u32, '9' as u32)],
        'D' => vec![(0, '0' as u32 - 1), ('9' as u32 + 1, crate::utf8::MAX_CODEPOINT)],
        's' => vec![(9, 10), (13, 13), (32, 32)],
        'S' => vec![(0, 8), (11, 12), (14, 31), (33, crate::utf8::MAX_CODEPOINT)],
        'w' => vec![('0' as u32, '9' as u32), ('A' as u32, 'Z' as u32), ('a' as u32, 'z' as u32), ('_' as u32, '_' as u32)],
        'W' => vec![(0, '0' as u32 - 1)], // approximate complement, refined by the parser
        _ => return None,
    })
}

fn integer_literal(input: &str) -> IResult<&str, u64> {
    let (input, digits) = digit1(input)?;
    let v: u64 = digits.parse().unwrap_or(u64::MAX);
    Ok((input, v))
}

fn punctuation(input: &str) -> IResult<&str, Tok> {
    alt((
        value(Tok::Assign, tag("::=")),
        value(Tok::LookaheadOpen, tag("(=")),
        value(Tok::LParen, char('(')),
        value(Tok::RParen, char(')')),
        value(Tok::LBrace, char('{')),
        value(Tok::RBrace, char('}')),
        value(Tok::Comma, char(',')),
        value(Tok::Pipe, char('|')),
        value(Tok::Star, char('*')),
        value(Tok::Plus, char('+')),
        value(Tok::Question, char('?')),
        value(Tok::Eq, char('=')),
    ))(input)
}

fn one_token(input: &str) -> IResult<&str, Tok> {
    alt((
        map(char_class, |t| t),
        map(string_literal, Tok::StringLiteral),
        map(integer_literal, Tok::IntegerLiteral),
        punctuation,
        map(identifier_str, |s| {
            match s {
                "true" => Tok::Boolean(true),
                "false" => Tok::Boolean(false),
                _ => Tok::Identifier(s.to_string()),
            }
        }),
    ))(input)
}

/// Tokenizes the full source, then re-tags any `Identifier` immediately
/// preceding `::=` at column 1 as a `RuleName`. Any other identifier at
/// column 1 immediately before `::=` is fine too (column tracking below is
/// byte-offset based on line starts).
pub fn lex(source: &str) -> Result<Vec<Spanned>, LexError> {
    let mut toks = Vec::new();
    let mut rest = source;
    let mut line = 1u32;
    let mut line_start = 0usize;
    let mut consumed = 0usize;
    loop {
        let (after_ws, _) = skip_ws_and_comments(rest).map_err(|_| LexError::Failed(consumed))?;
        let ws_len = rest.len() - after_ws.len();
        for (i, b) in rest.as_bytes()[..ws_len].iter().enumerate() {
            if *b == b'\n' {
                line += 1;
                line_start = consumed + i + 1;
            }
        }
        consumed += ws_len;
        rest = after_ws;
        if rest.is_empty() {
            break;
        }
        let column = (consumed - line_start + 1) as u32;
        let (next_rest, tok) = one_token(rest).map_err(|_| LexError::Failed(consumed))?;
        let len = rest.len() - next_rest.len();
        toks.push(Spanned { tok, pos: Pos { line, column } });
        for b in rest.as_bytes()[..len].iter() {
            if *b == b'\n' {
                line += 1;
                line_start = consumed + 1;
            }
        }
        consumed += len;
        rest = next_rest;
    }
    toks.push(Spanned { tok: Tok::Eof, pos: Pos { line, column: 1 } });
    // Re-tag rule names: an Identifier at column 1 directly followed by Assign.
    for i in 0..toks.len() {
        if toks[i].pos.column == 1 {
            if let Tok::Identifier(name) = &toks[i].tok {
                if matches!(toks.get(i + 1).map(|t| &t.tok), Some(Tok::Assign)) {
                    toks[i].tok = Tok::RuleName(name.clone());
                }
            }
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_simple_rule() {
        let toks = lex("root ::= \"a\" \"b\"\n").unwrap();
        assert!(matches!(toks[0].tok, Tok::RuleName(ref s) if s == "root"));
        assert_eq!(toks[1].tok, Tok::Assign);
        assert_eq!(toks[2].tok, Tok::StringLiteral(b"a".to_vec()));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = lex("# a comment\nroot ::= \"x\"\n").unwrap();
        assert!(matches!(toks[0].tok, Tok::RuleName(_)));
    }

    #[test]
    fn char_class_with_range() {
        let toks = lex("root ::= [a-z0-9]\n").unwrap();
        assert!(matches!(toks[2].tok, Tok::CharClass { negated: false, .. }));
    }
}
