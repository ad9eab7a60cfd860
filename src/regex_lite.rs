//! A minimal regular-expression-to-EBNF transpiler, used by
//! [`crate::grammar::Grammar::from_regex`] and by the JSON-Schema
//! converter's `pattern` keyword. Rather than building a
//! second parser/compiler for regex syntax, this walks the pattern once and
//! re-emits it as a string of this crate's *own* EBNF element syntax — the
//! two already agree almost character-for-character on character classes
//! (`[...]`), grouping (`(...)`), alternation (`|`) and quantifiers
//! (`* + ? {n,m}`) — which is then handed to [`crate::ebnf::parse_ebnf`]
//! exactly like any hand-written grammar. Literal characters are emitted as
//! individual one-byte string elements rather than pre-fused runs, since
//! `optimizer::normalize::fuse_byte_strings` re-fuses
//! adjacent literals during optimisation anyway — that avoids getting
//! quantifier-to-atom binding wrong when a run of literals is immediately
//! followed by `*`/`+`/`?`/`{…}`.
//!
//! Supported subset: literal characters, `\d \D \s \S \w \W`, `.` (any byte
//! but `\n`), `[...]` classes verbatim, `(...)` and `(?:...)` grouping,
//! `|`, `* + ? {n} {n,} {n,m}`, and the common single-character escapes.
//! Anchors `^`/`$` are accepted and stripped (byte-level matching in this
//! engine is always anchored to the whole input already). Lookaround,
//! backreferences and named groups are not supported.
use std::fmt::Write as _;

#[derive(Debug, thiserror::Error)]
pub enum RegexLiteError {
    #[error("unterminated character class in pattern")]
    UnterminatedClass,
    #[error("unterminated repetition count in pattern")]
    UnterminatedRepetition,
    #[error("trailing backslash in pattern")]
    TrailingBackslash,
    #[error("unsupported regex construct: {0}")]
    Unsupported(String),
}

/// Translates `pattern` into a space-separated string of EBNF elements
/// suitable for splicing into a rule body (not a full `name ::= body`
/// line).
pub fn translate(pattern: &str) -> Result<String, RegexLiteError> {
    let body = strip_anchors(pattern);
    let mut out = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(RegexLiteError::TrailingBackslash)?;
                emit_escape(&mut out, escaped)?;
            }
            '.' => {
                out.push_str("[^\\n] ");
            }
            '[' => {
                out.push('[');
                let mut closed = false;
                while let Some(&c) = chars.peek() {
                    chars.next();
                    if c == '\\' {
                        out.push('\\');
                        if let Some(next) = chars.next() {
                            out.push(next);
                        }
                        continue;
                    }
                    out.push(c);
                    if c == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(RegexLiteError::UnterminatedClass);
                }
                out.push(' ');
            }
            '(' => {
                out.push('(');
                if chars.peek() == Some(&'?') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&':') {
                        chars.next();
                        chars.next();
                    } else {
                        return Err(RegexLiteError::Unsupported("(?...) group modifier".to_string()));
                    }
                }
            }
            ')' | '|' | '*' | '+' | '?' => {
                out.push(c);
                out.push(' ');
            }
            '{' => {
                out.push('{');
                let mut closed = false;
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '}' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(RegexLiteError::UnterminatedRepetition);
                }
                out.push(' ');
            }
            other => {
                write!(out, "{} ", quote_char(other)).unwrap();
            }
        }
    }
    Ok(out)
}

fn strip_anchors(pattern: &str) -> &str {
    let p = pattern.strip_prefix('^').unwrap_or(pattern);
    p.strip_suffix('$').unwrap_or(p)
}

fn emit_escape(out: &mut String, c: char) -> Result<(), RegexLiteError> {
    match c {
        'd' | 'D' | 's' | 'S' | 'w' | 'W' => {
            write!(out, "[\\{c}] ").unwrap();
        }
        'n' => out.push_str("\"\\n\" "),
        'r' => out.push_str("\"\\r\" "),
        't' => out.push_str("\"\\t\" "),
        '.' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '*' | '+' | '?' | '^' | '$' | '\\' | '/' => {
            write!(out, "{} ", quote_char(c)).unwrap();
        }
        other => write!(out, "{} ", quote_char(other)).unwrap(),
    }
    Ok(())
}

fn quote_char(c: char) -> String {
    let mut s = String::with_capacity(3);
    s.push('"');
    match c {
        '"' => s.push_str("\\\""),
        '\\' => s.push_str("\\\\"),
        other => s.push(other),
    }
    s.push('"');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    #[test]
    fn digit_run_translates_and_parses() {
        let body = translate("[0-9]{3}-[0-9]{4}").unwrap();
        let source = format!("root ::= {body}\n");
        let g = parse_ebnf(&source, "root").unwrap();
        assert_eq!(g.num_rules(), 1);
    }

    #[test]
    fn literal_run_with_trailing_quantifier_binds_to_last_char_only() {
        let body = translate("ab*").unwrap();
        assert_eq!(body.trim(), "\"a\" \"b\" *");
    }

    #[test]
    fn alternation_and_grouping_round_trip() {
        let body = translate("(?:cat|dog)s?").unwrap();
        let source = format!("root ::= {body}\n");
        assert!(parse_ebnf(&source, "root").is_ok());
    }

    #[test]
    fn shorthand_class_outside_brackets_is_wrapped() {
        let body = translate("\\d+").unwrap();
        assert_eq!(body.trim(), "[\\d] +");
    }
}
