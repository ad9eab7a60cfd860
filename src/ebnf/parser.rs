//! The EBNF recursive-descent parser: turns a token stream
//! into a [`Grammar`]. Two passes: the first collects every rule name so
//! forward references resolve, the second builds rule bodies.
use ahash::AHashMap;

use super::lexer::{lex, shorthand_ranges, LexError, Pos, Spanned, Tok};
use crate::ir::{CodepointRange, Grammar, GrammarBuilder, RuleExpr, RuleExprId, RuleId};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("lexing error: {0}")]
    Lex(#[from] LexError),
    #[error("{1}:{2}: duplicate rule name '{0}'")]
    DuplicateRule(String, u32, u32),
    #[error("{1}:{2}: undefined rule reference '{0}'")]
    UndefinedRule(String, u32, u32),
    #[error("{0}:{1}: '::=' must start a line")]
    AssignNotAtLineStart(u32, u32),
    #[error("{0}:{1}: repetition lower bound {2} exceeds upper bound {3}")]
    InvalidRepetitionRange(u32, u32, u64, u64),
    #[error("{0}:{1}: unexpected token {2:?}")]
    Unexpected(u32, u32, Tok),
    #[error("{0}:{1}: recursion depth limit exceeded while parsing")]
    RecursionLimit(u32, u32),
    #[error("root rule '{0}' is not defined")]
    MissingRoot(String),
}

const MAX_RECURSION_DEPTH: u32 = 10_000;

struct Parser<'a> {
    toks: &'a [Spanned],
    pos: usize,
    builder: GrammarBuilder,
    names: AHashMap<String, RuleId>,
    defined: ahash::AHashSet<String>,
    depth: u32,
}

pub fn parse_ebnf(source: &str, root_name: &str) -> Result<Grammar, ParseError> {
    let toks = lex(source)?;
    let mut p = Parser {
        toks: &toks,
        pos: 0,
        builder: GrammarBuilder::new(),
        names: AHashMap::default(),
        defined: ahash::AHashSet::default(),
        depth: 0,
    };
    p.collect_rule_names()?;
    p.parse_rules()?;
    let root = *p.names.get(root_name).ok_or_else(|| ParseError::MissingRoot(root_name.to_string()))?;
    Ok(p.builder.build(root))
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }
    fn peek_pos(&self) -> Pos {
        self.toks[self.pos].pos
    }
    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }
    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            let p = self.peek_pos();
            return Err(ParseError::RecursionLimit(p.line, p.column));
        }
        Ok(())
    }
    fn exit(&mut self) {
        self.depth -= 1;
    }

    /// First pass: walk every `RuleName ::=` occurrence and register it.
    fn collect_rule_names(&mut self) -> Result<(), ParseError> {
        let mut i = 0;
        while i < self.toks.len() {
            if let Tok::RuleName(name) = &self.toks[i].tok {
                if matches!(self.toks.get(i + 1).map(|t| &t.tok), Some(Tok::Assign)) {
                    if !self.names.contains_key(name) {
                        let id = self.builder.declare_rule(name);
                        self.names.insert(name.clone(), id);
                    }
                } else {
                    let pos = self.toks[i].pos;
                    return Err(ParseError::AssignNotAtLineStart(pos.line, pos.column));
                }
            } else if let Tok::Identifier(name) = &self.toks[i].tok {
                if matches!(self.toks.get(i + 1).map(|t| &t.tok), Some(Tok::Assign)) {
                    let pos = self.toks[i].pos;
                    return Err(ParseError::AssignNotAtLineStart(pos.line, pos.column));
                }
                let _ = name;
            }
            i += 1;
        }
        Ok(())
    }

    fn parse_rules(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek().clone() {
                Tok::Eof => return Ok(()),
                Tok::RuleName(name) => {
                    let pos = self.peek_pos();
                    self.advance();
                    if !matches!(self.peek(), Tok::Assign) {
                        return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
                    }
                    self.advance();
                    let body = self.parse_choices()?;
                    let lookahead = if matches!(self.peek(), Tok::LookaheadOpen) {
                        self.advance();
                        let la = self.parse_sequence()?;
                        if !matches!(self.peek(), Tok::RParen) {
                            return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
                        }
                        self.advance();
                        Some(la)
                    } else {
                        None
                    };
                    let rule_id = *self.names.get(&name).expect("registered in first pass");
                    if !self.defined.insert(name.clone()) {
                        return Err(ParseError::DuplicateRule(name, pos.line, pos.column));
                    }
                    self.builder.set_body(rule_id, body);
                    if let Some(la) = lookahead {
                        self.builder.set_lookahead(rule_id, la, false);
                    }
                }
                other => {
                    let pos = self.peek_pos();
                    return Err(ParseError::Unexpected(pos.line, pos.column, other));
                }
            }
        }
    }

    /// `Choices = Sequence ('|' Sequence)*`.
    fn parse_choices(&mut self) -> Result<RuleExprId, ParseError> {
        self.enter()?;
        let mut alts = vec![self.parse_sequence()?];
        while matches!(self.peek(), Tok::Pipe) {
            self.advance();
            alts.push(self.parse_sequence()?);
        }
        self.exit();
        Ok(if alts.len() == 1 {
            alts.pop().unwrap()
        } else {
            self.builder.add_expr(RuleExpr::Choices(alts))
        })
    }

    /// `Sequence = ElementWithQuantifier+`.
    fn parse_sequence(&mut self) -> Result<RuleExprId, ParseError> {
        self.enter()?;
        let mut elems = vec![self.parse_element_with_quantifier()?];
        while self.starts_element() {
            elems.push(self.parse_element_with_quantifier()?);
        }
        self.exit();
        Ok(if elems.len() == 1 {
            elems.pop().unwrap()
        } else {
            self.builder.add_expr(RuleExpr::Sequence(elems))
        })
    }

    fn starts_element(&self) -> bool {
        matches!(
            self.peek(),
            Tok::LParen | Tok::CharClass { .. } | Tok::StringLiteral(_) | Tok::Identifier(_) | Tok::RuleName(_)
        )
    }

    fn parse_element_with_quantifier(&mut self) -> Result<RuleExprId, ParseError> {
        let pos = self.peek_pos();
        let elem = self.parse_element()?;
        match self.peek().clone() {
            Tok::Star => {
                self.advance();
                Ok(self.lower_star(elem))
            }
            Tok::Plus => {
                self.advance();
                Ok(self.lower_plus(elem))
            }
            Tok::Question => {
                self.advance();
                Ok(self.lower_optional(elem))
            }
            Tok::LBrace => {
                self.advance();
                let n = self.parse_integer(pos)?;
                if matches!(self.peek(), Tok::Comma) {
                    self.advance();
                    if matches!(self.peek(), Tok::RBrace) {
                        self.advance();
                        Ok(self.lower_at_least(elem, n))
                    } else {
                        let m = self.parse_integer(pos)?;
                        if !matches!(self.peek(), Tok::RBrace) {
                            return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
                        }
                        self.advance();
                        if m < n {
                            return Err(ParseError::InvalidRepetitionRange(pos.line, pos.column, n, m));
                        }
                        Ok(self.lower_range(elem, n, m))
                    }
                } else {
                    if !matches!(self.peek(), Tok::RBrace) {
                        return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
                    }
                    self.advance();
                    Ok(self.lower_exact(elem, n))
                }
            }
            _ => Ok(elem),
        }
    }

    fn parse_integer(&mut self, pos: Pos) -> Result<u64, ParseError> {
        match self.advance() {
            Tok::IntegerLiteral(v) => Ok(v),
            other => Err(ParseError::Unexpected(pos.line, pos.column, other)),
        }
    }

    /// `Element = '(' Choices ')' | CharClass | StringLiteral | MacroCall | RuleRef`.
    fn parse_element(&mut self) -> Result<RuleExprId, ParseError> {
        self.enter()?;
        let pos = self.peek_pos();
        let result = match self.peek().clone() {
            Tok::LParen => {
                self.advance();
                let inner = self.parse_choices()?;
                if !matches!(self.peek(), Tok::RParen) {
                    return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
                }
                self.advance();
                Ok(inner)
            }
            Tok::CharClass { negated, ranges } => {
                self.advance();
                let expanded = expand_shorthand_ranges(negated, ranges);
                Ok(self.builder.add_expr(RuleExpr::CharacterClass {
                    negated: expanded.0,
                    ranges: expanded.1,
                }))
            }
            Tok::StringLiteral(bytes) => {
                self.advance();
                Ok(self.builder.add_expr(RuleExpr::ByteString(bytes)))
            }
            Tok::Identifier(name) if name == "TagDispatch" => self.parse_tag_dispatch(),
            Tok::Identifier(name) | Tok::RuleName(name) => {
                self.advance();
                match self.names.get(&name) {
                    Some(&id) => Ok(self.builder.add_expr(RuleExpr::RuleRef(id))),
                    None => Err(ParseError::UndefinedRule(name, pos.line, pos.column)),
                }
            }
            other => Err(ParseError::Unexpected(pos.line, pos.column, other)),
        };
        self.exit();
        result
    }

    /// `TagDispatch(("trigger", rule), ...)`.
    fn parse_tag_dispatch(&mut self) -> Result<RuleExprId, ParseError> {
        let pos = self.peek_pos();
        self.advance(); // consume the "TagDispatch" identifier
        if !matches!(self.peek(), Tok::LParen) {
            return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
        }
        self.advance();
        let mut triggers = Vec::new();
        loop {
            if matches!(self.peek(), Tok::RParen) {
                break;
            }
            if !matches!(self.peek(), Tok::LParen) {
                return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
            }
            self.advance();
            let trigger_str = match self.advance() {
                Tok::StringLiteral(s) => s,
                other => return Err(ParseError::Unexpected(pos.line, pos.column, other)),
            };
            if !matches!(self.peek(), Tok::Comma) {
                return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
            }
            self.advance();
            let rule_name = match self.advance() {
                Tok::Identifier(n) | Tok::RuleName(n) => n,
                other => return Err(ParseError::Unexpected(pos.line, pos.column, other)),
            };
            let rule_id = *self
                .names
                .get(&rule_name)
                .ok_or_else(|| ParseError::UndefinedRule(rule_name.clone(), pos.line, pos.column))?;
            if !matches!(self.peek(), Tok::RParen) {
                return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
            }
            self.advance();
            let trigger_expr = self.builder.add_expr(RuleExpr::ByteString(trigger_str));
            triggers.push((trigger_expr, rule_id));
            if matches!(self.peek(), Tok::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if !matches!(self.peek(), Tok::RParen) {
            return Err(ParseError::Unexpected(pos.line, pos.column, self.peek().clone()));
        }
        self.advance();
        Ok(self.builder.add_expr(RuleExpr::TagDispatch {
            triggers,
            stop_eos: true,
            stop_strings: vec![],
            loop_after_dispatch: true,
        }))
    }

    // --- Quantifier lowering ---

    fn lower_star(&mut self, elem: RuleExprId) -> RuleExprId {
        if let RuleExpr::CharacterClass { negated, ranges } = self.builder.expr_ref(elem).clone() {
            return self.builder.add_expr(RuleExpr::CharacterClassStar { negated, ranges });
        }
        let name = self.builder.get_new_rule_name("repeat");
        let rule = self.builder.declare_rule(&name);
        let empty = self.builder.add_expr(RuleExpr::EmptyStr);
        let rule_ref = self.builder.add_expr(RuleExpr::RuleRef(rule));
        let seq = self.builder.add_expr(RuleExpr::Sequence(vec![elem, rule_ref]));
        let body = self.builder.add_expr(RuleExpr::Choices(vec![empty, seq]));
        self.builder.set_body(rule, body);
        self.builder.add_expr(RuleExpr::RuleRef(rule))
    }

    fn lower_plus(&mut self, elem: RuleExprId) -> RuleExprId {
        let name = self.builder.get_new_rule_name("repeat");
        let rule = self.builder.declare_rule(&name);
        let rule_ref = self.builder.add_expr(RuleExpr::RuleRef(rule));
        let seq = self.builder.add_expr(RuleExpr::Sequence(vec![elem, rule_ref]));
        let body = self.builder.add_expr(RuleExpr::Choices(vec![seq, elem]));
        self.builder.set_body(rule, body);
        self.builder.add_expr(RuleExpr::RuleRef(rule))
    }

    fn lower_optional(&mut self, elem: RuleExprId) -> RuleExprId {
        let name = self.builder.get_new_rule_name("opt");
        let rule = self.builder.declare_rule(&name);
        let empty = self.builder.add_expr(RuleExpr::EmptyStr);
        let body = self.builder.add_expr(RuleExpr::Choices(vec![empty, elem]));
        self.builder.set_body(rule, body);
        self.builder.add_expr(RuleExpr::RuleRef(rule))
    }

    fn lower_exact(&mut self, elem: RuleExprId, n: u64) -> RuleExprId {
        if n == 0 {
            return self.builder.add_expr(RuleExpr::EmptyStr);
        }
        let elems = vec![elem; n as usize];
        self.builder.add_expr(RuleExpr::Sequence(elems))
    }

    fn lower_at_least(&mut self, elem: RuleExprId, n: u64) -> RuleExprId {
        let star = self.lower_star(elem);
        if n == 0 {
            return star;
        }
        let mut elems = vec![elem; (n - 1) as usize];
        elems.push(star);
        self.builder.add_expr(RuleExpr::Sequence(elems))
    }

    fn lower_range(&mut self, elem: RuleExprId, n: u64, m: u64) -> RuleExprId {
        let extra = (m - n) as usize;
        let mut tail: Option<RuleId> = None;
        for i in (0..extra).rev() {
            let name = self.builder.get_new_rule_name("opt_chain");
            let rule = self.builder.declare_rule(&name);
            let empty = self.builder.add_expr(RuleExpr::EmptyStr);
            let body = if let Some(next) = tail {
                let next_ref = self.builder.add_expr(RuleExpr::RuleRef(next));
                let seq = self.builder.add_expr(RuleExpr::Sequence(vec![elem, next_ref]));
                self.builder.add_expr(RuleExpr::Choices(vec![empty, seq]))
            } else {
                self.builder.add_expr(RuleExpr::Choices(vec![empty, elem]))
            };
            self.builder.set_body(rule, body);
            tail = Some(rule);
            let _ = i;
        }
        let mut elems = vec![elem; n as usize];
        if let Some(tail_rule) = tail {
            elems.push(self.builder.add_expr(RuleExpr::RuleRef(tail_rule)));
        }
        if elems.is_empty() {
            self.builder.add_expr(RuleExpr::EmptyStr)
        } else {
            self.builder.add_expr(RuleExpr::Sequence(elems))
        }
    }

}

fn expand_shorthand_ranges(negated: bool, ranges: Vec<(u32, u32)>) -> (bool, Vec<CodepointRange>) {
    let mut out = Vec::new();
    for (lo, hi) in ranges {
        if lo == hi {
            if let Some(expanded) = shorthand_ranges(lo) {
                out.extend(expanded.into_iter().map(|(l, h)| CodepointRange { low: l, high: h }));
                continue;
            }
        }
        out.push(CodepointRange { low: lo, high: hi });
    }
    (negated, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_sequence() {
        let g = parse_ebnf(r#"root ::= "a" "b" "c""#, "root").unwrap();
        assert_eq!(g.num_rules(), 1);
    }

    #[test]
    fn star_on_char_class_is_direct() {
        let g = parse_ebnf("root ::= [0-9]*", "root").unwrap();
        let body = g.expr(g.rule(g.root).body);
        assert!(matches!(body, RuleExpr::CharacterClassStar { .. }));
    }

    #[test]
    fn plus_creates_helper_rule() {
        let g = parse_ebnf("root ::= [0-9]+", "root").unwrap();
        let body = g.expr(g.rule(g.root).body);
        assert!(matches!(body, RuleExpr::RuleRef(_)));
        assert!(g.num_rules() > 1);
    }

    #[test]
    fn undefined_rule_reference_is_an_error() {
        let err = parse_ebnf("root ::= missing", "root");
        assert!(matches!(err, Err(ParseError::UndefinedRule(..))));
    }

    #[test]
    fn repetition_range_lower_exceeds_upper_is_an_error() {
        let err = parse_ebnf(r#"root ::= "a"{3,1}"#, "root");
        assert!(matches!(err, Err(ParseError::InvalidRepetitionRange(..))));
    }
}
