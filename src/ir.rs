//! The grammar intermediate representation and its builder.
//!
//! Rule-expressions are stored in a flat arena (`Vec<RuleExpr>`) addressed by
//! dense `u32` ids: each `RuleExpr` owns its own payload rather than sharing
//! rows of a jagged matrix, so a plain `Vec` arena suffices.
use ahash::AHashMap;
use string_interner::{DefaultSymbol, StringInterner};

/// The id of a rule in a [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

/// The id of a rule-expression in the flat arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleExprId(pub u32);

/// One inclusive codepoint range, e.g. `a-z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodepointRange {
    pub low: u32,
    pub high: u32,
}

/// One grammar-node kind a rule's body can be built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleExpr {
    ByteString(Vec<u8>),
    CharacterClass { negated: bool, ranges: Vec<CodepointRange> },
    CharacterClassStar { negated: bool, ranges: Vec<CodepointRange> },
    EmptyStr,
    RuleRef(RuleId),
    Sequence(Vec<RuleExprId>),
    Choices(Vec<RuleExprId>),
    /// `max = None` means unbounded (the spec's `max = -1`).
    Repeat { body: RuleId, min: u32, max: Option<u32> },
    TagDispatch {
        triggers: Vec<(RuleExprId, RuleId)>,
        stop_eos: bool,
        stop_strings: Vec<RuleExprId>,
        loop_after_dispatch: bool,
    },
}

/// One rule: a name, a body, an optional lookahead assertion, and an
/// exactness flag for that assertion.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: DefaultSymbol,
    pub body: RuleExprId,
    pub lookahead: Option<RuleExprId>,
    pub is_exact_lookahead: bool,
}

/// The grammar IR: an ordered set of rules plus the shared rule-expression
/// arena.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub(crate) interner: StringInterner,
    pub rules: Vec<Rule>,
    pub exprs: Vec<RuleExpr>,
    pub root: RuleId,
    /// Sorted list of rule ids that can derive the empty string, populated
    /// by `AllowEmptyRuleAnalyzer`.
    pub empty_deriving_rules: Vec<RuleId>,
}

impl Grammar {
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }
    pub fn expr(&self, id: RuleExprId) -> &RuleExpr {
        &self.exprs[id.0 as usize]
    }
    pub fn rule_name(&self, id: RuleId) -> &str {
        self.interner.resolve(self.rules[id.0 as usize].name).unwrap()
    }
    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }
    pub fn can_derive_empty(&self, id: RuleId) -> bool {
        self.empty_deriving_rules.binary_search(&id).is_ok()
    }
}

/// Builder for [`Grammar`]: appends to the flat rule-expression arena and
/// the rule table, and disambiguates rule names via `get_new_rule_name(hint)`.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    interner: StringInterner,
    rules: Vec<Rule>,
    exprs: Vec<RuleExpr>,
    name_to_id: AHashMap<DefaultSymbol, RuleId>,
    used_hints: AHashMap<String, u32>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_expr(&mut self, expr: RuleExpr) -> RuleExprId {
        self.exprs.push(expr);
        RuleExprId((self.exprs.len() - 1) as u32)
    }

    pub fn expr_ref(&self, id: RuleExprId) -> &RuleExpr {
        &self.exprs[id.0 as usize]
    }

    /// Declares a rule empty (body = `EmptyStr`'s placeholder choice); the
    /// body can be updated later via [`GrammarBuilder::set_body`]. Needed for
    /// mutually recursive rule creation during quantifier lowering and
    /// inlining.
    pub fn declare_rule(&mut self, name: &str) -> RuleId {
        let placeholder = self.add_expr(RuleExpr::Choices(vec![]));
        let sym = self.interner.get_or_intern(name);
        self.rules.push(Rule { name: sym, body: placeholder, lookahead: None, is_exact_lookahead: false });
        let id = RuleId((self.rules.len() - 1) as u32);
        self.name_to_id.insert(sym, id);
        id
    }

    pub fn set_body(&mut self, rule: RuleId, body: RuleExprId) {
        self.rules[rule.0 as usize].body = body;
    }

    pub fn set_lookahead(&mut self, rule: RuleId, lookahead: RuleExprId, is_exact: bool) {
        self.rules[rule.0 as usize].lookahead = Some(lookahead);
        self.rules[rule.0 as usize].is_exact_lookahead = is_exact;
    }

    pub fn add_rule(&mut self, name: &str, body: RuleExprId) -> RuleId {
        let id = self.declare_rule(name);
        self.set_body(id, body);
        id
    }

    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.interner.get(name).and_then(|sym| self.name_to_id.get(&sym)).copied()
    }

    /// Allocates a fresh, unused rule name derived from `hint`: `hint`,
    /// `hint_1`, `hint_2`, ....
    pub fn get_new_rule_name(&mut self, hint: &str) -> String {
        let counter = self.used_hints.entry(hint.to_string()).or_insert(0);
        loop {
            let candidate = if *counter == 0 { hint.to_string() } else { format!("{hint}_{counter}") };
            *counter += 1;
            if self.interner.get(&candidate).is_none() {
                return candidate;
            }
        }
    }

    pub fn build(self, root: RuleId) -> Grammar {
        Grammar {
            interner: self.interner,
            rules: self.rules,
            exprs: self.exprs,
            root,
            empty_deriving_rules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_rule_names_avoid_collisions() {
        let mut b = GrammarBuilder::new();
        b.declare_rule("item");
        let n1 = b.get_new_rule_name("item");
        b.declare_rule(&n1);
        let n2 = b.get_new_rule_name("item");
        assert_ne!(n1, n2);
        assert_eq!(n1, "item_1");
        assert_eq!(n2, "item_2");
    }

    #[test]
    fn builder_round_trips_a_simple_rule() {
        let mut b = GrammarBuilder::new();
        let lit = b.add_expr(RuleExpr::ByteString(b"abc".to_vec()));
        let root = b.add_rule("start", lit);
        let g = b.build(root);
        assert_eq!(g.rule_name(root), "start");
        matches!(g.expr(g.rule(root).body), RuleExpr::ByteString(_));
    }
}
