//! Lowers every rule's IR body into an [`FsmWithStartEnd`], then to a
//! minimized DFA and its compact runtime form.
use ahash::AHashMap;

use crate::fsm::{CompactFsm, FsmWithStartEnd};
use crate::ir::{CodepointRange, Grammar, RuleExpr, RuleExprId, RuleId};
use crate::utf8::codepoint_range_to_utf8_sequences;

/// One compiled rule: its FSM in compact form plus whether the whole rule
/// can be skipped as lookahead-only bookkeeping (kept in sync with
/// [`Grammar::empty_deriving_rules`]).
///
/// `is_tag_dispatch` marks rules whose entire body is a `TagDispatch` macro:
/// the matcher (`matcher.rs`) treats a transition miss on these specially,
/// resetting to the trie root (free text byte) instead of rejecting the
/// derivation. The trie root is always `fsm.start`, since subset
/// construction and minimisation both preserve the start state's identity.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub fsm: CompactFsm,
    pub lookahead: Option<CompactFsm>,
    pub is_exact_lookahead: bool,
    pub is_tag_dispatch: bool,
}

pub fn build_fsms(grammar: &Grammar) -> AHashMap<RuleId, CompiledRule> {
    let mut out = AHashMap::default();
    for i in 0..grammar.rules.len() as u32 {
        let rid = RuleId(i);
        let rule = grammar.rule(rid);
        let is_tag_dispatch = matches!(grammar.expr(rule.body), RuleExpr::TagDispatch { .. });
        let body_fsm = build_expr(grammar, rule.body);
        let dfa = body_fsm.to_dfa();
        let minimized = dfa.minimize();
        let fsm = minimized.to_compact();
        let lookahead = rule.lookahead.map(|la| {
            let nfa = build_expr(grammar, la);
            nfa.to_dfa().minimize().to_compact()
        });
        out.insert(rid, CompiledRule { fsm, lookahead, is_exact_lookahead: rule.is_exact_lookahead, is_tag_dispatch });
    }
    out
}

fn build_expr(grammar: &Grammar, id: RuleExprId) -> FsmWithStartEnd {
    match grammar.expr(id) {
        RuleExpr::ByteString(bytes) => {
            let parts = bytes.iter().map(|&b| FsmWithStartEnd::byte_range(b, b)).collect();
            FsmWithStartEnd::concat(parts)
        }
        RuleExpr::CharacterClass { negated, ranges } => class_fsm(*negated, ranges),
        RuleExpr::CharacterClassStar { negated, ranges } => class_fsm(*negated, ranges).star(),
        RuleExpr::EmptyStr => FsmWithStartEnd::empty_str(),
        RuleExpr::RuleRef(r) => FsmWithStartEnd::rule_ref(*r),
        RuleExpr::Sequence(items) => FsmWithStartEnd::concat(items.iter().map(|&i| build_expr(grammar, i)).collect()),
        RuleExpr::Choices(items) => FsmWithStartEnd::union(items.iter().map(|&i| build_expr(grammar, i)).collect()),
        RuleExpr::Repeat { body, min, max } => {
            // Should have been normalized away by `normalize_repetitions`;
            // fall back to a direct lowering so the builder stays total.
            let one = FsmWithStartEnd::rule_ref(*body);
            let mandatory: Vec<_> = (0..*min).map(|_| one.clone()).collect();
            let tail = match max {
                Some(m) => {
                    let extra = (*m - *min) as usize;
                    FsmWithStartEnd::concat((0..extra).map(|_| one.clone().optional()).collect())
                }
                None => one.clone().star(),
            };
            let mut all = mandatory;
            all.push(tail);
            FsmWithStartEnd::concat(all)
        }
        RuleExpr::TagDispatch { triggers, stop_strings, loop_after_dispatch, .. } => {
            let byte_triggers: Vec<(Vec<u8>, RuleId)> = triggers
                .iter()
                .map(|&(expr, rule)| (byte_string_of(grammar, expr), rule))
                .collect();
            let byte_stops: Vec<Vec<u8>> = stop_strings.iter().map(|&s| byte_string_of(grammar, s)).collect();
            FsmWithStartEnd::tag_dispatch(&byte_triggers, &byte_stops, *loop_after_dispatch)
        }
    }
}

fn byte_string_of(grammar: &Grammar, id: RuleExprId) -> Vec<u8> {
    match grammar.expr(id) {
        RuleExpr::ByteString(b) => b.clone(),
        _ => panic!("TagDispatch trigger/stop string must be a literal byte string"),
    }
}

fn class_fsm(negated: bool, ranges: &[CodepointRange]) -> FsmWithStartEnd {
    let ranges = if negated { complement(ranges) } else { ranges.to_vec() };
    let mut alts = Vec::new();
    for r in &ranges {
        for seq in codepoint_range_to_utf8_sequences(r.low, r.high) {
            let parts = seq.iter().map(|br| FsmWithStartEnd::byte_range(br.low, br.high)).collect();
            alts.push(FsmWithStartEnd::concat(parts));
        }
    }
    if alts.is_empty() {
        // An always-failing class: a dead single state with no accept.
        return FsmWithStartEnd::byte_range(1, 0);
    }
    FsmWithStartEnd::union(alts)
}

fn complement(ranges: &[CodepointRange]) -> Vec<CodepointRange> {
    let mut sorted: Vec<CodepointRange> = ranges.to_vec();
    sorted.sort_by_key(|r| r.low);
    let mut out = Vec::new();
    let mut next = 0u32;
    for r in &sorted {
        if r.low > next {
            out.push(CodepointRange { low: next, high: r.low - 1 });
        }
        next = next.max(r.high + 1);
    }
    if next <= crate::utf8::MAX_CODEPOINT {
        out.push(CodepointRange { low: next, high: crate::utf8::MAX_CODEPOINT });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    #[test]
    fn literal_rule_compiles_to_an_accepting_fsm() {
        let g = parse_ebnf("root ::= \"ok\"\n", "root").unwrap();
        let compiled = build_fsms(&g);
        let rule = &compiled[&g.root];
        let s1 = rule.fsm.transition(rule.fsm.start, b'o');
        let s2 = rule.fsm.transition(s1, b'k');
        assert!(rule.fsm.is_accept(s2));
    }

    #[test]
    fn negated_class_excludes_given_range() {
        let g = parse_ebnf("root ::= [^a-z]\n", "root").unwrap();
        let compiled = build_fsms(&g);
        let rule = &compiled[&g.root];
        assert_eq!(rule.fsm.transition(rule.fsm.start, b'm'), CompactFsm::NO_TRANSITION);
        let accept_state = rule.fsm.transition(rule.fsm.start, b'A');
        assert!(rule.fsm.is_accept(accept_state));
    }
}
