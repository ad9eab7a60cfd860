//! Decides whether a rule's lookahead assertion is *exact* (it denotes
//! precisely the set of bytes that may follow, so the matcher can stop as
//! soon as the assertion fails) or merely a hint, and infers a lookahead for
//! rules that don't have one written explicitly.
//!
//! A rule with no explicit lookahead gets one inferred when it is referenced
//! from exactly one place in the whole grammar and that reference is not in
//! tail position of its enclosing sequence: whatever follows the reference
//! there is, by construction, exactly what must come after this rule
//! finishes, so it is attached as the rule's lookahead and marked exact.
use crate::ir::{Grammar, RuleExpr, RuleExprId, RuleId};

/// An assertion is exact when its body is a single byte string or character
/// class with no further branching -- anything involving `Choices` over
/// differently-shaped alternatives, or a nested rule reference, may hide
/// additional structure the matcher can't verify by peeking one token ahead.
pub fn analyze_lookaheads(grammar: &mut Grammar) {
    for rule in grammar.rules.iter_mut() {
        if let Some(la) = rule.lookahead {
            rule.is_exact_lookahead = is_exact(&grammar.exprs, la);
        }
    }

    let root = grammar.root;
    let candidates: Vec<RuleId> = grammar
        .rules
        .iter()
        .enumerate()
        .filter(|(i, rule)| RuleId(*i as u32) != root && rule.lookahead.is_none())
        .map(|(i, _)| RuleId(i as u32))
        .collect();

    for rule_id in candidates {
        let Some(suffix) = unique_non_tail_reference_suffix(grammar, rule_id) else { continue };
        let la_expr = match suffix.len() {
            1 => suffix[0],
            _ => {
                let id = RuleExprId(grammar.exprs.len() as u32);
                grammar.exprs.push(RuleExpr::Sequence(suffix));
                id
            }
        };
        grammar.rules[rule_id.0 as usize].lookahead = Some(la_expr);
        grammar.rules[rule_id.0 as usize].is_exact_lookahead = true;
    }
}

fn is_exact(exprs: &[RuleExpr], id: RuleExprId) -> bool {
    match &exprs[id.0 as usize] {
        RuleExpr::ByteString(_) | RuleExpr::CharacterClass { .. } | RuleExpr::EmptyStr => true,
        RuleExpr::Sequence(items) => items.iter().all(|&i| is_exact(exprs, i)),
        _ => false,
    }
}

/// Scans every rule-expression and rule body in `grammar` for references to
/// `target`. Returns the suffix elements following the single reference, if
/// `target` is referenced in exactly one place and that reference isn't the
/// last element of its enclosing sequence (or a bare, sibling-less
/// reference); returns `None` if `target` is referenced zero or multiple
/// times, or its one reference is in tail position.
fn unique_non_tail_reference_suffix(grammar: &Grammar, target: RuleId) -> Option<Vec<RuleExprId>> {
    let is_ref_to_target = |id: RuleExprId| matches!(grammar.expr(id), RuleExpr::RuleRef(r) if *r == target);

    let mut count = 0usize;
    let mut suffix: Option<Vec<RuleExprId>> = None;

    for expr in &grammar.exprs {
        match expr {
            RuleExpr::Sequence(items) => {
                for (idx, &item) in items.iter().enumerate() {
                    if is_ref_to_target(item) {
                        count += 1;
                        suffix = if idx + 1 < items.len() { Some(items[idx + 1..].to_vec()) } else { None };
                    }
                }
            }
            RuleExpr::Choices(items) => {
                for &item in items {
                    if is_ref_to_target(item) {
                        count += 1;
                        suffix = None;
                    }
                }
            }
            RuleExpr::Repeat { body, .. } => {
                if *body == target {
                    count += 1;
                    suffix = None;
                }
            }
            RuleExpr::TagDispatch { triggers, .. } => {
                for (_, rule) in triggers {
                    if *rule == target {
                        count += 1;
                        suffix = None;
                    }
                }
            }
            _ => {}
        }
    }

    for rule in &grammar.rules {
        if is_ref_to_target(rule.body) {
            count += 1;
            suffix = None;
        }
        if let Some(la) = rule.lookahead {
            if is_ref_to_target(la) {
                count += 1;
                suffix = None;
            }
        }
    }

    if count == 1 { suffix } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    fn find_rule(g: &Grammar, name: &str) -> RuleId {
        (0..g.num_rules() as u32).map(RuleId).find(|&id| g.rule_name(id) == name).unwrap()
    }

    #[test]
    fn byte_string_lookahead_is_exact() {
        let mut g = parse_ebnf("root ::= \"a\" (= \"b\")\n", "root").unwrap();
        analyze_lookaheads(&mut g);
        assert!(g.rule(g.root).is_exact_lookahead);
    }

    #[test]
    fn single_non_tail_reference_infers_a_lookahead() {
        let mut g = parse_ebnf("root ::= digit \" \"\ndigit ::= [0-9]\n", "root").unwrap();
        let digit = find_rule(&g, "digit");
        assert!(g.rule(digit).lookahead.is_none());
        analyze_lookaheads(&mut g);
        let rule = g.rule(digit);
        assert!(rule.lookahead.is_some());
        assert!(rule.is_exact_lookahead);
        assert!(matches!(g.expr(rule.lookahead.unwrap()), RuleExpr::ByteString(b) if b == b" "));
    }

    #[test]
    fn tail_reference_infers_nothing() {
        let mut g = parse_ebnf("root ::= \"x\" digit\ndigit ::= [0-9]\n", "root").unwrap();
        let digit = find_rule(&g, "digit");
        analyze_lookaheads(&mut g);
        assert!(g.rule(digit).lookahead.is_none());
    }

    #[test]
    fn multiply_referenced_rule_infers_nothing() {
        let mut g = parse_ebnf("root ::= digit \" \" | digit \"x\"\ndigit ::= [0-9]\n", "root").unwrap();
        let digit = find_rule(&g, "digit");
        analyze_lookaheads(&mut g);
        assert!(g.rule(digit).lookahead.is_none());
    }
}
