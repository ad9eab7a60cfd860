//! Computes the fixed point of which rules can derive the empty string,
//! used by the matcher to skip optional trailing rule references without
//! consuming a byte.
use ahash::AHashSet;

use crate::ir::{Grammar, RuleExpr, RuleId};

pub fn analyze_empty_derivation(grammar: &mut Grammar) {
    let mut nullable: AHashSet<RuleId> = AHashSet::default();
    loop {
        let mut changed = false;
        for i in 0..grammar.rules.len() as u32 {
            let rid = RuleId(i);
            if nullable.contains(&rid) {
                continue;
            }
            if can_derive_empty(&grammar.exprs, grammar.rule(rid).body, &nullable) {
                nullable.insert(rid);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let mut sorted: Vec<RuleId> = nullable.into_iter().collect();
    sorted.sort();
    grammar.empty_deriving_rules = sorted;
}

fn can_derive_empty(exprs: &[RuleExpr], id: crate::ir::RuleExprId, nullable: &AHashSet<RuleId>) -> bool {
    match &exprs[id.0 as usize] {
        RuleExpr::EmptyStr => true,
        RuleExpr::ByteString(b) => b.is_empty(),
        RuleExpr::CharacterClass { .. } | RuleExpr::CharacterClassStar { .. } => {
            matches!(&exprs[id.0 as usize], RuleExpr::CharacterClassStar { .. })
        }
        RuleExpr::RuleRef(r) => nullable.contains(r),
        RuleExpr::Sequence(items) => items.iter().all(|&i| can_derive_empty(exprs, i, nullable)),
        RuleExpr::Choices(items) => items.iter().any(|&i| can_derive_empty(exprs, i, nullable)),
        RuleExpr::Repeat { body, min, .. } => *min == 0 || nullable.contains(body),
        RuleExpr::TagDispatch { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    #[test]
    fn optional_rule_is_nullable() {
        let mut g = parse_ebnf("root ::= \"a\"?\n", "root").unwrap();
        analyze_empty_derivation(&mut g);
        assert!(!g.empty_deriving_rules.is_empty());
    }

    #[test]
    fn mandatory_literal_is_not_nullable() {
        let mut g = parse_ebnf("root ::= \"a\"\n", "root").unwrap();
        analyze_empty_derivation(&mut g);
        assert!(g.empty_deriving_rules.is_empty());
    }

    #[test]
    fn repeat_with_nullable_body_is_nullable_even_with_min_one() {
        let mut g = parse_ebnf("root ::= maybe+\nmaybe ::= \"a\"?\n", "root").unwrap();
        analyze_empty_derivation(&mut g);
        assert!(g.empty_deriving_rules.contains(&g.root));
    }

    #[test]
    fn repeat_with_mandatory_body_and_min_one_is_not_nullable() {
        let mut g = parse_ebnf("root ::= \"a\"+\n", "root").unwrap();
        analyze_empty_derivation(&mut g);
        assert!(g.empty_deriving_rules.is_empty());
    }
}
