//! Rule inlining and dead-rule elimination.
use ahash::AHashMap;

use crate::ir::{Grammar, GrammarBuilder, RuleExpr, RuleId};

use super::rewrite::reachable_rules;

/// A rule is a candidate for inlining when it is referenced from exactly one
/// call site and its body is small enough that duplicating it elsewhere in
/// the arena isn't wasteful, rather than inlining unconditionally.
const MAX_INLINE_EXPR_COUNT: usize = 24;

/// Rules referenced exactly once get spliced directly into their call site,
/// removing a level of indirection (and a state-stack push in the matcher).
pub fn inline_single_use_rules(grammar: &Grammar) -> Grammar {
    let mut ref_counts: AHashMap<RuleId, u32> = AHashMap::default();
    count_refs(grammar, &mut ref_counts);

    let mut builder = GrammarBuilder::new();
    let mut rule_ids: AHashMap<RuleId, RuleId> = AHashMap::default();
    for rule in &grammar.rules {
        let id = builder.declare_rule(grammar.interner.resolve(rule.name).unwrap());
        rule_ids.insert(RuleId(rule_ids.len() as u32), id);
    }

    let inline_targets: AHashMap<RuleId, bool> = (0..grammar.rules.len() as u32)
        .map(|i| {
            let rid = RuleId(i);
            let eligible = ref_counts.get(&rid).copied().unwrap_or(0) == 1
                && rid != grammar.root
                && expr_size(grammar, grammar.rule(rid).body) <= MAX_INLINE_EXPR_COUNT
                && grammar.rule(rid).lookahead.is_none();
            (rid, eligible)
        })
        .collect();

    for (i, rule) in grammar.rules.iter().enumerate() {
        let new_id = rule_ids[&RuleId(i as u32)];
        let body = inline_walk(grammar, rule.body, &mut builder, &rule_ids, &inline_targets);
        builder.set_body(new_id, body);
        if let Some(la) = rule.lookahead {
            let new_la = inline_walk(grammar, la, &mut builder, &rule_ids, &inline_targets);
            builder.set_lookahead(new_id, new_la, rule.is_exact_lookahead);
        }
    }
    let new_root = rule_ids[&grammar.root];
    builder.build(new_root)
}

fn expr_size(grammar: &Grammar, id: crate::ir::RuleExprId) -> usize {
    match grammar.expr(id) {
        RuleExpr::Sequence(items) | RuleExpr::Choices(items) => {
            1 + items.iter().map(|&i| expr_size(grammar, i)).sum::<usize>()
        }
        _ => 1,
    }
}

fn count_refs(grammar: &Grammar, counts: &mut AHashMap<RuleId, u32>) {
    for expr in &grammar.exprs {
        match expr {
            RuleExpr::RuleRef(r) => *counts.entry(*r).or_insert(0) += 1,
            RuleExpr::Repeat { body, .. } => *counts.entry(*body).or_insert(0) += 1,
            RuleExpr::TagDispatch { triggers, .. } => {
                for &(_, r) in triggers {
                    *counts.entry(r).or_insert(0) += 1;
                }
            }
            _ => {}
        }
    }
}

fn inline_walk(
    grammar: &Grammar,
    id: crate::ir::RuleExprId,
    builder: &mut GrammarBuilder,
    rule_ids: &AHashMap<RuleId, RuleId>,
    inline_targets: &AHashMap<RuleId, bool>,
) -> crate::ir::RuleExprId {
    match grammar.expr(id).clone() {
        RuleExpr::Sequence(items) => {
            let new_items = items.iter().map(|&i| inline_walk(grammar, i, builder, rule_ids, inline_targets)).collect();
            builder.add_expr(RuleExpr::Sequence(new_items))
        }
        RuleExpr::Choices(items) => {
            let new_items = items.iter().map(|&i| inline_walk(grammar, i, builder, rule_ids, inline_targets)).collect();
            builder.add_expr(RuleExpr::Choices(new_items))
        }
        RuleExpr::RuleRef(r) => {
            if inline_targets.get(&r).copied().unwrap_or(false) {
                inline_walk(grammar, grammar.rule(r).body, builder, rule_ids, inline_targets)
            } else {
                builder.add_expr(RuleExpr::RuleRef(rule_ids[&r]))
            }
        }
        RuleExpr::Repeat { body, min, max } => builder.add_expr(RuleExpr::Repeat { body: rule_ids[&body], min, max }),
        RuleExpr::TagDispatch { triggers, stop_eos, stop_strings, loop_after_dispatch } => {
            let new_triggers = triggers
                .iter()
                .map(|&(t, r)| (inline_walk(grammar, t, builder, rule_ids, inline_targets), rule_ids[&r]))
                .collect();
            let new_stops = stop_strings.iter().map(|&s| inline_walk(grammar, s, builder, rule_ids, inline_targets)).collect();
            builder.add_expr(RuleExpr::TagDispatch {
                triggers: new_triggers,
                stop_eos,
                stop_strings: new_stops,
                loop_after_dispatch,
            })
        }
        other => builder.add_expr(other),
    }
}

/// Dead-rule elimination: drops rules unreachable from the root after
/// inlining, and remaps every remaining `RuleRef`/`Repeat`/`TagDispatch`
/// target to the compacted id space.
pub fn eliminate_dead_rules(grammar: &Grammar) -> Grammar {
    let reachable = reachable_rules(grammar, grammar.root);
    let mut old_to_new: AHashMap<RuleId, RuleId> = AHashMap::default();
    let mut builder = GrammarBuilder::new();
    for i in 0..grammar.rules.len() as u32 {
        let old = RuleId(i);
        if reachable.contains(&old) {
            let name = grammar.rule_name(old);
            let new_id = builder.declare_rule(name);
            old_to_new.insert(old, new_id);
        }
    }
    for i in 0..grammar.rules.len() as u32 {
        let old = RuleId(i);
        if let Some(&new_id) = old_to_new.get(&old) {
            let rule = grammar.rule(old);
            let body = remap_expr(grammar, rule.body, &mut builder, &old_to_new);
            builder.set_body(new_id, body);
            if let Some(la) = rule.lookahead {
                let new_la = remap_expr(grammar, la, &mut builder, &old_to_new);
                builder.set_lookahead(new_id, new_la, rule.is_exact_lookahead);
            }
        }
    }
    let new_root = old_to_new[&grammar.root];
    builder.build(new_root)
}

fn remap_expr(
    grammar: &Grammar,
    id: crate::ir::RuleExprId,
    builder: &mut GrammarBuilder,
    old_to_new: &AHashMap<RuleId, RuleId>,
) -> crate::ir::RuleExprId {
    match grammar.expr(id).clone() {
        RuleExpr::Sequence(items) => {
            let new_items = items.iter().map(|&i| remap_expr(grammar, i, builder, old_to_new)).collect();
            builder.add_expr(RuleExpr::Sequence(new_items))
        }
        RuleExpr::Choices(items) => {
            let new_items = items.iter().map(|&i| remap_expr(grammar, i, builder, old_to_new)).collect();
            builder.add_expr(RuleExpr::Choices(new_items))
        }
        RuleExpr::RuleRef(r) => builder.add_expr(RuleExpr::RuleRef(old_to_new[&r])),
        RuleExpr::Repeat { body, min, max } => builder.add_expr(RuleExpr::Repeat { body: old_to_new[&body], min, max }),
        RuleExpr::TagDispatch { triggers, stop_eos, stop_strings, loop_after_dispatch } => {
            let new_triggers = triggers
                .iter()
                .map(|&(t, r)| (remap_expr(grammar, t, builder, old_to_new), old_to_new[&r]))
                .collect();
            let new_stops = stop_strings.iter().map(|&s| remap_expr(grammar, s, builder, old_to_new)).collect();
            builder.add_expr(RuleExpr::TagDispatch {
                triggers: new_triggers,
                stop_eos,
                stop_strings: new_stops,
                loop_after_dispatch,
            })
        }
        other => builder.add_expr(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    #[test]
    fn unreferenced_rule_is_removed() {
        let g = parse_ebnf("root ::= \"a\"\nunused ::= \"b\"\n", "root").unwrap();
        let g = eliminate_dead_rules(&g);
        assert_eq!(g.num_rules(), 1);
    }

    #[test]
    fn single_use_rule_gets_inlined() {
        let g = parse_ebnf(
            "root ::= helper helper2 \"x\"\nhelper2 ::= \"y\"\nhelper ::= \"z\"\n",
            "root",
        )
        .unwrap();
        let inlined = inline_single_use_rules(&g);
        let reduced = eliminate_dead_rules(&inlined);
        // both single-use helpers should have been spliced into root, leaving
        // only the root rule reachable.
        assert_eq!(reduced.num_rules(), 1);
    }
}
