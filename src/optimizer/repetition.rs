//! Lowers any remaining
//! `RuleExpr::Repeat { body, min, max }` node -- emitted directly by the
//! JSON-Schema-to-IR conversion for `minItems`/`maxItems` -- into the same
//! `Sequence`/`Choices`/self-recursive-rule shapes the EBNF quantifier
//! lowering produces, so the FSM builder only ever has to handle one
//! repetition encoding.
use crate::ir::{Grammar, GrammarBuilder, RuleExpr, RuleId};

use super::rewrite::rewrite_exprs;

pub fn normalize_repetitions(grammar: &Grammar) -> Grammar {
    // Repeat nodes reference a *rule*, not an expr, as their body, and may
    // need to synthesize fresh helper rules (for the unbounded tail of
    // `{n,}`). `rewrite_exprs`'s per-node transform can't declare new rules,
    // so this pass runs as its own arena rebuild.
    let mut builder = GrammarBuilder::new();
    let mut rule_ids = ahash::AHashMap::default();
    for rule in &grammar.rules {
        let id = builder.declare_rule(grammar.interner.resolve(rule.name).unwrap());
        rule_ids.insert(RuleId(rule_ids.len() as u32), id);
    }
    for (i, rule) in grammar.rules.iter().enumerate() {
        let new_id = rule_ids[&RuleId(i as u32)];
        let body = lower(grammar, rule.body, &mut builder, &rule_ids);
        builder.set_body(new_id, body);
        if let Some(la) = rule.lookahead {
            let new_la = lower(grammar, la, &mut builder, &rule_ids);
            builder.set_lookahead(new_id, new_la, rule.is_exact_lookahead);
        }
    }
    let new_root = rule_ids[&grammar.root];
    let g = builder.build(new_root);
    rewrite_exprs(&g, |_b, e| e)
}

fn lower(
    grammar: &Grammar,
    id: crate::ir::RuleExprId,
    builder: &mut GrammarBuilder,
    rule_ids: &ahash::AHashMap<RuleId, RuleId>,
) -> crate::ir::RuleExprId {
    match grammar.expr(id).clone() {
        RuleExpr::Sequence(items) => {
            let new_items = items.iter().map(|&i| lower(grammar, i, builder, rule_ids)).collect();
            builder.add_expr(RuleExpr::Sequence(new_items))
        }
        RuleExpr::Choices(items) => {
            let new_items = items.iter().map(|&i| lower(grammar, i, builder, rule_ids)).collect();
            builder.add_expr(RuleExpr::Choices(new_items))
        }
        RuleExpr::RuleRef(r) => builder.add_expr(RuleExpr::RuleRef(rule_ids[&r])),
        RuleExpr::Repeat { body, min, max } => {
            let body_ref = builder.add_expr(RuleExpr::RuleRef(rule_ids[&body]));
            match max {
                Some(max) if max == min => {
                    let elems = vec![body_ref; min as usize];
                    builder.add_expr(RuleExpr::Sequence(elems))
                }
                Some(max) => {
                    let extra = (max - min) as usize;
                    let mut tail: Option<RuleId> = None;
                    for _ in 0..extra {
                        let name = builder.get_new_rule_name("rep_opt");
                        let helper = builder.declare_rule(&name);
                        let empty = builder.add_expr(RuleExpr::EmptyStr);
                        let next_ref = builder.add_expr(RuleExpr::RuleRef(rule_ids[&body]));
                        let body_choice = if let Some(t) = tail {
                            let t_ref = builder.add_expr(RuleExpr::RuleRef(t));
                            let seq = builder.add_expr(RuleExpr::Sequence(vec![next_ref, t_ref]));
                            builder.add_expr(RuleExpr::Choices(vec![empty, seq]))
                        } else {
                            builder.add_expr(RuleExpr::Choices(vec![empty, next_ref]))
                        };
                        builder.set_body(helper, body_choice);
                        tail = Some(helper);
                    }
                    let mut elems = vec![body_ref; min as usize];
                    if let Some(t) = tail {
                        elems.push(builder.add_expr(RuleExpr::RuleRef(t)));
                    }
                    if elems.is_empty() {
                        builder.add_expr(RuleExpr::EmptyStr)
                    } else {
                        builder.add_expr(RuleExpr::Sequence(elems))
                    }
                }
                None => {
                    // {min,}: min mandatory copies followed by a star rule.
                    let name = builder.get_new_rule_name("rep_star");
                    let star_rule = builder.declare_rule(&name);
                    let empty = builder.add_expr(RuleExpr::EmptyStr);
                    let star_ref = builder.add_expr(RuleExpr::RuleRef(star_rule));
                    let next_ref = builder.add_expr(RuleExpr::RuleRef(rule_ids[&body]));
                    let seq = builder.add_expr(RuleExpr::Sequence(vec![next_ref, star_ref]));
                    let star_body = builder.add_expr(RuleExpr::Choices(vec![empty, seq]));
                    builder.set_body(star_rule, star_body);
                    let mut elems = vec![body_ref; min as usize];
                    elems.push(builder.add_expr(RuleExpr::RuleRef(star_rule)));
                    builder.add_expr(RuleExpr::Sequence(elems))
                }
            }
        }
        RuleExpr::TagDispatch { triggers, stop_eos, stop_strings, loop_after_dispatch } => {
            let new_triggers =
                triggers.iter().map(|&(t, r)| (lower(grammar, t, builder, rule_ids), rule_ids[&r])).collect();
            let new_stops = stop_strings.iter().map(|&s| lower(grammar, s, builder, rule_ids)).collect();
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
    use crate::ir::{CodepointRange, GrammarBuilder as GB};

    #[test]
    fn exact_repeat_expands_to_fixed_sequence() {
        let mut b = GB::new();
        let digit = b.add_expr(RuleExpr::CharacterClass {
            negated: false,
            ranges: vec![CodepointRange { low: '0' as u32, high: '9' as u32 }],
        });
        let digit_rule = b.add_rule("digit", digit);
        let repeat = b.add_expr(RuleExpr::Repeat { body: digit_rule, min: 3, max: Some(3) });
        let root = b.add_rule("root", repeat);
        let g = b.build(root);
        let normalized = normalize_repetitions(&g);
        let body = normalized.expr(normalized.rule(normalized.root).body);
        assert!(matches!(body, RuleExpr::Sequence(items) if items.len() == 3));
    }
}
