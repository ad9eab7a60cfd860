//! Shared post-order AST rewriting helper used by every optimizer stage
//!. Each stage rebuilds the rule-expression arena from
//! scratch rather than mutating in place, since most passes change the
//! shape of the tree (fusing, flattening, inlining) and keeping indices
//! consistent under in-place edits would be error-prone.
use ahash::AHashMap;

use crate::ir::{Grammar, GrammarBuilder, Rule, RuleExpr, RuleExprId, RuleId};

/// Rebuilds `grammar`'s expression arena, applying `transform` to every node
/// after its children have already been rewritten (bottom-up). `transform`
/// receives the already-rewritten node and may return a different node
/// shape (e.g. flattened, fused, or unwrapped).
pub fn rewrite_exprs(
    grammar: &Grammar,
    mut transform: impl FnMut(&mut GrammarBuilder, RuleExpr) -> RuleExpr,
) -> Grammar {
    let mut builder = GrammarBuilder::new();
    let mut memo: AHashMap<RuleExprId, RuleExprId> = AHashMap::default();
    let mut rule_ids: AHashMap<RuleId, RuleId> = AHashMap::default();

    for rule in &grammar.rules {
        let id = builder.declare_rule(grammar.interner.resolve(rule.name).unwrap());
        rule_ids.insert(RuleId(rule_ids.len() as u32), id);
    }

    fn walk(
        grammar: &Grammar,
        id: RuleExprId,
        builder: &mut GrammarBuilder,
        memo: &mut AHashMap<RuleExprId, RuleExprId>,
        rule_ids: &AHashMap<RuleId, RuleId>,
        transform: &mut impl FnMut(&mut GrammarBuilder, RuleExpr) -> RuleExpr,
    ) -> RuleExprId {
        if let Some(&done) = memo.get(&id) {
            return done;
        }
        let rewritten = match grammar.expr(id).clone() {
            RuleExpr::Sequence(items) => {
                let new_items: Vec<RuleExprId> =
                    items.iter().map(|&i| walk(grammar, i, builder, memo, rule_ids, transform)).collect();
                RuleExpr::Sequence(new_items)
            }
            RuleExpr::Choices(items) => {
                let new_items: Vec<RuleExprId> =
                    items.iter().map(|&i| walk(grammar, i, builder, memo, rule_ids, transform)).collect();
                RuleExpr::Choices(new_items)
            }
            RuleExpr::TagDispatch { triggers, stop_eos, stop_strings, loop_after_dispatch } => {
                let new_triggers = triggers
                    .iter()
                    .map(|&(t, r)| (walk(grammar, t, builder, memo, rule_ids, transform), remap_rule(r, rule_ids)))
                    .collect();
                let new_stops = stop_strings
                    .iter()
                    .map(|&s| walk(grammar, s, builder, memo, rule_ids, transform))
                    .collect();
                RuleExpr::TagDispatch { triggers: new_triggers, stop_eos, stop_strings: new_stops, loop_after_dispatch }
            }
            RuleExpr::RuleRef(r) => RuleExpr::RuleRef(remap_rule(r, rule_ids)),
            RuleExpr::Repeat { body, min, max } => RuleExpr::Repeat { body: remap_rule(body, rule_ids), min, max },
            other => other,
        };
        let transformed = transform(builder, rewritten);
        let new_id = builder.add_expr(transformed);
        memo.insert(id, new_id);
        new_id
    }

    fn remap_rule(r: RuleId, rule_ids: &AHashMap<RuleId, RuleId>) -> RuleId {
        *rule_ids.get(&r).unwrap_or(&r)
    }

    for (i, rule) in grammar.rules.iter().enumerate() {
        let new_id = rule_ids[&RuleId(i as u32)];
        let body = walk(grammar, rule.body, &mut builder, &mut memo, &rule_ids, &mut transform);
        builder.set_body(new_id, body);
        if let Some(la) = rule.lookahead {
            let new_la = walk(grammar, la, &mut builder, &mut memo, &rule_ids, &mut transform);
            builder.set_lookahead(new_id, new_la, rule.is_exact_lookahead);
        }
    }

    let new_root = rule_ids[&grammar.root];
    builder.build(new_root)
}

/// Visits every `RuleRef` reachable from `start`, used by the dead-code and
/// reachability-driven analyses.
pub fn reachable_rules(grammar: &Grammar, start: RuleId) -> ahash::AHashSet<RuleId> {
    let mut seen = ahash::AHashSet::default();
    let mut stack = vec![start];
    seen.insert(start);
    while let Some(r) = stack.pop() {
        visit_expr(grammar, grammar.rule(r).body, &mut seen, &mut stack);
        if let Some(la) = grammar.rule(r).lookahead {
            visit_expr(grammar, la, &mut seen, &mut stack);
        }
    }
    seen
}

fn visit_expr(grammar: &Grammar, id: RuleExprId, seen: &mut ahash::AHashSet<RuleId>, stack: &mut Vec<RuleId>) {
    match grammar.expr(id) {
        RuleExpr::Sequence(items) | RuleExpr::Choices(items) => {
            for &i in items {
                visit_expr(grammar, i, seen, stack);
            }
        }
        RuleExpr::RuleRef(r) => {
            if seen.insert(*r) {
                stack.push(*r);
            }
        }
        RuleExpr::Repeat { body, .. } => {
            if seen.insert(*body) {
                stack.push(*body);
            }
        }
        RuleExpr::TagDispatch { triggers, stop_strings, .. } => {
            for &(t, r) in triggers {
                visit_expr(grammar, t, seen, stack);
                if seen.insert(r) {
                    stack.push(r);
                }
            }
            for &s in stop_strings {
                visit_expr(grammar, s, seen, stack);
            }
        }
        RuleExpr::ByteString(_) | RuleExpr::CharacterClass { .. } | RuleExpr::CharacterClassStar { .. } | RuleExpr::EmptyStr => {}
    }
}
