//! Structural normalization stages: collapsing single-child sequences and
//! choices, flattening nested sequences/choices, and fusing adjacent byte
//! strings.
use crate::ir::{Grammar, RuleExpr};

use super::rewrite::rewrite_exprs;

/// A `Sequence`/`Choices` with exactly one child is replaced by that child.
pub fn eliminate_single_element_exprs(grammar: &Grammar) -> Grammar {
    rewrite_exprs(grammar, |builder, expr| match expr {
        RuleExpr::Sequence(items) if items.len() == 1 => builder.expr_ref(items[0]).clone(),
        RuleExpr::Choices(items) if items.len() == 1 => builder.expr_ref(items[0]).clone(),
        other => other,
    })
}

/// Flattens nested `Sequence`-of-`Sequence` and
/// `Choices`-of-`Choices` into a single flat level, and drops single-child
/// wrappers by splicing the child's items in directly where possible.
pub fn normalize_structure(grammar: &Grammar) -> Grammar {
    rewrite_exprs(grammar, |builder, expr| match expr {
        RuleExpr::Sequence(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for id in items {
                if let RuleExpr::Sequence(inner) = builder.expr_ref(id).clone() {
                    flat.extend(inner);
                } else {
                    flat.push(id);
                }
            }
            if flat.len() == 1 {
                return builder.expr_ref(flat[0]).clone();
            }
            RuleExpr::Sequence(flat)
        }
        RuleExpr::Choices(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for id in items {
                if let RuleExpr::Choices(inner) = builder.expr_ref(id).clone() {
                    flat.extend(inner);
                } else {
                    flat.push(id);
                }
            }
            if flat.len() == 1 {
                return builder.expr_ref(flat[0]).clone();
            }
            RuleExpr::Choices(flat)
        }
        other => other,
    })
}

/// Adjacent `ByteString` elements in a `Sequence` are
/// merged into one, shrinking the number of FSM transitions per match step.
pub fn fuse_byte_strings(grammar: &Grammar) -> Grammar {
    rewrite_exprs(grammar, |builder, expr| match expr {
        RuleExpr::Sequence(items) => {
            let mut fused: Vec<RuleExpr> = Vec::with_capacity(items.len());
            for id in &items {
                let node = builder.expr_ref(*id).clone();
                if let RuleExpr::ByteString(bytes) = node {
                    if let Some(RuleExpr::ByteString(prev)) = fused.last_mut() {
                        prev.extend(bytes);
                        continue;
                    }
                    fused.push(RuleExpr::ByteString(bytes));
                } else {
                    fused.push(node);
                }
            }
            if fused.len() == items.len() {
                return RuleExpr::Sequence(items);
            }
            let new_ids: Vec<_> = fused.into_iter().map(|e| builder.add_expr(e)).collect();
            if new_ids.len() == 1 {
                return builder.expr_ref(new_ids[0]).clone();
            }
            RuleExpr::Sequence(new_ids)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;

    #[test]
    fn adjacent_byte_strings_fuse() {
        let g = parse_ebnf(r#"root ::= "ab" "cd" "ef""#, "root").unwrap();
        let g = normalize_structure(&g);
        let g = fuse_byte_strings(&g);
        let body = g.expr(g.rule(g.root).body).clone();
        assert!(matches!(body, RuleExpr::ByteString(ref b) if b == b"abcdef"));
    }
}
