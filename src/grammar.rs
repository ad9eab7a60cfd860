//! The public [`Grammar`] construction surface: every `Grammar::from_*`
//! entry point plus the `union`/`concat`/
//! `star`/`plus`/`optional` combinators. The EBNF-text converters
//! (`from_ebnf`, `from_json_schema`, `from_regex`) go through
//! [`crate::ebnf::parse_ebnf`], while the combinators and
//! `from_structural_tag` splice already-built [`crate::ir::Grammar`]s
//! directly into a shared [`GrammarBuilder`] arena via [`splice_into`].
use serde_json::Value;

use crate::ebnf;
use crate::ir::{Grammar, GrammarBuilder, RuleExpr, RuleExprId, RuleId};
use crate::json_schema::{self, JsonSchemaError, JsonSchemaOptions};
use crate::regex_lite::{self, RegexLiteError};
use crate::structural_tag::{self, StructuralTagError};

#[derive(Debug, thiserror::Error)]
pub enum GrammarBuildError {
    #[error(transparent)]
    Parse(#[from] ebnf::ParseError),
    #[error(transparent)]
    JsonSchema(#[from] JsonSchemaError),
    #[error(transparent)]
    Regex(#[from] RegexLiteError),
    #[error(transparent)]
    StructuralTag(#[from] StructuralTagError),
}

impl Grammar {
    /// Parses EBNF source text, deriving from `root_rule_name`.
    pub fn from_ebnf(source: &str, root_rule_name: &str) -> Result<Grammar, GrammarBuildError> {
        Ok(ebnf::parse_ebnf(source, root_rule_name)?)
    }

    /// Converts a JSON-Schema document to the standard JSON serialization
    /// grammar.
    pub fn from_json_schema(schema: &Value, options: &JsonSchemaOptions) -> Result<Grammar, GrammarBuildError> {
        let (source, root) = json_schema::convert(schema, options)?;
        Ok(ebnf::parse_ebnf(&source, &root)?)
    }

    /// Converts an object schema to the "XML tool-calling" format.
    pub fn from_json_schema_xml_tool_call(
        schema: &Value,
        options: &JsonSchemaOptions,
    ) -> Result<Grammar, GrammarBuildError> {
        let (source, root) = json_schema::convert_xml_tool_call(schema, options)?;
        Ok(ebnf::parse_ebnf(&source, &root)?)
    }

    /// The schema-less "any JSON value" grammar.
    pub fn builtin_json_grammar() -> Grammar {
        Self::from_json_schema(&Value::Object(Default::default()), &JsonSchemaOptions::default())
            .expect("the schema-less JSON grammar always converts and parses")
    }

    /// Compiles a regular expression into a standalone grammar whose root
    /// matches the whole pattern.
    pub fn from_regex(pattern: &str) -> Result<Grammar, GrammarBuildError> {
        let body = regex_lite::translate(pattern)?;
        let source = format!("root ::= {body}\n");
        Ok(ebnf::parse_ebnf(&source, "root")?)
    }

    /// Converts a structural-tag JSON specification.
    pub fn from_structural_tag(spec: &Value) -> Result<Grammar, GrammarBuildError> {
        Ok(structural_tag::convert(spec)?)
    }

    /// The grammar matching any one of `grammars`.
    pub fn union(grammars: Vec<Grammar>) -> Grammar {
        let mut builder = GrammarBuilder::new();
        let choices: Vec<RuleExprId> = grammars
            .iter()
            .map(|g| {
                let rule = splice_into(&mut builder, g);
                builder.add_expr(RuleExpr::RuleRef(rule))
            })
            .collect();
        let body = builder.add_expr(RuleExpr::Choices(choices));
        let root = builder.add_rule("root", body);
        builder.build(root)
    }

    /// The grammar matching `grammars` back to back, in order.
    pub fn concat(grammars: Vec<Grammar>) -> Grammar {
        let mut builder = GrammarBuilder::new();
        let parts: Vec<RuleExprId> = grammars
            .iter()
            .map(|g| {
                let rule = splice_into(&mut builder, g);
                builder.add_expr(RuleExpr::RuleRef(rule))
            })
            .collect();
        let body = builder.add_expr(RuleExpr::Sequence(parts));
        let root = builder.add_rule("root", body);
        builder.build(root)
    }

    /// Zero or more repetitions of this grammar.
    pub fn star(self) -> Grammar {
        repeat_self(self, 0, None)
    }

    /// One or more repetitions of this grammar.
    pub fn plus(self) -> Grammar {
        repeat_self(self, 1, None)
    }

    /// Zero or one occurrence of this grammar.
    pub fn optional(self) -> Grammar {
        repeat_self(self, 0, Some(1))
    }
}

fn repeat_self(g: Grammar, min: u32, max: Option<u32>) -> Grammar {
    let mut builder = GrammarBuilder::new();
    let inner_root = splice_into(&mut builder, &g);
    let body = builder.add_expr(RuleExpr::Repeat { body: inner_root, min, max });
    let root = builder.add_rule("root", body);
    builder.build(root)
}

/// Splices every rule and rule-expression of `g` into `builder`'s arena,
/// remapping ids and disambiguating rule names via
/// [`GrammarBuilder::get_new_rule_name`], and returns the id `g.root` was
/// remapped to. Used both by the combinators above and by
/// [`crate::structural_tag`] to embed an independently-converted JSON-Schema
/// sub-grammar inline.
///
/// Relies on the invariant every `GrammarBuilder`-built arena already
/// satisfies: an expression never references an id greater than its own
/// (children are always added before the composite that refers to them), so
/// a single left-to-right pass over `g.exprs` can translate each expression
/// using only previously-computed mappings.
pub(crate) fn splice_into(builder: &mut GrammarBuilder, g: &Grammar) -> RuleId {
    let rule_map: Vec<RuleId> = (0..g.rules.len())
        .map(|i| {
            let hint = builder.get_new_rule_name(g.rule_name(RuleId(i as u32)));
            builder.declare_rule(&hint)
        })
        .collect();

    let mut expr_map: Vec<RuleExprId> = Vec::with_capacity(g.exprs.len());
    for expr in &g.exprs {
        let translated = translate_expr(expr, &rule_map, &expr_map);
        expr_map.push(builder.add_expr(translated));
    }

    for (i, rule) in g.rules.iter().enumerate() {
        let new_body = expr_map[rule.body.0 as usize];
        builder.set_body(rule_map[i], new_body);
        if let Some(lookahead) = rule.lookahead {
            builder.set_lookahead(rule_map[i], expr_map[lookahead.0 as usize], rule.is_exact_lookahead);
        }
    }

    rule_map[g.root.0 as usize]
}

fn translate_expr(expr: &RuleExpr, rule_map: &[RuleId], expr_map: &[RuleExprId]) -> RuleExpr {
    match expr {
        RuleExpr::ByteString(bytes) => RuleExpr::ByteString(bytes.clone()),
        RuleExpr::CharacterClass { negated, ranges } => {
            RuleExpr::CharacterClass { negated: *negated, ranges: ranges.clone() }
        }
        RuleExpr::CharacterClassStar { negated, ranges } => {
            RuleExpr::CharacterClassStar { negated: *negated, ranges: ranges.clone() }
        }
        RuleExpr::EmptyStr => RuleExpr::EmptyStr,
        RuleExpr::RuleRef(id) => RuleExpr::RuleRef(rule_map[id.0 as usize]),
        RuleExpr::Sequence(ids) => RuleExpr::Sequence(ids.iter().map(|id| expr_map[id.0 as usize]).collect()),
        RuleExpr::Choices(ids) => RuleExpr::Choices(ids.iter().map(|id| expr_map[id.0 as usize]).collect()),
        RuleExpr::Repeat { body, min, max } => {
            RuleExpr::Repeat { body: rule_map[body.0 as usize], min: *min, max: *max }
        }
        RuleExpr::TagDispatch { triggers, stop_eos, stop_strings, loop_after_dispatch } => RuleExpr::TagDispatch {
            triggers: triggers.iter().map(|(e, r)| (expr_map[e.0 as usize], rule_map[r.0 as usize])).collect(),
            stop_eos: *stop_eos,
            stop_strings: stop_strings.iter().map(|id| expr_map[id.0 as usize]).collect(),
            loop_after_dispatch: *loop_after_dispatch,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_ebnf_round_trips() {
        let g = Grammar::from_ebnf("root ::= \"a\" \"b\"\n", "root").unwrap();
        assert!(g.num_rules() >= 1);
    }

    #[test]
    fn from_regex_compiles_through_ebnf() {
        let g = Grammar::from_regex("[0-9]+").unwrap();
        assert!(g.num_rules() >= 1);
    }

    #[test]
    fn builtin_json_grammar_has_rules() {
        let g = Grammar::builtin_json_grammar();
        assert!(g.num_rules() > 0);
    }

    #[test]
    fn union_matches_rules_from_either_branch() {
        let a = Grammar::from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let b = Grammar::from_ebnf("root ::= \"b\"\n", "root").unwrap();
        let u = Grammar::union(vec![a, b]);
        assert!(u.num_rules() >= 3); // new root + two spliced roots, at minimum
    }

    #[test]
    fn concat_splices_both_grammars_in_order() {
        let a = Grammar::from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let b = Grammar::from_ebnf("root ::= \"b\"\n", "root").unwrap();
        let c = Grammar::concat(vec![a, b]);
        assert!(c.num_rules() >= 3);
    }

    #[test]
    fn star_wraps_the_grammar_in_a_repeat() {
        let a = Grammar::from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let starred = a.star();
        let body = starred.expr(starred.rule(starred.root).body);
        assert!(matches!(body, RuleExpr::Repeat { min: 0, max: None, .. }));
    }

    #[test]
    fn optional_allows_zero_or_one() {
        let a = Grammar::from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let opt = a.optional();
        let body = opt.expr(opt.rule(opt.root).body);
        assert!(matches!(body, RuleExpr::Repeat { min: 0, max: Some(1), .. }));
    }

    #[test]
    fn from_structural_tag_builds_a_grammar() {
        let spec = json!({
            "type": "structural_tag",
            "format": {"type": "literal", "value": "hello"},
        });
        let g = Grammar::from_structural_tag(&spec).unwrap();
        assert!(g.num_rules() > 0);
    }
}
