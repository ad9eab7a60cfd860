//! Converts a structural-tag JSON specification into a
//! [`Grammar`] directly, rather than through EBNF text: the textual
//! `TagDispatch(...)` macro (`ebnf::parser::parse_tag_dispatch`) always sets
//! `stop_eos: true, stop_strings: vec![], loop_after_dispatch: true`, which
//! is too narrow for the `at_least_one`/`stop_after_first` controls this
//! format exposes, so every format variant here builds
//! [`crate::ir::RuleExpr`]s straight onto a shared [`GrammarBuilder`].
//!
//! `json_schema` embeds its converted sub-grammar with
//! `crate::grammar::splice_into` rather than as raw EBNF text, since the
//! JSON-Schema converter resets its own rule-name counter on every call and
//! embedding its text output more than once would collide rule names.
use serde_json::{Map, Value};

use crate::grammar::splice_into;
use crate::ir::{Grammar, GrammarBuilder, RuleExpr, RuleExprId, RuleId};
use crate::json_schema::{self, JsonSchemaError, JsonSchemaOptions};

const MAX_DEPTH: u32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum StructuralTagError {
    #[error("a structural tag must be a JSON object")]
    NotAnObject,
    #[error("a structural tag's `type` field must be \"structural_tag\"")]
    WrongType,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown structural tag format type `{0}`")]
    UnknownFormatType(String),
    #[error("structural tag format nesting exceeded the recursion limit of {0}")]
    RecursionLimitExceeded(u32),
    #[error(transparent)]
    JsonSchema(#[from] JsonSchemaError),
    #[error(transparent)]
    Parse(#[from] crate::ebnf::ParseError),
}

/// Converts a `{"type": "structural_tag", "format": ...}` document into a
/// grammar whose root matches exactly the strings the format describes.
pub fn convert(value: &Value) -> Result<Grammar, StructuralTagError> {
    let obj = value.as_object().ok_or(StructuralTagError::NotAnObject)?;
    if obj.get("type").and_then(Value::as_str) != Some("structural_tag") {
        return Err(StructuralTagError::WrongType);
    }
    let format = obj.get("format").ok_or(StructuralTagError::MissingField("format"))?;

    let mut builder = GrammarBuilder::new();
    let root_expr = convert_format(&mut builder, format, 0)?;
    let root = builder.add_rule("root", root_expr);
    Ok(builder.build(root))
}

fn convert_format(builder: &mut GrammarBuilder, value: &Value, depth: u32) -> Result<RuleExprId, StructuralTagError> {
    if depth > MAX_DEPTH {
        return Err(StructuralTagError::RecursionLimitExceeded(MAX_DEPTH));
    }
    let obj = value.as_object().ok_or(StructuralTagError::NotAnObject)?;
    let ty = obj.get("type").and_then(Value::as_str).ok_or(StructuralTagError::MissingField("type"))?;
    match ty {
        "literal" => convert_literal(builder, obj),
        "json_schema" => convert_json_schema(builder, obj),
        "wildcard_text" => Ok(convert_wildcard_text(builder)),
        "sequence" => convert_sequence(builder, obj, depth),
        "tag" => convert_tag(builder, obj, depth).map(|(_begin, expr)| expr),
        "triggered_tags" => convert_triggered_tags(builder, obj, depth),
        "tags_with_separator" => convert_tags_with_separator(builder, obj, depth),
        other => Err(StructuralTagError::UnknownFormatType(other.to_string())),
    }
}

fn convert_literal(builder: &mut GrammarBuilder, obj: &Map<String, Value>) -> Result<RuleExprId, StructuralTagError> {
    let text = obj.get("value").and_then(Value::as_str).ok_or(StructuralTagError::MissingField("value"))?;
    Ok(builder.add_expr(RuleExpr::ByteString(text.as_bytes().to_vec())))
}

/// Converts the nested schema with [`json_schema::convert`] and splices the
/// resulting sub-grammar into `builder`'s arena, needed because calling the
/// JSON-Schema converter more than once starts its internal rule-name
/// counter over from zero each time, so embedding its *text* output directly
/// would collide rule names.
fn convert_json_schema(builder: &mut GrammarBuilder, obj: &Map<String, Value>) -> Result<RuleExprId, StructuralTagError> {
    let schema = obj.get("schema").ok_or(StructuralTagError::MissingField("schema"))?;
    let options = JsonSchemaOptions::default();
    let (source, root_name) = json_schema::convert(schema, &options)?;
    let sub_grammar = crate::ebnf::parse_ebnf(&source, &root_name)?;
    let spliced_root = splice_into(builder, &sub_grammar);
    Ok(builder.add_expr(RuleExpr::RuleRef(spliced_root)))
}

/// Unconstrained free text: zero or more bytes of any value. Unlike the
/// original's `StructuralTagAnalyzer`, which infers where wildcard text
/// implicitly ends by looking at what follows it in the enclosing format,
/// this has no lookahead — it matches as much as the surrounding sequence's
/// own structure (an immediately following literal/tag) leaves available.
fn convert_wildcard_text(builder: &mut GrammarBuilder) -> RuleExprId {
    builder.add_expr(RuleExpr::CharacterClassStar { negated: true, ranges: vec![] })
}

fn convert_sequence(
    builder: &mut GrammarBuilder,
    obj: &Map<String, Value>,
    depth: u32,
) -> Result<RuleExprId, StructuralTagError> {
    let elements = obj
        .get("elements")
        .and_then(Value::as_array)
        .ok_or(StructuralTagError::MissingField("elements"))?;
    let parts = elements
        .iter()
        .map(|e| convert_format(builder, e, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(builder.add_expr(RuleExpr::Sequence(parts)))
}

fn tag_begin_content_end(obj: &Map<String, Value>) -> Result<(&str, &Value, &str), StructuralTagError> {
    let begin = obj.get("begin").and_then(Value::as_str).ok_or(StructuralTagError::MissingField("begin"))?;
    let content = obj.get("content").ok_or(StructuralTagError::MissingField("content"))?;
    let end = obj.get("end").and_then(Value::as_str).ok_or(StructuralTagError::MissingField("end"))?;
    Ok((begin, content, end))
}

/// Returns the tag's `begin` string (used as the dispatch trigger by
/// `triggered_tags`) alongside the full `begin content end` sequence
/// expression.
fn convert_tag(
    builder: &mut GrammarBuilder,
    obj: &Map<String, Value>,
    depth: u32,
) -> Result<(String, RuleExprId), StructuralTagError> {
    let (begin, content, end) = tag_begin_content_end(obj)?;
    let begin = begin.to_string();
    let begin_id = builder.add_expr(RuleExpr::ByteString(begin.as_bytes().to_vec()));
    let content_id = convert_format(builder, content, depth + 1)?;
    let end_id = builder.add_expr(RuleExpr::ByteString(end.as_bytes().to_vec()));
    let seq = builder.add_expr(RuleExpr::Sequence(vec![begin_id, content_id, end_id]));
    Ok((begin, seq))
}

fn wrap_as_rule(builder: &mut GrammarBuilder, hint: &str, expr: RuleExprId) -> RuleId {
    let name = builder.get_new_rule_name(hint);
    builder.add_rule(&name, expr)
}

/// One tag chosen by matching its (unique) `begin` string, dispatched via
/// `TagDispatch`, optionally repeating. Each tag's own full `begin` string is
/// used as its own trigger rather than grouping tags by shared prefixes,
/// which is exact as long as no `begin` string is itself a prefix of
/// another's.
///
/// `stop_eos: true` makes "dispatch nothing, stop now" always a valid
/// ending for a bare `TagDispatch` node, so `at_least_one` cannot be
/// expressed inside the dispatch itself; it is enforced by requiring one
/// mandatory tag occurrence before the (optional) dispatch loop. One
/// consequence: no free text may precede that first mandatory tag.
fn convert_triggered_tags(
    builder: &mut GrammarBuilder,
    obj: &Map<String, Value>,
    depth: u32,
) -> Result<RuleExprId, StructuralTagError> {
    let tags = obj.get("tags").and_then(Value::as_array).ok_or(StructuralTagError::MissingField("tags"))?;
    let at_least_one = obj.get("at_least_one").and_then(Value::as_bool).unwrap_or(false);
    let stop_after_first = obj.get("stop_after_first").and_then(Value::as_bool).unwrap_or(false);

    let mut triggers = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag_obj = tag.as_object().ok_or(StructuralTagError::NotAnObject)?;
        let (begin, seq_expr) = convert_tag(builder, tag_obj, depth + 1)?;
        let target_rule = wrap_as_rule(builder, "triggered_tag", seq_expr);
        let trigger_expr = builder.add_expr(RuleExpr::ByteString(begin.into_bytes()));
        triggers.push((trigger_expr, target_rule));
    }

    let dispatch = builder.add_expr(RuleExpr::TagDispatch {
        triggers: triggers.clone(),
        stop_eos: true,
        stop_strings: vec![],
        loop_after_dispatch: !stop_after_first,
    });

    if !at_least_one {
        return Ok(dispatch);
    }

    // Force exactly one tag occurrence up front, then (unless
    // `stop_after_first`) allow the dispatch loop to continue matching more.
    let mandatory_choices: Vec<RuleExprId> =
        triggers.iter().map(|(_, r)| builder.add_expr(RuleExpr::RuleRef(*r))).collect();
    let mandatory = builder.add_expr(RuleExpr::Choices(mandatory_choices));

    if stop_after_first {
        return Ok(mandatory);
    }

    let mandatory_rule = wrap_as_rule(builder, "triggered_tags_first", mandatory);
    let dispatch_rule = wrap_as_rule(builder, "triggered_tags_rest", dispatch);
    let first_ref = builder.add_expr(RuleExpr::RuleRef(mandatory_rule));
    let rest_ref = builder.add_expr(RuleExpr::RuleRef(dispatch_rule));
    Ok(builder.add_expr(RuleExpr::Sequence(vec![first_ref, rest_ref])))
}

/// A list of tags joined by a fixed separator string: `tag (SEP tag)*`.
/// Unlike `triggered_tags`, there is no free-standing text between
/// occurrences and no dispatch-by-prefix — each position is simply one of
/// the allowed tags, chosen by ordinary alternation. `at_least_one` controls
/// whether the whole list may be empty; `stop_after_first` collapses the
/// list to exactly one occurrence.
///
/// This reading — "a separator-joined repetition of one of the given
/// tags" — is inferred from the field names (`tags`, `separator`,
/// `at_least_one`, `stop_after_first`) alone.
fn convert_tags_with_separator(
    builder: &mut GrammarBuilder,
    obj: &Map<String, Value>,
    depth: u32,
) -> Result<RuleExprId, StructuralTagError> {
    let tags = obj.get("tags").and_then(Value::as_array).ok_or(StructuralTagError::MissingField("tags"))?;
    let separator =
        obj.get("separator").and_then(Value::as_str).ok_or(StructuralTagError::MissingField("separator"))?;
    let at_least_one = obj.get("at_least_one").and_then(Value::as_bool).unwrap_or(false);
    let stop_after_first = obj.get("stop_after_first").and_then(Value::as_bool).unwrap_or(false);

    let tag_exprs = tags
        .iter()
        .map(|tag| {
            let tag_obj = tag.as_object().ok_or(StructuralTagError::NotAnObject)?;
            convert_tag(builder, tag_obj, depth + 1).map(|(_begin, expr)| expr)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let one_tag = builder.add_expr(RuleExpr::Choices(tag_exprs));

    if stop_after_first {
        return Ok(one_tag);
    }

    let one_tag_rule = wrap_as_rule(builder, "separated_tag", one_tag);
    let sep_expr = builder.add_expr(RuleExpr::ByteString(separator.as_bytes().to_vec()));
    let first_ref = builder.add_expr(RuleExpr::RuleRef(one_tag_rule));
    let tail_ref = builder.add_expr(RuleExpr::RuleRef(one_tag_rule));
    let tail_seq = builder.add_expr(RuleExpr::Sequence(vec![sep_expr, tail_ref]));
    let tail_rule = wrap_as_rule(builder, "separated_tag_tail", tail_seq);
    let tail_repeat = builder.add_expr(RuleExpr::Repeat { body: tail_rule, min: 0, max: None });
    let list = builder.add_expr(RuleExpr::Sequence(vec![first_ref, tail_repeat]));

    if at_least_one {
        return Ok(list);
    }

    let list_rule = wrap_as_rule(builder, "separated_tag_list", list);
    Ok(builder.add_expr(RuleExpr::Repeat { body: list_rule, min: 0, max: Some(1) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_format_matches_the_literal_text() {
        let spec = json!({"type": "structural_tag", "format": {"type": "literal", "value": "hello"}});
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::ByteString(b) if b == b"hello"));
    }

    #[test]
    fn wildcard_text_is_a_negated_star() {
        let spec = json!({"type": "structural_tag", "format": {"type": "wildcard_text"}});
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::CharacterClassStar { negated: true, .. }));
    }

    #[test]
    fn sequence_concatenates_its_elements() {
        let spec = json!({
            "type": "structural_tag",
            "format": {
                "type": "sequence",
                "elements": [
                    {"type": "literal", "value": "a"},
                    {"type": "literal", "value": "b"},
                ],
            },
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::Sequence(parts) if parts.len() == 2));
    }

    #[test]
    fn tag_wraps_content_between_begin_and_end() {
        let spec = json!({
            "type": "structural_tag",
            "format": {"type": "tag", "begin": "<x>", "content": {"type": "wildcard_text"}, "end": "</x>"},
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::Sequence(parts) if parts.len() == 3));
    }

    #[test]
    fn triggered_tags_without_at_least_one_allows_zero() {
        let spec = json!({
            "type": "structural_tag",
            "format": {
                "type": "triggered_tags",
                "tags": [
                    {"begin": "<a>", "content": {"type": "wildcard_text"}, "end": "</a>"},
                ],
            },
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::TagDispatch { .. }));
    }

    #[test]
    fn triggered_tags_at_least_one_forces_a_mandatory_occurrence() {
        let spec = json!({
            "type": "structural_tag",
            "format": {
                "type": "triggered_tags",
                "tags": [
                    {"begin": "<a>", "content": {"type": "wildcard_text"}, "end": "</a>"},
                ],
                "at_least_one": true,
            },
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::Sequence(parts) if parts.len() == 2));
    }

    #[test]
    fn tags_with_separator_joins_with_the_separator() {
        let spec = json!({
            "type": "structural_tag",
            "format": {
                "type": "tags_with_separator",
                "tags": [
                    {"begin": "<a>", "content": {"type": "wildcard_text"}, "end": "</a>"},
                ],
                "separator": ", ",
                "at_least_one": true,
            },
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::Sequence(parts) if parts.len() == 2));
    }

    #[test]
    fn tags_with_separator_stop_after_first_is_a_single_choice() {
        let spec = json!({
            "type": "structural_tag",
            "format": {
                "type": "tags_with_separator",
                "tags": [
                    {"begin": "<a>", "content": {"type": "wildcard_text"}, "end": "</a>"},
                ],
                "separator": ", ",
                "stop_after_first": true,
            },
        });
        let g = convert(&spec).unwrap();
        assert!(matches!(g.expr(g.rule(g.root).body), RuleExpr::Choices(choices) if choices.len() == 1));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let spec = json!({"type": "not_a_structural_tag", "format": {"type": "literal", "value": "x"}});
        assert!(matches!(convert(&spec), Err(StructuralTagError::WrongType)));
    }

    #[test]
    fn unknown_format_type_is_rejected() {
        let spec = json!({"type": "structural_tag", "format": {"type": "bogus"}});
        assert!(matches!(convert(&spec), Err(StructuralTagError::UnknownFormatType(_))));
    }
}
