//! JSON-Schema → EBNF conversion. Deliberately mechanical: it walks a
//! `serde_json::Value` schema and emits EBNF source text, the same textual
//! surface `ebnf::parse_ebnf` already accepts, rather than building
//! `RuleExpr`s directly.
use ahash::AHashMap;
use serde_json::Value;

use crate::regex_lite::{self, RegexLiteError};

#[derive(Debug, thiserror::Error)]
pub enum JsonSchemaError {
    #[error("unknown $ref target '{0}'")]
    UnknownRef(String),
    #[error("unsupported $ref form '{0}' (only '#/$defs/...' and '#/definitions/...' are resolved)")]
    UnsupportedRefForm(String),
    #[error("schema nesting exceeded the configured recursion limit of {0}")]
    RecursionLimitExceeded(u32),
    #[error("invalid regex pattern: {0}")]
    Regex(#[from] RegexLiteError),
    #[error("the XML tool-calling format requires an object schema at the root")]
    RootMustBeObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitespacePolicy {
    /// `[ \n\t]*` is allowed between any two structural tokens (the
    /// default).
    Any,
    /// Python `json.dumps(indent=n)` semantics: each nesting level adds `n`
    /// more spaces of indentation after a newline, and `, `/`: ` separators
    /// collapse to `,`/`: ` without the trailing space before a newline.
    Indent(usize),
}

#[derive(Debug, Clone)]
pub struct JsonSchemaOptions {
    pub strict_mode: bool,
    pub whitespace: WhitespacePolicy,
    pub max_recursion_depth: u32,
}

impl Default for JsonSchemaOptions {
    fn default() -> Self {
        Self { strict_mode: false, whitespace: WhitespacePolicy::Any, max_recursion_depth: 64 }
    }
}

/// Converts `schema` to EBNF source text plus the name of its root rule,
/// ready for [`crate::ebnf::parse_ebnf`].
pub fn convert(schema: &Value, options: &JsonSchemaOptions) -> Result<(String, String), JsonSchemaError> {
    let mut conv = Converter::new(options, schema.clone());
    let root = conv.convert_schema(schema, "root")?;
    Ok((conv.finish(), root))
}

/// Converts an object schema's root into the "XML tool-calling" format:
/// `<parameter=name>value</parameter>` for every top-level property,
/// standard JSON for nested values.
pub fn convert_xml_tool_call(schema: &Value, options: &JsonSchemaOptions) -> Result<(String, String), JsonSchemaError> {
    let mut conv = Converter::new(options, schema.clone());
    let obj = schema.as_object().ok_or(JsonSchemaError::RootMustBeObject)?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(JsonSchemaError::RootMustBeObject);
    }
    let properties = obj.get("properties").and_then(Value::as_object);
    let required: Vec<&str> =
        obj.get("required").and_then(Value::as_array).into_iter().flatten().filter_map(Value::as_str).collect();
    let mut parts = Vec::new();
    if let Some(properties) = properties {
        for (name, prop_schema) in properties {
            let value_rule = conv.convert_schema(prop_schema, &format!("param_{name}"))?;
            let tag_open = quote_json_literal(&format!("<parameter={name}>"));
            let tag_close = quote_json_literal("</parameter>");
            let entry = format!("{tag_open} {value_rule} {tag_close}");
            if required.contains(&name.as_str()) {
                parts.push(entry);
            } else {
                let wrapper = conv.fresh_name(&format!("optional_{name}"));
                conv.emit_rule(&wrapper, &format!("\"\" | {entry}"));
                parts.push(wrapper);
            }
        }
    }
    conv.ensure_ws_rule();
    let root = conv.fresh_name("root");
    conv.emit_rule(&root, &parts.join(&format!(" {} ", conv.ws_any_token())));
    Ok((conv.finish(), root))
}

struct Converter<'a> {
    options: &'a JsonSchemaOptions,
    root: Value,
    lines: Vec<String>,
    cache: AHashMap<String, String>,
    def_rule_names: AHashMap<String, String>,
    in_progress: std::collections::HashSet<String>,
    counters: AHashMap<String, u32>,
    depth: u32,
    builtin_any: Option<String>,
    builtin_string_char: Option<String>,
    builtin_number: Option<String>,
}

impl<'a> Converter<'a> {
    fn new(options: &'a JsonSchemaOptions, root: Value) -> Self {
        Self {
            options,
            root,
            lines: Vec::new(),
            cache: AHashMap::default(),
            def_rule_names: AHashMap::default(),
            in_progress: std::collections::HashSet::new(),
            counters: AHashMap::default(),
            depth: 0,
            builtin_any: None,
            builtin_string_char: None,
            builtin_number: None,
        }
    }

    fn finish(self) -> String {
        self.lines.join("\n") + "\n"
    }

    fn fresh_name(&mut self, hint: &str) -> String {
        let counter = self.counters.entry(hint.to_string()).or_insert(0);
        let name = if *counter == 0 { hint.to_string() } else { format!("{hint}_{counter}") };
        *counter += 1;
        name
    }

    fn emit_rule(&mut self, name: &str, body: &str) {
        self.lines.push(format!("{name} ::= {body}"));
    }

    /// The whitespace fragment spliced between structural tokens. Only
    /// `Any` is context-free in the general case; `Indent` policy bakes the
    /// concrete indentation string for the *current* nesting depth directly
    /// into the caller's rule body, since the schema's nesting structure
    /// (and therefore each rule's depth) is fully known at conversion time.
    fn ws_any_token(&mut self) -> String {
        if matches!(self.options.whitespace, WhitespacePolicy::Any) {
            "ws".to_string()
        } else {
            quote_json_literal("")
        }
    }

    fn ensure_ws_rule(&mut self) {
        if matches!(self.options.whitespace, WhitespacePolicy::Any) && !self.lines.iter().any(|l| l.starts_with("ws ::=")) {
            self.lines.push("ws ::= [ \\n\\t]*".to_string());
        }
    }

    fn indent_str(&self, depth: u32) -> String {
        match self.options.whitespace {
            WhitespacePolicy::Any => String::new(),
            WhitespacePolicy::Indent(n) => format!("\n{}", " ".repeat(n as usize * depth as usize)),
        }
    }

    fn comma_sep(&self, depth: u32) -> String {
        match self.options.whitespace {
            WhitespacePolicy::Any => format!("\",\" {}", self.ws_ref()),
            WhitespacePolicy::Indent(_) => format!("\",{}\"", self.indent_str(depth)),
        }
    }

    fn ws_ref(&self) -> &'static str {
        "ws"
    }

    fn builtin_any_json(&mut self) -> String {
        if let Some(name) = &self.builtin_any {
            return name.clone();
        }
        let name = "json_any_value".to_string();
        self.builtin_any = Some(name.clone());
        self.ensure_ws_rule();
        let string_rule = self.builtin_json_string();
        let number_rule = self.builtin_json_number();
        let array = format!(
            "\"[\" {ws} ({any} {ws} (\",\" {ws} {any} {ws})*)? \"]\"",
            ws = self.ws_ref(),
            any = name
        );
        let object = format!(
            "\"{{\" {ws} ({string_rule} {ws} \":\" {ws} {any} {ws} (\",\" {ws} {string_rule} {ws} \":\" {ws} {any} {ws})*)? \"}}\"",
            ws = self.ws_ref(),
            any = name
        );
        self.emit_rule(
            &name,
            &format!("{string_rule} | {number_rule} | \"true\" | \"false\" | \"null\" | ({array}) | ({object})"),
        );
        name
    }

    fn builtin_json_string(&mut self) -> String {
        if let Some(name) = &self.builtin_string_char {
            return format!("(\"\\\"\" {name}* \"\\\"\")");
        }
        let name = "json_string_char".to_string();
        self.builtin_string_char = Some(name.clone());
        self.emit_rule(&name, "[^\"\\\\\\x00-\\x1f] | \"\\\\\" ([\"\\\\/bfnrt] | \"u\" [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F])");
        format!("(\"\\\"\" {name}* \"\\\"\")")
    }

    fn builtin_json_number(&mut self) -> String {
        if let Some(name) = &self.builtin_number {
            return name.clone();
        }
        let name = "json_number".to_string();
        self.builtin_number = Some(name.clone());
        self.emit_rule(
            &name,
            "\"-\"? (\"0\" | [1-9] [0-9]*) (\".\" [0-9]+)? ([eE] [+-]? [0-9]+)?",
        );
        name
    }

    fn convert_schema(&mut self, schema: &Value, hint: &str) -> Result<String, JsonSchemaError> {
        self.depth += 1;
        if self.depth > self.options.max_recursion_depth {
            return Err(JsonSchemaError::RecursionLimitExceeded(self.options.max_recursion_depth));
        }
        let result = self.convert_schema_inner(schema, hint);
        self.depth -= 1;
        result
    }

    fn convert_schema_inner(&mut self, schema: &Value, hint: &str) -> Result<String, JsonSchemaError> {
        if matches!(schema, Value::Bool(true)) || schema.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            return Ok(self.builtin_any_json());
        }
        if matches!(schema, Value::Bool(false)) {
            // Never satisfiable: a dead character class compiles to an
            // always-rejecting rule.
            let name = self.fresh_name(&format!("{hint}_never"));
            self.emit_rule(&name, "[^\\x00-\\x{10FFFF}]");
            return Ok(name);
        }
        let obj = schema.as_object().expect("handled Bool and empty-object cases above");

        if let Some(r) = obj.get("$ref").and_then(Value::as_str) {
            return self.resolve_ref(schema, r);
        }

        let key = schema.to_string();
        if let Some(existing) = self.cache.get(&key) {
            return Ok(existing.clone());
        }

        if let Some(const_val) = obj.get("const") {
            let name = self.fresh_name(hint);
            self.emit_rule(&name, &quote_json_literal(&const_val.to_string()));
            self.cache.insert(key, name.clone());
            return Ok(name);
        }
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            let name = self.fresh_name(hint);
            let alts: Vec<String> = values.iter().map(|v| quote_json_literal(&v.to_string())).collect();
            self.emit_rule(&name, &alts.join(" | "));
            self.cache.insert(key, name.clone());
            return Ok(name);
        }
        if let Some(variants) = obj.get("anyOf").or_else(|| obj.get("oneOf")).and_then(Value::as_array) {
            let name = self.fresh_name(hint);
            let mut alts = Vec::with_capacity(variants.len());
            for (i, v) in variants.iter().enumerate() {
                alts.push(self.convert_schema(v, &format!("{hint}_alt{i}"))?);
            }
            self.emit_rule(&name, &alts.join(" | "));
            self.cache.insert(key, name.clone());
            return Ok(name);
        }
        if let Some(all) = obj.get("allOf").and_then(Value::as_array) {
            if all.len() == 1 {
                let resolved = self.convert_schema(&all[0], hint)?;
                self.cache.insert(key, resolved.clone());
                return Ok(resolved);
            }
            log::warn!("allOf fusion is only implemented for single-element arrays; using the first branch only");
            let resolved = self.convert_schema(&all[0], hint)?;
            self.cache.insert(key, resolved.clone());
            return Ok(resolved);
        }

        warn_on_unsupported_keywords(obj);

        let ty = obj.get("type").and_then(Value::as_str);
        let name = self.fresh_name(hint);
        let body = match ty {
            Some("null") => "\"null\"".to_string(),
            Some("boolean") => "\"true\" | \"false\"".to_string(),
            Some("integer") | Some("number") => self.convert_number(obj)?,
            Some("string") => self.convert_string(obj)?,
            Some("array") => self.convert_array(obj, &name)?,
            Some("object") | None => self.convert_object(obj, &name)?,
            Some(other) => {
                log::warn!("unrecognised JSON-Schema type '{other}', treating as an unconstrained value");
                return Ok(self.builtin_any_json());
            }
        };
        self.emit_rule(&name, &body);
        self.cache.insert(key, name.clone());
        Ok(name)
    }

    fn resolve_ref(&mut self, _schema: &Value, pointer: &str) -> Result<String, JsonSchemaError> {
        let def_name = if let Some(rest) = pointer.strip_prefix("#/$defs/") {
            rest
        } else if let Some(rest) = pointer.strip_prefix("#/definitions/") {
            rest
        } else {
            return Err(JsonSchemaError::UnsupportedRefForm(pointer.to_string()));
        };
        if let Some(name) = self.def_rule_names.get(def_name) {
            return Ok(name.clone());
        }
        let def_schema = self
            .root
            .get("$defs")
            .or_else(|| self.root.get("definitions"))
            .and_then(|defs| defs.get(def_name))
            .cloned()
            .ok_or_else(|| JsonSchemaError::UnknownRef(pointer.to_string()))?;
        let rule_name = self.fresh_name(def_name);
        self.def_rule_names.insert(def_name.to_string(), rule_name.clone());
        if !self.in_progress.insert(def_name.to_string()) {
            return Ok(rule_name);
        }
        let resolved = self.convert_schema(&def_schema, &rule_name)?;
        if resolved != rule_name {
            self.emit_rule(&rule_name, &resolved);
        }
        self.in_progress.remove(def_name);
        Ok(rule_name)
    }

    fn convert_number(&mut self, obj: &serde_json::Map<String, Value>) -> Result<String, JsonSchemaError> {
        if obj.contains_key("minimum")
            || obj.contains_key("maximum")
            || obj.contains_key("exclusiveMinimum")
            || obj.contains_key("exclusiveMaximum")
        {
            log::warn!("numeric minimum/maximum bounds are accepted but not enforced exactly by the generated grammar");
        }
        Ok(self.builtin_json_number())
    }

    fn convert_string(&mut self, obj: &serde_json::Map<String, Value>) -> Result<String, JsonSchemaError> {
        if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
            let body = regex_lite::translate(pattern)?;
            return Ok(format!("\"\\\"\" {body} \"\\\"\""));
        }
        let min_len = obj.get("minLength").and_then(Value::as_u64).unwrap_or(0);
        let max_len = obj.get("maxLength").and_then(Value::as_u64);
        let char_rule = self.builtin_json_string_char();
        let repeat = repetition_suffix(min_len, max_len);
        Ok(format!("\"\\\"\" {char_rule}{repeat} \"\\\"\""))
    }

    fn builtin_json_string_char(&mut self) -> String {
        let _ = self.builtin_json_string();
        self.builtin_string_char.clone().expect("set by builtin_json_string")
    }

    fn convert_array(&mut self, obj: &serde_json::Map<String, Value>, hint: &str) -> Result<String, JsonSchemaError> {
        self.ensure_ws_rule();
        let depth = self.depth;
        let ws = self.ws_ref().to_string();
        let prefix_items: Vec<String> = match obj.get("prefixItems").and_then(Value::as_array) {
            Some(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.convert_schema(item, &format!("{hint}_item{i}"))?);
                }
                out
            }
            None => Vec::new(),
        };
        let items_schema = obj.get("items").filter(|v| !matches!(v, Value::Bool(false)));
        let rest_rule = match items_schema {
            Some(item_schema) => Some(self.convert_schema(item_schema, &format!("{hint}_item"))?),
            None => None,
        };
        let min_items = obj.get("minItems").and_then(Value::as_u64).unwrap_or(0);
        let max_items = obj.get("maxItems").and_then(Value::as_u64);
        let comma = self.comma_sep(depth + 1);
        let mut elements: Vec<String> = prefix_items.clone();
        if let Some(rest) = &rest_rule {
            let extra_min = min_items.saturating_sub(prefix_items.len() as u64);
            let extra_max = max_items.map(|m| m.saturating_sub(prefix_items.len() as u64));
            let repeat = repetition_suffix(extra_min, extra_max);
            if !repeat.is_empty() || extra_min > 0 {
                elements.push(format!("({rest}){repeat}"));
            } else {
                elements.push(format!("({rest})*"));
            }
        }
        let joined = elements.join(&format!(" {comma} {ws} "));
        let open = format!("\"[\" {ws}{}", self.indent_str(depth + 1));
        let close = format!("{ws}{} \"]\"", self.indent_str(depth));
        if joined.is_empty() {
            Ok(format!("{open} {close}"))
        } else {
            Ok(format!("{open} ({joined}) {close}"))
        }
    }

    fn convert_object(&mut self, obj: &serde_json::Map<String, Value>, hint: &str) -> Result<String, JsonSchemaError> {
        self.ensure_ws_rule();
        let depth = self.depth;
        let ws = self.ws_ref().to_string();
        let properties = obj.get("properties").and_then(Value::as_object);
        let required: Vec<&str> =
            obj.get("required").and_then(Value::as_array).into_iter().flatten().filter_map(Value::as_str).collect();
        // Non-strict: additional properties are allowed unless explicitly
        // forbidden. Strict: forbidden unless explicitly allowed (matching
        // `unevaluatedProperties`'s closed-by-default posture in strict mode).
        let additional_allowed = if self.options.strict_mode {
            matches!(obj.get("additionalProperties"), Some(v) if !matches!(v, Value::Bool(false)))
        } else {
            !matches!(obj.get("additionalProperties"), Some(Value::Bool(false)))
        };
        let colon = match self.options.whitespace {
            WhitespacePolicy::Any => format!("\":\" {ws}"),
            WhitespacePolicy::Indent(_) => "\": \"".to_string(),
        };
        let comma = self.comma_sep(depth + 1);
        let mut entries = Vec::new();
        if let Some(properties) = properties {
            for (name, prop_schema) in properties {
                let value_rule = self.convert_schema(prop_schema, &format!("{hint}_{name}"))?;
                let key_literal = quote_json_literal(&Value::String(name.clone()).to_string());
                let entry = format!("{key_literal} {colon} {value_rule}");
                if required.contains(&name.as_str()) {
                    entries.push((true, entry));
                } else {
                    entries.push((false, entry));
                }
            }
        }
        if additional_allowed {
            let any_value = self.builtin_any_json();
            let key_rule = self.builtin_json_string();
            entries.push((false, format!("{key_rule} {colon} {any_value}")));
        }
        let body = assemble_optional_entries(&entries, &comma, &ws);
        let open = format!("\"{{\" {ws}{}", self.indent_str(depth + 1));
        let close = format!("{ws}{} \"}}\"", self.indent_str(depth));
        if body.is_empty() {
            Ok(format!("{open} {close}"))
        } else {
            Ok(format!("{open} ({body}) {close}"))
        }
    }
}

/// Emits the EBNF for a fixed sequence of object-entry elements where each
/// non-required entry may be skipped (but entries are still emitted in
/// schema-declaration order — no permutation).
fn assemble_optional_entries(entries: &[(bool, String)], comma: &str, ws: &str) -> String {
    if entries.is_empty() {
        return String::new();
    }
    // Build right-to-left: each optional entry can be "present, plus
    // whatever follows" or "absent, skip straight to the first required
    // entry after it or empty".
    let mut tail = String::new();
    for (i, (required, entry)) in entries.iter().enumerate().rev() {
        let rest_required_from_here = entries[i + 1..].iter().any(|(r, _)| *r);
        let continuation = if tail.is_empty() { String::new() } else { format!(" {comma} {ws} {tail}") };
        if *required {
            tail = format!("{entry}{continuation}");
        } else if rest_required_from_here {
            // Can't skip: something later is mandatory, so this entry must
            // also decide whether to precede it.
            tail = format!("({entry}{continuation} | {})", tail);
        } else {
            tail = format!("\"\" | {entry}{continuation}");
        }
    }
    tail
}

fn repetition_suffix(min: u64, max: Option<u64>) -> String {
    match (min, max) {
        (0, None) => String::new(),
        (0, Some(m)) => format!("{{0,{m}}}"),
        (n, None) => format!("{{{n},}}"),
        (n, Some(m)) => format!("{{{n},{m}}}"),
    }
}

fn quote_json_literal(json_text: &str) -> String {
    let mut out = String::with_capacity(json_text.len() + 2);
    out.push('"');
    for c in json_text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn warn_on_unsupported_keywords(obj: &serde_json::Map<String, Value>) {
    const RECOGNISED: &[&str] = &[
        "type",
        "properties",
        "required",
        "additionalProperties",
        "unevaluatedProperties",
        "patternProperties",
        "propertyNames",
        "items",
        "prefixItems",
        "unevaluatedItems",
        "enum",
        "const",
        "anyOf",
        "oneOf",
        "allOf",
        "$ref",
        "pattern",
        "minimum",
        "maximum",
        "exclusiveMinimum",
        "exclusiveMaximum",
        "minLength",
        "maxLength",
        "minItems",
        "maxItems",
        "minProperties",
        "maxProperties",
        "$defs",
        "definitions",
        "title",
        "description",
        "default",
        "examples",
    ];
    for key in obj.keys() {
        if !RECOGNISED.contains(&key.as_str()) {
            log::warn!("JSON-Schema keyword '{key}' is not recognised and will be ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;
    use serde_json::json;

    fn convert_and_parse(schema: &Value, options: &JsonSchemaOptions) -> crate::ir::Grammar {
        let (source, root) = convert(schema, options).unwrap();
        parse_ebnf(&source, &root).unwrap_or_else(|e| panic!("generated EBNF failed to parse: {e}\n{source}"))
    }

    #[test]
    fn empty_schema_accepts_any_value() {
        let schema = json!({});
        let g = convert_and_parse(&schema, &JsonSchemaOptions::default());
        assert!(g.num_rules() > 0);
    }

    #[test]
    fn object_with_required_and_optional_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}},
            "required": ["name"],
            "additionalProperties": false,
        });
        convert_and_parse(&schema, &JsonSchemaOptions::default());
    }

    #[test]
    fn array_with_item_bounds() {
        let schema = json!({"type": "array", "items": {"type": "integer"}, "minItems": 1, "maxItems": 3});
        convert_and_parse(&schema, &JsonSchemaOptions::default());
    }

    #[test]
    fn enum_and_const_become_literal_alternatives() {
        let schema = json!({"enum": ["red", "green", "blue"]});
        let (source, root) = convert(&schema, &JsonSchemaOptions::default()).unwrap();
        assert!(source.contains("\\\"red\\\""));
        let g = parse_ebnf(&source, &root).unwrap();
        assert!(g.num_rules() > 0);
    }

    #[test]
    fn ref_to_defs_resolves() {
        let schema = json!({
            "$defs": {"point": {"type": "object", "properties": {"x": {"type": "integer"}}, "required": ["x"]}},
            "type": "array",
            "items": {"$ref": "#/$defs/point"},
        });
        convert_and_parse(&schema, &JsonSchemaOptions::default());
    }

    #[test]
    fn pattern_keyword_uses_regex_lite() {
        let schema = json!({"type": "string", "pattern": "[a-z]+"});
        convert_and_parse(&schema, &JsonSchemaOptions::default());
    }

    #[test]
    fn strict_mode_rejects_additional_properties_by_default() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "boolean"}}, "required": ["a"]});
        let options = JsonSchemaOptions { strict_mode: true, ..JsonSchemaOptions::default() };
        convert_and_parse(&schema, &options);
    }

    #[test]
    fn any_of_produces_an_alternation() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "null"}]});
        convert_and_parse(&schema, &JsonSchemaOptions::default());
    }

    #[test]
    fn xml_tool_call_wraps_properties_in_parameter_tags() {
        let schema = json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"],
        });
        let (source, root) = convert_xml_tool_call(&schema, &JsonSchemaOptions::default()).unwrap();
        assert!(source.contains("<parameter=city>"));
        parse_ebnf(&source, &root).unwrap();
    }
}
