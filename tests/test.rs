use std::sync::Arc;

use ahash::AHashMap;
use serde_json::json;

use grammask::{AdaptiveTokenMaskCache, Config, GrammarCompiler, GrammarMatcher, Token, TokenizerInfo, VocabType};

fn tokenizer(strings: &[&str]) -> Arc<TokenizerInfo> {
    let mut id_to_token = AHashMap::default();
    let mut id_to_token_string = AHashMap::default();
    for (id, s) in strings.iter().enumerate() {
        id_to_token.insert(id as u32, Token(s.as_bytes().to_vec().into_boxed_slice()));
        id_to_token_string.insert(id as u32, s.to_string());
    }
    Arc::new(TokenizerInfo::new(id_to_token, id_to_token_string, VocabType::Raw, None, vec![], vec![], false).unwrap())
}

fn token_id(tokenizer: &TokenizerInfo, s: &str) -> u32 {
    tokenizer.vocab().token_id(&Token(s.as_bytes().to_vec().into_boxed_slice())).unwrap()
}

#[test]
fn single_terminal() {
    let tokenizer = tokenizer(&["Hello, World!\n", "b"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"Hello, World!\\n\"\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    assert!(!matcher.accept_token(token_id(&tokenizer, "b")).unwrap(), "unrelated token should be rejected");
    assert!(matcher.accept_token(token_id(&tokenizer, "Hello, World!\n")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn single_regex() {
    let tokenizer = tokenizer(&["Hello", ",", "b"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_regex("Hello,").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    assert!(!matcher.accept_token(token_id(&tokenizer, "b")).unwrap());
    assert!(matcher.accept_token(token_id(&tokenizer, "Hello")).unwrap());
    assert!(matcher.accept_token(token_id(&tokenizer, ",")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn minimal_case_with_accept_bytes() {
    let tokenizer = tokenizer(&["a", "b", "c"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"abc\"\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(Arc::clone(&compiled), None, true, 1).unwrap();

    assert!(matcher.accept_string(b"a").unwrap(), "failed to accept first byte");
    assert!(matcher.accept_string(b"b").unwrap(), "failed to accept second byte");
    assert!(matcher.accept_string(b"c").unwrap(), "failed to accept third byte and finish");
    assert!(matcher.is_terminated());

    let mut matcher = GrammarMatcher::new(compiled, None, true, 1).unwrap();
    assert!(!matcher.accept_string(b"x").unwrap(), "should reject invalid byte");
    matcher.reset().unwrap();
    assert!(matcher.accept_string(b"abc").unwrap(), "should accept all bytes at once");
    assert!(matcher.is_terminated());
}

#[test]
fn left_recursion() {
    let tokenizer = tokenizer(&["bb"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"bb\" | root \"bb\"\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    assert!(matcher.accept_token(token_id(&tokenizer, "bb")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn right_recursion() {
    let tokenizer = tokenizer(&["c", "\n"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled =
        Arc::new(compiler.compile_from_ebnf("root ::= c \"\\n\"\nc ::= \"c\" | \"c\" c\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    for _ in 0..10 {
        assert!(matcher.accept_token(token_id(&tokenizer, "c")).unwrap());
        assert!(!matcher.is_terminated());
    }
    assert!(matcher.accept_token(token_id(&tokenizer, "\n")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn middle_recursion() {
    let tokenizer = tokenizer(&["{", "}"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= (\"{\" root \"}\")?\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    for _ in 0..10 {
        assert!(matcher.accept_token(token_id(&tokenizer, "{")).unwrap());
    }
    for _ in 0..9 {
        assert!(matcher.accept_token(token_id(&tokenizer, "}")).unwrap());
        assert!(!matcher.is_terminated());
    }
    assert!(matcher.accept_token(token_id(&tokenizer, "}")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn always_match_regex_consumes_anything_before_the_terminator() {
    let tokenizer = tokenizer(&["imper", "\n"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= [^\\n]* \"\\n\"\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    for _ in 0..5 {
        assert!(matcher.accept_token(token_id(&tokenizer, "imper")).unwrap());
    }
    assert!(matcher.accept_token(token_id(&tokenizer, "\n")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn rollback_undoes_accepted_tokens() {
    let tokenizer = tokenizer(&["a", "b"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\" \"a\" \"b\"\n", "root").unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 4).unwrap();
    assert!(matcher.accept_token(token_id(&tokenizer, "a")).unwrap());
    assert!(matcher.accept_token(token_id(&tokenizer, "a")).unwrap());
    matcher.rollback(1).unwrap();
    assert!(!matcher.accept_token(token_id(&tokenizer, "b")).unwrap(), "rollback should have undone the second 'a'");
    assert!(matcher.accept_token(token_id(&tokenizer, "a")).unwrap());
    assert!(matcher.accept_token(token_id(&tokenizer, "b")).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn fill_next_token_bitmask_reports_only_legal_tokens() {
    let tokenizer = tokenizer(&["a", "b"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\" \"b\"\n", "root").unwrap());
    let matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    let cache = AdaptiveTokenMaskCache::new(None);
    let mut mask = [0u32; 1];
    matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
    assert_eq!(mask[0] & 0b11, 0b01);
}

#[test]
fn json_schema_grammar_accepts_a_matching_document() {
    let tokenizer = tokenizer(&["{", "\"n\"", ":", "1", "}", " "]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let schema = json!({
        "type": "object",
        "properties": {"n": {"type": "integer"}},
        "required": ["n"],
        "additionalProperties": false,
    });
    let compiled = Arc::new(compiler.compile_from_json_schema(&schema, &Default::default()).unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    assert!(matcher.accept_string(b"{\"n\":1}").unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn structural_tag_dispatches_into_a_tag_body() {
    let tokenizer = tokenizer(&["before", "<tool>", "x", "</tool>"]);
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
    let spec = json!({
        "type": "structural_tag",
        "format": {
            "type": "sequence",
            "elements": [
                {"type": "wildcard_text"},
                {"type": "tag", "begin": "<tool>", "content": {"type": "wildcard_text"}, "end": "</tool>"},
            ],
        },
    });
    let compiled = Arc::new(compiler.compile_from_structural_tag(&spec).unwrap());
    let mut matcher = GrammarMatcher::new(compiled, None, true, 0).unwrap();
    assert!(matcher.accept_string(b"before<tool>x</tool>").unwrap());
    assert!(matcher.is_terminated());
}
