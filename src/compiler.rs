//! [`GrammarCompiler`]: turns EBNF source or a JSON-Schema document into a
//! [`CompiledGrammar`], running the fixed optimizer pipeline
//! (`optimizer::optimize`) and memoizing the result by source text in a
//! size-bounded cache. Compilation itself is cheap enough on the grammars
//! this crate targets that it is not fanned out across `pool::ThreadPool`
//! per call; the pool is retained for callers that want to compile many
//! grammars concurrently via [`GrammarCompiler::compile_many`].
use std::sync::Arc;

use serde_json::Value;

use crate::cache::SizedCache;
use crate::compiled::{CompiledGrammar, PersistedGrammar};
use crate::ebnf::{self, ParseError};
use crate::ir::Grammar;
use crate::json_schema::{self, JsonSchemaError, JsonSchemaOptions};
use crate::optimizer;
use crate::pool::ThreadPool;
use crate::regex_lite::RegexLiteError;
use crate::structural_tag::StructuralTagError;
use crate::vocabulary::TokenizerInfo;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    JsonSchema(#[from] JsonSchemaError),
    #[error(transparent)]
    Regex(#[from] RegexLiteError),
    #[error(transparent)]
    StructuralTag(#[from] StructuralTagError),
}

/// Compiles grammars against one fixed tokenizer, caching compiled results
/// by `(root_rule_name, source)` up to `config.max_memory_bytes`.
pub struct GrammarCompiler {
    tokenizer: Arc<TokenizerInfo>,
    cache_enabled: bool,
    start_rule_name: String,
    pool: Arc<ThreadPool>,
    cache: SizedCache<String, CompiledGrammar>,
}

impl GrammarCompiler {
    pub fn new(tokenizer: Arc<TokenizerInfo>, config: crate::config::Config) -> Self {
        let internal = config.internal_config();
        let pool = Arc::new(ThreadPool::new(internal.max_threads));
        let cache = SizedCache::new(internal.max_memory_bytes);
        Self { tokenizer, cache_enabled: internal.cache_enabled, start_rule_name: internal.start_rule_name, pool, cache }
    }

    pub fn tokenizer_info(&self) -> &Arc<TokenizerInfo> {
        &self.tokenizer
    }

    /// Compiles EBNF source text, starting derivation from `root_rule_name`.
    pub fn compile_from_ebnf(&self, source: &str, root_rule_name: &str) -> Result<CompiledGrammar, CompileError> {
        self.compile_cached(source, root_rule_name, || self.build_from_ebnf(source, root_rule_name))
    }

    /// Compiles a JSON-Schema document into the standard JSON serialization
    /// grammar.
    pub fn compile_from_json_schema(
        &self,
        schema: &Value,
        options: &JsonSchemaOptions,
    ) -> Result<CompiledGrammar, CompileError> {
        let (source, root) = json_schema::convert(schema, options)?;
        self.compile_from_ebnf(&source, &root)
    }

    /// Compiles a JSON-Schema document into the "XML tool-calling" format
    ///.
    pub fn compile_from_json_schema_xml_tool_call(
        &self,
        schema: &Value,
        options: &JsonSchemaOptions,
    ) -> Result<CompiledGrammar, CompileError> {
        let (source, root) = json_schema::convert_xml_tool_call(schema, options)?;
        self.compile_from_ebnf(&source, &root)
    }

    /// Compiles the schema-less "any JSON value" grammar, used as a fallback
    /// and by tests.
    pub fn compile_builtin_json_grammar(&self) -> Result<CompiledGrammar, CompileError> {
        self.compile_from_json_schema(&Value::Object(Default::default()), &JsonSchemaOptions::default())
    }

    /// Compiles a regular expression as a standalone grammar whose root
    /// matches the whole pattern.
    pub fn compile_from_regex(&self, pattern: &str) -> Result<CompiledGrammar, CompileError> {
        let body = crate::regex_lite::translate(pattern)?;
        let source = format!("root ::= {body}\n");
        self.compile_from_ebnf(&source, "root")
    }

    /// Compiles an already-built [`Grammar`] (e.g. from
    /// `Grammar::union`/`concat`/`star`/a structural tag) directly, skipping
    /// the EBNF-text layer entirely. There is no source text to key a cache
    /// entry on, so results are never memoized and never participate in
    /// [`CompiledGrammar::to_persisted`] round-tripping — callers that need
    /// either should go through `compile_from_ebnf` instead.
    pub fn compile_grammar(&self, grammar: Grammar) -> CompiledGrammar {
        let (optimized, fsms) = optimizer::optimize(grammar);
        CompiledGrammar {
            grammar: Arc::new(optimized),
            fsms: Arc::new(fsms),
            tokenizer_info: Arc::clone(&self.tokenizer),
            source: String::new(),
        }
    }

    /// Converts and compiles a structural-tag JSON specification. Like
    /// [`GrammarCompiler::compile_grammar`], the result is not cached or
    /// persistable, since a structural tag is not EBNF source text.
    pub fn compile_from_structural_tag(&self, spec: &Value) -> Result<CompiledGrammar, CompileError> {
        let grammar = crate::structural_tag::convert(spec)?;
        Ok(self.compile_grammar(grammar))
    }

    /// Re-derives a [`CompiledGrammar`] from its persisted form. Callers
    /// must have already checked [`PersistedGrammar::check_tokenizer_match`]
    /// against the tokenizer this compiler was built with — a mismatch is a
    /// contract violation, not something `recompile_persisted` itself
    /// re-validates.
    pub fn recompile_persisted(&self, persisted: &PersistedGrammar) -> Result<CompiledGrammar, CompileError> {
        self.compile_from_ebnf(&persisted.source, &self.start_rule_name)
    }

    /// Compiles many grammars in parallel, bounded by this compiler's
    /// configured thread count, returning results in input order. Useful
    /// when a caller has several independent grammars to prepare at once
    /// (e.g. one per tool definition) and wants to amortize optimizer work
    /// across cores rather than compiling one at a time.
    pub fn compile_many(&self, sources: &[(String, String)]) -> Vec<Result<CompiledGrammar, CompileError>> {
        let results: Vec<std::sync::Mutex<Option<Result<CompiledGrammar, CompileError>>>> =
            (0..sources.len()).map(|_| std::sync::Mutex::new(None)).collect();
        let max_in_flight = self.pool.num_threads().max(1);
        std::thread::scope(|scope| {
            let in_flight = std::sync::atomic::AtomicUsize::new(0);
            for (i, (source, root)) in sources.iter().enumerate() {
                while in_flight.load(std::sync::atomic::Ordering::Acquire) >= max_in_flight {
                    std::thread::yield_now();
                }
                in_flight.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
                let slot = &results[i];
                let in_flight = &in_flight;
                scope.spawn(move || {
                    let result = self.compile_from_ebnf(source, root);
                    *slot.lock().unwrap() = Some(result);
                    in_flight.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                });
            }
        });
        results.into_iter().map(|m| m.into_inner().unwrap().expect("every slot was filled")).collect()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_memory_size(&self) -> usize {
        self.cache.memory_size()
    }

    fn compile_cached(
        &self,
        source: &str,
        root_rule_name: &str,
        build: impl FnOnce() -> Result<CompiledGrammar, CompileError>,
    ) -> Result<CompiledGrammar, CompileError> {
        if !self.cache_enabled {
            return build();
        }
        let key = format!("{root_rule_name}\u{0}{source}");
        if let Some(hit) = self.cache.get(&key) {
            return Ok((*hit).clone());
        }
        let grammar = build()?;
        let stored = self.cache.get_or_insert_with(key, || grammar.clone());
        Ok((*stored).clone())
    }

    fn build_from_ebnf(&self, source: &str, root_rule_name: &str) -> Result<CompiledGrammar, CompileError> {
        let parsed: Grammar = ebnf::parse_ebnf(source, root_rule_name)?;
        let (optimized, fsms) = optimizer::optimize(parsed);
        Ok(CompiledGrammar {
            grammar: Arc::new(optimized),
            fsms: Arc::new(fsms),
            tokenizer_info: Arc::clone(&self.tokenizer),
            source: source.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::vocabulary::{Token, VocabType};
    use ahash::AHashMap;

    fn tokenizer() -> Arc<TokenizerInfo> {
        let mut id_to_token = AHashMap::default();
        let mut id_to_string = AHashMap::default();
        id_to_token.insert(0, Token(b"a".to_vec().into_boxed_slice()));
        id_to_string.insert(0, "a".to_string());
        Arc::new(TokenizerInfo::new(id_to_token, id_to_string, VocabType::Raw, None, vec![], vec![], false).unwrap())
    }

    #[test]
    fn compiles_a_simple_literal_grammar() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        let compiled = compiler.compile_from_ebnf("root ::= \"a\" \"b\"\n", "root").unwrap();
        assert!(compiled.grammar().num_rules() >= 1);
    }

    #[test]
    fn repeated_compilation_hits_the_cache() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        let source = "root ::= \"a\"\n";
        compiler.compile_from_ebnf(source, "root").unwrap();
        assert_eq!(compiler.cache.len(), 1);
        compiler.compile_from_ebnf(source, "root").unwrap();
        assert_eq!(compiler.cache.len(), 1);
    }

    #[test]
    fn builtin_json_grammar_compiles() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        compiler.compile_builtin_json_grammar().unwrap();
    }

    #[test]
    fn regex_compiles_through_the_same_pipeline() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        compiler.compile_from_regex("[0-9]+").unwrap();
    }

    #[test]
    fn persisted_form_round_trips() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        let compiled = compiler.compile_from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let persisted = compiled.to_persisted();
        assert!(persisted.check_tokenizer_match(compiler.tokenizer_info()).is_ok());
        compiler.recompile_persisted(&persisted).unwrap();
    }

    #[test]
    fn compile_grammar_accepts_an_already_built_ir() {
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        let built = Grammar::from_ebnf("root ::= \"a\"\n", "root").unwrap();
        let compiled = compiler.compile_grammar(built);
        assert!(compiled.grammar().num_rules() >= 1);
        assert_eq!(compiler.cache.len(), 0);
    }

    #[test]
    fn compile_from_structural_tag_compiles_a_literal() {
        use serde_json::json;
        let compiler = GrammarCompiler::new(tokenizer(), Config::default());
        let spec = json!({"type": "structural_tag", "format": {"type": "literal", "value": "a"}});
        compiler.compile_from_structural_tag(&spec).unwrap();
    }
}
