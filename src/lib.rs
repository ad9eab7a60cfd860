/*!
# grammask

This crate constrains large language model decoding to match a formal
grammar. A grammar is compiled once against a fixed tokenizer, then used to
mask invalid tokens out of a model's logits at every decoding step so that
only grammar-legal continuations can ever be produced.

Grammars can come from context-free EBNF source, a JSON-Schema document
(either the standard JSON serialization or an XML-tool-call layout), a
regular expression, a structural-tag specification mixing free text with
embedded schemas, or be assembled programmatically from smaller grammars
with [`Grammar::union`]/[`Grammar::concat`]/[`Grammar::star`].

```
use std::sync::Arc;

use ahash::AHashMap;
use grammask::{AdaptiveTokenMaskCache, Config, GrammarCompiler, GrammarMatcher, Token, TokenizerInfo, VocabType};

let mut id_to_token = AHashMap::default();
let mut id_to_string = AHashMap::default();
for (id, s) in [(0u32, "a"), (1, "b")] {
    id_to_token.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
    id_to_string.insert(id, s.to_string());
}
let tokenizer =
    Arc::new(TokenizerInfo::new(id_to_token, id_to_string, VocabType::Raw, None, vec![], vec![], false).unwrap());

let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
let compiled = compiler.compile_from_ebnf("root ::= \"a\" \"b\"\n", "root").unwrap();

let matcher = GrammarMatcher::new(Arc::new(compiled), None, true, 0).unwrap();
let mask_cache = AdaptiveTokenMaskCache::new(None);
let mut mask = [0u32; 1];
matcher.fill_next_token_bitmask(&mask_cache, &mut mask).unwrap();
assert_eq!(mask[0] & 0b11, 0b01); // "a" is legal first, "b" is not
```

# Overview

- [`Grammar`] (see [`grammar`]): the compile-time grammar IR and its
  `from_ebnf`/`from_json_schema`/`from_regex`/`from_structural_tag`
  constructors plus `union`/`concat`/`star`/`plus`/`optional` combinators.
- [`GrammarCompiler`] (see [`compiler`]): turns a [`Grammar`] (or its source
  forms) into a [`compiled::CompiledGrammar`] against a fixed
  [`TokenizerInfo`], caching compiled results by source text.
- [`GrammarMatcher`] (see [`matcher`]): the per-generation driver —
  `accept_token`/`accept_string` advance it, `fill_next_token_bitmask`
  computes which vocabulary tokens are currently legal, `rollback` undoes
  accepted tokens for speculative decoding and beam search.
- [`TokenizerInfo`]/[`Token`]/[`vocabulary::Vocabulary`] (see [`vocabulary`]):
  the tokenizer-facing types a compiler and matcher are built against.

# Grammar text format

Grammar source is EBNF-flavored: rule definitions (`name ::= ...`), string
and byte-string literals, character classes (`[a-z]`, `[^\n]`), grouping
`(...)`, alternation `|`, the quantifiers `*`, `+`, `?` and `{n,m}`, and the
`TagDispatch(("trigger", rule), ...)` macro for structural generation
(jumping into a sub-grammar only once a trigger string has been produced,
used to let a model emit free text until it decides to start a structured
value). See [`ebnf`] for the exact grammar.

# Performance

Grammar structure dominates matching cost asymptotically — heavily ambiguous
grammars push more of the recognizer's work onto Earley-style item-set
tracking rather than the cheaper finite-state paths. Preferring `{n,m}`
repetition and character classes over deeply nested alternation keeps most
rules on the fast FSM path; [`GrammarCompiler::compile_from_regex`] compiles
a pattern straight into one finite-state machine with no context-free
overhead at all. Reusing one [`GrammarMatcher`] across a full generation
(rather than rebuilding the recognizer per token) lets a run benefit from
[`compiled::CompiledGrammar`]'s persistent rule FSMs and from the adaptive
token-mask cache (see [`mask_cache`]), which memoizes the bitmask for every
distinct parser state the matcher has already visited.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod compiled;
pub mod compiler;
pub mod config;
pub mod ebnf;
pub mod fsm;
pub mod grammar;
pub mod ir;
pub mod json_schema;
pub mod mask_cache;
pub mod matcher;
pub mod optimizer;
pub mod pool;
pub mod regex_lite;
pub mod structural_tag;
mod utf8;
pub mod utils;
pub mod vocabulary;

pub use compiled::{CompiledGrammar, PersistedGrammar, TokenizerMismatchError};
pub use compiler::{CompileError, GrammarCompiler};
pub use config::Config;
pub use grammar::GrammarBuildError;
pub use ir::Grammar;
pub use json_schema::{JsonSchemaError, JsonSchemaOptions};
pub use mask_cache::AdaptiveTokenMaskCache;
pub use matcher::{GrammarMatcher, MatcherError};
pub use regex_lite::RegexLiteError;
pub use structural_tag::StructuralTagError;
pub use vocabulary::{
    CreateTokenizerInfoError, CreateVocabularyError, Token, TokenizerInfo, TokenizerMetadata, VocabType, Vocabulary,
};
