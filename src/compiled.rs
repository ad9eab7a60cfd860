//! [`CompiledGrammar`]: the output of [`crate::compiler::GrammarCompiler`],
//! pairing an optimized grammar's compact FSMs with the tokenizer they were
//! compiled against.
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::ir::{Grammar, RuleId};
use crate::optimizer::CompiledRule;
use crate::vocabulary::{TokenizerInfo, TokenizerMetadata};

/// A grammar plus its tokenizer, fully compiled: every rule's IR lowered to
/// a minimized DFA in compact form, ready for the matcher and mask cache.
#[derive(Clone)]
pub struct CompiledGrammar {
    pub(crate) grammar: Arc<Grammar>,
    pub(crate) fsms: Arc<AHashMap<RuleId, CompiledRule>>,
    pub(crate) tokenizer_info: Arc<TokenizerInfo>,
    pub(crate) source: String,
}

impl CompiledGrammar {
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn tokenizer_info(&self) -> &TokenizerInfo {
        &self.tokenizer_info
    }

    pub fn fsm(&self, rule: RuleId) -> &CompiledRule {
        &self.fsms[&rule]
    }

    /// Rough memory footprint in bytes: the compact FSMs' edge tables plus
    /// the IR arena, used by [`crate::cache::EntrySize`] when this grammar is
    /// stored in the compiler's size-bounded cache.
    pub fn memory_size(&self) -> usize {
        let fsm_bytes: usize = self
            .fsms
            .values()
            .map(|r| r.fsm.num_states() as usize * std::mem::size_of::<crate::fsm::Edge>())
            .sum();
        let ir_bytes = self.grammar.exprs.len() * std::mem::size_of::<crate::ir::RuleExpr>();
        fsm_bytes + ir_bytes
    }

    /// A serializable snapshot of this compiled grammar: the EBNF source and
    /// the tokenizer metadata it was compiled against. Recompiling from a
    /// snapshot re-parses the source and re-runs the optimizer rather than
    /// serializing the FSMs themselves, since the FSMs are cheap to rebuild
    /// and not worth the serialization surface.
    pub fn to_persisted(&self) -> PersistedGrammar {
        PersistedGrammar { source: self.source.clone(), tokenizer_metadata: self.tokenizer_info.metadata() }
    }
}

impl crate::cache::EntrySize for CompiledGrammar {
    fn entry_size(&self) -> usize {
        self.memory_size()
    }
}

/// The on-disk form of a [`CompiledGrammar`]. Deserializing
/// alone isn't enough to use it: the tokenizer metadata must first be
/// checked against the tokenizer the caller intends to use it with, via
/// [`crate::compiler::GrammarCompiler::recompile_persisted`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedGrammar {
    pub source: String,
    pub tokenizer_metadata: TokenizerMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenizerMismatchError {
    #[error("persisted grammar was compiled for vocab_type {expected}, current tokenizer has {actual}")]
    VocabType { expected: String, actual: String },
    #[error("persisted grammar was compiled for vocab_size {expected}, current tokenizer has {actual}")]
    VocabSize { expected: usize, actual: usize },
}

impl PersistedGrammar {
    pub fn check_tokenizer_match(&self, tokenizer_info: &TokenizerInfo) -> Result<(), TokenizerMismatchError> {
        let current = tokenizer_info.metadata();
        if current.vocab_type != self.tokenizer_metadata.vocab_type {
            return Err(TokenizerMismatchError::VocabType {
                expected: self.tokenizer_metadata.vocab_type.clone(),
                actual: current.vocab_type,
            });
        }
        if current.vocab_size != self.tokenizer_metadata.vocab_size {
            return Err(TokenizerMismatchError::VocabSize {
                expected: self.tokenizer_metadata.vocab_size,
                actual: current.vocab_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::{Token, VocabType};

    fn make_tokenizer() -> TokenizerInfo {
        let mut tokens = AHashMap::default();
        let mut strings = AHashMap::default();
        tokens.insert(0, Token(b"a".to_vec().into_boxed_slice()));
        strings.insert(0, "a".to_string());
        TokenizerInfo::new(tokens, strings, VocabType::Raw, Some(32000), vec![], vec![], false).unwrap()
    }

    #[test]
    fn matching_metadata_passes() {
        let info = make_tokenizer();
        let persisted = PersistedGrammar { source: "root ::= \"a\"".into(), tokenizer_metadata: info.metadata() };
        assert!(persisted.check_tokenizer_match(&info).is_ok());
    }

    #[test]
    fn vocab_size_mismatch_is_rejected() {
        let info = make_tokenizer();
        let mut metadata = info.metadata();
        metadata.vocab_size += 1;
        let persisted = PersistedGrammar { source: "root ::= \"a\"".into(), tokenizer_metadata: metadata };
        assert!(matches!(persisted.check_tokenizer_match(&info), Err(TokenizerMismatchError::VocabSize { .. })));
    }
}
