//! This module contains the [`Vocabulary`] and [`TokenizerInfo`] types that
//! describe a language model's tokenizer to the rest of the crate.
//! `TokenizerInfo` is decoding-scheme aware, since a raw token byte string is
//! not always the text a model actually emits (GPT-2-style byte-level
//! tokenizers remap bytes to printable codepoints; SentencePiece
//! byte-fallback tokenizers spell individual bytes as `<0xAB>` pseudo-tokens).
use ahash::AHashMap;
use fixedbitset_stack::FixedBitSet;
use serde::{Deserialize, Serialize};
use std::array;
use std::collections::hash_map::Entry;
use std::fmt::Debug;

use crate::utils;
use crate::utils::ByteSet;

const BYTES_NUM: usize = 257; // 256 byte values plus one slot for the "no first byte" case.

/// A wrapper struct that represents a token in bytes in a language model's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[repr(transparent)]
pub struct Token(pub Box<[u8]>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FirstBytes([u32; BYTES_NUM]);
impl tinyvec::Array for FirstBytes {
    type Item = u32;
    const CAPACITY: usize = BYTES_NUM;

    fn as_slice(&self) -> &[Self::Item] {
        &self.0
    }

    fn as_slice_mut(&mut self) -> &mut [Self::Item] {
        &mut self.0
    }

    fn default() -> Self {
        Self([0; BYTES_NUM])
    }
}

/// The struct represents a language model's vocabulary: the raw byte
/// contents of every token, independent of how those bytes were encoded by
/// the tokenizer (see [`TokenizerInfo`] for that layer).
#[derive(Clone)]
pub struct Vocabulary {
    pub(crate) token_to_id: AHashMap<Token, u32>,
    pub(crate) id_to_token: AHashMap<u32, Token>,
    pub(crate) id_to_token_string: AHashMap<u32, String>,
    pub(crate) first_byte_to_token_ids: Vec<FixedBitSet>,
}

impl Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("token_to_id", &self.token_to_id)
            .field("id_to_token", &self.id_to_token)
            .field("id_to_token_string", &self.id_to_token_string)
            .field("first_byte_to_token_ids", &self.first_byte_to_token_ids)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
/// The error type for [`Vocabulary`] creation.
pub enum CreateVocabularyError {
    /// The vocabulary size exceeds the maximum supported size.
    #[error("The vocabulary size is {0}, while the maximum supported is {1}.")]
    VocabularyTooLarge(usize, usize),
}

impl Vocabulary {
    /// Creates a new instance of [`Vocabulary`].
    ///
    /// * `id_to_token` - A map from token IDs to tokens.
    /// * `id_to_token_string` - A map from token IDs to tokens in UTF-8 String representation.
    ///   This parameter is necessary because a token's UTF-8 representation may not be equivalent
    ///   to the UTF-8 string decoded from its bytes, e.g. a token may contain a `0xFF` byte.
    pub fn new(
        id_to_token: AHashMap<u32, Token>,
        id_to_token_string: AHashMap<u32, String>,
    ) -> Result<Vocabulary, CreateVocabularyError> {
        if id_to_token.len() >= 0x1000000 {
            return Err(CreateVocabularyError::VocabularyTooLarge(id_to_token.len(), 0x1000000));
        }
        let mut token_to_id = AHashMap::with_capacity(id_to_token.len());
        for (&token_id, token) in id_to_token.iter() {
            match token_to_id.entry(token.clone()) {
                Entry::Occupied(entry) => {
                    log::warn!(
                        "token id {} and token id {} map to the same token bytes; the second id is ignored when matching tokens to ids",
                        entry.get(),
                        token_id
                    );
                }
                Entry::Vacant(entry) => {
                    entry.insert(token_id);
                }
            }
        }
        let mut first_bytes_to_token_ids = Vec::new();
        let mut temp: [Vec<(u32, &Token)>; 256] = array::from_fn(|_| vec![]);
        for (&token_id, token) in id_to_token.iter() {
            if token.0.is_empty() {
                log::warn!("token id {token_id} corresponds to an empty token and will be ignored");
                continue;
            }
            let first_byte = token.0[0];
            temp[first_byte as usize].push((token_id, token));
        }
        let vocab_size = id_to_token.keys().copied().max().map(|x| x + 1).unwrap_or(0) as usize;
        for tokens in temp {
            let mut set = FixedBitSet::with_capacity(vocab_size);
            for (token_id, _token) in tokens {
                set.insert(token_id as usize);
            }
            first_bytes_to_token_ids.push(set);
        }
        Self::check_vocabulary_utf8_support(&token_to_id);
        Ok(Self { token_to_id, id_to_token, id_to_token_string, first_byte_to_token_ids: first_bytes_to_token_ids })
    }

    fn check_vocabulary_utf8_support(token_to_id: &AHashMap<Token, u32>) {
        let mut not_existing_bytes = ByteSet::with_capacity(256);
        for byte in 0u8..=247 {
            let found = token_to_id.keys().any(|token| token.0.contains(&byte));
            if !found {
                not_existing_bytes.insert(byte as usize);
            }
        }
        if !not_existing_bytes.is_clear() {
            log::warn!(
                "the following bytes are not present in any token: {:?}; this may indicate the tokenizer is not UTF-8 compatible",
                utils::get_display_form_from_bitset_on_stack(&not_existing_bytes)
            );
        }
    }

    pub fn token(&self, token_id: u32) -> Option<&Token> {
        self.id_to_token.get(&token_id)
    }

    pub fn token_string(&self, token_id: u32) -> Option<&str> {
        self.id_to_token_string.get(&token_id).map(|x| x.as_str())
    }

    pub fn token_id(&self, token: &Token) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_token.keys().copied().max().map(|x| x + 1).unwrap_or(0) as usize
    }

    pub(crate) fn first_byte_token_ids(&self, byte: u8) -> Option<&FixedBitSet> {
        self.first_byte_to_token_ids.get(byte as usize)
    }
}

/// How a tokenizer encodes raw bytes into the strings it exposes as tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum VocabType {
    /// The token string already is the raw byte sequence (most non-English
    /// SentencePiece models, most BPE models over raw bytes).
    Raw,
    /// Bytes outside the token's literal alphabet are spelled as a
    /// `<0xAB>`-style pseudo-token.
    ByteFallback,
    /// Every byte is remapped through a fixed byte-to-unicode-codepoint
    /// table (GPT-2/RoBERTa-style byte-level BPE).
    ByteLevel,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateTokenizerInfoError {
    #[error(transparent)]
    Vocabulary(#[from] CreateVocabularyError),
    #[error("byte-fallback pseudo-token '{0}' is not of the form <0xAB>")]
    MalformedByteFallbackToken(String),
}

/// A tokenizer's vocabulary plus the decoding metadata needed to turn raw
/// token bytes into the text the model actually emits, and back.
#[derive(Debug, Clone)]
pub struct TokenizerInfo {
    pub(crate) vocab: Vocabulary,
    pub(crate) decoded_vocab: AHashMap<u32, Vec<u8>>,
    pub vocab_type: VocabType,
    pub vocab_size: usize,
    pub stop_token_ids: Vec<u32>,
    pub special_token_ids: Vec<u32>,
    pub add_prefix_space: bool,
}

/// Metadata describing a tokenizer, independent of the token table itself;
/// serializable so a compiled grammar's persisted form can validate it
/// still matches the tokenizer it was compiled against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerMetadata {
    pub vocab_type: String,
    pub vocab_size: usize,
    pub add_prefix_space: bool,
}

impl TokenizerInfo {
    pub fn new(
        id_to_token: AHashMap<u32, Token>,
        id_to_token_string: AHashMap<u32, String>,
        vocab_type: VocabType,
        vocab_size: Option<usize>,
        stop_token_ids: Vec<u32>,
        special_token_ids: Vec<u32>,
        add_prefix_space: bool,
    ) -> Result<Self, CreateTokenizerInfoError> {
        let vocab = Vocabulary::new(id_to_token, id_to_token_string)?;
        let decoded_vocab = decode_vocab(&vocab, vocab_type)?;
        let vocab_size = vocab_size.unwrap_or_else(|| vocab.vocab_size());
        Ok(Self { vocab, decoded_vocab, vocab_type, vocab_size, stop_token_ids, special_token_ids, add_prefix_space })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The token's bytes as they actually appear in the model's output text,
    /// after undoing byte-fallback/byte-level remapping.
    pub fn decoded_token(&self, token_id: u32) -> Option<&[u8]> {
        self.decoded_vocab.get(&token_id).map(|v| v.as_slice())
    }

    pub fn metadata(&self) -> TokenizerMetadata {
        TokenizerMetadata {
            vocab_type: self.vocab_type.to_string(),
            vocab_size: self.vocab_size,
            add_prefix_space: self.add_prefix_space,
        }
    }

    /// All decoded token byte strings in id order, used to seed the token
    /// trie the matcher and mask cache walk byte-by-byte.
    pub fn sorted_decoded_vocab(&self) -> Vec<(u32, &[u8])> {
        let mut out: Vec<(u32, &[u8])> =
            self.decoded_vocab.iter().map(|(&id, bytes)| (id, bytes.as_slice())).collect();
        out.sort_by(|a, b| a.1.cmp(b.1));
        out
    }
}

fn decode_vocab(vocab: &Vocabulary, vocab_type: VocabType) -> Result<AHashMap<u32, Vec<u8>>, CreateTokenizerInfoError> {
    let mut out = AHashMap::with_capacity(vocab.id_to_token.len());
    match vocab_type {
        VocabType::Raw => {
            for (&id, token) in &vocab.id_to_token {
                out.insert(id, token.0.to_vec());
            }
        }
        VocabType::ByteLevel => {
            let table = byte_level_table();
            for (&id, token) in &vocab.id_to_token {
                let s = vocab.id_to_token_string.get(&id).map(|s| s.as_str()).unwrap_or_default();
                let mut bytes = Vec::with_capacity(s.chars().count());
                for ch in s.chars() {
                    match table.iter().position(|&c| c == ch) {
                        Some(b) => bytes.push(b as u8),
                        None => bytes.extend(ch.to_string().into_bytes()),
                    }
                }
                out.insert(id, if bytes.is_empty() { token.0.to_vec() } else { bytes });
            }
        }
        VocabType::ByteFallback => {
            for (&id, token) in &vocab.id_to_token {
                let s = vocab.id_to_token_string.get(&id).map(|s| s.as_str()).unwrap_or_default();
                if let Some(byte) = parse_byte_fallback_token(s) {
                    out.insert(id, vec![byte]);
                } else {
                    out.insert(id, token.0.to_vec());
                }
            }
        }
    }
    Ok(out)
}

fn parse_byte_fallback_token(s: &str) -> Option<u8> {
    let inner = s.strip_prefix("<0x")?.strip_suffix('>')?;
    u8::from_str_radix(inner, 16).ok()
}

/// The GPT-2 byte-to-unicode table: printable codepoints standing in for
/// bytes 0..=255, reproduced from the canonical `bytes_to_unicode` mapping
/// used by byte-level BPE tokenizers.
fn byte_level_table() -> [char; 256] {
    let mut bs: Vec<u32> = (b'!' as u32..=b'~' as u32)
        .chain(0xA1u32..=0xACu32)
        .chain(0xAEu32..=0xFFu32)
        .collect();
    let mut cs: Vec<u32> = bs.clone();
    let mut n = 0u32;
    for b in 0u32..256 {
        if !bs.contains(&b) {
            bs.push(b);
            cs.push(256 + n);
            n += 1;
        }
    }
    let mut table = ['\0'; 256];
    for (b, c) in bs.into_iter().zip(cs.into_iter()) {
        table[b as usize] = char::from_u32(c).unwrap_or('\0');
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vocab(strings: &[(u32, &str)]) -> (AHashMap<u32, Token>, AHashMap<u32, String>) {
        let mut tokens = AHashMap::default();
        let mut token_strings = AHashMap::default();
        for &(id, s) in strings {
            tokens.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
            token_strings.insert(id, s.to_string());
        }
        (tokens, token_strings)
    }

    #[test]
    fn raw_vocab_decodes_to_itself() {
        let (tokens, strings) = make_vocab(&[(0, "hello"), (1, "world")]);
        let info = TokenizerInfo::new(tokens, strings, VocabType::Raw, None, vec![], vec![], false).unwrap();
        assert_eq!(info.decoded_token(0), Some("hello".as_bytes()));
    }

    #[test]
    fn byte_fallback_token_decodes_to_one_byte() {
        let (tokens, strings) = make_vocab(&[(0, "<0x0A>")]);
        let info = TokenizerInfo::new(tokens, strings, VocabType::ByteFallback, None, vec![], vec![], false).unwrap();
        assert_eq!(info.decoded_token(0), Some(&b"\n"[..]));
    }

    #[test]
    fn byte_level_table_is_a_bijection() {
        let table = byte_level_table();
        let mut seen = std::collections::HashSet::new();
        for c in table {
            assert!(seen.insert(c), "duplicate char in byte-level table");
        }
    }
}
