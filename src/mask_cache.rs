//! The adaptive token-mask cache: given a matcher's current
//! stack tops, computes which of the tokenizer's vocabulary ids may legally
//! come next, as a dense bitmask (one `u32` per 32 tokens, bit `i` of word
//! `j` set iff token `32*j+i` is allowed).
//!
//! Results are cached by *structural* position rather than by the matcher's
//! own `Rc<StackElement>` identity: two matchers (or two positions reached
//! by different byte sequences) that land on the same set of `(rule,
//! state)` pairs always accept exactly the same next bytes and tokens, since
//! every byte-level transition only ever consults `(rule, state)` —
//! `StackElement::parent` only matters for what happens *after* a rule
//! completes, and that is already folded into the frontier by
//! `matcher::expand`. This turns the cache key into a content-addressable
//! value, letting the cache be shared across matcher instances that share a
//! [`crate::compiled::CompiledGrammar`].
//!
//! TagDispatch tokens are resolved by the same full per-token walk, gated by
//! the first-byte prefilter, rather than a separate second-slicing bitset
//! for in-progress trie positions — correct, just not asymptotically
//! identical to a scheme that tracks trie progress incrementally.
use std::rc::Rc;
use std::sync::Arc;

use fixedbitset_stack::FixedBitSet;

use crate::cache::{EntrySize, SizedCache};
use crate::compiled::CompiledGrammar;
use crate::matcher::{self, LookaheadProbe, MatcherError, StackElement};

/// The `(rule, state)` frontier of a stack-top set, order- and
/// duplicate-independent, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StackSignature(Vec<(u32, u32)>, bool);

impl StackSignature {
    fn of(tops: &[Rc<StackElement>]) -> Self {
        let mut pairs: Vec<(u32, u32)> =
            tops.iter().filter(|t| !t.is_grammar_end).map(|t| (t.rule.0, t.state)).collect();
        pairs.sort_unstable();
        pairs.dedup();
        let can_end = matcher::can_reach_end(tops);
        StackSignature(pairs, can_end)
    }
}

/// One of four storage forms, chosen per-entry by whichever pair
/// (accepted/rejected, list/bitset) is smallest.
enum MaskStorage {
    AcceptedList(Vec<u32>),
    RejectedList(Vec<u32>),
    AcceptedBitset(FixedBitSet),
    RejectedBitset(FixedBitSet),
}

/// A precomputed mask plus the subset of its accepted tokens whose
/// acceptance was only provisional: their last byte landed on a lookahead
/// assertion that hadn't yet resolved to an accept or a dead end, so whether
/// they're truly legal here depends on bytes this token didn't contain.
/// Stored separately from `storage` so the online query can re-probe just
/// this (small) subset rather than the whole vocabulary — `uncertain` is
/// always a subset of whatever `storage` currently marks accepted.
struct CachedMask {
    storage: MaskStorage,
    vocab_size: usize,
    uncertain: Vec<u32>,
}

impl EntrySize for CachedMask {
    fn entry_size(&self) -> usize {
        let list_bytes = |v: &Vec<u32>| v.len() * std::mem::size_of::<u32>();
        let base = match &self.storage {
            MaskStorage::AcceptedList(v) | MaskStorage::RejectedList(v) => list_bytes(v),
            MaskStorage::AcceptedBitset(_) | MaskStorage::RejectedBitset(_) => self.vocab_size.div_ceil(8),
        };
        base + list_bytes(&self.uncertain)
    }
}

impl CachedMask {
    fn write_into(&self, mask_out: &mut [u32]) {
        match &self.storage {
            MaskStorage::AcceptedList(ids) => {
                mask_out.fill(0);
                for &id in ids {
                    set_bit(mask_out, id);
                }
            }
            MaskStorage::RejectedList(ids) => {
                fill_all_ones(mask_out, self.vocab_size);
                for &id in ids {
                    clear_bit(mask_out, id);
                }
            }
            MaskStorage::AcceptedBitset(bits) => {
                mask_out.fill(0);
                for id in bits.ones() {
                    set_bit(mask_out, id as u32);
                }
            }
            MaskStorage::RejectedBitset(bits) => {
                fill_all_ones(mask_out, self.vocab_size);
                for id in bits.ones() {
                    clear_bit(mask_out, id as u32);
                }
            }
        }
    }
}

fn set_bit(mask_out: &mut [u32], id: u32) {
    let word = (id / 32) as usize;
    if word < mask_out.len() {
        mask_out[word] |= 1 << (id % 32);
    }
}

fn clear_bit(mask_out: &mut [u32], id: u32) {
    let word = (id / 32) as usize;
    if word < mask_out.len() {
        mask_out[word] &= !(1 << (id % 32));
    }
}

fn fill_all_ones(mask_out: &mut [u32], vocab_size: usize) {
    mask_out.fill(u32::MAX);
    let used_words = vocab_size.div_ceil(32);
    if used_words == 0 {
        mask_out.fill(0);
        return;
    }
    let remainder = vocab_size % 32;
    if remainder != 0 && used_words <= mask_out.len() {
        mask_out[used_words - 1] &= (1u32 << remainder) - 1;
    }
    for word in mask_out.iter_mut().skip(used_words) {
        *word = 0;
    }
}

/// Token ids accepted/rejected for a given stack-top signature, memoized in
/// a byte-budgeted LRU.
pub struct AdaptiveTokenMaskCache {
    cache: SizedCache<StackSignature, CachedMask>,
}

impl AdaptiveTokenMaskCache {
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self { cache: SizedCache::new(max_bytes) }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn memory_size(&self) -> usize {
        self.cache.memory_size()
    }

    pub(crate) fn fill_bitmask(
        &self,
        compiled: &Arc<CompiledGrammar>,
        tops: &[Rc<StackElement>],
        stop_token_ids: &[u32],
        recursion_limit: u32,
        mask_out: &mut [u32],
    ) -> Result<(), MatcherError> {
        let key = StackSignature::of(tops);
        let mut compute_err: Option<MatcherError> = None;
        let entry = self.cache.get_or_insert_with(key, || {
            match precompute_mask(compiled, tops, stop_token_ids, recursion_limit) {
                Ok(mask) => mask,
                Err(e) => {
                    compute_err = Some(e);
                    CachedMask { storage: MaskStorage::RejectedList(Vec::new()), vocab_size: 0, uncertain: Vec::new() }
                }
            }
        });
        if let Some(e) = compute_err {
            return Err(e);
        }
        entry.write_into(mask_out);
        resolve_uncertain(compiled, tops, entry, recursion_limit, mask_out)?;
        Ok(())
    }
}

/// Re-probes each token this signature's precompute left `uncertain`
/// against the live stack tops, clearing its bit if a fuller walk now proves
/// it dead. Tokens still unresolved keep the optimistic "accepted" bit
/// `write_into` already set, per the rule that an unresolved token counts as
/// accepted rather than rejected.
fn resolve_uncertain(
    compiled: &CompiledGrammar,
    tops: &[Rc<StackElement>],
    entry: &CachedMask,
    recursion_limit: u32,
    mask_out: &mut [u32],
) -> Result<(), MatcherError> {
    for &token_id in &entry.uncertain {
        let Some(bytes) = compiled.tokenizer_info().decoded_token(token_id) else { continue };
        if classify_token(compiled, tops, bytes, recursion_limit)? == TokenVerdict::Rejected {
            clear_bit(mask_out, token_id);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenVerdict {
    Accepted,
    Rejected,
    /// Fully consumed without rejection, but a lookahead assertion this
    /// token's own bytes couldn't resolve is the only reason it wasn't
    /// rejected outright.
    Uncertain,
}

/// Walks `bytes` one byte at a time starting from `cur`, short-circuiting to
/// `Accepted` the moment some live top's exact lookahead is fully satisfied
/// by the remaining bytes. If a normal transition fails, the verdict is
/// `Uncertain` rather than `Rejected` when a pending (not yet resolved, not
/// dead) lookahead was the reason that byte didn't have anywhere else to go.
fn classify_token(
    compiled: &CompiledGrammar,
    cur: &[Rc<StackElement>],
    bytes: &[u8],
    recursion_limit: u32,
) -> Result<TokenVerdict, MatcherError> {
    let mut cur = cur.to_vec();
    for i in 0..bytes.len() {
        match lookahead_status(compiled, &cur, &bytes[i..]) {
            LookaheadProbe::Satisfied => return Ok(TokenVerdict::Accepted),
            status => match matcher::advance_byte(compiled, &cur, bytes[i], recursion_limit)? {
                Some(next) => cur = next,
                None => {
                    let verdict = if status == LookaheadProbe::Pending { TokenVerdict::Uncertain } else { TokenVerdict::Rejected };
                    return Ok(verdict);
                }
            },
        }
    }
    Ok(TokenVerdict::Accepted)
}

/// The strongest [`LookaheadProbe`] outcome across every live, non-ended top
/// sitting at an accept state whose rule carries an exact lookahead:
/// `Satisfied` if any resolves outright, else `Pending` if any is still a
/// live prefix, else `Dead`.
fn lookahead_status(compiled: &CompiledGrammar, cur: &[Rc<StackElement>], remaining: &[u8]) -> LookaheadProbe {
    let mut pending = false;
    for top in cur {
        if top.is_grammar_end {
            continue;
        }
        let rule = compiled.fsm(top.rule);
        if !(rule.is_exact_lookahead && rule.lookahead.is_some() && rule.fsm.is_accept(top.state)) {
            continue;
        }
        match matcher::probe_lookahead(compiled, top.rule, remaining) {
            LookaheadProbe::Satisfied => return LookaheadProbe::Satisfied,
            LookaheadProbe::Pending => pending = true,
            LookaheadProbe::Dead => {}
        }
    }
    if pending { LookaheadProbe::Pending } else { LookaheadProbe::Dead }
}

fn precompute_mask(
    compiled: &CompiledGrammar,
    tops: &[Rc<StackElement>],
    stop_token_ids: &[u32],
    recursion_limit: u32,
) -> Result<CachedMask, MatcherError> {
    let vocab_size = compiled.tokenizer_info().vocab_size;
    let first_byte = matcher::first_byte_mask(compiled, tops);
    let can_end = matcher::can_reach_end(tops);

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut uncertain = Vec::new();

    // The first-byte prefilter rejects the bulk of a typical vocabulary in
    // O(1) per token; only candidates whose first byte is live get the full
    // per-byte walk, bounding the expensive path to tokens that could
    // plausibly match.
    for (token_id, bytes) in compiled.tokenizer_info().sorted_decoded_vocab() {
        if bytes.first().map(|&b| !first_byte[b as usize]).unwrap_or(true) {
            rejected.push(token_id);
            continue;
        }
        match classify_token(compiled, tops, bytes, recursion_limit)? {
            TokenVerdict::Accepted => accepted.push(token_id),
            TokenVerdict::Rejected => rejected.push(token_id),
            TokenVerdict::Uncertain => {
                // Counted as accepted per the rule that an unresolved token
                // is never treated as rejected; also tracked separately so
                // the online query can re-probe just this subset.
                accepted.push(token_id);
                uncertain.push(token_id);
            }
        }
    }
    for &stop in stop_token_ids {
        if can_end {
            accepted.push(stop);
        } else {
            rejected.push(stop);
        }
    }
    accepted.sort_unstable();
    accepted.dedup();
    rejected.sort_unstable();
    rejected.dedup();
    uncertain.sort_unstable();
    uncertain.dedup();

    let storage = choose_storage(accepted, rejected, vocab_size);
    Ok(CachedMask { storage, vocab_size, uncertain })
}

/// Picks the cheapest of the four representations: a sorted id list costs
/// `4 * count` bytes, a bitset always costs `ceil(vocab_size / 8)` bytes
/// regardless of how many bits are set.
fn choose_storage(accepted: Vec<u32>, rejected: Vec<u32>, vocab_size: usize) -> MaskStorage {
    let bitset_bytes = vocab_size.div_ceil(8);
    let (use_accepted, ids) =
        if accepted.len() <= rejected.len() { (true, accepted) } else { (false, rejected) };
    if ids.len() * std::mem::size_of::<u32>() <= bitset_bytes {
        if use_accepted {
            MaskStorage::AcceptedList(ids)
        } else {
            MaskStorage::RejectedList(ids)
        }
    } else {
        let mut bits = FixedBitSet::with_capacity(vocab_size.max(1));
        for id in &ids {
            bits.insert(*id as usize);
        }
        if use_accepted {
            MaskStorage::AcceptedBitset(bits)
        } else {
            MaskStorage::RejectedBitset(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::GrammarCompiler;
    use crate::config::Config;
    use crate::matcher::GrammarMatcher;
    use crate::vocabulary::{Token, TokenizerInfo, VocabType};
    use ahash::AHashMap;

    fn tokenizer_with(tokens: &[(u32, &str)]) -> Arc<TokenizerInfo> {
        let mut id_to_token = AHashMap::default();
        let mut id_to_string = AHashMap::default();
        for &(id, s) in tokens {
            id_to_token.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
            id_to_string.insert(id, s.to_string());
        }
        Arc::new(
            TokenizerInfo::new(id_to_token, id_to_string, VocabType::Raw, Some(tokens.len()), vec![], vec![], false)
                .unwrap(),
        )
    }

    #[test]
    fn only_the_matching_next_byte_token_is_allowed() {
        let tokenizer = tokenizer_with(&[(0, "a"), (1, "b")]);
        let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\" \"b\"\n", "root").unwrap());
        let matcher = GrammarMatcher::new(Arc::clone(&compiled), Some(vec![]), false, 8).unwrap();
        let cache = AdaptiveTokenMaskCache::new(None);
        let mut mask = vec![0u32; 1];
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_eq!(mask[0] & 0b11, 0b01);
    }

    #[test]
    fn cache_hits_compute_the_mask_only_once() {
        let tokenizer = tokenizer_with(&[(0, "a"), (1, "b")]);
        let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\"*\n", "root").unwrap());
        let matcher = GrammarMatcher::new(Arc::clone(&compiled), Some(vec![]), false, 8).unwrap();
        let cache = AdaptiveTokenMaskCache::new(None);
        let mut mask = vec![0u32; 1];
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_eq!(cache.cache.len(), 1);
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_eq!(cache.cache.len(), 1);
    }

    #[test]
    fn lookahead_assertion_masks_by_the_following_byte() {
        let tokenizer = tokenizer_with(&[(0, "5"), (1, "x"), (2, " ")]);
        let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= [0-9]+ (= \" \")\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(Arc::clone(&compiled), Some(vec![]), false, 8).unwrap();
        matcher.accept_string(b"5").unwrap();
        let cache = AdaptiveTokenMaskCache::new(None);
        let mut mask = vec![0u32; 1];
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_ne!(mask[0] & (1 << 0), 0, "more digits stay legal mid-run");
        assert_eq!(mask[0] & (1 << 1), 0, "\"x\" satisfies neither a digit nor the lookahead");
        assert_ne!(mask[0] & (1 << 2), 0, "a trailing space satisfies the lookahead exactly");
    }

    #[test]
    fn token_matching_only_a_lookahead_prefix_is_uncertain_but_accepted() {
        // "e" is a valid prefix of the "end" lookahead but not a complete
        // match, and isn't a digit either -- this exercises classify_token's
        // `Uncertain` verdict (neither a clean accept nor a dead end) rather
        // than the satisfied/dead paths the other lookahead test covers.
        let tokenizer = tokenizer_with(&[(0, "5"), (1, "e"), (2, "end"), (3, "x")]);
        let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= [0-9]+ (= \"end\")\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(Arc::clone(&compiled), Some(vec![]), false, 8).unwrap();
        matcher.accept_string(b"5").unwrap();
        let cache = AdaptiveTokenMaskCache::new(None);
        let mut mask = vec![0u32; 1];
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_ne!(mask[0] & (1 << 0), 0, "more digits stay legal mid-run");
        assert_ne!(mask[0] & (1 << 1), 0, "an unresolved lookahead prefix is accepted, not rejected");
        assert_ne!(mask[0] & (1 << 2), 0, "\"end\" satisfies the lookahead exactly");
        assert_eq!(mask[0] & (1 << 3), 0, "\"x\" can never satisfy the lookahead");
    }

    #[test]
    fn stop_token_allowed_only_once_grammar_can_end() {
        let tokenizer = tokenizer_with(&[(0, "a")]);
        let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\"\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(Arc::clone(&compiled), Some(vec![1]), false, 8).unwrap();
        let cache = AdaptiveTokenMaskCache::new(None);
        let mut mask = vec![0u32; 1];
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_eq!(mask[0] & (1 << 1), 0);
        matcher.accept_string(b"a").unwrap();
        matcher.fill_next_token_bitmask(&cache, &mut mask).unwrap();
        assert_ne!(mask[0] & (1 << 1), 0);
    }
}
