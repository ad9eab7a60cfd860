//! The Earley-over-FSM matcher: a non-deterministic pushdown
//! automaton that advances one byte at a time over every live derivation,
//! sharing stack suffixes through a persistent, reference-counted tree of
//! [`StackElement`]s. Since every rule is already lowered to a single
//! compact DFA over bytes and rule-ref edges (`optimizer::build_fsms`), a
//! derivation's position inside a rule is just that DFA's current state, and
//! a `StackElement` only needs `(rule, state, parent)`.
//!
//! `GrammarMatcher` is a single-threaded object: nothing here is `Sync`, and
//! `Rc` (not `Arc`) is used for the persistent stack rather than paying for
//! atomic refcounts it doesn't need.
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashSet;

use crate::compiled::CompiledGrammar;
use crate::fsm::CompactFsm;
use crate::ir::RuleId;

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("grammar recursion exceeded the configured limit of {0} during epsilon-expansion")]
    RecursionLimitExceeded(u32),
    #[error("token id {0} is not present in the matcher's vocabulary")]
    UnknownTokenId(u32),
    #[error("rollback of {requested} tokens exceeds the {available} tokens retained in history")]
    RollbackExceedsHistory { requested: usize, available: usize },
    #[error("max_rollback_tokens is 0, so this matcher cannot roll back")]
    RollbackForbidden,
}

/// Default recursion-depth guard for ε-expansion.
const DEFAULT_RECURSION_LIMIT: u32 = 10_000;

/// One node in the persistent derivation tree. `parent` is the continuation:
/// the position to resume at in the enclosing rule once this one completes.
/// `is_grammar_end` marks the sentinel produced when the *root* rule
/// completes with no parent left to return to.
#[derive(Debug)]
pub struct StackElement {
    pub rule: RuleId,
    pub state: u32,
    pub parent: Option<Rc<StackElement>>,
    pub is_grammar_end: bool,
}

impl StackElement {
    fn dedup_key(&self) -> (u32, u32, usize, bool) {
        let parent_ptr = self.parent.as_ref().map_or(0, |p| Rc::as_ptr(p) as usize);
        (self.rule.0, self.state, parent_ptr, self.is_grammar_end)
    }
}

/// ε-expands `start`: pushes into referenced rules, bubbles completed rules
/// up to their parent continuation, and marks root-level completions as
/// grammar-end. Driven by an explicit worklist rather than native recursion
/// so a deeply nested grammar cannot blow the native stack; `recursion_limit`
/// instead guards against runaway grammars.
fn expand(
    compiled: &CompiledGrammar,
    start: Rc<StackElement>,
    recursion_limit: u32,
) -> Result<Vec<Rc<StackElement>>, MatcherError> {
    let mut seen: AHashSet<(u32, u32, usize, bool)> = AHashSet::default();
    let mut result = Vec::new();
    let mut worklist = vec![start];
    let mut visited = 0u32;
    while let Some(elem) = worklist.pop() {
        visited += 1;
        if visited > recursion_limit {
            return Err(MatcherError::RecursionLimitExceeded(recursion_limit));
        }
        if elem.is_grammar_end {
            if seen.insert(elem.dedup_key()) {
                result.push(elem);
            }
            continue;
        }
        if !seen.insert(elem.dedup_key()) {
            continue;
        }
        let rule_fsm = &compiled.fsm(elem.rule).fsm;
        let is_accept = rule_fsm.is_accept(elem.state);
        let rule_refs: Vec<_> = rule_fsm.rule_ref_edges(elem.state).copied().collect();
        let has_byte_edges = rule_fsm.state_edges(elem.state).iter().any(|e| e.is_byte_range());
        if rule_refs.is_empty() || has_byte_edges {
            result.push(Rc::clone(&elem));
        }
        for edge in &rule_refs {
            let continuation =
                Rc::new(StackElement { rule: elem.rule, state: edge.target, parent: elem.parent.clone(), is_grammar_end: false });
            let callee_start = compiled.fsm(edge.rule_id()).fsm.start;
            worklist.push(Rc::new(StackElement {
                rule: edge.rule_id(),
                state: callee_start,
                parent: Some(continuation),
                is_grammar_end: false,
            }));
        }
        if is_accept {
            match &elem.parent {
                None => worklist.push(Rc::new(StackElement {
                    rule: elem.rule,
                    state: elem.state,
                    parent: None,
                    is_grammar_end: true,
                })),
                Some(parent) => worklist.push(Rc::clone(parent)),
            }
        }
    }
    Ok(result)
}

fn initial_tops(compiled: &CompiledGrammar, recursion_limit: u32) -> Result<Vec<Rc<StackElement>>, MatcherError> {
    let root = compiled.grammar().root;
    let start_state = compiled.fsm(root).fsm.start;
    let root_elem = Rc::new(StackElement { rule: root, state: start_state, parent: None, is_grammar_end: false });
    expand(compiled, root_elem, recursion_limit)
}

/// One step of `Advance(byte)` run against an arbitrary set
/// of stack tops, without touching any matcher state. Shared by
/// [`GrammarMatcher`]'s own byte-at-a-time advance and by the mask cache's
/// speculative per-token matching. `None` means every top rejected `byte`.
pub(crate) fn advance_byte(
    compiled: &CompiledGrammar,
    tops: &[Rc<StackElement>],
    byte: u8,
    recursion_limit: u32,
) -> Result<Option<Vec<Rc<StackElement>>>, MatcherError> {
    let mut next = Vec::new();
    for top in tops {
        if top.is_grammar_end {
            continue;
        }
        let compiled_rule = compiled.fsm(top.rule);
        let mut target = compiled_rule.fsm.transition(top.state, byte);
        if target == CompactFsm::NO_TRANSITION && compiled_rule.is_tag_dispatch {
            // Free-text byte: TagDispatch never rejects outright, it simply
            // resets to the trigger trie's root.
            target = compiled_rule.fsm.start;
        }
        if target == CompactFsm::NO_TRANSITION {
            continue;
        }
        let candidate =
            Rc::new(StackElement { rule: top.rule, state: target, parent: top.parent.clone(), is_grammar_end: false });
        next.extend(expand(compiled, candidate, recursion_limit)?);
    }
    if next.is_empty() {
        return Ok(None);
    }
    dedup_tops(&mut next);
    Ok(Some(next))
}

fn dedup_tops(tops: &mut Vec<Rc<StackElement>>) {
    let mut seen = AHashSet::default();
    tops.retain(|t| seen.insert(t.dedup_key()));
}

/// True iff any current stack top is (or can reach, via pure ε-expansion
/// already folded into the top set) the grammar-end sentinel.
pub(crate) fn can_reach_end(tops: &[Rc<StackElement>]) -> bool {
    tops.iter().any(|t| t.is_grammar_end)
}

/// The set of bytes accepted by at least one of `tops`'s outgoing byte-range
/// edges — the first-character bitmask used by the mask cache's precompute
/// step. Also admits any byte that could begin a lookahead assertion a top
/// is sitting ready to satisfy (see [`lookahead_satisfied`]), since such a
/// byte is a legal start for a token even though the rule's own FSM has no
/// edge for it: over-admitting here only adds candidates to the precompute
/// step's full per-token walk, which rejects anything that doesn't actually
/// pan out.
pub(crate) fn first_byte_mask(compiled: &CompiledGrammar, tops: &[Rc<StackElement>]) -> [bool; 256] {
    let mut mask = [false; 256];
    for top in tops {
        if top.is_grammar_end {
            continue;
        }
        let compiled_rule = compiled.fsm(top.rule);
        let rule_fsm = &compiled_rule.fsm;
        for byte in 0u16..256 {
            if mask[byte as usize] {
                continue;
            }
            let mut target = rule_fsm.transition(top.state, byte as u8);
            if target == CompactFsm::NO_TRANSITION && compiled_rule.is_tag_dispatch {
                target = rule_fsm.start;
            }
            if target != CompactFsm::NO_TRANSITION {
                mask[byte as usize] = true;
            }
        }
        if compiled_rule.is_exact_lookahead && rule_fsm.is_accept(top.state) {
            if let Some(lookahead) = &compiled_rule.lookahead {
                for byte in 0u16..256 {
                    if !mask[byte as usize] && lookahead.transition(lookahead.start, byte as u8) != CompactFsm::NO_TRANSITION {
                        mask[byte as usize] = true;
                    }
                }
            }
        }
    }
    mask
}

/// The three outcomes of walking a rule's lookahead assertion over a
/// byte string that may be shorter than the assertion needs to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookaheadProbe {
    /// `bytes` exactly satisfies the assertion.
    Satisfied,
    /// `bytes` is consistent with the assertion so far, but ran out before
    /// reaching one of its accept states — whether this position is a legal
    /// stopping point depends on bytes the probe didn't see.
    Pending,
    /// `bytes` can never be extended into a match.
    Dead,
}

/// Walks `bytes` over a rule's lookahead FSM (if it has one) and reports
/// which of the three [`LookaheadProbe`] outcomes it lands on. A rule with
/// no lookahead is trivially `Satisfied` by any input.
pub(crate) fn probe_lookahead(compiled: &CompiledGrammar, rule: RuleId, bytes: &[u8]) -> LookaheadProbe {
    let Some(lookahead) = &compiled.fsm(rule).lookahead else { return LookaheadProbe::Satisfied };
    let mut state = lookahead.start;
    for &b in bytes {
        state = lookahead.transition(state, b);
        if state == CompactFsm::NO_TRANSITION {
            return LookaheadProbe::Dead;
        }
    }
    if lookahead.is_accept(state) { LookaheadProbe::Satisfied } else { LookaheadProbe::Pending }
}

/// Checks whether `bytes` exactly satisfies a rule's lookahead assertion (if
/// it has one); a rule with no lookahead is trivially satisfied. A `Pending`
/// probe (valid prefix, not yet conclusive) counts as unsatisfied here —
/// callers that need to distinguish "not yet" from "never" should use
/// [`probe_lookahead`] directly.
pub(crate) fn lookahead_satisfied(compiled: &CompiledGrammar, rule: RuleId, bytes: &[u8]) -> bool {
    probe_lookahead(compiled, rule, bytes) == LookaheadProbe::Satisfied
}

/// A ring buffer of per-token stack-top snapshots, bounded by
/// `max_rollback_tokens`. Entry 0 is never evicted by
/// `rollback`; only `discard_earliest` removes it.
struct StackTopsHistory {
    entries: VecDeque<Vec<Rc<StackElement>>>,
    max_len: usize,
}

impl StackTopsHistory {
    fn new(initial: Vec<Rc<StackElement>>, max_rollback_tokens: usize) -> Self {
        let mut entries = VecDeque::with_capacity(max_rollback_tokens + 1);
        entries.push_back(initial);
        Self { entries, max_len: max_rollback_tokens + 1 }
    }

    fn push(&mut self, tops: Vec<Rc<StackElement>>) {
        self.entries.push_back(tops);
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
    }

    fn current(&self) -> &[Rc<StackElement>] {
        self.entries.back().expect("history always has at least one entry")
    }

    fn len_rollbackable(&self) -> usize {
        self.entries.len() - 1
    }

    fn rollback(&mut self, n: usize) -> Result<(), MatcherError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.len_rollbackable() {
            return Err(MatcherError::RollbackExceedsHistory { requested: n, available: self.len_rollbackable() });
        }
        for _ in 0..n {
            self.entries.pop_back();
        }
        Ok(())
    }

    fn discard_earliest(&mut self, n: usize) {
        for _ in 0..n.min(self.entries.len().saturating_sub(1)) {
            self.entries.pop_front();
        }
    }
}

/// A single-threaded grammar matcher bound to one [`CompiledGrammar`].
/// Multiple matchers may share a compiled grammar across threads (it is
/// immutable after construction); a single matcher must never be advanced
/// concurrently.
pub struct GrammarMatcher {
    compiled: Arc<CompiledGrammar>,
    stop_token_ids: Vec<u32>,
    terminate_without_stop: bool,
    recursion_limit: u32,
    history: StackTopsHistory,
    terminated: bool,
}

impl GrammarMatcher {
    /// `max_rollback_tokens = 0` forbids any future `rollback` call.
    pub fn new(
        compiled: Arc<CompiledGrammar>,
        override_stop_tokens: Option<Vec<u32>>,
        terminate_without_stop: bool,
        max_rollback_tokens: usize,
    ) -> Result<Self, MatcherError> {
        let stop_token_ids = override_stop_tokens.unwrap_or_else(|| compiled.tokenizer_info().stop_token_ids.clone());
        let initial = initial_tops(&compiled, DEFAULT_RECURSION_LIMIT)?;
        let terminated = terminate_without_stop && initial.iter().all(|t| t.is_grammar_end);
        Ok(Self {
            compiled,
            stop_token_ids,
            terminate_without_stop,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            history: StackTopsHistory::new(initial, max_rollback_tokens),
            terminated,
        })
    }

    pub fn reset(&mut self) -> Result<(), MatcherError> {
        let initial = initial_tops(&self.compiled, self.recursion_limit)?;
        self.terminated = self.terminate_without_stop && initial.iter().all(|t| t.is_grammar_end);
        let max_rollback = self.history.max_len - 1;
        self.history = StackTopsHistory::new(initial, max_rollback);
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn current_tops(&self) -> &[Rc<StackElement>] {
        self.history.current()
    }

    fn can_reach_end(&self) -> bool {
        can_reach_end(self.current_tops())
    }

    fn accept_bytes(&mut self, bytes: &[u8]) -> Result<bool, MatcherError> {
        let mut tops = self.current_tops().to_vec();
        for &byte in bytes {
            match advance_byte(&self.compiled, &tops, byte, self.recursion_limit)? {
                Some(next) => tops = next,
                None => return Ok(false),
            }
        }
        let all_grammar_end = tops.iter().all(|t| t.is_grammar_end);
        self.history.push(tops);
        if self.terminate_without_stop && all_grammar_end {
            self.terminated = true;
        }
        Ok(true)
    }

    /// Accepts one sampled token id. Stop tokens terminate the matcher when
    /// the grammar can legally end here; any other token is decoded to bytes
    /// and fed through the byte-level `Advance` one byte at a time as a
    /// single rollback unit.
    pub fn accept_token(&mut self, token_id: u32) -> Result<bool, MatcherError> {
        if self.terminated {
            return Ok(false);
        }
        if self.stop_token_ids.contains(&token_id) {
            if self.can_reach_end() {
                self.terminated = true;
                return Ok(true);
            }
            return Ok(false);
        }
        let bytes = self
            .compiled
            .tokenizer_info()
            .decoded_token(token_id)
            .ok_or(MatcherError::UnknownTokenId(token_id))?
            .to_vec();
        self.accept_bytes(&bytes)
    }

    /// Accepts a raw byte string as one rollback unit, bypassing token
    /// decoding entirely (used for prompt seeding and tests).
    pub fn accept_string(&mut self, bytes: &[u8]) -> Result<bool, MatcherError> {
        if self.terminated {
            return Ok(false);
        }
        self.accept_bytes(bytes)
    }

    /// Fills `mask_out` (one `u32` per 32 vocabulary tokens) via the adaptive
    /// token-mask cache.
    pub fn fill_next_token_bitmask(
        &self,
        cache: &crate::mask_cache::AdaptiveTokenMaskCache,
        mask_out: &mut [u32],
    ) -> Result<(), MatcherError> {
        cache.fill_bitmask(&self.compiled, self.current_tops(), &self.stop_token_ids, self.recursion_limit, mask_out)
    }

    /// Walks forward deterministically while every live top agrees on
    /// exactly one next byte, returning the forced byte string. Purely
    /// speculative: never mutates matcher state.
    pub fn find_jump_forward_string(&self) -> Result<Vec<u8>, MatcherError> {
        let mut tops = self.current_tops().to_vec();
        let mut forced = Vec::new();
        loop {
            if tops.iter().any(|t| t.is_grammar_end) {
                break;
            }
            let mut candidate: Option<u8> = None;
            let mut agreed = true;
            for top in &tops {
                let edges = self.compiled.fsm(top.rule).fsm.state_edges(top.state);
                let byte_edges: Vec<_> = edges.iter().filter(|e| e.is_byte_range()).collect();
                if byte_edges.len() != 1 || byte_edges[0].low != byte_edges[0].high {
                    agreed = false;
                    break;
                }
                let b = byte_edges[0].low as u8;
                match candidate {
                    None => candidate = Some(b),
                    Some(c) if c == b => {}
                    Some(_) => {
                        agreed = false;
                        break;
                    }
                }
            }
            if !agreed {
                break;
            }
            let Some(byte) = candidate else { break };
            match advance_byte(&self.compiled, &tops, byte, self.recursion_limit)? {
                Some(next) => {
                    forced.push(byte);
                    tops = next;
                }
                None => break,
            }
        }
        Ok(forced)
    }

    /// Pops `n` tokens' worth of history. `rollback(0)` is a no-op;
    /// rolling back past everything retained, or on a matcher constructed
    /// with `max_rollback_tokens = 0`, is an error.
    pub fn rollback(&mut self, n: usize) -> Result<(), MatcherError> {
        if n > 0 && self.history.max_len == 1 {
            return Err(MatcherError::RollbackForbidden);
        }
        self.history.rollback(n)?;
        self.terminated = false;
        Ok(())
    }

    /// Prunes the `n` oldest history entries, freeing their stack elements'
    /// reference counts without affecting the current position.
    pub fn discard_earliest(&mut self, n: usize) {
        self.history.discard_earliest(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::GrammarCompiler;
    use crate::config::Config;
    use crate::vocabulary::{Token, TokenizerInfo, VocabType};
    use ahash::AHashMap;

    fn tokenizer_with(tokens: &[(u32, &str)]) -> Arc<TokenizerInfo> {
        let mut id_to_token = AHashMap::default();
        let mut id_to_string = AHashMap::default();
        for &(id, s) in tokens {
            id_to_token.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
            id_to_string.insert(id, s.to_string());
        }
        Arc::new(TokenizerInfo::new(id_to_token, id_to_string, VocabType::Raw, None, vec![], vec![], false).unwrap())
    }

    #[test]
    fn accepts_exact_literal_then_terminates() {
        let tokenizer = tokenizer_with(&[(0, "abc")]);
        let compiler = GrammarCompiler::new(tokenizer, Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\" \"b\" \"c\"\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(compiled, Some(vec![0]), true, 8).unwrap();
        assert!(matcher.accept_string(b"abc").unwrap());
        assert!(matcher.is_terminated());
    }

    #[test]
    fn rejecting_byte_leaves_state_unchanged() {
        let tokenizer = tokenizer_with(&[]);
        let compiler = GrammarCompiler::new(tokenizer, Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\" \"b\" \"c\"\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(compiled, Some(vec![]), false, 8).unwrap();
        assert!(matcher.accept_string(b"ab").unwrap());
        assert!(!matcher.accept_string(b"d").unwrap());
        assert!(matcher.accept_string(b"c").unwrap());
    }

    #[test]
    fn rollback_zero_is_a_no_op() {
        let tokenizer = tokenizer_with(&[]);
        let compiler = GrammarCompiler::new(tokenizer, Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\"\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(compiled, Some(vec![]), false, 8).unwrap();
        assert!(matcher.rollback(0).is_ok());
    }

    #[test]
    fn zero_rollback_budget_forbids_rollback() {
        let tokenizer = tokenizer_with(&[]);
        let compiler = GrammarCompiler::new(tokenizer, Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= \"a\"\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(compiled, Some(vec![]), false, 0).unwrap();
        assert!(matcher.accept_string(b"a").unwrap());
        assert!(matches!(matcher.rollback(1), Err(MatcherError::RollbackForbidden)));
    }

    #[test]
    fn digits_grammar_accepts_only_digit_bytes() {
        let tokenizer = tokenizer_with(&[]);
        let compiler = GrammarCompiler::new(tokenizer, Config::default());
        let compiled = Arc::new(compiler.compile_from_ebnf("root ::= [0-9]+\n", "root").unwrap());
        let mut matcher = GrammarMatcher::new(compiled, Some(vec![]), true, 8).unwrap();
        assert!(matcher.accept_string(b"42").unwrap());
        assert!(!matcher.accept_string(b"x").unwrap());
    }
}
