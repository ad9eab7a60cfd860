//! The FSM core: NFA/DFA construction, epsilon closure, subset construction,
//! Hopcroft minimisation and the compact (CSR, edge-sorted) runtime form.
//!
//! An edge `(low, high, target)` follows a tagged encoding:
//! `low = high = -1` is an epsilon edge, `low = -1, high >= 0` is a
//! rule-reference edge (the rule id is `high`), otherwise `low <= high` is an
//! inclusive byte range `0..=255`.
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;

use crate::ir::RuleId;

const EPSILON: i32 = -1;

/// One outgoing edge of an FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub low: i32,
    pub high: i32,
    pub target: u32,
}

impl Edge {
    pub fn epsilon(target: u32) -> Self {
        Self { low: EPSILON, high: EPSILON, target }
    }
    pub fn rule_ref(rule: RuleId, target: u32) -> Self {
        Self { low: EPSILON, high: rule.0 as i32, target }
    }
    pub fn byte_range(low: u8, high: u8, target: u32) -> Self {
        Self { low: low as i32, high: high as i32, target }
    }
    #[inline]
    pub fn is_epsilon(&self) -> bool {
        self.low == EPSILON && self.high == EPSILON
    }
    #[inline]
    pub fn is_rule_ref(&self) -> bool {
        self.low == EPSILON && self.high >= 0
    }
    #[inline]
    pub fn rule_id(&self) -> RuleId {
        debug_assert!(self.is_rule_ref());
        RuleId(self.high as u32)
    }
    #[inline]
    pub fn is_byte_range(&self) -> bool {
        self.low >= 0
    }
    #[inline]
    pub fn matches_byte(&self, byte: u8) -> bool {
        self.is_byte_range() && self.low <= byte as i32 && byte as i32 <= self.high
    }
}

/// A graph of states and their outgoing edges. States are dense `u32` ids
/// indexing `edges`.
#[derive(Debug, Clone, Default)]
pub struct Fsm {
    pub edges: Vec<Vec<Edge>>,
}

impl Fsm {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    pub fn add_state(&mut self) -> u32 {
        self.edges.push(Vec::new());
        (self.edges.len() - 1) as u32
    }

    pub fn add_edge(&mut self, from: u32, edge: Edge) {
        self.edges[from as usize].push(edge);
    }

    pub fn num_states(&self) -> u32 {
        self.edges.len() as u32
    }

    /// The epsilon closure of a single state.
    pub fn epsilon_closure(&self, state: u32) -> AHashSet<u32> {
        let mut seen = AHashSet::default();
        let mut stack = vec![state];
        seen.insert(state);
        while let Some(s) = stack.pop() {
            for e in &self.edges[s as usize] {
                if e.is_epsilon() && seen.insert(e.target) {
                    stack.push(e.target);
                }
            }
        }
        seen
    }

    pub fn epsilon_closure_set(&self, states: &AHashSet<u32>) -> AHashSet<u32> {
        let mut out = AHashSet::default();
        for &s in states {
            out.extend(self.epsilon_closure(s));
        }
        out
    }

    /// Merge another FSM's states into this one, remapping edge targets.
    /// Returns the offset applied to the other FSM's state ids.
    pub fn append(&mut self, other: &Fsm) -> u32 {
        let offset = self.num_states();
        for edges in &other.edges {
            let remapped: Vec<Edge> = edges
                .iter()
                .map(|e| Edge { target: e.target + offset, ..*e })
                .collect();
            self.edges.push(remapped);
        }
        offset
    }
}

/// An [`Fsm`] plus a distinguished start state and a set of accept states.
#[derive(Debug, Clone)]
pub struct FsmWithStartEnd {
    pub fsm: Fsm,
    pub start: u32,
    pub ends: AHashSet<u32>,
    pub is_dfa: bool,
}

impl FsmWithStartEnd {
    pub fn new(fsm: Fsm, start: u32, ends: AHashSet<u32>) -> Self {
        Self { fsm, start, ends, is_dfa: false }
    }

    /// `byte_range(low, high)`: a two-state FSM matching one byte in range.
    pub fn byte_range(low: u8, high: u8) -> Self {
        let mut fsm = Fsm::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        fsm.add_edge(s0, Edge::byte_range(low, high, s1));
        let mut ends = AHashSet::default();
        ends.insert(s1);
        Self { fsm, start: s0, ends, is_dfa: true }
    }

    /// `rule_ref(id)`: a two-state FSM with a single rule-reference edge, so
    /// matching it in the outer FSM costs one transition while the actual
    /// recursion happens as a push in the matcher.
    pub fn rule_ref(id: RuleId) -> Self {
        let mut fsm = Fsm::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        fsm.add_edge(s0, Edge::rule_ref(id, s1));
        let mut ends = AHashSet::default();
        ends.insert(s1);
        Self { fsm, start: s0, ends, is_dfa: false }
    }

    pub fn empty_str() -> Self {
        let mut fsm = Fsm::new();
        let s0 = fsm.add_state();
        let mut ends = AHashSet::default();
        ends.insert(s0);
        Self { fsm, start: s0, ends, is_dfa: true }
    }

    /// `concat([fsm...])`.
    pub fn concat(parts: Vec<FsmWithStartEnd>) -> Self {
        if parts.is_empty() {
            return Self::empty_str();
        }
        let mut fsm = Fsm::new();
        let mut starts = Vec::with_capacity(parts.len());
        let mut ends_per_part = Vec::with_capacity(parts.len());
        for part in &parts {
            let offset = fsm.append(&part.fsm);
            starts.push(part.start + offset);
            ends_per_part.push(part.ends.iter().map(|&e| e + offset).collect::<Vec<_>>());
        }
        for i in 0..parts.len() - 1 {
            for &end in &ends_per_part[i] {
                fsm.add_edge(end, Edge::epsilon(starts[i + 1]));
            }
        }
        let start = starts[0];
        let ends = ends_per_part.last().unwrap().iter().copied().collect();
        Self { fsm, start, ends, is_dfa: false }
    }

    /// `union([fsm...])`.
    pub fn union(parts: Vec<FsmWithStartEnd>) -> Self {
        let mut fsm = Fsm::new();
        let start = fsm.add_state();
        let mut ends = AHashSet::default();
        for part in &parts {
            let offset = fsm.append(&part.fsm);
            fsm.add_edge(start, Edge::epsilon(part.start + offset));
            ends.extend(part.ends.iter().map(|&e| e + offset));
        }
        Self { fsm, start, ends, is_dfa: false }
    }

    /// `star(fsm)`: Kleene star.
    pub fn star(self) -> Self {
        let FsmWithStartEnd { mut fsm, start, ends, .. } = self;
        let new_start = fsm.add_state();
        fsm.add_edge(new_start, Edge::epsilon(start));
        for &e in &ends {
            fsm.add_edge(e, Edge::epsilon(new_start));
        }
        let mut new_ends = AHashSet::default();
        new_ends.insert(new_start);
        Self { fsm, start: new_start, ends: new_ends, is_dfa: false }
    }

    /// `plus(fsm)`: one-or-more.
    pub fn plus(self) -> Self {
        let copy = self.clone();
        Self::concat(vec![self, copy.star()])
    }

    /// `optional(fsm)`.
    pub fn optional(self) -> Self {
        Self::union(vec![self, Self::empty_str()])
    }

    /// `trie(words)`: an Aho-Corasick-style prefix trie over byte strings,
    /// used both directly and as the backbone of `tag_dispatch`.
    pub fn trie(words: &[Vec<u8>]) -> Self {
        let mut fsm = Fsm::new();
        let root = fsm.add_state();
        let mut ends = AHashSet::default();
        for word in words {
            let mut cur = root;
            for &byte in word {
                let next = find_byte_child(&fsm, cur, byte).unwrap_or_else(|| {
                    let n = fsm.add_state();
                    fsm.add_edge(cur, Edge::byte_range(byte, byte, n));
                    n
                });
                cur = next;
            }
            ends.insert(cur);
        }
        Self { fsm, start: root, ends, is_dfa: true }
    }

    /// `tag_dispatch(triggers, stop_strings, loop_after_dispatch)` compiles
    /// the free-text-until-trigger macro.
    ///
    /// With `stop_eos = true` (no explicit stop strings) every non-trigger-end
    /// trie state is an accept state (free text consumed so far is a valid
    /// stopping point); each trigger-end state gets a rule-ref edge to the
    /// paired rule, targeting the trie root again when `loop_after_dispatch`
    /// is set, or a fresh terminal accept state otherwise.
    pub fn tag_dispatch(
        triggers: &[(Vec<u8>, RuleId)],
        stop_strings: &[Vec<u8>],
        loop_after_dispatch: bool,
    ) -> Self {
        let words: Vec<Vec<u8>> = triggers.iter().map(|(w, _)| w.clone()).collect();
        let trigger_trie = Self::trie(&words);
        let mut fsm = trigger_trie.fsm;
        let root = trigger_trie.start;
        let trigger_ends: AHashSet<u32> = trigger_trie.ends;

        let stop_eos = stop_strings.is_empty();
        let mut ends = AHashSet::default();
        if stop_eos {
            for s in 0..fsm.num_states() {
                if !trigger_ends.contains(&s) {
                    ends.insert(s);
                }
            }
        }
        let mut stop_trie_start = None;
        if !stop_eos {
            let stop_fsm = Self::trie(stop_strings);
            let offset = fsm.append(&stop_fsm.fsm);
            stop_trie_start = Some(stop_fsm.start + offset);
            for e in stop_fsm.ends {
                ends.insert(e + offset);
            }
        }
        for (word, rule) in triggers {
            let mut cur = root;
            for &byte in word {
                cur = find_byte_child(&fsm, cur, byte).expect("trigger word walked during trie build");
            }
            let target = if loop_after_dispatch {
                root
            } else if let Some(stop_root) = stop_trie_start {
                stop_root
            } else {
                let fresh = fsm.add_state();
                ends.insert(fresh);
                fresh
            };
            fsm.add_edge(cur, Edge::rule_ref(*rule, target));
        }
        Self { fsm, start: root, ends, is_dfa: false }
    }

    /// Subset construction: converts this FSM to an equivalent DFA over byte
    /// ranges and epsilon-free rule-ref edges. Rule-ref edges
    /// are kept distinct per target rule id, matching minimisation's
    /// treatment of them as a distinct label class.
    pub fn to_dfa(&self) -> FsmWithStartEnd {
        let start_set = self.fsm.epsilon_closure(self.start);
        let mut subset_to_id: AHashMap<Vec<u32>, u32> = AHashMap::default();
        let mut dfa = Fsm::new();
        let key = sorted_key(&start_set);
        let start_id = dfa.add_state();
        subset_to_id.insert(key, start_id);
        let mut worklist = VecDeque::new();
        worklist.push_back((start_id, start_set));
        let mut ends = AHashSet::default();
        while let Some((id, subset)) = worklist.pop_front() {
            if subset.iter().any(|s| self.ends.contains(s)) {
                ends.insert(id);
            }
            // byte ranges: collect every distinct boundary then split.
            let mut boundaries: Vec<i32> = Vec::new();
            for &s in &subset {
                for e in &self.fsm.edges[s as usize] {
                    if e.is_byte_range() {
                        boundaries.push(e.low);
                        boundaries.push(e.high + 1);
                    }
                }
            }
            boundaries.sort_unstable();
            boundaries.dedup();
            for w in boundaries.windows(2) {
                let (lo, hi_excl) = (w[0], w[1]);
                if lo >= hi_excl {
                    continue;
                }
                let mut target_set = AHashSet::default();
                for &s in &subset {
                    for e in &self.fsm.edges[s as usize] {
                        if e.is_byte_range() && e.low <= lo && hi_excl - 1 <= e.high {
                            target_set.insert(e.target);
                        }
                    }
                }
                if target_set.is_empty() {
                    continue;
                }
                let closure = self.fsm.epsilon_closure_set(&target_set);
                let tkey = sorted_key(&closure);
                let target_id = *subset_to_id.entry(tkey).or_insert_with(|| {
                    let nid = dfa.add_state();
                    worklist.push_back((nid, closure.clone()));
                    nid
                });
                dfa.add_edge(id, Edge::byte_range(lo as u8, (hi_excl - 1) as u8, target_id));
            }
            // rule-ref edges: kept as distinct labels, one per referenced rule.
            let mut rule_targets: AHashMap<RuleId, AHashSet<u32>> = AHashMap::default();
            for &s in &subset {
                for e in &self.fsm.edges[s as usize] {
                    if e.is_rule_ref() {
                        rule_targets.entry(e.rule_id()).or_default().insert(e.target);
                    }
                }
            }
            for (rule, targets) in rule_targets {
                let closure = self.fsm.epsilon_closure_set(&targets);
                let tkey = sorted_key(&closure);
                let target_id = *subset_to_id.entry(tkey).or_insert_with(|| {
                    let nid = dfa.add_state();
                    worklist.push_back((nid, closure.clone()));
                    nid
                });
                dfa.add_edge(id, Edge::rule_ref(rule, target_id));
            }
        }
        let mut result = FsmWithStartEnd::new(dfa, start_id, ends);
        result.is_dfa = true;
        result
    }

    /// Hopcroft-style partition refinement, treating rule-reference edges as
    /// a label distinct from every byte value.
    pub fn minimize(&self) -> FsmWithStartEnd {
        debug_assert!(self.is_dfa, "minimisation expects a DFA");
        let n = self.fsm.num_states();
        if n == 0 {
            return self.clone();
        }
        let mut partition: Vec<u32> = (0..n)
            .map(|s| if self.ends.contains(&s) { 1 } else { 0 })
            .collect();
        let mut num_classes = if self.ends.len() == n as usize || self.ends.is_empty() { 1 } else { 2 };
        loop {
            let mut signature: AHashMap<(u32, Vec<(LabelKey, u32)>), u32> = AHashMap::default();
            let mut next_partition = vec![0u32; n as usize];
            for s in 0..n {
                let mut outs: Vec<(LabelKey, u32)> = self.fsm.edges[s as usize]
                    .iter()
                    .filter(|e| !e.is_epsilon())
                    .map(|e| (LabelKey::from_edge(e), partition[e.target as usize]))
                    .collect();
                outs.sort();
                outs.dedup();
                let key = (partition[s as usize], outs);
                let next_id = signature.len() as u32;
                let id = *signature.entry(key).or_insert(next_id);
                next_partition[s as usize] = id;
            }
            let new_num_classes = signature.len() as u32;
            if new_num_classes == num_classes {
                partition = next_partition;
                break;
            }
            partition = next_partition;
            num_classes = new_num_classes;
        }
        let mut min_fsm = Fsm::new();
        for _ in 0..num_classes {
            min_fsm.add_state();
        }
        let mut seen_class = AHashSet::default();
        for s in 0..n {
            let class = partition[s as usize];
            if !seen_class.insert(class) {
                continue;
            }
            let mut added: AHashSet<(LabelKey, u32)> = AHashSet::default();
            for e in &self.fsm.edges[s as usize] {
                if e.is_epsilon() {
                    continue;
                }
                let target_class = partition[e.target as usize];
                let key = (LabelKey::from_edge(e), target_class);
                if added.insert(key) {
                    min_fsm.add_edge(class, Edge { target: target_class, ..*e });
                }
            }
        }
        let start = partition[self.start as usize];
        let ends = self.ends.iter().map(|&e| partition[e as usize]).collect();
        let mut result = FsmWithStartEnd::new(min_fsm, start, ends);
        result.is_dfa = true;
        merge_sorted_adjacent_edges(&mut result);
        result
    }

    /// Epsilon simplification: merge a state with its sole epsilon-successor when
    /// no other edges enter that successor.
    pub fn simplify_epsilon(&self) -> FsmWithStartEnd {
        let n = self.fsm.num_states();
        let mut in_degree = vec![0u32; n as usize];
        for edges in &self.fsm.edges {
            for e in edges {
                in_degree[e.target as usize] += 1;
            }
        }
        let mut redirect: Vec<u32> = (0..n).collect();
        for s in 0..n {
            let edges = &self.fsm.edges[s as usize];
            if edges.len() == 1 && edges[0].is_epsilon() {
                let target = edges[0].target;
                if in_degree[target as usize] == 1 && target != self.start {
                    redirect[s as usize] = target;
                }
            }
        }
        fn resolve(redirect: &[u32], mut s: u32) -> u32 {
            let mut seen = AHashSet::default();
            while redirect[s as usize] != s && seen.insert(s) {
                s = redirect[s as usize];
            }
            s
        }
        let mut fsm = Fsm::new();
        for _ in 0..n {
            fsm.add_state();
        }
        for s in 0..n {
            let rs = resolve(&redirect, s);
            for e in &self.fsm.edges[s as usize] {
                if e.is_epsilon() && resolve(&redirect, e.target) == rs {
                    continue;
                }
                fsm.add_edge(rs, Edge { target: resolve(&redirect, e.target), ..*e });
            }
        }
        let start = resolve(&redirect, self.start);
        let ends = self.ends.iter().map(|&e| resolve(&redirect, e)).collect();
        FsmWithStartEnd { fsm, start, ends, is_dfa: self.is_dfa }
    }

    /// Transition simplification: collapse states whose outgoing edge sets are
    /// identical.
    pub fn simplify_transition(&self) -> FsmWithStartEnd {
        let n = self.fsm.num_states();
        let mut group_of: AHashMap<Vec<Edge>, u32> = AHashMap::default();
        let mut class = vec![0u32; n as usize];
        for s in 0..n {
            let mut edges = self.fsm.edges[s as usize].clone();
            edges.sort_by_key(|e| (e.low, e.high, e.target));
            let next_id = group_of.len() as u32;
            let id = *group_of.entry(edges).or_insert(next_id);
            class[s as usize] = id;
        }
        let num_classes = group_of.len() as u32;
        let mut fsm = Fsm::new();
        for _ in 0..num_classes {
            fsm.add_state();
        }
        let mut seen = AHashSet::default();
        for s in 0..n {
            let c = class[s as usize];
            if !seen.insert(c) {
                continue;
            }
            for e in &self.fsm.edges[s as usize] {
                fsm.add_edge(c, Edge { target: class[e.target as usize], ..*e });
            }
        }
        let start = class[self.start as usize];
        let ends = self.ends.iter().map(|&e| class[e as usize]).collect();
        FsmWithStartEnd { fsm, start, ends, is_dfa: self.is_dfa }
    }

    pub fn to_compact(&self) -> CompactFsm {
        CompactFsm::from_fsm(self)
    }
}

/// Edges compare equal for minimisation purposes when they carry the same
/// label: the same byte or the same referenced rule id. Rule-reference edges
/// are always a distinct class from byte-range edges.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LabelKey {
    Byte(i32, i32),
    Rule(i32),
}

impl LabelKey {
    fn from_edge(e: &Edge) -> Self {
        if e.is_rule_ref() {
            LabelKey::Rule(e.high)
        } else {
            LabelKey::Byte(e.low, e.high)
        }
    }
}

fn sorted_key(set: &AHashSet<u32>) -> Vec<u32> {
    let mut v: Vec<u32> = set.iter().copied().collect();
    v.sort_unstable();
    v
}

fn find_byte_child(fsm: &Fsm, state: u32, byte: u8) -> Option<u32> {
    fsm.edges[state as usize]
        .iter()
        .find(|e| e.is_byte_range() && e.low == byte as i32 && e.high == byte as i32)
        .map(|e| e.target)
}

/// Merge adjacent same-target byte-range edges after minimisation, as the
/// spec requires of minimisation output.
fn merge_sorted_adjacent_edges(fsm: &mut FsmWithStartEnd) {
    for edges in &mut fsm.fsm.edges {
        edges.sort_by_key(|e| (e.low, e.high));
        let mut merged: Vec<Edge> = Vec::with_capacity(edges.len());
        for e in edges.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.is_byte_range()
                    && e.is_byte_range()
                    && last.target == e.target
                    && last.high + 1 == e.low
                {
                    last.high = e.high;
                    continue;
                }
            }
            merged.push(e);
        }
        *edges = merged;
    }
}

const COMPACT_LINEAR_SCAN_THRESHOLD: usize = 16;
const NO_TRANSITION: u32 = u32::MAX;

/// The CSR-packed, edge-sorted runtime form of an FSM. Built once from an
/// optimised [`FsmWithStartEnd`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct CompactFsm {
    offsets: Vec<u32>,
    edges: Vec<Edge>,
    pub start: u32,
    pub ends: AHashSet<u32>,
    pub is_dfa: bool,
}

impl CompactFsm {
    pub fn from_fsm(fsm: &FsmWithStartEnd) -> Self {
        let mut offsets = Vec::with_capacity(fsm.fsm.num_states() as usize + 1);
        let mut edges = Vec::new();
        offsets.push(0);
        for state_edges in &fsm.fsm.edges {
            let mut sorted = state_edges.clone();
            sorted.sort_by_key(|e| (e.low, e.high));
            edges.extend(sorted);
            offsets.push(edges.len() as u32);
        }
        Self { offsets, edges, start: fsm.start, ends: fsm.ends.clone(), is_dfa: fsm.is_dfa }
    }

    pub fn num_states(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    pub fn state_edges(&self, state: u32) -> &[Edge] {
        let start = self.offsets[state as usize] as usize;
        let end = self.offsets[state as usize + 1] as usize;
        &self.edges[start..end]
    }

    pub fn is_accept(&self, state: u32) -> bool {
        self.ends.contains(&state)
    }

    /// `transition(state, byte)`: linear scan under the threshold, binary
    /// search above it, returning [`NO_TRANSITION`] on a miss.
    pub fn transition(&self, state: u32, byte: u8) -> u32 {
        let edges = self.state_edges(state);
        let b = byte as i32;
        if edges.len() <= COMPACT_LINEAR_SCAN_THRESHOLD {
            for e in edges {
                if !e.is_byte_range() {
                    continue;
                }
                if e.low > b {
                    return NO_TRANSITION;
                }
                if e.high >= b {
                    return e.target;
                }
            }
            NO_TRANSITION
        } else {
            let mut lo = 0usize;
            let mut hi = edges.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let e = &edges[mid];
                if !e.is_byte_range() {
                    // rule-ref edges sort to the front (low == -1); skip past them.
                    lo = mid + 1;
                    continue;
                }
                if b < e.low {
                    hi = mid;
                } else if b > e.high {
                    lo = mid + 1;
                } else {
                    return e.target;
                }
            }
            NO_TRANSITION
        }
    }

    pub fn rule_ref_edges(&self, state: u32) -> impl Iterator<Item = &Edge> {
        self.state_edges(state).iter().filter(|e| e.is_rule_ref())
    }

    pub const NO_TRANSITION: u32 = NO_TRANSITION;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_and_accept() {
        let a = FsmWithStartEnd::byte_range(b'a', b'a');
        let b = FsmWithStartEnd::byte_range(b'b', b'b');
        let ab = FsmWithStartEnd::concat(vec![a, b]).to_dfa();
        let compact = ab.to_compact();
        let s1 = compact.transition(compact.start, b'a');
        assert_ne!(s1, CompactFsm::NO_TRANSITION);
        let s2 = compact.transition(s1, b'b');
        assert!(compact.is_accept(s2));
    }

    #[test]
    fn star_accepts_empty_and_repeats() {
        let a = FsmWithStartEnd::byte_range(b'a', b'a').star().to_dfa();
        let compact = a.to_compact();
        assert!(compact.is_accept(compact.start));
        let s1 = compact.transition(compact.start, b'a');
        assert!(compact.is_accept(s1));
        let s2 = compact.transition(s1, b'a');
        assert!(compact.is_accept(s2));
    }

    #[test]
    fn union_accepts_either() {
        let a = FsmWithStartEnd::byte_range(b'a', b'a');
        let b = FsmWithStartEnd::byte_range(b'b', b'b');
        let u = FsmWithStartEnd::union(vec![a, b]).to_dfa();
        let compact = u.to_compact();
        let sa = compact.transition(compact.start, b'a');
        let sb = compact.transition(compact.start, b'b');
        assert!(compact.is_accept(sa));
        assert!(compact.is_accept(sb));
        assert_eq!(compact.transition(compact.start, b'c'), CompactFsm::NO_TRANSITION);
    }

    #[test]
    fn minimize_merges_equivalent_states() {
        // (a|b)c — both branches lead to an equivalent tail, minimisation
        // should collapse them into one state.
        let ac = FsmWithStartEnd::concat(vec![
            FsmWithStartEnd::byte_range(b'a', b'a'),
            FsmWithStartEnd::byte_range(b'c', b'c'),
        ]);
        let bc = FsmWithStartEnd::concat(vec![
            FsmWithStartEnd::byte_range(b'b', b'b'),
            FsmWithStartEnd::byte_range(b'c', b'c'),
        ]);
        let dfa = FsmWithStartEnd::union(vec![ac, bc]).to_dfa();
        let minimized = dfa.minimize();
        assert!(minimized.fsm.num_states() < dfa.fsm.num_states());
    }

    #[test]
    fn trie_dispatches_on_prefix() {
        let trie = FsmWithStartEnd::trie(&[b"ab".to_vec(), b"ac".to_vec()]);
        let s1 = find_byte_child(&trie.fsm, trie.start, b'a').unwrap();
        assert!(find_byte_child(&trie.fsm, s1, b'b').is_some());
        assert!(find_byte_child(&trie.fsm, s1, b'c').is_some());
    }
}
