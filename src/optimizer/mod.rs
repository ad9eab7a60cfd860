//! The fixed nine-stage optimizer pipeline, run once per compiled grammar.
mod empty;
mod fsm_builder;
mod inline;
mod lookahead;
mod normalize;
mod repetition;
mod rewrite;

pub use fsm_builder::{build_fsms, CompiledRule};

use crate::ir::{Grammar, RuleId};
use ahash::AHashMap;

/// Runs every optimizer stage in the fixed order below, then
/// lowers the result to per-rule compact FSMs.
pub fn optimize(grammar: Grammar) -> (Grammar, AHashMap<RuleId, CompiledRule>) {
    let g = normalize::eliminate_single_element_exprs(&grammar);
    let g = normalize::normalize_structure(&g);
    let g = normalize::fuse_byte_strings(&g);
    let g = inline::inline_single_use_rules(&g);
    let g = inline::eliminate_dead_rules(&g);
    let mut g = repetition::normalize_repetitions(&g);
    lookahead::analyze_lookaheads(&mut g);
    empty::analyze_empty_derivation(&mut g);
    let fsms = build_fsms(&g);
    (g, fsms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebnf::parse_ebnf;
    use crate::fsm::CompactFsm;

    #[test]
    fn full_pipeline_compiles_a_small_grammar() {
        let g = parse_ebnf(
            "root ::= \"{\" pair (\",\" pair)* \"}\"\npair ::= [a-z]+ \":\" [0-9]+\n",
            "root",
        )
        .unwrap();
        let (optimized, fsms) = optimize(g);
        let rule = &fsms[&optimized.root];
        assert_ne!(rule.fsm.transition(rule.fsm.start, b'{'), CompactFsm::NO_TRANSITION);
    }
}
