use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grammask::{CompiledGrammar, Config, GrammarCompiler, GrammarMatcher, Token, TokenizerInfo, VocabType};

fn tokenizer() -> Arc<TokenizerInfo> {
    let mut id_to_token = AHashMap::default();
    let mut id_to_token_string = AHashMap::default();
    for (id, s) in [(0u32, "{"), (1, "}"), (2, "c"), (3, " "), (4, "imper"), (5, "\n")] {
        id_to_token.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
        id_to_token_string.insert(id, s.to_string());
    }
    Arc::new(TokenizerInfo::new(id_to_token, id_to_token_string, VocabType::Raw, None, vec![], vec![], false).unwrap())
}

fn run_a_matcher(compiled: &Arc<CompiledGrammar>, iterations: usize, token_id: u32) {
    let mut matcher = GrammarMatcher::new(Arc::clone(compiled), None, false, 0).unwrap();
    for _ in 0..iterations {
        let _ = matcher.accept_token(black_box(token_id));
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut c = c.benchmark_group("Simple");
    c.measurement_time(Duration::from_secs(10)).sample_size(100);
    let tokenizer = tokenizer();
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), Config::default());

    let middle_recursion = Arc::new(compiler.compile_from_ebnf("root ::= (\"{\" root \"}\")?\n", "root").unwrap());
    c.bench_function("unmarked middle recursion 100 iterations", |b| {
        b.iter(|| run_a_matcher(&middle_recursion, 100, 0))
    });

    let no_cache_config = Config { cache_enabled: false, ..Config::default() };
    let no_cache_compiler = GrammarCompiler::new(Arc::clone(&tokenizer), no_cache_config);

    let whitespace_recursion =
        Arc::new(no_cache_compiler.compile_from_regex("( )+").unwrap());
    c.bench_function("whitespace recursion 10 iterations(no cache)", |b| {
        b.iter(|| run_a_matcher(&whitespace_recursion, 10, 3))
    });

    let right_recursion =
        Arc::new(no_cache_compiler.compile_from_ebnf("root ::= \"{\" | \"{\" root\n", "root").unwrap());
    for iterations in [100, 50, 25, 10, 5] {
        c.bench_function(format!("right recursion {iterations} iterations(no cache)"), |b| {
            b.iter(|| run_a_matcher(&right_recursion, iterations, 0))
        });
    }

    let left_recursion =
        Arc::new(no_cache_compiler.compile_from_ebnf("root ::= root \"{\" | \"{\"\n", "root").unwrap());
    c.bench_function("left recursion 100 iterations(no cache)", |b| {
        b.iter(|| run_a_matcher(&left_recursion, 100, 0))
    });

    let alphanumeric = Arc::new(compiler.compile_from_regex("[a-zA-Z0-9_ ]+").unwrap());
    c.bench_function("alphanumeric 5 iterations", |b| b.iter(|| run_a_matcher(&alphanumeric, 5, 4)));

    let always_match = Arc::new(compiler.compile_from_regex(".+").unwrap());
    c.bench_function("always match regex 3 iterations", |b| b.iter(|| run_a_matcher(&always_match, 3, 5)));

    let always_match_no_cache = Arc::new(no_cache_compiler.compile_from_regex(".+").unwrap());
    c.bench_function("always match regex 3 iterations(no cache)", |b| {
        b.iter(|| run_a_matcher(&always_match_no_cache, 3, 5))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
