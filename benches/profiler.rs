use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grammask::{Config, GrammarCompiler, GrammarMatcher, Token, TokenizerInfo, VocabType};

fn tokenizer() -> Arc<TokenizerInfo> {
    let mut id_to_token = AHashMap::default();
    let mut id_to_token_string = AHashMap::default();
    for (id, s) in [(0u32, "a"), (1, "b"), (2, "c")] {
        id_to_token.insert(id, Token(s.as_bytes().to_vec().into_boxed_slice()));
        id_to_token_string.insert(id, s.to_string());
    }
    Arc::new(TokenizerInfo::new(id_to_token, id_to_token_string, VocabType::Raw, None, vec![], vec![], false).unwrap())
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut c = c.benchmark_group("Complement");
    c.measurement_time(Duration::from_secs(10)).sample_size(100);
    let tokenizer = tokenizer();
    let no_cache_config = Config { cache_enabled: false, ..Config::default() };
    let compiler = GrammarCompiler::new(Arc::clone(&tokenizer), no_cache_config);
    let compiled = Arc::new(compiler.compile_from_regex("[^abc]").unwrap());
    c.bench_function("regex with complement 3 iterations(no cache)", |b| {
        b.iter(|| {
            let mut matcher = GrammarMatcher::new(Arc::clone(&compiled), None, false, 0).unwrap();
            for _ in 0..3 {
                let _ = matcher.accept_string(black_box(b"d"));
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
