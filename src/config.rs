//! Configuration for [`crate::compiler::GrammarCompiler`]: a small
//! user-facing struct with sane defaults, converted once into the resolved
//! settings the compiler's thread pool and cache actually use.
use serde::{Deserialize, Serialize};

/// The resolved, internal configuration built from a [`Config`]. Kept
/// separate from `Config` so advanced callers (and the compiler itself) can
/// construct one without going through serde-friendly defaults.
#[derive(Debug, Clone)]
pub struct InternalConfig {
    pub max_threads: usize,
    pub cache_enabled: bool,
    pub max_memory_bytes: Option<usize>,
    pub start_rule_name: String,
}

/// The configuration of a [`crate::compiler::GrammarCompiler`]: a bounded
/// worker pool, an optional size-bounded compiled-grammar cache, and the
/// EBNF rule name compilation starts from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Config {
    /// Number of worker threads used to compile grammars and precompute
    /// token masks. The default is 8.
    pub max_threads: usize,
    /// Whether compiled grammars and precomputed masks are cached and
    /// reused across calls with the same inputs. The default is `true`.
    pub cache_enabled: bool,
    /// Soft cap, in bytes, on the cache's retained memory. `None` means
    /// unbounded. The default is `None`.
    pub max_memory_bytes: Option<usize>,
    /// The EBNF rule name compilation starts from. The default is `root`.
    pub start_rule_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_threads: 8, cache_enabled: true, max_memory_bytes: None, start_rule_name: "root".to_string() }
    }
}

impl Config {
    pub fn internal_config(self) -> InternalConfig {
        InternalConfig {
            max_threads: self.max_threads,
            cache_enabled: self.cache_enabled,
            max_memory_bytes: self.max_memory_bytes,
            start_rule_name: self.start_rule_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let c = Config::default();
        assert_eq!(c.max_threads, 8);
        assert!(c.cache_enabled);
        assert_eq!(c.max_memory_bytes, None);
        assert_eq!(c.start_rule_name, "root");
    }
}
