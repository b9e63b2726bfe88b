//! Request-scoped memoization of check results.
//!
//! Within one request a check verdict is assumed referentially transparent:
//! the same check against the same resource and change descriptor always
//! returns the same answer. The cache guarantees each such combination is
//! invoked at most once per request, even when the check appears in several
//! expressions or the same expression is re-evaluated at commit time.

use metrics::{counter, describe_counter};

use super::ExpressionResult;
use crate::check::{ChangeDescriptor, Resource};
use std::collections::HashMap;

const CACHE_HITS: &str = "rspex_expression_cache_hits_total";
const CACHE_MISSES: &str = "rspex_expression_cache_misses_total";

/// Identity of one check evaluation: the registered check name, the
/// resource identity (absent for user-scope leaves) and the changed
/// field (absent outside mutations).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    check: String,
    resource: Option<(String, String)>,
    change: Option<String>,
}

impl CacheKey {
    pub fn new(
        check: &str,
        resource: Option<&Resource>,
        change: Option<&ChangeDescriptor>,
    ) -> Self {
        Self {
            check: check.to_string(),
            resource: resource.map(|r| (r.type_name().to_string(), r.id().to_string())),
            change: change.map(|c| c.field().to_string()),
        }
    }
}

/// Memoized check results for the lifetime of one request. Not thread-safe
/// by design: one instance per request, threaded through evaluation as
/// `&mut`, dropped when the request ends.
#[derive(Debug, Default)]
pub struct ExpressionResultCache {
    results: HashMap<CacheKey, ExpressionResult>,
}

impl ExpressionResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<ExpressionResult> {
        let result = self.results.get(key).copied();
        if result.is_some() {
            counter!(CACHE_HITS).increment(1);
        } else {
            counter!(CACHE_MISSES).increment(1);
        }
        result
    }

    pub fn insert(&mut self, key: CacheKey, result: ExpressionResult) {
        self.results.insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Registers descriptions for the expression-cache metrics.
pub fn register_expression_cache_metrics() {
    describe_counter!(CACHE_HITS, "Number of expression result cache hits");
    describe_counter!(CACHE_MISSES, "Number of expression result cache misses");
}
