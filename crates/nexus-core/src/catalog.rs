//! Cached provider operations and their freshness windows.

use std::time::Duration;

use crate::cache_key::{make_key, namespace_pattern, CacheKey, KeyParams};

/// A logical operation whose results are cached for `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedOperation {
    pub namespace: &'static str,
    pub operation: &'static str,
    pub ttl: Duration,
}

impl CachedOperation {
    pub const fn new(namespace: &'static str, operation: &'static str, ttl: Duration) -> Self {
        Self {
            namespace,
            operation,
            ttl,
        }
    }

    pub fn key(&self, params: &KeyParams) -> CacheKey {
        make_key(self.namespace, self.operation, params)
    }

    /// Pattern covering every cached result of this operation.
    pub fn pattern(&self) -> String {
        namespace_pattern(self.namespace, Some(self.operation))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

pub const WEATHER_CURRENT: CachedOperation =
    CachedOperation::new("weather", "current", Duration::from_secs(30 * MINUTE));
pub const WEATHER_FORECAST: CachedOperation =
    CachedOperation::new("weather", "forecast", Duration::from_secs(HOUR));
pub const NEWS_HEADLINES: CachedOperation =
    CachedOperation::new("news", "headlines", Duration::from_secs(30 * MINUTE));
pub const NEWS_SEARCH: CachedOperation =
    CachedOperation::new("news", "search", Duration::from_secs(HOUR));
pub const NEWS_SOURCES: CachedOperation =
    CachedOperation::new("news", "sources", Duration::from_secs(HOUR));
pub const BOOKS_SEARCH: CachedOperation =
    CachedOperation::new("books", "search", Duration::from_secs(HOUR));
pub const BOOK_DETAILS: CachedOperation =
    CachedOperation::new("books", "details", Duration::from_secs(2 * HOUR));
pub const COUNTRIES_ALL: CachedOperation =
    CachedOperation::new("countries", "all", Duration::from_secs(24 * HOUR));
pub const COUNTRY_DETAIL: CachedOperation =
    CachedOperation::new("countries", "detail", Duration::from_secs(12 * HOUR));
pub const COUNTRIES_REGION: CachedOperation =
    CachedOperation::new("countries", "region", Duration::from_secs(6 * HOUR));
pub const POSTAL_CODE: CachedOperation =
    CachedOperation::new("cep", "lookup", Duration::from_secs(24 * HOUR));

/// Every known operation, for lookup by name.
pub const ALL: [CachedOperation; 11] = [
    WEATHER_CURRENT,
    WEATHER_FORECAST,
    NEWS_HEADLINES,
    NEWS_SEARCH,
    NEWS_SOURCES,
    BOOKS_SEARCH,
    BOOK_DETAILS,
    COUNTRIES_ALL,
    COUNTRY_DETAIL,
    COUNTRIES_REGION,
    POSTAL_CODE,
];

/// Finds an operation by `"namespace.operation"`.
pub fn find(name: &str) -> Option<CachedOperation> {
    let (namespace, operation) = name.split_once('.')?;
    ALL.iter()
        .copied()
        .find(|op| op.namespace == namespace && op.operation == operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttls_match_provider_freshness() {
        assert_eq!(WEATHER_CURRENT.ttl.as_secs(), 1800);
        assert_eq!(BOOK_DETAILS.ttl.as_secs(), 7200);
        assert_eq!(COUNTRIES_ALL.ttl.as_secs(), 86_400);
        assert_eq!(COUNTRIES_REGION.ttl.as_secs(), 21_600);
    }

    #[test]
    fn operations_are_found_by_dotted_name() {
        assert_eq!(find("news.search"), Some(NEWS_SEARCH));
        assert_eq!(find("cep.lookup"), Some(POSTAL_CODE));
        assert_eq!(find("news"), None);
        assert_eq!(find("news.unknown"), None);
    }

    #[test]
    fn operation_keys_fall_under_operation_pattern() {
        let key = WEATHER_FORECAST.key(&KeyParams::new().param("city", "Belem"));
        let prefix = WEATHER_FORECAST.pattern();
        assert!(key.as_str().starts_with(prefix.trim_end_matches('*')));
    }
}
