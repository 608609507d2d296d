//! Content-addressed cache keys.
//!
//! A key is `"{namespace}:{operation}:{digest}"` where the digest is the
//! SHA-256 of a canonical JSON rendering of the call parameters. The readable
//! prefix keeps bulk invalidation by pattern possible (`"weather:*"`), the
//! digest bounds the key length.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Header names whose values change what an upstream returns for the caller.
pub const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "x-api-key", "x-auth-token"];

/// Namespace used for raw HTTP response caching.
pub const HTTP_NAMESPACE: &str = "http_cache";

/// Primitive parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Call parameters: positional arguments keep their order, named parameters
/// are sorted by name and `Null` named parameters are dropped.
///
/// HTTP query parameters and credential headers are kept apart from named
/// parameters so no parameter name can collide with them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyParams {
    positional: Vec<ParamValue>,
    named: BTreeMap<String, ParamValue>,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<ParamValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.named.remove(&name);
        } else {
            self.named.insert(name, value);
        }
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds the sensitive subset of `headers`, matched case-insensitively.
    pub fn sensitive_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (name, value) in headers {
            let lowered = name.to_ascii_lowercase();
            if SENSITIVE_HEADERS.contains(&lowered.as_str()) {
                self.headers.insert(lowered, value.clone());
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
            && self.named.is_empty()
            && self.query.is_empty()
            && self.headers.is_empty()
    }
}

/// Derived, deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already-derived key, e.g. one read back from the store.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct CanonicalCall<'a> {
    namespace: &'a str,
    operation: &'a str,
    args: &'a [ParamValue],
    params: &'a BTreeMap<String, ParamValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    query: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: &'a BTreeMap<String, String>,
}

/// Derives the key for `operation` in `namespace` called with `params`.
///
/// Pure: no I/O, same output for the same logical input for the life of the process.
pub fn make_key(namespace: &str, operation: &str, params: &KeyParams) -> CacheKey {
    let canonical = CanonicalCall {
        namespace,
        operation,
        args: &params.positional,
        params: &params.named,
        query: &params.query,
        headers: &params.headers,
    };
    // Serializing plain values and a BTreeMap into a Vec cannot fail.
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let digest = hex::encode(hasher.finalize());

    CacheKey(format!("{namespace}:{operation}:{digest}"))
}

/// Pattern matching every key of `namespace`, optionally narrowed to `operation`.
pub fn namespace_pattern(namespace: &str, operation: Option<&str>) -> String {
    match operation {
        Some(operation) => format!("{namespace}:{operation}:*"),
        None => format!("{namespace}:*"),
    }
}
