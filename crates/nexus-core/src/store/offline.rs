//! Store stand-in used when the real store could not be reached.
//!
//! Every call fails with [`StoreError::Unavailable`], which the orchestrator
//! and the rate limiter treat as "degrade and carry on".

use std::time::Duration;

use super::{KeyValueStore, StoreFuture, WindowOutcome, WindowRequest};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct OfflineStore {
    reason: String,
}

impl OfflineStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn unavailable<'a, T: Send + 'a>(&'a self) -> StoreFuture<'a, T> {
        Box::pin(async move { Err(StoreError::Unavailable(self.reason.clone())) })
    }
}

impl KeyValueStore for OfflineStore {
    fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        self.unavailable()
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _value: Vec<u8>,
        _ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        self.unavailable()
    }

    fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
        self.unavailable()
    }

    fn exists<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
        self.unavailable()
    }

    fn delete_pattern<'a>(&'a self, _pattern: &'a str) -> StoreFuture<'a, u64> {
        self.unavailable()
    }

    fn admit_in_window<'a>(
        &'a self,
        _key: &'a str,
        _request: WindowRequest,
    ) -> StoreFuture<'a, WindowOutcome> {
        self.unavailable()
    }

    fn health_check<'a>(&'a self) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(false) })
    }

    fn provider_name(&self) -> &'static str {
        "offline"
    }
}
