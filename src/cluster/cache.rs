//! Single-flight search result cache.
//!
//! Requests are keyed by their canonical JSON form. The first caller for a
//! key runs the search; concurrent callers with the same key wait for that
//! execution instead of fanning out again. Unsuccessful results are
//! dropped from the cache as soon as they are handed back.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::search::request::SearchRequest;
use crate::search::result::MergedResult;

type Slot = Arc<OnceCell<MergedResult>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls answered by an earlier or in-flight execution.
    pub hits: u64,
    /// Calls that ran the search themselves.
    pub misses: u64,
    /// Failed results removed after being returned.
    pub invalidations: u64,
}

#[derive(Debug)]
pub struct ResultCache {
    entries: Mutex<LruCache<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Canonical cache key of a request.
    pub fn key(request: &SearchRequest) -> Result<String> {
        Ok(serde_json::to_string(request)?)
    }

    /// Return the cached result for `request`, running `search` at most once
    /// per key among concurrent callers.
    pub async fn get_or_execute<F, Fut>(&self, request: &SearchRequest, search: F) -> MergedResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MergedResult>,
    {
        let key = match Self::key(request) {
            Ok(key) => key,
            Err(e) => {
                debug!("request not cacheable: {e}");
                return search().await;
            }
        };
        let slot: Slot = self
            .entries
            .lock()
            .get_or_insert(key.clone(), || Arc::new(OnceCell::new()))
            .clone();

        let mut ran = false;
        let result = slot
            .get_or_init(|| {
                ran = true;
                search()
            })
            .await
            .clone();

        if ran {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        if !result.success {
            let mut entries = self.entries.lock();
            if entries.peek(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                entries.pop(&key);
                self.invalidations.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
