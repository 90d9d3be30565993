//! Single-flight cache for a view's column schema.
//!
//! The snapshot lives behind an `RwLock` so readers of a populated cache
//! never wait on a fetch. Fetching and populating is serialized by a
//! separate mutex: callers that find the cache empty queue on it, and all
//! but the first find the snapshot already populated once they get in.
//!
//! A failed fetch is shared the same way. Every completed fetch bumps a
//! generation counter; a caller that queued before the fetch finished sees
//! the new generation and returns the recorded failure instead of fetching
//! again. Callers arriving afterwards start a fresh fetch.
//!
//! # Invalidation
//!
//! `invalidate()` only clears the current snapshot. A fetch already in
//! flight still completes and populates the cache; a caller that needs a
//! snapshot fetched after its own invalidation must call `invalidate()`
//! and then `ensure()`.

use crate::error::{ClientError, Result};
use crate::transport::{ApiRequest, Transport};
use crate::types::{ColumnDescriptor, SchemaSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
struct CachedEntry {
    snapshot: Arc<SchemaSnapshot>,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(snapshot: Arc<SchemaSnapshot>) -> Self {
        Self {
            snapshot,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.cached_at.elapsed() >= ttl)
    }
}

/// Outcome of the most recent fetch, guarded by the fetch lock.
#[derive(Default)]
struct FetchState {
    last_failure: Option<Arc<ClientError>>,
}

/// Lazily fetched column schema of one view.
pub struct SchemaCache {
    transport: Arc<dyn Transport>,
    view_id: String,
    ttl: Option<Duration>,
    entry: RwLock<Option<CachedEntry>>,
    fetch_lock: Mutex<FetchState>,
    generation: AtomicU64,
    fetches: AtomicU64,
    invalidations: AtomicU64,
}

impl SchemaCache {
    /// Create an empty cache for `view_id`.
    ///
    /// With `ttl` set, a snapshot older than `ttl` is treated as absent.
    pub fn new(
        transport: Arc<dyn Transport>,
        view_id: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            view_id: view_id.into(),
            ttl,
            entry: RwLock::new(None),
            fetch_lock: Mutex::new(FetchState::default()),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Path of the schema endpoint for this view.
    pub fn columns_path(&self) -> String {
        format!(
            "/api/views/{}/columns.json",
            urlencoding::encode(&self.view_id)
        )
    }

    /// Current snapshot, if present and not expired. Never fetches.
    pub async fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        let entry = self.entry.read().await;
        match entry.as_ref() {
            Some(e) if !e.is_expired(self.ttl) => Some(Arc::clone(&e.snapshot)),
            Some(_) => {
                tracing::debug!(view_id = %self.view_id, "Schema cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Return the cached snapshot, fetching it if absent.
    ///
    /// Concurrent callers on an empty cache share a single fetch and its
    /// outcome. On failure the cache stays empty and the fetching caller
    /// and every caller waiting on it get the same
    /// [`ClientError::SchemaFetchFailed`]; the next `ensure()` fetches again.
    pub async fn ensure(&self) -> Result<Arc<SchemaSnapshot>> {
        let seen = self.generation.load(Ordering::Acquire);

        if let Some(snapshot) = self.snapshot().await {
            tracing::debug!(view_id = %self.view_id, "Schema cache hit");
            return Ok(snapshot);
        }

        let mut state = self.fetch_lock.lock().await;

        // Populated by whoever held the lock before us.
        if let Some(snapshot) = self.snapshot().await {
            return Ok(snapshot);
        }

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(failure) = &state.last_failure {
                tracing::debug!(
                    view_id = %self.view_id,
                    error = %failure,
                    "Sharing failed schema fetch"
                );
                return Err(ClientError::SchemaFetchFailed(Arc::clone(failure)));
            }
        }

        let outcome = self.fetch().await;
        self.generation.fetch_add(1, Ordering::Release);

        let snapshot = match outcome {
            Ok(snapshot) => {
                state.last_failure = None;
                Arc::new(snapshot)
            }
            Err(err) => {
                tracing::warn!(view_id = %self.view_id, error = %err, "Schema fetch failed");
                let err = Arc::new(err);
                state.last_failure = Some(Arc::clone(&err));
                return Err(ClientError::SchemaFetchFailed(err));
            }
        };
        *self.entry.write().await = Some(CachedEntry::new(Arc::clone(&snapshot)));

        tracing::debug!(
            view_id = %self.view_id,
            columns = snapshot.len(),
            "Cached schema"
        );

        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next `ensure()` re-fetches.
    pub async fn invalidate(&self) {
        let mut entry = self.entry.write().await;
        if entry.take().is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(view_id = %self.view_id, "Schema cache invalidated");
        }
    }

    async fn fetch(&self) -> Result<SchemaSnapshot> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let value = self
            .transport
            .send(ApiRequest::get(self.columns_path()))
            .await?;

        let columns: Vec<ColumnDescriptor> = serde_json::from_value(value).map_err(|e| {
            ClientError::InvalidResponse(format!(
                "Failed to parse columns for view {}: {}",
                self.view_id, e
            ))
        })?;

        Ok(SchemaSnapshot::new(columns))
    }

    /// Returns cache statistics.
    pub async fn stats(&self) -> SchemaCacheStats {
        let entry = self.entry.read().await;
        SchemaCacheStats {
            populated: entry.is_some(),
            expired: entry.as_ref().is_some_and(|e| e.is_expired(self.ttl)),
            columns: entry.as_ref().map_or(0, |e| e.snapshot.len()),
            age: entry.as_ref().map(|e| e.cached_at.elapsed()),
            fetches: self.fetches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }
}

/// Schema cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct SchemaCacheStats {
    /// Whether a snapshot is stored (possibly expired)
    pub populated: bool,
    /// Whether the stored snapshot has outlived the TTL
    pub expired: bool,
    /// Number of columns in the stored snapshot
    pub columns: usize,
    /// Time since the stored snapshot was fetched
    pub age: Option<Duration>,
    /// Schema fetches started since creation
    pub fetches: u64,
    /// Invalidations that dropped a snapshot
    pub invalidations: u64,
    /// Configured TTL
    pub ttl: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{columns_json, MockTransport};

    fn cache_with(transport: &Arc<MockTransport>, ttl: Option<Duration>) -> SchemaCache {
        SchemaCache::new(transport.clone() as Arc<dyn Transport>, "it8u-sznv", ttl)
    }

    #[tokio::test]
    async fn test_ensure_fetches_once() {
        let transport = Arc::new(MockTransport::new(columns_json(1, &["objectid", "customtext"])));
        let cache = cache_with(&transport, None);

        let first = cache.ensure().await.unwrap();
        let second = cache.ensure().await.unwrap();

        assert_eq!(transport.column_fetches(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.column_id("customtext"), Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_single_flight() {
        let transport = Arc::new(
            MockTransport::new(columns_json(1, &["objectid"]))
                .with_delay(Duration::from_millis(50)),
        );
        let cache = cache_with(&transport, None);

        let (a, b, c, d) = tokio::join!(cache.ensure(), cache.ensure(), cache.ensure(), cache.ensure());

        assert_eq!(transport.column_fetches(), 1);
        let a = a.unwrap();
        for other in [b.unwrap(), c.unwrap(), d.unwrap()] {
            assert!(Arc::ptr_eq(&a, &other));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_across_tasks() {
        let transport = Arc::new(
            MockTransport::new(columns_json(1, &["objectid"]))
                .with_delay(Duration::from_millis(50)),
        );
        let cache = Arc::new(cache_with(&transport, None));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.ensure().await.map(|s| s.len()) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(transport.column_fetches(), 1);
        assert_eq!(cache.stats().await.fetches, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let transport = Arc::new(MockTransport::new(columns_json(1, &["objectid"])));
        let cache = cache_with(&transport, None);

        assert_eq!(cache.ensure().await.unwrap().column_id("objectid"), Some(1));

        transport.set_columns(columns_json(40, &["objectid"]));
        cache.invalidate().await;
        assert!(cache.snapshot().await.is_none());

        assert_eq!(cache.ensure().await.unwrap().column_id("objectid"), Some(40));
        assert_eq!(transport.column_fetches(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.invalidations, 1);
        assert!(stats.populated);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_cache_empty() {
        let transport = Arc::new(MockTransport::new(columns_json(1, &["objectid"])));
        transport.fail_columns(true);
        let cache = cache_with(&transport, None);

        let err = cache.ensure().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::SchemaFetchFailed(ref source)
                if matches!(**source, ClientError::Api { status: 503, .. })
        ));
        assert!(!cache.stats().await.populated);

        transport.fail_columns(false);
        assert!(cache.ensure().await.is_ok());
        assert_eq!(transport.column_fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_shares_failure() {
        let transport = Arc::new(
            MockTransport::new(columns_json(1, &["objectid"]))
                .with_delay(Duration::from_millis(50)),
        );
        transport.fail_columns(true);
        let cache = cache_with(&transport, None);

        let (a, b, c, d) = tokio::join!(cache.ensure(), cache.ensure(), cache.ensure(), cache.ensure());

        assert_eq!(transport.column_fetches(), 1);
        let errors: Vec<_> = [a, b, c, d].into_iter().map(|r| r.unwrap_err()).collect();
        let first = match &errors[0] {
            ClientError::SchemaFetchFailed(source) => Arc::clone(source),
            other => panic!("Expected SchemaFetchFailed, got: {:?}", other),
        };
        for err in &errors[1..] {
            match err {
                ClientError::SchemaFetchFailed(source) => assert!(Arc::ptr_eq(source, &first)),
                other => panic!("Expected SchemaFetchFailed, got: {:?}", other),
            }
        }
        assert!(!cache.stats().await.populated);

        // A caller arriving after the failure fetches again.
        transport.fail_columns(false);
        assert_eq!(cache.ensure().await.unwrap().len(), 1);
        assert_eq!(transport.column_fetches(), 2);
    }

    #[tokio::test]
    async fn test_malformed_columns_rejected() {
        let transport = Arc::new(MockTransport::new(serde_json::json!({"not": "a list"})));
        let cache = cache_with(&transport, None);

        match cache.ensure().await {
            Err(ClientError::SchemaFetchFailed(source)) => match &*source {
                ClientError::InvalidResponse(msg) => assert!(msg.contains("it8u-sznv")),
                other => panic!("Expected InvalidResponse, got: {:?}", other),
            },
            other => panic!("Expected SchemaFetchFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let transport = Arc::new(MockTransport::new(columns_json(1, &["objectid"])));
        let cache = cache_with(&transport, Some(Duration::from_millis(50)));

        cache.ensure().await.unwrap();
        assert!(cache.snapshot().await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.snapshot().await.is_none());
        assert!(cache.stats().await.expired);
        cache.ensure().await.unwrap();
        assert_eq!(transport.column_fetches(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_on_empty_cache_is_noop() {
        let transport = Arc::new(MockTransport::new(columns_json(1, &["objectid"])));
        let cache = cache_with(&transport, None);

        cache.invalidate().await;
        assert_eq!(cache.stats().await.invalidations, 0);
        assert_eq!(transport.column_fetches(), 0);
    }

    #[test]
    fn test_columns_path_encodes_view_id() {
        let transport = Arc::new(MockTransport::new(serde_json::Value::Null));
        let cache = SchemaCache::new(transport as Arc<dyn Transport>, "ab cd/1", None);
        assert_eq!(cache.columns_path(), "/api/views/ab%20cd%2F1/columns.json");
    }
}
