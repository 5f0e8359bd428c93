use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::FaceIdError;
use crate::store::IdentityStore;
use crate::types::Identity;

struct Snapshot {
    identities: Arc<Vec<Identity>>,
    refreshed: Option<Instant>,
    refreshed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    /// Seconds since the last full refresh; `None` before the first one.
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// In-memory snapshot of every identity in an [`IdentityStore`].
///
/// Reads never touch the store: [`get`](Self::get) hands out the current
/// `Arc`, which stays valid while a later [`refresh`](Self::refresh) swaps
/// in a new collection. Write-through updates replace the live collection
/// copy-on-write.
pub struct IdentityCache {
    store: Arc<dyn IdentityStore>,
    page_size: usize,
    ttl: Duration,
    snapshot: RwLock<Snapshot>,
}

impl IdentityCache {
    pub fn new(store: Arc<dyn IdentityStore>, page_size: usize, ttl: Duration) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            ttl,
            snapshot: RwLock::new(Snapshot {
                identities: Arc::new(Vec::new()),
                refreshed: None,
                refreshed_at: None,
                updated_at: None,
            }),
        }
    }

    /// Returns the current snapshot. Empty before the first refresh.
    pub fn get(&self) -> Arc<Vec<Identity>> {
        Arc::clone(&self.snapshot.read().identities)
    }

    /// Reloads every identity from the store and swaps the result in.
    ///
    /// On a store error the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<usize, FaceIdError> {
        let start = Instant::now();
        let mut identities = Vec::new();
        let mut page = 1;
        loop {
            let rows = self.store.list(page, self.page_size).await?;
            let n = rows.len();
            identities.extend(rows.into_iter().map(|r| r.into_identity()));
            debug!("faceid: cache page {page}: {n} rows");
            if n < self.page_size {
                break;
            }
            page += 1;
        }

        let count = identities.len();
        let now = Utc::now();
        {
            let mut snap = self.snapshot.write();
            snap.identities = Arc::new(identities);
            snap.refreshed = Some(Instant::now());
            snap.refreshed_at = Some(now);
            snap.updated_at = Some(now);
        }
        info!(
            "faceid: cache refreshed: {count} identities in {:?}",
            start.elapsed()
        );
        Ok(count)
    }

    /// Forces an immediate reload.
    pub async fn invalidate(&self) -> Result<usize, FaceIdError> {
        self.refresh().await
    }

    /// Replaces the identity with the same id, or appends it.
    pub fn add_or_update(&self, identity: Identity) {
        let mut snap = self.snapshot.write();
        let list = Arc::make_mut(&mut snap.identities);
        match list.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => list.push(identity),
        }
        snap.updated_at = Some(Utc::now());
    }

    /// Drops an identity from the snapshot. Returns false if absent.
    pub fn remove(&self, id: &str) -> bool {
        let mut snap = self.snapshot.write();
        let Some(pos) = snap.identities.iter().position(|i| i.id == id) else {
            return false;
        };
        Arc::make_mut(&mut snap.identities).remove(pos);
        snap.updated_at = Some(Utc::now());
        true
    }

    pub fn find(&self, id: &str) -> Option<Identity> {
        self.snapshot.read().identities.iter().find(|i| i.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the last full refresh is at least one TTL old, or if there
    /// never was one.
    pub fn is_expired(&self) -> bool {
        match self.snapshot.read().refreshed {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let snap = self.snapshot.read();
        CacheStats {
            count: snap.identities.len(),
            age_secs: snap.refreshed.map(|at| at.elapsed().as_secs()),
            ttl_secs: self.ttl.as_secs(),
            refreshed_at: snap.refreshed_at,
            updated_at: snap.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Embedding, IdentityRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn people(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| {
                Identity::new(format!("p{i}"), format!("P{i}"))
                    .with_embeddings(vec![vec![i as f32]])
            })
            .collect()
    }

    fn cache_over(store: Arc<dyn IdentityStore>, page_size: usize) -> IdentityCache {
        IdentityCache::new(store, page_size, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn empty_before_refresh() {
        let cache = cache_over(Arc::new(MemoryStore::from_identities(&people(3))), 500);
        assert!(cache.get().is_empty());
        assert!(cache.is_expired());
        assert_eq!(cache.stats().age_secs, None);
    }

    #[tokio::test]
    async fn refresh_reads_every_page() {
        let cache = cache_over(Arc::new(MemoryStore::from_identities(&people(7))), 3);
        assert_eq!(cache.refresh().await.unwrap(), 7);
        let snap = cache.get();
        assert_eq!(snap.len(), 7);
        assert_eq!(snap[6].id, "p6");
        assert!(!cache.is_expired());
        assert!(cache.stats().refreshed_at.is_some());
    }

    #[tokio::test]
    async fn refresh_exact_multiple_of_page_size() {
        let cache = cache_over(Arc::new(MemoryStore::from_identities(&people(6))), 3);
        assert_eq!(cache.refresh().await.unwrap(), 6);
    }

    /// Store that counts pages and can be told to fail.
    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
        pages: AtomicUsize,
    }

    #[async_trait]
    impl IdentityStore for FlakyStore {
        async fn list(
            &self,
            page: usize,
            page_size: usize,
        ) -> Result<Vec<IdentityRecord>, FaceIdError> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FaceIdError::Store("connection reset".into()));
            }
            self.inner.list(page, page_size).await
        }

        async fn upsert(
            &self,
            id: &str,
            name: &str,
            embedding: Embedding,
        ) -> Result<Identity, FaceIdError> {
            self.inner.upsert(id, name, embedding).await
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::from_identities(&people(4)),
            fail: AtomicBool::new(false),
            pages: AtomicUsize::new(0),
        });
        let cache = cache_over(store.clone(), 500);
        cache.refresh().await.unwrap();
        let before = cache.get();

        store.fail.store(true, Ordering::SeqCst);
        let err = cache.invalidate().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(Arc::ptr_eq(&before, &cache.get()));
        assert_eq!(store.pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn readers_keep_old_snapshot_across_swap() {
        let store = Arc::new(MemoryStore::from_identities(&people(2)));
        let cache = cache_over(store.clone(), 500);
        cache.refresh().await.unwrap();
        let old = cache.get();

        store.upsert("p9", "P9", vec![9.0]).await.unwrap();
        cache.refresh().await.unwrap();

        assert_eq!(old.len(), 2);
        assert_eq!(cache.get().len(), 3);
    }

    #[tokio::test]
    async fn add_or_update_is_copy_on_write() {
        let cache = cache_over(Arc::new(MemoryStore::from_identities(&people(2))), 500);
        cache.refresh().await.unwrap();
        let old = cache.get();

        cache.add_or_update(Identity::new("p1", "Renamed"));
        cache.add_or_update(Identity::new("p5", "New"));

        assert_eq!(old[1].name, "P1");
        let snap = cache.get();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[1].name, "Renamed");
        assert_eq!(cache.find("p5").map(|i| i.name), Some("New".into()));
    }

    #[tokio::test]
    async fn remove_drops_identity() {
        let cache = cache_over(Arc::new(MemoryStore::from_identities(&people(3))), 500);
        cache.refresh().await.unwrap();
        assert!(cache.remove("p0"));
        assert!(!cache.remove("p0"));
        assert_eq!(cache.len(), 2);
        assert!(cache.find("p0").is_none());
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let cache = IdentityCache::new(store, 500, Duration::ZERO);
        cache.refresh().await.unwrap();
        assert!(cache.is_expired());
        assert_eq!(cache.stats().ttl_secs, 0);
    }
}
