use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, IdentityCache};
use crate::config::MatcherConfig;
use crate::encoder::FaceEncoder;
use crate::error::FaceIdError;
use crate::exact::ExactMatcher;
use crate::index::{IndexStats, VectorIndex};
use crate::store::IdentityStore;
use crate::types::{Embedding, Identity, MatchResult};

/// Which strategy answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    Index,
}

/// Combined cache and index statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatcherStats {
    pub mode: MatchMode,
    pub cache: CacheStats,
    pub index: IndexStats,
    pub pending_inserts: usize,
}

/// Matches a query embedding against the snapshot `identities`.
///
/// Uses `index` when given and ready, otherwise scans exactly.
fn select_and_match(
    query: &[f32],
    identities: &[Identity],
    index: Option<&VectorIndex>,
    exact: &ExactMatcher,
    dim: usize,
) -> Result<MatchResult, FaceIdError> {
    if query.len() != dim {
        return Err(FaceIdError::DimensionMismatch {
            expected: dim,
            got: query.len(),
        });
    }

    let Some(index) = index.filter(|i| i.is_ready()) else {
        return exact.search(query, identities);
    };
    if !identities.iter().any(Identity::has_embeddings) {
        return Err(FaceIdError::NoIdentities);
    }

    let hit = index
        .search_knn(query, 1)?
        .into_iter()
        .next()
        .ok_or(FaceIdError::NotRecognized { distance: None })?;
    if hit.distance > exact.threshold() {
        return Err(FaceIdError::NotRecognized {
            distance: Some(hit.distance),
        });
    }
    let identity = identities
        .iter()
        .find(|i| i.id == hit.identity_id)
        .ok_or(FaceIdError::IdentityNotFound(hit.identity_id))?;
    Ok(MatchResult {
        identity: identity.clone(),
        distance: hit.distance,
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, FaceIdError>
where
    F: FnOnce() -> Result<T, FaceIdError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FaceIdError::Worker(e.to_string()))?
}

/// Face matching façade: owns the identity cache and the vector index and
/// picks the strategy per query.
///
/// Small populations are scanned exactly. Once [`bootstrap`](Self::bootstrap)
/// sees at least `index_min_identities`, queries go through the HNSW index.
pub struct FaceMatcher {
    cfg: MatcherConfig,
    store: Arc<dyn IdentityStore>,
    cache: Arc<IdentityCache>,
    index: Arc<VectorIndex>,
    exact: ExactMatcher,
    index_enabled: AtomicBool,
}

impl FaceMatcher {
    pub fn new(cfg: MatcherConfig, store: Arc<dyn IdentityStore>) -> Result<Self, FaceIdError> {
        let cache = Arc::new(IdentityCache::new(
            Arc::clone(&store),
            cfg.page_size,
            cfg.cache_ttl(),
        ));
        let index = Arc::new(VectorIndex::new(cfg.hnsw_config()));
        Self::with_parts(cfg, store, cache, index)
    }

    /// Assembles a matcher around an existing cache and index.
    pub fn with_parts(
        cfg: MatcherConfig,
        store: Arc<dyn IdentityStore>,
        cache: Arc<IdentityCache>,
        index: Arc<VectorIndex>,
    ) -> Result<Self, FaceIdError> {
        cfg.validate()?;
        if index.dimension() != cfg.dimension {
            return Err(FaceIdError::Config(format!(
                "index dimension {} does not match {}",
                index.dimension(),
                cfg.dimension
            )));
        }
        Ok(Self {
            exact: ExactMatcher::new(cfg.threshold),
            cfg,
            store,
            cache,
            index,
            index_enabled: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn set_index_enabled(&self, enabled: bool) {
        self.index_enabled.store(enabled, Ordering::Release);
    }

    pub fn index_enabled(&self) -> bool {
        self.index_enabled.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> MatchMode {
        if self.index_enabled() && self.index.is_ready() {
            MatchMode::Index
        } else {
            MatchMode::Exact
        }
    }

    /// Loads the cache and prepares the strategy for its size.
    ///
    /// At or above the cutoff the index is loaded from `index_path`, or
    /// built (and saved) when there is no usable file.
    pub async fn bootstrap(&self) -> Result<MatchMode, FaceIdError> {
        let count = self.cache.refresh().await?;
        if count < self.cfg.index_min_identities {
            self.set_index_enabled(false);
            info!(
                "faceid: {count} identities below index cutoff {}, using exact matching",
                self.cfg.index_min_identities
            );
            return Ok(MatchMode::Exact);
        }

        let identities = self.cache.get();
        let index = Arc::clone(&self.index);
        let path = self.cfg.index_path.clone();
        let ratio = self.cfg.rebuild_tombstone_ratio;
        run_blocking(move || prepare_index(&index, &identities, path, ratio)).await?;

        self.set_index_enabled(true);
        info!("faceid: {count} identities, using vector index");
        Ok(self.mode())
    }

    /// Matches `query` against `identities` with the current strategy.
    pub fn match_face(
        &self,
        query: &[f32],
        identities: &[Identity],
    ) -> Result<MatchResult, FaceIdError> {
        let index = self.index_enabled().then_some(self.index.as_ref());
        select_and_match(query, identities, index, &self.exact, self.cfg.dimension)
    }

    /// Matches `query` against the cached snapshot. Large snapshots are
    /// matched on a blocking worker.
    pub async fn identify(&self, query: Embedding) -> Result<MatchResult, FaceIdError> {
        let identities = self.cache.get();
        let embeddings: usize = identities.iter().map(|i| i.embeddings.len()).sum();
        if embeddings < self.cfg.offload_min_embeddings {
            return self.match_face(&query, &identities);
        }

        let index = self.index_enabled().then(|| Arc::clone(&self.index));
        let exact = self.exact;
        let dim = self.cfg.dimension;
        run_blocking(move || {
            select_and_match(&query, &identities, index.as_deref(), &exact, dim)
        })
        .await
    }

    /// Runs `encoder` on a captured image and identifies the face.
    pub async fn identify_image(
        &self,
        encoder: &dyn FaceEncoder,
        image: &[u8],
    ) -> Result<MatchResult, FaceIdError> {
        let detection = encoder.detect(image).await?;
        debug!("faceid: detected face, score {:.3}", detection.confidence);
        self.identify(detection.embedding).await
    }

    /// Stores a new embedding for `id` and makes it matchable right away.
    ///
    /// Index and checkpoint failures are logged; the enrollment itself
    /// succeeds once the store has accepted it.
    pub async fn enroll(
        &self,
        id: &str,
        name: &str,
        embedding: Embedding,
    ) -> Result<Identity, FaceIdError> {
        if embedding.len() != self.cfg.dimension {
            return Err(FaceIdError::DimensionMismatch {
                expected: self.cfg.dimension,
                got: embedding.len(),
            });
        }

        let identity = self.store.upsert(id, name, embedding).await?;
        self.cache.add_or_update(identity.clone());

        if let Some(slot) = identity.embeddings.len().checked_sub(1) {
            match self
                .index
                .add_descriptor(id, &identity.embeddings[slot], slot)
            {
                Ok(_) => self.checkpoint().await,
                Err(FaceIdError::IndexNotReady) => {}
                Err(e) => warn!("faceid: index insert for {id} failed: {e}"),
            }
        }
        info!(
            "faceid: enrolled {id} ({} embeddings)",
            identity.embeddings.len()
        );
        Ok(identity)
    }

    /// Runs `encoder` on a captured image and enrolls the face.
    pub async fn enroll_image(
        &self,
        encoder: &dyn FaceEncoder,
        id: &str,
        name: &str,
        image: &[u8],
    ) -> Result<Identity, FaceIdError> {
        let detection = encoder.detect(image).await?;
        self.enroll(id, name, detection.embedding).await
    }

    /// Drops an identity that was deleted from the store. Returns false if
    /// neither the cache nor the index knew it.
    pub async fn forget(&self, id: &str) -> Result<bool, FaceIdError> {
        let cached = self.cache.remove(id);
        let tombstoned = self.index.tombstone(id);
        debug!("faceid: forgot {id}: {tombstoned} index entries tombstoned");
        if self.index.needs_rebuild(self.cfg.rebuild_tombstone_ratio) {
            self.rebuild_index().await?;
        }
        Ok(cached || tombstoned > 0)
    }

    /// Rebuilds the index from the cached snapshot and saves it when an
    /// index path is configured.
    pub async fn rebuild_index(&self) -> Result<usize, FaceIdError> {
        let identities = self.cache.get();
        let index = Arc::clone(&self.index);
        let path = self.cfg.index_path.clone();
        run_blocking(move || {
            let n = index.build_index(&identities)?;
            if let Some(path) = path {
                save_logged(&index, &path);
            }
            Ok(n)
        })
        .await
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            mode: self.mode(),
            cache: self.cache.stats(),
            index: self.index.stats(),
            pending_inserts: self.index.pending_inserts(),
        }
    }

    async fn checkpoint(&self) {
        let interval = self.cfg.checkpoint_interval;
        if interval == 0 || self.index.pending_inserts() < interval {
            return;
        }
        let Some(path) = self.cfg.index_path.clone() else {
            return;
        };
        let index = Arc::clone(&self.index);
        let res = run_blocking(move || {
            save_logged(&index, &path);
            Ok(())
        })
        .await;
        if let Err(e) = res {
            warn!("faceid: checkpoint failed: {e}");
        }
    }
}

fn save_logged(index: &VectorIndex, path: &std::path::Path) {
    if let Err(e) = index.save_index(path) {
        warn!("faceid: saving index to {} failed: {e}", path.display());
    }
}

/// Loads the index file when present, otherwise builds from scratch.
fn prepare_index(
    index: &VectorIndex,
    identities: &[Identity],
    path: Option<PathBuf>,
    rebuild_ratio: f64,
) -> Result<(), FaceIdError> {
    if let Some(path) = path.as_deref() {
        if path.exists() {
            match index.load_index(path, identities) {
                Ok(_) if index.needs_rebuild(rebuild_ratio) => {
                    info!("faceid: loaded index is too stale, rebuilding");
                }
                Ok(_) => {
                    if index.pending_inserts() > 0 {
                        save_logged(index, path);
                    }
                    return Ok(());
                }
                Err(e) => warn!("faceid: loading index failed, rebuilding: {e}"),
            }
        }
    }

    index.build_index(identities)?;
    if let Some(path) = path.as_deref() {
        save_logged(index, path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn matcher(cfg: MatcherConfig, store: MemoryStore) -> FaceMatcher {
        FaceMatcher::new(cfg, Arc::new(store)).unwrap()
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let m = matcher(MatcherConfig::default().with_dimension(4), MemoryStore::new());
        assert!(matches!(
            m.match_face(&[0.0; 3], &[]),
            Err(FaceIdError::DimensionMismatch { expected: 4, got: 3 })
        ));
        assert!(matches!(
            m.enroll("a", "A", vec![0.0; 5]).await,
            Err(FaceIdError::DimensionMismatch { expected: 4, got: 5 })
        ));
    }

    #[tokio::test]
    async fn mismatched_index_is_config_error() {
        let cfg = MatcherConfig::default().with_dimension(4);
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let cache = Arc::new(IdentityCache::new(
            Arc::clone(&store),
            cfg.page_size,
            cfg.cache_ttl(),
        ));
        let index = Arc::new(VectorIndex::new(cfg.clone().with_dimension(8).hnsw_config()));
        assert!(matches!(
            FaceMatcher::with_parts(cfg, store, cache, index),
            Err(FaceIdError::Config(_))
        ));
    }

    #[tokio::test]
    async fn enroll_without_index_uses_exact() {
        let m = matcher(MatcherConfig::default().with_dimension(2), MemoryStore::new());
        assert_eq!(m.bootstrap().await.unwrap(), MatchMode::Exact);
        assert!(matches!(
            m.identify(vec![0.0, 0.0]).await,
            Err(FaceIdError::NoIdentities)
        ));

        m.enroll("a", "Alice", vec![0.1, 0.1]).await.unwrap();
        let r = m.identify(vec![0.1, 0.1]).await.unwrap();
        assert_eq!(r.identity.id, "a");
        assert_eq!(r.distance, 0.0);
        assert_eq!(m.stats().index.total, 0);
    }

    #[tokio::test]
    async fn index_drift_is_identity_not_found() {
        let cfg = MatcherConfig::default().with_dimension(2).with_seed(1);
        let m = matcher(cfg, MemoryStore::new());
        let snapshot = vec![Identity::new("a", "A").with_embeddings(vec![vec![0.0, 0.0]])];
        m.index().build_index(&snapshot).unwrap();
        m.set_index_enabled(true);
        assert_eq!(m.mode(), MatchMode::Index);

        let other = vec![Identity::new("b", "B").with_embeddings(vec![vec![5.0, 5.0]])];
        assert!(matches!(
            m.match_face(&[0.0, 0.0], &other),
            Err(FaceIdError::IdentityNotFound(id)) if id == "a"
        ));
        assert!(matches!(
            m.match_face(&[0.0, 0.0], &[]),
            Err(FaceIdError::NoIdentities)
        ));
    }
}
