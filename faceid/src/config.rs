use std::path::PathBuf;
use std::time::Duration;

use faceid_vecstore::HNSWConfig;
use serde::{Deserialize, Serialize};

use crate::error::FaceIdError;
use crate::types::DEFAULT_DIMENSION;

pub const DEFAULT_THRESHOLD: f32 = 0.55;
pub const DEFAULT_INDEX_MIN_IDENTITIES: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// Runtime configuration of a [`FaceMatcher`](crate::FaceMatcher).
///
/// Missing fields in a config file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Embedding length. Default: 128.
    pub dimension: usize,

    /// Maximum Euclidean distance accepted as the same person. Default: 0.55.
    pub threshold: f32,

    /// Identity count at which bootstrap switches to the vector index.
    /// Default: 10 000.
    pub index_min_identities: usize,

    /// Rows per identity-store page during a cache refresh. Default: 500.
    pub page_size: usize,

    /// Age after which the snapshot is reported as expired. Default: 300s.
    pub cache_ttl_secs: u64,

    /// HNSW connections per node. Default: 32.
    pub hnsw_m: usize,

    /// HNSW build-time candidate list size. Default: 200.
    pub ef_construction: usize,

    /// HNSW search-time candidate list size. Default: 100.
    pub ef_search: usize,

    /// Incremental inserts between automatic index saves. 0 disables.
    /// Default: 100.
    pub checkpoint_interval: usize,

    /// Where the index is persisted. No persistence when unset.
    pub index_path: Option<PathBuf>,

    /// Share of tombstoned index entries that triggers a full rebuild.
    /// Default: 0.1.
    pub rebuild_tombstone_ratio: f64,

    /// Snapshot size (in embeddings) from which matching runs on a
    /// blocking worker instead of the calling task. Default: 5 000.
    pub offload_min_embeddings: usize,

    /// Seed for HNSW level sampling; random when unset.
    pub seed: Option<u64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            threshold: DEFAULT_THRESHOLD,
            index_min_identities: DEFAULT_INDEX_MIN_IDENTITIES,
            page_size: DEFAULT_PAGE_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            hnsw_m: 32,
            ef_construction: 200,
            ef_search: 100,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            index_path: None,
            rebuild_tombstone_ratio: 0.1,
            offload_min_embeddings: 5_000,
            seed: None,
        }
    }
}

impl MatcherConfig {
    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.dimension = dim;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_index_min_identities(mut self, n: usize) -> Self {
        self.index_min_identities = n;
        self
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    pub fn with_checkpoint_interval(mut self, n: usize) -> Self {
        self.checkpoint_interval = n;
        self
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn hnsw_config(&self) -> HNSWConfig {
        HNSWConfig {
            dim: self.dimension,
            m: self.hnsw_m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            seed: self.seed,
        }
    }

    /// Rejects values the matcher cannot work with.
    pub fn validate(&self) -> Result<(), FaceIdError> {
        if self.dimension == 0 {
            return Err(FaceIdError::Config("dimension must be positive".into()));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(FaceIdError::Config(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        if self.page_size == 0 {
            return Err(FaceIdError::Config("page_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rebuild_tombstone_ratio) {
            return Err(FaceIdError::Config(format!(
                "rebuild_tombstone_ratio must be within [0, 1], got {}",
                self.rebuild_tombstone_ratio
            )));
        }
        Ok(())
    }
}
