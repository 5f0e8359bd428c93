//! Face identification over enrolled face embeddings.
//!
//! [`FaceMatcher`] keeps an in-memory [`IdentityCache`] of an
//! [`IdentityStore`] and answers queries either by an exact scan
//! ([`ExactMatcher`]) or, for large populations, through an HNSW
//! [`VectorIndex`] that is persisted to disk and grows with each enrollment.

pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod exact;
pub mod index;
pub mod matcher;
pub mod store;
pub mod types;

pub use cache::{CacheStats, IdentityCache};
pub use config::MatcherConfig;
pub use encoder::{FaceDetection, FaceEncoder, RawEmbeddingEncoder};
pub use error::FaceIdError;
pub use exact::{ExactMatcher, nearest};
pub use index::{IndexStats, KnnMatch, VectorIndex};
pub use matcher::{FaceMatcher, MatchMode, MatcherStats};
pub use store::{IdentityStore, JsonFileStore, MemoryStore};
pub use types::{
    DEFAULT_DIMENSION, Descriptors, Embedding, Identity, IdentityRecord, MAX_EMBEDDINGS,
    MatchResult, decode_embedding, encode_embedding,
};
