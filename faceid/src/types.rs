use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FaceIdError;

/// Embedding dimension produced by the face recognition model.
pub const DEFAULT_DIMENSION: usize = 128;

/// Maximum number of embeddings kept per identity.
pub const MAX_EMBEDDINGS: usize = 5;

/// A face embedding. Fixed length for the lifetime of the process.
pub type Embedding = Vec<f32>;

/// Decodes a little-endian `f32` buffer, as sent by capture clients that
/// run the model on-device, into an embedding of length `dim`.
pub fn decode_embedding(bytes: &[u8], dim: usize) -> Result<Embedding, FaceIdError> {
    if bytes.is_empty() {
        return Err(FaceIdError::InvalidEmbedding("empty buffer".into()));
    }
    if bytes.len() % 4 != 0 {
        return Err(FaceIdError::InvalidEmbedding(format!(
            "buffer length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let got = bytes.len() / 4;
    if got != dim {
        return Err(FaceIdError::DimensionMismatch { expected: dim, got });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encodes an embedding as little-endian `f32` bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// An enrolled person and their most recent face embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable unique identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Up to [`MAX_EMBEDDINGS`] embeddings, oldest first.
    #[serde(default)]
    pub embeddings: Vec<Embedding>,

    /// Optional display order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            embeddings: Vec::new(),
            sort_order: None,
        }
    }

    pub fn with_embeddings(mut self, embeddings: Vec<Embedding>) -> Self {
        self.embeddings = embeddings;
        self
    }

    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = Some(order);
        self
    }

    /// Appends an embedding, evicting the oldest ones once more than `cap`
    /// are held. Returns the evicted embeddings.
    pub fn push_embedding(&mut self, embedding: Embedding, cap: usize) -> Vec<Embedding> {
        self.embeddings.push(embedding);
        let excess = self.embeddings.len().saturating_sub(cap.max(1));
        self.embeddings.drain(..excess).collect()
    }

    pub fn has_embeddings(&self) -> bool {
        !self.embeddings.is_empty()
    }
}

/// The embedding column as it is persisted: either a single flat vector,
/// a list of vectors, or either of those encoded as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Descriptors {
    One(Embedding),
    Many(Vec<Embedding>),
    Encoded(String),
}

impl Default for Descriptors {
    fn default() -> Self {
        Descriptors::Many(Vec::new())
    }
}

impl Descriptors {
    /// Normalizes into the canonical list-of-embeddings form.
    /// An unparsable encoded column yields no embeddings.
    pub fn into_embeddings(self) -> Vec<Embedding> {
        match self {
            Descriptors::One(v) if v.is_empty() => Vec::new(),
            Descriptors::One(v) => vec![v],
            Descriptors::Many(vs) => vs,
            Descriptors::Encoded(raw) => match serde_json::from_str::<Descriptors>(&raw) {
                Ok(Descriptors::Encoded(_)) => {
                    warn!("faceid: descriptor column is doubly encoded, ignoring");
                    Vec::new()
                }
                Ok(parsed) => parsed.into_embeddings(),
                Err(e) => {
                    warn!("faceid: unparsable descriptor column: {e}");
                    Vec::new()
                }
            },
        }
    }
}

impl From<Vec<Embedding>> for Descriptors {
    fn from(embeddings: Vec<Embedding>) -> Self {
        Descriptors::Many(embeddings)
    }
}

/// One row of the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub descriptors: Descriptors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl IdentityRecord {
    pub fn into_identity(self) -> Identity {
        Identity {
            id: self.id,
            name: self.name,
            embeddings: self.descriptors.into_embeddings(),
            sort_order: self.sort_order,
        }
    }
}

impl From<&Identity> for IdentityRecord {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            descriptors: Descriptors::Many(identity.embeddings.clone()),
            sort_order: identity.sort_order,
        }
    }
}

/// A successful identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub identity: Identity,
    /// Euclidean distance between the query and the closest stored embedding.
    pub distance: f32,
}

impl MatchResult {
    pub fn confidence(&self) -> f32 {
        1.0 - self.distance
    }
}
