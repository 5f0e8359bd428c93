use faceid_vecstore::VecError;
use thiserror::Error;

/// Errors returned by faceid operations.
#[derive(Debug, Error)]
pub enum FaceIdError {
    #[error("faceid: no identities with stored embeddings")]
    NoIdentities,

    #[error("faceid: face not recognized")]
    NotRecognized {
        /// Distance of the nearest candidate, if there was one.
        distance: Option<f32>,
    },

    #[error("faceid: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("faceid: vector index not ready")]
    IndexNotReady,

    #[error("faceid: identity {0} not found in snapshot")]
    IdentityNotFound(String),

    #[error("faceid: persistence: {0}")]
    Persistence(String),

    #[error("faceid: invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("faceid: detection: {0}")]
    Detection(String),

    #[error("faceid: store: {0}")]
    Store(String),

    #[error("faceid: config: {0}")]
    Config(String),

    #[error("faceid: worker: {0}")]
    Worker(String),
}

impl FaceIdError {
    /// True for the expected, user-facing outcomes of a match: nobody is
    /// enrolled, or nobody is close enough.
    pub fn is_not_recognized(&self) -> bool {
        matches!(self, Self::NoIdentities | Self::NotRecognized { .. })
    }

    /// True for infrastructure failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Persistence(_) | Self::Worker(_))
    }
}

impl From<VecError> for FaceIdError {
    fn from(e: VecError) -> Self {
        match e {
            VecError::DimensionMismatch { got, want } => Self::DimensionMismatch {
                expected: want,
                got,
            },
            other => Self::Persistence(other.to_string()),
        }
    }
}
