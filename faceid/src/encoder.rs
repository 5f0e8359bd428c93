use async_trait::async_trait;

use crate::error::FaceIdError;
use crate::types::Embedding;

/// One detected face and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub embedding: Embedding,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

/// Turns a captured image into a face embedding.
///
/// Implementations wrap whatever detection model the deployment uses.
/// An image without a usable face yields [`FaceIdError::Detection`].
#[async_trait]
pub trait FaceEncoder: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<FaceDetection, FaceIdError>;
}

/// Encoder for clients that already run the model and upload the raw
/// little-endian `f32` embedding in place of an image.
pub struct RawEmbeddingEncoder {
    dim: usize,
}

impl RawEmbeddingEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl FaceEncoder for RawEmbeddingEncoder {
    async fn detect(&self, image: &[u8]) -> Result<FaceDetection, FaceIdError> {
        let embedding = crate::types::decode_embedding(image, self.dim)?;
        Ok(FaceDetection {
            embedding,
            confidence: 1.0,
        })
    }
}
