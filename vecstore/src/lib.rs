//! Append-only HNSW graph over fixed-dimension `f32` vectors.
//!
//! Vectors are keyed by caller-assigned `u32` labels and compared under the
//! squared Euclidean metric. [`save_hnsw`]/[`load_hnsw`] round-trip the
//! whole graph through a single binary stream.

pub mod error;
pub mod hnsw;
pub mod hnsw_io;
pub mod l2;

pub use error::VecError;
pub use hnsw::{HNSW, HNSWConfig, Neighbor};
pub use hnsw_io::{load as load_hnsw, load_file, save as save_hnsw, save_file};
pub use l2::{euclidean, squared_l2};
