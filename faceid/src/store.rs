use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::FaceIdError;
use crate::types::{Embedding, Identity, IdentityRecord, MAX_EMBEDDINGS};

/// The authoritative identity store.
///
/// Implementations must be safe for concurrent use.
/// Use [`MemoryStore`] for in-memory storage (testing/ephemeral) or
/// [`JsonFileStore`] for a single JSON file on disk.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns one page of identities in a stable order. Pages are numbered
    /// from 1; a page shorter than `page_size` is the last one.
    async fn list(&self, page: usize, page_size: usize)
    -> Result<Vec<IdentityRecord>, FaceIdError>;

    /// Adds `embedding` to the identity `id`, creating it if needed, and
    /// returns the stored identity after the per-identity cap is applied.
    async fn upsert(
        &self,
        id: &str,
        name: &str,
        embedding: Embedding,
    ) -> Result<Identity, FaceIdError>;
}

fn page_of(records: &[IdentityRecord], page: usize, page_size: usize) -> Vec<IdentityRecord> {
    let start = page.saturating_sub(1).saturating_mul(page_size);
    records
        .iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect()
}

/// Applies an upsert to a list of records, returning the updated identity.
fn upsert_record(
    records: &mut Vec<IdentityRecord>,
    id: &str,
    name: &str,
    embedding: Embedding,
    cap: usize,
) -> Identity {
    match records.iter_mut().find(|r| r.id == id) {
        Some(record) => {
            let mut identity = record.clone().into_identity();
            identity.name = name.to_string();
            let evicted = identity.push_embedding(embedding, cap);
            if !evicted.is_empty() {
                debug!("faceid: {id}: evicted {} oldest embeddings", evicted.len());
            }
            *record = IdentityRecord::from(&identity);
            identity
        }
        None => {
            let mut identity = Identity::new(id, name);
            identity.push_embedding(embedding, cap);
            records.push(IdentityRecord::from(&identity));
            identity
        }
    }
}

/// In-memory [`IdentityStore`] implementation.
/// Data is lost on restart. Suitable for testing or ephemeral use.
pub struct MemoryStore {
    records: Mutex<Vec<IdentityRecord>>,
    cap: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    /// Seeds the store with raw rows, in list order.
    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            cap: MAX_EMBEDDINGS,
        }
    }

    pub fn from_identities(identities: &[Identity]) -> Self {
        Self::from_records(identities.iter().map(IdentityRecord::from).collect())
    }

    /// Removes an identity. Returns false if it did not exist.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn list(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IdentityRecord>, FaceIdError> {
        Ok(page_of(&self.records.lock(), page, page_size))
    }

    async fn upsert(
        &self,
        id: &str,
        name: &str,
        embedding: Embedding,
    ) -> Result<Identity, FaceIdError> {
        let mut records = self.records.lock();
        Ok(upsert_record(&mut records, id, name, embedding, self.cap))
    }
}

/// File modification time and length, identifying one version of the file.
type Stamp = (SystemTime, u64);

/// [`IdentityStore`] backed by one JSON file holding an array of
/// [`IdentityRecord`]. A missing file reads as an empty store.
///
/// The parsed file is kept until its modification time or length changes,
/// so paging through it parses it once.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    parsed: Mutex<Option<(Stamp, Arc<Vec<IdentityRecord>>)>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
            parsed: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in file order.
    pub async fn read_all(&self) -> Result<Vec<IdentityRecord>, FaceIdError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FaceIdError::Store(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&data)
            .map_err(|e| FaceIdError::Store(format!("parse {}: {e}", self.path.display())))
    }

    async fn stamp(&self) -> Result<Option<Stamp>, FaceIdError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.modified().ok().map(|t| (t, meta.len()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FaceIdError::Store(format!(
                "stat {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Current records, parsed again only when the file changed.
    async fn records(&self) -> Result<Arc<Vec<IdentityRecord>>, FaceIdError> {
        let Some(stamp) = self.stamp().await? else {
            return Ok(Arc::new(self.read_all().await?));
        };
        let cached = self
            .parsed
            .lock()
            .as_ref()
            .filter(|(s, _)| *s == stamp)
            .map(|(_, records)| Arc::clone(records));
        if let Some(records) = cached {
            return Ok(records);
        }

        let records = Arc::new(self.read_all().await?);
        debug!(
            "faceid: parsed {} records from {}",
            records.len(),
            self.path.display()
        );
        *self.parsed.lock() = Some((stamp, Arc::clone(&records)));
        Ok(records)
    }

    /// Replaces the file contents with `records`.
    pub async fn write_all(&self, records: &[IdentityRecord]) -> Result<(), FaceIdError> {
        let data = serde_json::to_vec(records)
            .map_err(|e| FaceIdError::Store(format!("encode records: {e}")))?;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| FaceIdError::Store(format!("mkdir {}: {e}", dir.display())))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| FaceIdError::Store(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| FaceIdError::Store(format!("rename {}: {e}", self.path.display())))?;

        let stamp = self.stamp().await?;
        *self.parsed.lock() = stamp.map(|s| (s, Arc::new(records.to_vec())));
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for JsonFileStore {
    async fn list(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IdentityRecord>, FaceIdError> {
        let records = self.records().await?;
        Ok(page_of(&records, page, page_size))
    }

    async fn upsert(
        &self,
        id: &str,
        name: &str,
        embedding: Embedding,
    ) -> Result<Identity, FaceIdError> {
        let _guard = self.write_lock.lock().await;
        let mut records = Vec::clone(&*self.records().await?);
        let identity = upsert_record(&mut records, id, name, embedding, MAX_EMBEDDINGS);
        self.write_all(&records).await?;
        Ok(identity)
    }
}
