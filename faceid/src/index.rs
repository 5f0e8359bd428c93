use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use faceid_vecstore::{HNSW, HNSWConfig, load_file, save_file};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::FaceIdError;
use crate::types::Identity;

/// One nearest-neighbor hit, resolved to its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnnMatch {
    pub identity_id: String,
    /// Position of the matched embedding in the identity's list when it
    /// was indexed.
    pub slot: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total: usize,
    pub ready: bool,
    pub dimension: usize,
    pub tombstoned: usize,
}

/// What an index label stands for: one embedding of one identity.
#[derive(Debug, Clone)]
struct IndexedDescriptor {
    identity_id: String,
    slot: usize,
    removed: bool,
}

struct IndexState {
    hnsw: HNSW,
    /// Indexed by label.
    entries: Vec<IndexedDescriptor>,
    tombstoned: usize,
    /// Inserts since the last successful save.
    pending: usize,
}

impl IndexState {
    fn new(hnsw: HNSW, entries: Vec<IndexedDescriptor>) -> Self {
        let tombstoned = entries.iter().filter(|e| e.removed).count();
        Self {
            hnsw,
            entries,
            tombstoned,
            pending: 0,
        }
    }

    fn push(
        &mut self,
        identity_id: &str,
        slot: usize,
        embedding: &[f32],
    ) -> Result<u32, FaceIdError> {
        let label = self.entries.len() as u32;
        self.hnsw.insert(label, embedding)?;
        self.entries.push(IndexedDescriptor {
            identity_id: identity_id.to_string(),
            slot,
            removed: false,
        });
        Ok(label)
    }
}

/// Approximate nearest-neighbor index over every enrolled embedding.
///
/// The graph is append-only: labels are assigned from 0 in insertion order
/// and stay valid until the next [`build_index`](Self::build_index).
/// Removed identities are tombstoned and filtered from results.
pub struct VectorIndex {
    cfg: HNSWConfig,
    state: RwLock<Option<IndexState>>,
}

impl VectorIndex {
    pub fn new(cfg: HNSWConfig) -> Self {
        Self {
            cfg,
            state: RwLock::new(None),
        }
    }

    pub fn dimension(&self) -> usize {
        self.cfg.dim
    }

    /// Builds a fresh index from `identities`, discarding the previous one.
    /// Returns the number of indexed embeddings.
    pub fn build_index(&self, identities: &[Identity]) -> Result<usize, FaceIdError> {
        let start = Instant::now();
        let total: usize = identities.iter().map(|i| i.embeddings.len()).sum();
        let hnsw = HNSW::with_capacity(self.cfg.clone(), total);
        let mut state = IndexState::new(hnsw, Vec::with_capacity(total));

        let mut skipped = 0;
        for identity in identities {
            for (slot, emb) in identity.embeddings.iter().enumerate() {
                if emb.len() != self.cfg.dim {
                    skipped += 1;
                    continue;
                }
                state.push(&identity.id, slot, emb)?;
            }
        }
        if skipped > 0 {
            warn!(
                "faceid: skipped {skipped} embeddings with dimension != {}",
                self.cfg.dim
            );
        }

        let count = state.entries.len();
        *self.state.write() = Some(state);
        info!(
            "faceid: index built: {count} embeddings from {} identities in {:?}",
            identities.len(),
            start.elapsed()
        );
        Ok(count)
    }

    /// Appends one embedding and returns its label.
    pub fn add_descriptor(
        &self,
        identity_id: &str,
        embedding: &[f32],
        slot: usize,
    ) -> Result<u32, FaceIdError> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(FaceIdError::IndexNotReady)?;
        if embedding.len() != self.cfg.dim {
            return Err(FaceIdError::DimensionMismatch {
                expected: self.cfg.dim,
                got: embedding.len(),
            });
        }
        let label = state.push(identity_id, slot, embedding)?;
        state.pending += 1;
        debug!("faceid: indexed {identity_id}[{slot}] as {label}");
        Ok(label)
    }

    /// Returns up to `k` nearest live embeddings, closest first.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<KnnMatch>, FaceIdError> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(FaceIdError::IndexNotReady)?;
        if query.len() != self.cfg.dim {
            return Err(FaceIdError::DimensionMismatch {
                expected: self.cfg.dim,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Widen the beam only while tombstones crowd out live hits. The
        // first round costs the same as a plain top-k search.
        let total = state.entries.len();
        let mut fetch = k.max(state.hnsw.ef_search()).min(total);
        loop {
            let hits = state.hnsw.search(query, fetch)?;
            let exhausted = hits.len() < fetch || fetch >= total;
            let live: Vec<KnnMatch> = hits
                .into_iter()
                .filter_map(|n| {
                    let entry = state.entries.get(n.label as usize)?;
                    (!entry.removed).then(|| KnnMatch {
                        identity_id: entry.identity_id.clone(),
                        slot: entry.slot,
                        distance: n.distance.sqrt(),
                    })
                })
                .take(k)
                .collect();
            if live.len() >= k || exhausted {
                return Ok(live);
            }
            fetch = fetch.saturating_mul(2).min(total);
        }
    }

    /// Writes the graph to `path`. The label mapping is not persisted; it is
    /// re-derived from the identities on load.
    pub fn save_index(&self, path: &Path) -> Result<(), FaceIdError> {
        // Upgradable: searches keep running during the write, inserts wait.
        let guard = self.state.upgradable_read();
        let state = guard.as_ref().ok_or(FaceIdError::IndexNotReady)?;
        save_file(&state.hnsw, path)?;
        let count = state.entries.len();

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        if let Some(state) = guard.as_mut() {
            state.pending = 0;
        }
        info!("faceid: index saved to {}: {count} embeddings", path.display());
        Ok(())
    }

    /// Loads a graph written by [`save_index`](Self::save_index) and maps
    /// each stored vector back to the identity embedding it was built from.
    ///
    /// Stored vectors that no longer belong to any identity are loaded as
    /// tombstones. Embeddings of `identities` missing from the file are
    /// inserted. Returns the number of live entries.
    pub fn load_index(&self, path: &Path, identities: &[Identity]) -> Result<usize, FaceIdError> {
        let start = Instant::now();
        let hnsw = load_file(path)?;
        if hnsw.dim() != self.cfg.dim {
            return Err(FaceIdError::Persistence(format!(
                "{}: dimension {} does not match configured {}",
                path.display(),
                hnsw.dim(),
                self.cfg.dim
            )));
        }
        hnsw.set_ef_search(self.cfg.ef_search);

        let labels = hnsw.labels();
        if labels.iter().enumerate().any(|(i, &l)| l as usize != i) {
            return Err(FaceIdError::Persistence(format!(
                "{}: labels are not contiguous",
                path.display()
            )));
        }

        // Embedding lookup keyed by a hash of the raw bits; hits are
        // confirmed bit for bit.
        let mut by_key: HashMap<u64, Vec<(usize, usize)>> = HashMap::new();
        for (i, identity) in identities.iter().enumerate() {
            for (slot, emb) in identity.embeddings.iter().enumerate() {
                if emb.len() == self.cfg.dim {
                    by_key.entry(vector_key(emb)).or_default().push((i, slot));
                }
            }
        }

        let mut claimed: HashSet<(usize, usize)> = HashSet::new();
        let mut entries = Vec::with_capacity(labels.len());
        for label in labels {
            let vector = hnsw.vector(label).ok_or_else(|| {
                FaceIdError::Persistence(format!("label {label} has no vector"))
            })?;
            let found = by_key.get(&vector_key(&vector)).and_then(|cands| {
                cands.iter().copied().find(|&(i, slot)| {
                    !claimed.contains(&(i, slot))
                        && same_bits(&identities[i].embeddings[slot], &vector)
                })
            });
            entries.push(match found {
                Some((i, slot)) => {
                    claimed.insert((i, slot));
                    IndexedDescriptor {
                        identity_id: identities[i].id.clone(),
                        slot,
                        removed: false,
                    }
                }
                None => IndexedDescriptor {
                    identity_id: String::new(),
                    slot: 0,
                    removed: true,
                },
            });
        }

        let mut state = IndexState::new(hnsw, entries);
        let mut caught_up = 0;
        for (i, identity) in identities.iter().enumerate() {
            for (slot, emb) in identity.embeddings.iter().enumerate() {
                if emb.len() == self.cfg.dim && !claimed.contains(&(i, slot)) {
                    state.push(&identity.id, slot, emb)?;
                    caught_up += 1;
                }
            }
        }
        state.pending = caught_up;

        let live = state.entries.len() - state.tombstoned;
        if state.tombstoned > 0 || caught_up > 0 {
            warn!(
                "faceid: index file {} drifted from store: {} stale, {caught_up} added",
                path.display(),
                state.tombstoned
            );
        }
        info!(
            "faceid: index loaded from {}: {live} embeddings in {:?}",
            path.display(),
            start.elapsed()
        );
        *self.state.write() = Some(state);
        Ok(live)
    }

    /// Marks every live entry of `identity_id` as removed. Returns how many
    /// entries were marked.
    pub fn tombstone(&self, identity_id: &str) -> usize {
        let mut guard = self.state.write();
        let Some(state) = guard.as_mut() else {
            return 0;
        };
        let mut n = 0;
        for entry in state.entries.iter_mut() {
            if !entry.removed && entry.identity_id == identity_id {
                entry.removed = true;
                n += 1;
            }
        }
        state.tombstoned += n;
        n
    }

    /// True when the share of tombstoned entries reached `ratio`.
    pub fn needs_rebuild(&self, ratio: f64) -> bool {
        let guard = self.state.read();
        match guard.as_ref() {
            Some(s) if s.tombstoned > 0 => {
                s.tombstoned as f64 / s.entries.len() as f64 >= ratio
            }
            _ => false,
        }
    }

    pub fn pending_inserts(&self) -> usize {
        self.state
            .read()
            .as_ref()
            .map_or(0, |s| s.pending)
    }

    /// True once built or loaded with at least one entry.
    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .is_some_and(|s| !s.entries.is_empty())
    }

    pub fn stats(&self) -> IndexStats {
        let guard = self.state.read();
        let (total, tombstoned) = guard
            .as_ref()
            .map_or((0, 0), |s| (s.entries.len(), s.tombstoned));
        IndexStats {
            total,
            ready: total > 0,
            dimension: self.cfg.dim,
            tombstoned,
        }
    }

    /// Drops the index. Searches fail with `IndexNotReady` until the next
    /// build or load.
    pub fn clear(&self) {
        *self.state.write() = None;
    }
}

fn vector_key(v: &[f32]) -> u64 {
    let mut h = DefaultHasher::new();
    for x in v {
        x.to_bits().hash(&mut h);
    }
    h.finish()
}

fn same_bits(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DIM: usize = 8;

    fn test_index() -> VectorIndex {
        VectorIndex::new(HNSWConfig {
            dim: DIM,
            m: 16,
            ef_construction: 100,
            ef_search: 64,
            seed: Some(7),
        })
    }

    fn random_identities(n: usize, per: usize, seed: u64) -> Vec<Identity> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let embeddings = (0..per)
                    .map(|_| (0..DIM).map(|_| rng.r#gen::<f32>()).collect())
                    .collect();
                Identity::new(format!("id-{i}"), format!("Person {i}")).with_embeddings(embeddings)
            })
            .collect()
    }

    #[test]
    fn not_ready_before_build() {
        let idx = test_index();
        assert!(!idx.is_ready());
        assert!(matches!(
            idx.search_knn(&[0.0; DIM], 1),
            Err(FaceIdError::IndexNotReady)
        ));
        assert!(matches!(
            idx.add_descriptor("a", &[0.0; DIM], 0),
            Err(FaceIdError::IndexNotReady)
        ));
        assert!(matches!(
            idx.save_index(Path::new("/nonexistent/x.bin")),
            Err(FaceIdError::IndexNotReady)
        ));
    }

    #[test]
    fn build_and_search() {
        let ids = random_identities(50, 3, 1);
        let idx = test_index();
        assert_eq!(idx.build_index(&ids).unwrap(), 150);
        assert!(idx.is_ready());

        let hits = idx.search_knn(&ids[17].embeddings[1], 3).unwrap();
        assert_eq!(hits[0].identity_id, "id-17");
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn build_skips_wrong_dimension() {
        let mut ids = random_identities(3, 2, 2);
        ids[1].embeddings.push(vec![1.0; DIM + 1]);
        let idx = test_index();
        assert_eq!(idx.build_index(&ids).unwrap(), 6);
    }

    #[test]
    fn build_empty_is_not_ready() {
        let idx = test_index();
        assert_eq!(idx.build_index(&[]).unwrap(), 0);
        assert!(!idx.is_ready());
        assert!(idx.search_knn(&[0.0; DIM], 1).unwrap().is_empty());
    }

    #[test]
    fn search_dimension_mismatch() {
        let idx = test_index();
        idx.build_index(&random_identities(2, 1, 3)).unwrap();
        assert!(matches!(
            idx.search_knn(&[0.0; 3], 1),
            Err(FaceIdError::DimensionMismatch { expected: DIM, got: 3 })
        ));
    }

    #[test]
    fn add_descriptor_is_found_first() {
        let idx = test_index();
        idx.build_index(&random_identities(30, 2, 4)).unwrap();
        let fresh = vec![9.0; DIM];
        let label = idx.add_descriptor("newcomer", &fresh, 0).unwrap();
        assert_eq!(label, 60);
        assert_eq!(idx.pending_inserts(), 1);

        let hits = idx.search_knn(&fresh, 1).unwrap();
        assert_eq!(hits[0].identity_id, "newcomer");

        assert!(matches!(
            idx.add_descriptor("bad", &[1.0; 2], 0),
            Err(FaceIdError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn rebuild_resets_labels() {
        let ids = random_identities(5, 1, 5);
        let idx = test_index();
        idx.build_index(&ids).unwrap();
        idx.add_descriptor("x", &[0.5; DIM], 0).unwrap();
        idx.tombstone("id-0");
        idx.build_index(&ids).unwrap();
        assert_eq!(idx.add_descriptor("x", &[0.5; DIM], 0).unwrap(), 5);
        assert_eq!(idx.stats().tombstoned, 0);
    }

    #[test]
    fn tombstoned_identity_is_filtered() {
        let ids = random_identities(20, 2, 6);
        let idx = test_index();
        idx.build_index(&ids).unwrap();

        assert_eq!(idx.tombstone("id-3"), 2);
        assert_eq!(idx.tombstone("id-3"), 0);
        let hits = idx.search_knn(&ids[3].embeddings[0], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.identity_id != "id-3"));

        // Re-enrolled embeddings are live again.
        idx.add_descriptor("id-3", &ids[3].embeddings[0], 0).unwrap();
        let hits = idx.search_knn(&ids[3].embeddings[0], 1).unwrap();
        assert_eq!(hits[0].identity_id, "id-3");

        let stats = idx.stats();
        assert_eq!(stats.total, 41);
        assert_eq!(stats.tombstoned, 2);
        assert!(idx.needs_rebuild(0.04));
        assert!(!idx.needs_rebuild(0.1));
    }

    #[test]
    fn search_widens_past_tombstones() {
        let ids = random_identities(400, 1, 14);
        let idx = test_index();
        idx.build_index(&ids).unwrap();
        for identity in &ids[..390] {
            idx.tombstone(&identity.id);
        }

        let live: HashSet<&str> = ids[390..].iter().map(|i| i.id.as_str()).collect();
        let hits = idx.search_knn(&ids[0].embeddings[0], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| live.contains(h.identity_id.as_str())));
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        // Asking for more than is live returns every live entry.
        assert_eq!(idx.search_knn(&ids[0].embeddings[0], 50).unwrap().len(), 10);
    }

    #[test]
    fn save_resets_pending_and_later_inserts_count_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let idx = test_index();
        idx.build_index(&random_identities(5, 1, 15)).unwrap();
        idx.add_descriptor("a", &[0.1; DIM], 0).unwrap();
        idx.add_descriptor("a", &[0.2; DIM], 1).unwrap();
        assert_eq!(idx.pending_inserts(), 2);

        idx.save_index(&path).unwrap();
        assert_eq!(idx.pending_inserts(), 0);
        idx.add_descriptor("b", &[0.3; DIM], 0).unwrap();
        assert_eq!(idx.pending_inserts(), 1);

        // A failed save keeps the count.
        let taken = dir.path().join("taken");
        std::fs::create_dir(&taken).unwrap();
        assert!(idx.save_index(&taken).is_err());
        assert_eq!(idx.pending_inserts(), 1);
    }

    #[test]
    fn save_load_same_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let ids = random_identities(40, 3, 8);

        let idx = test_index();
        idx.build_index(&ids).unwrap();
        idx.add_descriptor("id-0", &[0.25; DIM], 3).unwrap();
        assert_eq!(idx.pending_inserts(), 1);
        idx.save_index(&path).unwrap();
        assert_eq!(idx.pending_inserts(), 0);

        let mut with_extra = ids.clone();
        with_extra[0].embeddings.push(vec![0.25; DIM]);

        let loaded = test_index();
        assert_eq!(loaded.load_index(&path, &with_extra).unwrap(), 121);
        assert_eq!(loaded.stats().tombstoned, 0);
        assert_eq!(loaded.pending_inserts(), 0);

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..20 {
            let q: Vec<f32> = (0..DIM).map(|_| rng.r#gen()).collect();
            assert_eq!(
                idx.search_knn(&q, 5).unwrap(),
                loaded.search_knn(&q, 5).unwrap()
            );
        }
    }

    #[test]
    fn load_maps_by_vector_not_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let ids = random_identities(10, 2, 10);

        let idx = test_index();
        idx.build_index(&ids).unwrap();
        idx.save_index(&path).unwrap();

        let mut reordered = ids.clone();
        reordered.reverse();
        let loaded = test_index();
        loaded.load_index(&path, &reordered).unwrap();
        for identity in &ids {
            let hits = loaded.search_knn(&identity.embeddings[1], 1).unwrap();
            assert_eq!(hits[0].identity_id, identity.id);
        }
    }

    #[test]
    fn load_tombstones_stale_and_adds_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let ids = random_identities(10, 2, 11);

        let idx = test_index();
        idx.build_index(&ids).unwrap();
        idx.save_index(&path).unwrap();

        let mut drifted = ids.clone();
        drifted.remove(4);
        drifted.push(Identity::new("late", "Late").with_embeddings(vec![vec![7.0; DIM]]));

        let loaded = test_index();
        assert_eq!(loaded.load_index(&path, &drifted).unwrap(), 19);
        let stats = loaded.stats();
        assert_eq!(stats.total, 21);
        assert_eq!(stats.tombstoned, 2);
        assert_eq!(loaded.pending_inserts(), 1);

        let hits = loaded.search_knn(&ids[4].embeddings[0], 3).unwrap();
        assert!(hits.iter().all(|h| h.identity_id != "id-4"));
        assert_eq!(loaded.search_knn(&[7.0; DIM], 1).unwrap()[0].identity_id, "late");
    }

    #[test]
    fn load_rejects_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let idx = test_index();
        idx.build_index(&random_identities(3, 1, 12)).unwrap();
        idx.save_index(&path).unwrap();

        let other = VectorIndex::new(HNSWConfig::with_dim(DIM * 2));
        assert!(matches!(
            other.load_index(&path, &[]),
            Err(FaceIdError::Persistence(_))
        ));
    }

    #[test]
    fn load_rejects_header_larger_than_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-index.bin");
        let mut header = b"HNSW".to_vec();
        for v in [2u32, DIM as u32, 16, 200, 50, u32::MAX, 0, 0] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, header).unwrap();

        let idx = test_index();
        assert!(matches!(
            idx.load_index(&path, &random_identities(2, 1, 16)),
            Err(FaceIdError::Persistence(_))
        ));
        assert!(!idx.is_ready());
    }

    #[test]
    fn load_missing_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = test_index()
            .load_index(&dir.path().join("absent.bin"), &[])
            .unwrap_err();
        assert!(matches!(err, FaceIdError::Persistence(_)));
    }

    #[test]
    fn clear_drops_index() {
        let idx = test_index();
        idx.build_index(&random_identities(3, 1, 13)).unwrap();
        idx.clear();
        assert!(!idx.is_ready());
        assert_eq!(idx.stats().total, 0);
    }
}
