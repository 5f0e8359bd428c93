use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::VecError;
use crate::l2::squared_l2;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// HNSWConfig configures a new HNSW index.
#[derive(Debug, Clone)]
pub struct HNSWConfig {
    /// Vector dimension. Required; must be positive.
    pub dim: usize,
    /// Max connections per node per layer (except layer 0 which allows 2*M).
    /// Default: 16.
    pub m: usize,
    /// Size of the dynamic candidate list during index building.
    /// Default: 200.
    pub ef_construction: usize,
    /// Default size of the dynamic candidate list during search.
    /// Default: 50.
    pub ef_search: usize,
    /// Seed for level sampling. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl HNSWConfig {
    /// Config with the given dimension and default graph parameters.
    pub fn with_dim(dim: usize) -> Self {
        let mut cfg = Self {
            dim,
            m: 0,
            ef_construction: 0,
            ef_search: 0,
            seed: None,
        };
        cfg.set_defaults();
        cfg
    }

    pub(crate) fn set_defaults(&mut self) {
        if self.m < 2 {
            self.m = 16;
        }
        if self.ef_construction == 0 {
            self.ef_construction = 200;
        }
        if self.ef_search == 0 {
            self.ef_search = 50;
        }
    }

    fn max_conns(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

// ---------------------------------------------------------------------------
// Internal priority-queue types
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct DistItem {
    id: u32,
    dist: f32,
}

/// Min-heap: closest first.
impl Ord for DistItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for DistItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for DistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}
impl Eq for DistItem {}

/// Reversed for max-heap usage: farthest first.
#[derive(Clone)]
struct MaxDistItem {
    id: u32,
    dist: f32,
}

impl Ord for MaxDistItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}
impl PartialOrd for MaxDistItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for MaxDistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}
impl Eq for MaxDistItem {}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub(crate) struct HnswNode {
    pub(crate) label: u32,
    pub(crate) vector: Vec<f32>,
    pub(crate) level: usize,
    pub(crate) friends: Vec<Vec<u32>>, // friends[layer] = neighbor slots
}

/// Neighbor is a single search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Caller-assigned label of the matched vector.
    pub label: u32,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// HNSW
// ---------------------------------------------------------------------------

pub(crate) struct HnswInner {
    pub(crate) cfg: HNSWConfig,
    pub(crate) nodes: Vec<HnswNode>,
    pub(crate) slots: HashMap<u32, u32>, // label -> slot
    pub(crate) entry: Option<u32>,
    pub(crate) max_level: usize,
    level_mul: f64,
    rng: StdRng,
}

/// HNSW is an append-only Hierarchical Navigable Small World graph under
/// the squared Euclidean metric.
///
/// Vectors are addressed by caller-assigned `u32` labels. There is no delete:
/// callers that need removal filter results and rebuild.
///
/// All methods are safe for concurrent use (via RwLock).
pub struct HNSW {
    inner: RwLock<HnswInner>,
}

impl HNSW {
    /// Create an empty HNSW index with the given configuration.
    /// Panics if `cfg.dim` is not positive.
    pub fn new(cfg: HNSWConfig) -> Self {
        Self::with_capacity(cfg, 0)
    }

    /// Create an empty index with room for `capacity` vectors.
    /// Panics if `cfg.dim` is not positive.
    pub fn with_capacity(mut cfg: HNSWConfig, capacity: usize) -> Self {
        assert!(cfg.dim > 0, "vecstore: HNSWConfig.dim must be positive");
        cfg.set_defaults();
        Self::from_inner(HnswInner::new(cfg, capacity))
    }

    /// Adjust the search-time candidate list size.
    pub fn set_ef_search(&self, ef: usize) {
        self.inner.write().cfg.ef_search = ef.max(1);
    }

    pub fn ef_search(&self) -> usize {
        self.inner.read().cfg.ef_search
    }

    pub fn dim(&self) -> usize {
        self.inner.read().cfg.dim
    }

    pub fn config(&self) -> HNSWConfig {
        self.inner.read().cfg.clone()
    }

    /// Return the number of vectors in the index.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, label: u32) -> bool {
        self.inner.read().slots.contains_key(&label)
    }

    /// Return a copy of the vector stored under `label`.
    pub fn vector(&self, label: u32) -> Option<Vec<f32>> {
        let inner = self.inner.read();
        inner
            .slots
            .get(&label)
            .map(|&slot| inner.nodes[slot as usize].vector.clone())
    }

    /// Return all labels in insertion order.
    pub fn labels(&self) -> Vec<u32> {
        self.inner.read().nodes.iter().map(|nd| nd.label).collect()
    }

    /// Add a vector under a label that is not yet in the index.
    pub fn insert(&self, label: u32, vector: &[f32]) -> Result<(), VecError> {
        self.inner.write().insert(label, vector)
    }

    /// Return the top-k nearest vectors to the query, ordered by ascending
    /// squared distance (closest first).
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, VecError> {
        self.inner.read().search(query, top_k)
    }

    /// Build from deserialized state (used by load).
    pub(crate) fn from_inner(inner: HnswInner) -> Self {
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Access inner for serialization (used by save).
    pub(crate) fn read_inner(&self) -> parking_lot::RwLockReadGuard<'_, HnswInner> {
        self.inner.read()
    }
}

impl HnswInner {
    pub(crate) fn new(cfg: HNSWConfig, capacity: usize) -> Self {
        let level_mul = 1.0 / (cfg.m as f64).ln();
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cfg,
            nodes: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            entry: None,
            max_level: 0,
            level_mul,
            rng,
        }
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * self.level_mul) as usize;
        level.min(31)
    }

    fn dist(&self, query: &[f32], slot: u32) -> f32 {
        squared_l2(query, &self.nodes[slot as usize].vector)
    }

    /// Greedy walk from `cur` down through layers `top..=bottom`, moving to
    /// the closest neighbor until no neighbor improves.
    fn greedy_closest(&self, query: &[f32], mut cur: u32, top: usize, bottom: usize) -> u32 {
        let mut cur_dist = self.dist(query, cur);
        for lev in (bottom..=top).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                if let Some(friends) = self.nodes[cur as usize].friends.get(lev) {
                    for &f_id in friends {
                        let d = self.dist(query, f_id);
                        if d < cur_dist {
                            cur = f_id;
                            cur_dist = d;
                            changed = true;
                        }
                    }
                }
            }
        }
        cur
    }

    /// Beam search on one layer. Returns `(slot, distance)` sorted closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<(u32, f32)> {
        let mut visited = HashSet::with_capacity(ef * 2);
        let mut candidates: BinaryHeap<DistItem> = BinaryHeap::new();
        let mut results: BinaryHeap<MaxDistItem> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = self.dist(query, ep);
                candidates.push(DistItem { id: ep, dist: d });
                results.push(MaxDistItem { id: ep, dist: d });
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(closest) = candidates.pop() {
            if results.len() >= ef {
                if let Some(farthest) = results.peek() {
                    if closest.dist > farthest.dist {
                        break;
                    }
                }
            }

            let Some(friends) = self.nodes[closest.id as usize].friends.get(layer) else {
                continue;
            };
            for &f_id in friends {
                if !visited.insert(f_id) {
                    continue;
                }
                let d = self.dist(query, f_id);
                let should_add =
                    results.len() < ef || results.peek().map_or(true, |far| d < far.dist);
                if should_add {
                    candidates.push(DistItem { id: f_id, dist: d });
                    results.push(MaxDistItem { id: f_id, dist: d });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<(u32, f32)> = results.into_iter().map(|it| (it.id, it.dist)).collect();
        found.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        found
    }

    fn select_closest(&self, base: &[f32], candidates: &[u32], max_n: usize) -> Vec<u32> {
        if candidates.len() <= max_n {
            return candidates.to_vec();
        }

        let mut items: Vec<(u32, f32)> = candidates
            .iter()
            .map(|&c_id| (c_id, self.dist(base, c_id)))
            .collect();

        items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        items.truncate(max_n);
        items.into_iter().map(|(id, _)| id).collect()
    }

    fn insert(&mut self, label: u32, vector: &[f32]) -> Result<(), VecError> {
        if vector.len() != self.cfg.dim {
            return Err(VecError::DimensionMismatch {
                got: vector.len(),
                want: self.cfg.dim,
            });
        }
        if self.slots.contains_key(&label) {
            return Err(VecError::DuplicateLabel(label));
        }

        let slot = self.nodes.len() as u32;
        let level = self.random_level();
        self.nodes.push(HnswNode {
            label,
            vector: vector.to_vec(),
            level,
            friends: vec![Vec::new(); level + 1],
        });
        self.slots.insert(label, slot);

        // First node becomes the entry point.
        let Some(entry) = self.entry else {
            self.entry = Some(slot);
            self.max_level = level;
            return Ok(());
        };

        // Phase 1: Greedy descent from top layer to level+1.
        let top = self.max_level;
        let cur = self.greedy_closest(vector, entry, top, level + 1);

        // Phase 2: Beam search + connect at each layer.
        let ef_construction = self.cfg.ef_construction;
        let mut ep = vec![cur];
        for lev in (0..=level.min(top)).rev() {
            let candidates: Vec<u32> = self
                .search_layer(vector, &ep, ef_construction, lev)
                .into_iter()
                .map(|(id, _)| id)
                .filter(|&id| id != slot)
                .collect();
            let max_c = self.cfg.max_conns(lev);
            let neighbors: Vec<u32> = candidates.iter().copied().take(max_c).collect();

            self.nodes[slot as usize].friends[lev] = neighbors.clone();

            // Bidirectional connections + pruning.
            for &n_id in &neighbors {
                let needs_prune = match self.nodes[n_id as usize].friends.get_mut(lev) {
                    Some(list) => {
                        list.push(slot);
                        list.len() > max_c
                    }
                    None => false,
                };
                if needs_prune {
                    let pruned = {
                        let nn = &self.nodes[n_id as usize];
                        self.select_closest(&nn.vector, &nn.friends[lev], max_c)
                    };
                    self.nodes[n_id as usize].friends[lev] = pruned;
                }
            }

            ep = candidates;
        }

        // Update entry point if new node is higher.
        if level > self.max_level {
            self.entry = Some(slot);
            self.max_level = level;
        }

        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, VecError> {
        if query.len() != self.cfg.dim {
            return Err(VecError::DimensionMismatch {
                got: query.len(),
                want: self.cfg.dim,
            });
        }
        let Some(entry) = self.entry else {
            return Ok(vec![]);
        };
        if top_k == 0 {
            return Ok(vec![]);
        }

        let ef = self.cfg.ef_search.max(top_k);

        // Phase 1: Greedy descent from top layer to layer 1.
        let cur = self.greedy_closest(query, entry, self.max_level, 1);

        // Phase 2: Beam search at layer 0.
        let mut found = self.search_layer(query, &[cur], ef, 0);
        found.truncate(top_k);

        Ok(found
            .into_iter()
            .map(|(slot, distance)| Neighbor {
                label: self.nodes[slot as usize].label,
                distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_hnsw(dim: usize) -> HNSW {
        HNSW::new(HNSWConfig {
            dim,
            m: 8,
            ef_construction: 64,
            ef_search: 32,
            seed: Some(7),
        })
    }

    #[test]
    fn test_insert_and_search() {
        let h = new_test_hnsw(4);
        h.insert(0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        h.insert(1, &[0.0, 1.0, 0.0, 0.0]).unwrap();
        h.insert(2, &[0.9, 0.1, 0.0, 0.0]).unwrap();

        let matches = h.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].label, 0);
        assert_eq!(matches[0].distance, 0.0);
        assert_eq!(matches[1].label, 2);
        assert!((matches[1].distance - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let h = new_test_hnsw(4);
        assert!(matches!(
            h.insert(0, &[1.0, 0.0, 0.0]),
            Err(VecError::DimensionMismatch { got: 3, want: 4 })
        ));
        h.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(h.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_duplicate_label() {
        let h = new_test_hnsw(2);
        h.insert(5, &[1.0, 0.0]).unwrap();
        assert!(matches!(
            h.insert(5, &[0.0, 1.0]),
            Err(VecError::DuplicateLabel(5))
        ));
        assert_eq!(h.len(), 1);
        assert_eq!(h.vector(5).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_labels_in_insertion_order() {
        let h = new_test_hnsw(2);
        for label in [3, 1, 2] {
            h.insert(label, &[label as f32, 0.0]).unwrap();
        }
        assert_eq!(h.labels(), vec![3, 1, 2]);
        assert!(h.contains(1));
        assert!(!h.contains(9));
    }

    #[test]
    fn test_search_empty() {
        let h = new_test_hnsw(3);
        let matches = h.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_search_top_k_zero() {
        let h = new_test_hnsw(3);
        h.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        let matches = h.search(&[1.0, 0.0, 0.0], 0).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_single_node() {
        let h = new_test_hnsw(3);
        h.insert(0, &[0.5, 0.5, 0.5]).unwrap();
        let matches = h.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].label, 0);
    }

    #[test]
    #[should_panic]
    fn test_panics_on_zero_dim() {
        HNSW::new(HNSWConfig {
            dim: 0,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: None,
        });
    }

    #[test]
    fn test_same_seed_same_graph() {
        let mut rng = StdRng::seed_from_u64(11);
        let vecs: Vec<Vec<f32>> = (0..300).map(|_| rand_vec(&mut rng, 16)).collect();

        let a = new_test_hnsw(16);
        let b = new_test_hnsw(16);
        for (i, v) in vecs.iter().enumerate() {
            a.insert(i as u32, v).unwrap();
            b.insert(i as u32, v).unwrap();
        }

        let query = rand_vec(&mut rng, 16);
        assert_eq!(a.search(&query, 10).unwrap(), b.search(&query, 10).unwrap());
    }

    #[test]
    fn test_every_vector_finds_itself() {
        let mut rng = StdRng::seed_from_u64(3);
        let h = new_test_hnsw(32);
        h.set_ef_search(100);
        let vecs: Vec<Vec<f32>> = (0..500).map(|_| rand_vec(&mut rng, 32)).collect();
        for (i, v) in vecs.iter().enumerate() {
            h.insert(i as u32, v).unwrap();
        }
        for (i, v) in vecs.iter().enumerate() {
            let top = h.search(v, 1).unwrap();
            assert_eq!(top[0].label, i as u32);
            assert_eq!(top[0].distance, 0.0);
        }
    }

    #[test]
    fn test_recall() {
        let dim = 32;
        let n = 2000;
        let queries = 50;
        let top_k = 10;

        let mut rng = StdRng::seed_from_u64(42);

        let h = HNSW::new(HNSWConfig {
            dim,
            m: 16,
            ef_construction: 128,
            ef_search: 64,
            seed: Some(42),
        });

        let mut vecs = Vec::with_capacity(n);
        for i in 0..n {
            let v = rand_vec(&mut rng, dim);
            h.insert(i as u32, &v).unwrap();
            vecs.push(v);
        }

        let mut total_recall = 0.0;
        for _ in 0..queries {
            let query = rand_vec(&mut rng, dim);

            // Brute-force ground truth.
            let mut truth: Vec<(u32, f32)> = vecs
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u32, squared_l2(&query, v)))
                .collect();
            truth.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth_set: HashSet<u32> = truth.iter().take(top_k).map(|(i, _)| *i).collect();

            let matches = h.search(&query, top_k).unwrap();
            let hits = matches
                .iter()
                .filter(|m| truth_set.contains(&m.label))
                .count();
            total_recall += hits as f64 / top_k as f64;
        }

        let avg_recall = total_recall / queries as f64;
        assert!(
            avg_recall >= 0.80,
            "recall {avg_recall:.3} is below 0.80 threshold"
        );
    }

    fn rand_vec(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.r#gen::<f32>() * 2.0 - 1.0).collect()
    }
}
