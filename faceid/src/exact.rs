use faceid_vecstore::euclidean;

use crate::error::FaceIdError;
use crate::types::{Identity, MatchResult};

/// Brute-force matcher over every embedding of every identity.
///
/// Cost is linear in the total number of embeddings. The scan stops early
/// once a candidate is closer than half the threshold, so the result is the
/// first confident match rather than always the global minimum.
#[derive(Debug, Clone, Copy)]
pub struct ExactMatcher {
    threshold: f32,
}

impl ExactMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns the closest identity within the threshold.
    ///
    /// Embeddings whose length differs from the query are skipped.
    pub fn search(
        &self,
        query: &[f32],
        identities: &[Identity],
    ) -> Result<MatchResult, FaceIdError> {
        if !identities.iter().any(Identity::has_embeddings) {
            return Err(FaceIdError::NoIdentities);
        }

        let early_exit = self.threshold / 2.0;
        let mut best: Option<(&Identity, f32)> = None;
        'scan: for identity in identities {
            for emb in &identity.embeddings {
                if emb.len() != query.len() {
                    continue;
                }
                let d = euclidean(query, emb);
                if best.is_none_or(|(_, bd)| d < bd) {
                    best = Some((identity, d));
                    if d < early_exit {
                        break 'scan;
                    }
                }
            }
        }

        match best {
            Some((identity, distance)) if distance <= self.threshold => Ok(MatchResult {
                identity: identity.clone(),
                distance,
            }),
            Some((_, distance)) => Err(FaceIdError::NotRecognized {
                distance: Some(distance),
            }),
            None => Err(FaceIdError::NotRecognized { distance: None }),
        }
    }
}

/// Full scan for the globally closest embedding, without threshold or early
/// exit. Returns `None` when no embedding has the query's length.
pub fn nearest<'a>(query: &[f32], identities: &'a [Identity]) -> Option<(&'a Identity, f32)> {
    let mut best: Option<(&Identity, f32)> = None;
    for identity in identities {
        for emb in &identity.embeddings {
            if emb.len() != query.len() {
                continue;
            }
            let d = euclidean(query, emb);
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((identity, d));
            }
        }
    }
    best
}
