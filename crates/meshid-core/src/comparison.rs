//! Verification (one-to-one) and identification (one-to-many).
//!
//! Similarity is computed by the backend. This module owns the shape of the
//! results: banding of a single score, and a deterministic ranking of many.

use crate::backend::{Backend, BackendError};
use crate::mesh::{Embedding, MeshData};
use crate::types::{IdentityId, MatchCandidate, Thresholds, Verdict, VerificationResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparisonError {
    #[error("identity {0} does not exist")]
    UnknownIdentity(IdentityId),
    #[error("comparison request failed: {0}")]
    Backend(#[from] BackendError),
}

pub struct ComparisonEngine {
    backend: Arc<dyn Backend>,
    thresholds: Thresholds,
    /// Keep at most this many candidates after ranking.
    limit: Option<usize>,
}

impl ComparisonEngine {
    pub fn new(backend: Arc<dyn Backend>, thresholds: Thresholds) -> Self {
        Self {
            backend,
            thresholds,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Compare `probe` against one stored identity.
    pub async fn verify(
        &self,
        probe: &MeshData,
        target: IdentityId,
    ) -> Result<Verdict, ComparisonError> {
        let snapshot = self.backend.list_identities().await?;
        let identity = snapshot
            .iter()
            .find(|i| i.id == target)
            .ok_or(ComparisonError::UnknownIdentity(target))?;

        let raw = self
            .backend
            .compare(target, probe)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ComparisonError::UnknownIdentity(target)
                } else {
                    ComparisonError::Backend(e)
                }
            })?;

        let result = VerificationResult {
            score: raw.similarity,
            matched_identity_name: raw.matched_user.unwrap_or_else(|| identity.name.clone()),
        };
        let tier = self.thresholds.classify(result.score);
        tracing::info!(id = target, score = result.score, %tier, "verification complete");
        Ok(Verdict { result, tier })
    }

    /// Rank every registered identity against `embedding`.
    ///
    /// The identity list is fetched once; backend rows for ids outside that
    /// snapshot are ignored so the result reflects a single identity set. An
    /// empty registry yields an empty result.
    pub async fn identify(
        &self,
        embedding: &Embedding,
    ) -> Result<Vec<MatchCandidate>, ComparisonError> {
        let snapshot = self.backend.list_identities().await?;
        if snapshot.is_empty() {
            tracing::info!("identify: no identities registered");
            return Ok(Vec::new());
        }
        let names: HashMap<IdentityId, &str> =
            snapshot.iter().map(|i| (i.id, i.name.as_str())).collect();

        let rows = self.backend.identify(embedding).await?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(name) = names.get(&row.user_id) else {
                tracing::debug!(id = row.user_id, "identify: ignoring id outside snapshot");
                continue;
            };
            if !seen.insert(row.user_id) {
                tracing::debug!(id = row.user_id, "identify: ignoring duplicate row");
                continue;
            }
            candidates.push(MatchCandidate {
                identity_id: row.user_id,
                identity_name: (*name).to_string(),
                score: row.similarity.unwrap_or(f64::NAN),
            });
        }

        if candidates.len() < snapshot.len() {
            tracing::debug!(
                scored = candidates.len(),
                registered = snapshot.len(),
                "identify: backend scored a subset of identities"
            );
        }

        rank(&mut candidates);
        if let Some(limit) = self.limit {
            candidates.truncate(limit);
        }
        Ok(candidates)
    }
}

/// Sort by descending score, ties by ascending id. NaN scores go last and are
/// logged as a backend contract violation.
pub fn rank(candidates: &mut [MatchCandidate]) {
    for c in candidates.iter().filter(|c| c.score.is_nan()) {
        tracing::warn!(id = c.identity_id, "backend returned a NaN similarity score");
    }
    candidates.sort_by(|a, b| {
        score_order(a.score, b.score).then_with(|| a.identity_id.cmp(&b.identity_id))
    });
}

fn score_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawMatch;
    use crate::testing::{identity, triangle_mesh, FakeBackend};
    use crate::types::Tier;

    fn candidate(id: IdentityId, score: f64) -> MatchCandidate {
        MatchCandidate {
            identity_id: id,
            identity_name: format!("user{id}"),
            score,
        }
    }

    fn ids(candidates: &[MatchCandidate]) -> Vec<IdentityId> {
        candidates.iter().map(|c| c.identity_id).collect()
    }

    fn engine(backend: &Arc<FakeBackend>) -> ComparisonEngine {
        ComparisonEngine::new(backend.clone(), Thresholds::default())
    }

    #[test]
    fn test_rank_ties_broken_by_ascending_id() {
        let mut c = vec![candidate(5, 0.9), candidate(2, 0.9), candidate(9, 0.3)];
        rank(&mut c);
        assert_eq!(ids(&c), vec![2, 5, 9]);
    }

    #[test]
    fn test_rank_nan_last() {
        let mut c = vec![
            candidate(1, f64::NAN),
            candidate(2, -0.4),
            candidate(3, 0.7),
            candidate(0, f64::NAN),
        ];
        rank(&mut c);
        assert_eq!(ids(&c), vec![3, 2, 0, 1]);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_rank_is_deterministic_regardless_of_input_order() {
        let mut a = vec![candidate(3, 0.5), candidate(1, 0.5), candidate(2, 0.8)];
        let mut b = vec![candidate(1, 0.5), candidate(2, 0.8), candidate(3, 0.5)];
        rank(&mut a);
        rank(&mut b);
        assert_eq!(a, b);
        assert_eq!(ids(&a), vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_identify_ranks_backend_scores() {
        let backend = Arc::new(FakeBackend::with_identities(&[(5, "Ada"), (2, "Grace"), (9, "Alan")]));
        backend.set_score(5, 0.9);
        backend.set_score(2, 0.9);
        backend.set_score(9, 0.3);

        let result = engine(&backend)
            .identify(triangle_mesh().embedding())
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![2, 5, 9]);
        assert_eq!(result[0].identity_name, "Grace");
        assert_eq!(result[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_identify_empty_registry() {
        let backend = Arc::new(FakeBackend::default());
        let result = engine(&backend).identify(triangle_mesh().embedding()).await;
        assert_eq!(result, Ok(vec![]));
        assert_eq!(backend.calls("identify"), 0);
    }

    #[tokio::test]
    async fn test_identify_failure_is_not_empty() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada")]));
        backend.fail_with(BackendError::Network("timeout".into()));
        let result = engine(&backend).identify(triangle_mesh().embedding()).await;
        assert!(matches!(result, Err(ComparisonError::Backend(_))));
    }

    #[tokio::test]
    async fn test_identify_uses_single_snapshot() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada"), (2, "Grace")]));
        backend.set_score(1, 0.4);
        backend.set_score(2, 0.6);
        backend.set_score(3, 0.99);
        backend.register_during_identify(identity(3, "Late"));

        let result = engine(&backend)
            .identify(triangle_mesh().embedding())
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![2, 1]);
        assert_eq!(backend.calls("list"), 1);
        assert_eq!(backend.identity_count(), 3);
    }

    #[tokio::test]
    async fn test_identify_keeps_nan_rows() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada"), (2, "Grace")]));
        backend.set_identify_rows(vec![
            RawMatch { user_id: 1, name: "Ada".into(), similarity: None },
            RawMatch { user_id: 2, name: "Grace".into(), similarity: Some(0.1) },
            RawMatch { user_id: 2, name: "Grace".into(), similarity: Some(0.9) },
        ]);

        let result = engine(&backend)
            .identify(triangle_mesh().embedding())
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![2, 1]);
        assert_eq!(result[0].score, 0.1);
        assert!(result[1].score.is_nan());
    }

    #[tokio::test]
    async fn test_identify_limit() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "a"), (2, "b"), (3, "c")]));
        backend.set_score(1, 0.1);
        backend.set_score(2, 0.2);
        backend.set_score(3, 0.3);
        let result = engine(&backend)
            .with_limit(2)
            .identify(triangle_mesh().embedding())
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_verify_bands_scores() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada"), (2, "Grace"), (3, "Alan")]));
        backend.set_score(1, 0.85);
        backend.set_score(2, 0.65);
        backend.set_score(3, 0.2);
        let engine = engine(&backend);
        let mesh = triangle_mesh();

        let v = engine.verify(&mesh, 1).await.unwrap();
        assert_eq!(v.tier, Tier::Match);
        assert_eq!(v.result.score, 0.85);
        assert_eq!(v.result.matched_identity_name, "Ada");

        let v = engine.verify(&mesh, 2).await.unwrap();
        assert_eq!(v.tier, Tier::Uncertain);
        assert_eq!(v.result.matched_identity_name, "Grace");

        assert_eq!(engine.verify(&mesh, 3).await.unwrap().tier, Tier::NoMatch);
    }

    #[tokio::test]
    async fn test_verify_unknown_identity() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada")]));
        let result = engine(&backend).verify(&triangle_mesh(), 42).await;
        assert_eq!(result, Err(ComparisonError::UnknownIdentity(42)));
        assert_eq!(backend.calls("compare"), 0);
    }

    #[tokio::test]
    async fn test_verify_custom_thresholds() {
        let backend = Arc::new(FakeBackend::with_identities(&[(1, "Ada")]));
        backend.set_score(1, 0.65);
        let engine = ComparisonEngine::new(backend.clone(), Thresholds::new(0.6, 0.3).unwrap());
        assert_eq!(engine.verify(&triangle_mesh(), 1).await.unwrap().tier, Tier::Match);
    }
}
