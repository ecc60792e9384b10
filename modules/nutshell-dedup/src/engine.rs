//! Candidate → node resolution.
//!
//! A candidate is embedded once, compared against nodes created inside the
//! lookback window, and either merged into the single best match at or above
//! the threshold or inserted as a new node. Merges into the same node are
//! serialized by [`NodeLocks`]; first sightings are serialized by a narrow
//! insert gate that re-checks for a match before writing, so two near-identical
//! candidates arriving together never produce two nodes.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use nutshell_common::text::{embedding_text, token_count};
use nutshell_common::{
    meets_threshold, CandidateNode, DedupConfig, IntelligenceNode, NutshellError, Result,
    VerificationStatus, VerificationTask,
};
use nutshell_store::{NodeLocks, NodeStore, ScoredNode};

use crate::dead_letter::DeadLetterQueue;
use crate::embedder::TextEmbedder;
use crate::merge::{apply_merge, MergeReport};

/// Result of processing one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Created { node_id: Uuid },
    Merged {
        node_id: Uuid,
        similarity: f64,
        report: MergeReport,
    },
}

impl MergeOutcome {
    pub fn node_id(&self) -> Uuid {
        match self {
            MergeOutcome::Created { node_id } | MergeOutcome::Merged { node_id, .. } => *node_id,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub created: usize,
    pub merged: usize,
    pub parked_again: usize,
    pub rejected: usize,
}

/// The best hit at or above `threshold`: highest similarity, earliest creation on ties.
pub fn select_merge_target(hits: &[ScoredNode], threshold: f64) -> Option<ScoredNode> {
    hits.iter()
        .filter(|hit| meets_threshold(hit.similarity, threshold))
        .min_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        })
        .copied()
}

/// Reject candidates the engine cannot meaningfully embed or rank.
pub fn validate_candidate(candidate: &CandidateNode, min_tokens: usize) -> Result<()> {
    if candidate.headline.trim().is_empty() {
        return Err(NutshellError::InvalidCandidate("headline is empty".into()));
    }
    if candidate.source.newsletter_id.trim().is_empty() {
        return Err(NutshellError::InvalidCandidate(
            "source newsletter id is empty".into(),
        ));
    }
    if !(1..=10).contains(&candidate.relevance_score) {
        return Err(NutshellError::InvalidCandidate(format!(
            "relevance score {} outside 1..=10",
            candidate.relevance_score
        )));
    }
    let tokens = token_count(&embedding_text(&candidate.headline, &candidate.summary));
    if tokens < min_tokens {
        return Err(NutshellError::InvalidCandidate(format!(
            "{tokens} tokens of text, need at least {min_tokens}"
        )));
    }
    Ok(())
}

/// A merged node goes back to the verifier when it gained claims, or when an
/// unverified node with claims gained a reference URL to check them against.
fn needs_verification(node: &IntelligenceNode, report: &MergeReport) -> bool {
    if node.claims.is_empty() || node.verification_status != VerificationStatus::Unverified {
        return false;
    }
    report.claims_added > 0 || report.references_added > 0
}

/// Collaborators for [`DedupEngine`].
#[derive(Clone, TypedBuilder)]
pub struct DedupDeps {
    pub store: Arc<dyn NodeStore>,
    pub embedder: Arc<dyn TextEmbedder>,
    #[builder(default)]
    pub locks: Arc<NodeLocks>,
    #[builder(default)]
    pub config: DedupConfig,
    #[builder(default, setter(strip_option))]
    pub verification_tx: Option<mpsc::UnboundedSender<VerificationTask>>,
    #[builder(default)]
    pub dead_letters: Arc<DeadLetterQueue>,
}

pub struct DedupEngine {
    store: Arc<dyn NodeStore>,
    embedder: Arc<dyn TextEmbedder>,
    locks: Arc<NodeLocks>,
    config: DedupConfig,
    verification_tx: Option<mpsc::UnboundedSender<VerificationTask>>,
    dead_letters: Arc<DeadLetterQueue>,
    insert_gate: Mutex<()>,
}

impl DedupEngine {
    pub fn new(deps: DedupDeps) -> Self {
        Self {
            store: deps.store,
            embedder: deps.embedder,
            locks: deps.locks,
            config: deps.config,
            verification_tx: deps.verification_tx,
            dead_letters: deps.dead_letters,
            insert_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Resolve one candidate into a created or updated node.
    ///
    /// Embedding failures are retried with exponential backoff; once attempts
    /// are exhausted the candidate is parked in the dead-letter queue and the
    /// error is returned. Store errors propagate without parking.
    pub async fn process(&self, candidate: CandidateNode) -> Result<MergeOutcome> {
        validate_candidate(&candidate, self.config.min_candidate_tokens)?;

        let attempts = self.config.embed_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match self.process_once(candidate.clone()).await {
                Err(NutshellError::EmbeddingUnavailable(reason)) => {
                    attempt += 1;
                    if attempt >= attempts {
                        self.dead_letters.park(candidate, reason.clone(), attempt);
                        return Err(NutshellError::EmbeddingUnavailable(reason));
                    }
                    let backoff = self.config.embed_backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        max = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = reason.as_str(),
                        "Embedding unavailable, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn process_once(&self, candidate: CandidateNode) -> Result<MergeOutcome> {
        let text = embedding_text(&candidate.headline, &candidate.summary);
        let embedding = self.embedder.embed(&text).await?;

        let hits = self
            .store
            .nearest(&embedding, self.config.nearest_k, self.config.lookback_window)
            .await?;
        if let Some(target) = select_merge_target(&hits, self.config.similarity_threshold) {
            return self.merge_into(target, candidate).await;
        }
        self.insert(candidate, embedding).await
    }

    async fn insert(&self, candidate: CandidateNode, embedding: Vec<f32>) -> Result<MergeOutcome> {
        let gate = self.insert_gate.lock().await;

        // Another first sighting may have landed while this one was embedding.
        let hits = self
            .store
            .nearest(&embedding, self.config.nearest_k, self.config.lookback_window)
            .await?;
        if let Some(target) = select_merge_target(&hits, self.config.similarity_threshold) {
            drop(gate);
            return self.merge_into(target, candidate).await;
        }

        let node = IntelligenceNode::from_candidate(candidate, embedding, Utc::now());
        self.store.put(&node).await?;
        drop(gate);

        info!(
            node_id = %node.id,
            headline = node.headline.as_str(),
            newsletter = node.sources[0].newsletter_id.as_str(),
            "Created intelligence node"
        );
        if !node.claims.is_empty() {
            self.schedule_verification(node.id);
        }
        Ok(MergeOutcome::Created { node_id: node.id })
    }

    async fn merge_into(&self, target: ScoredNode, candidate: CandidateNode) -> Result<MergeOutcome> {
        let _guard = self.locks.lock(target.node_id).await;
        let mut node = self.store.get(target.node_id).await?;

        let report = apply_merge(&mut node, candidate, self.embedder.as_ref(), &self.config).await?;
        if report.changed() {
            // Stamp after the gateway calls; updated_at must not predate the write.
            node.updated_at = Utc::now();
            self.store.put(&node).await?;
        }

        info!(
            node_id = %node.id,
            similarity = target.similarity,
            mentions = node.mention_count(),
            sentences_added = report.sentences_added,
            claims_added = report.claims_added,
            headline_replaced = report.headline_replaced,
            "Merged candidate into node"
        );
        if needs_verification(&node, &report) {
            self.schedule_verification(node.id);
        }
        Ok(MergeOutcome::Merged {
            node_id: node.id,
            similarity: target.similarity,
            report,
        })
    }

    fn schedule_verification(&self, node_id: Uuid) {
        if let Some(tx) = &self.verification_tx {
            if tx.send(VerificationTask { node_id }).is_err() {
                warn!(%node_id, "Verification queue closed, task dropped");
            }
        }
    }

    /// Re-run every parked candidate. Candidates that fail again are re-parked.
    pub async fn replay_dead_letters(&self) -> ReplayReport {
        let mut report = ReplayReport::default();
        for letter in self.dead_letters.drain() {
            report.replayed += 1;
            match self.process(letter.candidate.clone()).await {
                Ok(MergeOutcome::Created { .. }) => report.created += 1,
                Ok(MergeOutcome::Merged { .. }) => report.merged += 1,
                // `process` already re-parked it.
                Err(NutshellError::EmbeddingUnavailable(_)) => report.parked_again += 1,
                Err(NutshellError::InvalidCandidate(reason)) => {
                    warn!(reason = reason.as_str(), "Dropping invalid parked candidate");
                    report.rejected += 1;
                }
                Err(e) => {
                    self.dead_letters
                        .park(letter.candidate, e.to_string(), letter.attempts);
                    report.parked_again += 1;
                }
            }
        }
        info!(
            replayed = report.replayed,
            created = report.created,
            merged = report.merged,
            parked_again = report.parked_again,
            "Dead-letter replay finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration};

    use super::*;
    use crate::testing::candidate;

    fn hit(similarity: f64, created_at: DateTime<Utc>) -> ScoredNode {
        ScoredNode {
            node_id: Uuid::new_v4(),
            similarity,
            created_at,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let now = Utc::now();
        assert!(select_merge_target(&[hit(0.85, now)], 0.85).is_some());
        assert!(select_merge_target(&[hit(0.8499, now)], 0.85).is_none());
        assert!(select_merge_target(&[], 0.85).is_none());
    }

    #[test]
    fn best_match_wins_and_ties_go_to_the_oldest() {
        let now = Utc::now();
        let weaker = hit(0.90, now - Duration::hours(10));
        let older = hit(0.95, now - Duration::hours(5));
        let newer = hit(0.95, now - Duration::hours(1));

        let picked = select_merge_target(&[newer, weaker, older], 0.85).unwrap();
        assert_eq!(picked.node_id, older.node_id);
    }

    #[test]
    fn validation_rejects_thin_or_malformed_candidates() {
        assert!(validate_candidate(&candidate("Acme ships Model X", "", "tldr"), 3).is_ok());

        let empty = candidate("   ", "Something happened today.", "tldr");
        assert!(matches!(
            validate_candidate(&empty, 3),
            Err(NutshellError::InvalidCandidate(_))
        ));

        let thin = candidate("AI", "", "tldr");
        assert!(matches!(
            validate_candidate(&thin, 3),
            Err(NutshellError::InvalidCandidate(_))
        ));

        let mut unranked = candidate("Acme ships Model X", "", "tldr");
        unranked.relevance_score = 0;
        assert!(validate_candidate(&unranked, 3).is_err());

        let anonymous = candidate("Acme ships Model X", "", " ");
        assert!(validate_candidate(&anonymous, 3).is_err());
    }
}
