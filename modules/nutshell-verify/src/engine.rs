//! Verification of one node: snapshot, fetch, compare, commit.
//!
//! Fetching and comparison run without any lock on the node. Only the commit
//! takes the node's lock, and it is dropped if the claims changed meanwhile.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nutshell_common::{Claim, Result, VerificationConfig, VerificationOutcome, VerificationStatus};
use nutshell_store::{NodeLocks, NodeStore};

use crate::compare::{aggregate, check_claim_across};
use crate::extract::Document;
use crate::fetcher::{fetch_with_retry, DocumentFetcher};
use crate::reference::{supported_references, Reference};

/// What a verification run did to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationRun {
    Committed(VerificationStatus),
    /// No reference we can read; the node stays `Unverified`.
    NoReferences,
    /// Nothing to do: no claims, or a result was already committed.
    NotPending,
    /// Claims changed while in flight; the result was discarded.
    Stale,
}

pub struct VerificationEngine {
    store: Arc<dyn NodeStore>,
    fetcher: Arc<dyn DocumentFetcher>,
    locks: Arc<NodeLocks>,
    config: VerificationConfig,
}

impl VerificationEngine {
    pub fn new(
        store: Arc<dyn NodeStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        locks: Arc<NodeLocks>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub async fn verify_node(&self, node_id: Uuid) -> Result<VerificationRun> {
        let snapshot = self.store.get(node_id).await?;
        if snapshot.claims.is_empty()
            || snapshot.verification_status != VerificationStatus::Unverified
        {
            return Ok(VerificationRun::NotPending);
        }

        let references = supported_references(&snapshot.reference_urls());
        if references.is_empty() {
            debug!(%node_id, "No supported reference, leaving node unverified");
            return Ok(VerificationRun::NoReferences);
        }

        let deadline = self.config.deadline(references.len());
        let outcome =
            match tokio::time::timeout(deadline, self.evaluate(&snapshot.claims, &references)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(%node_id, deadline_secs = deadline.as_secs(), "Verification deadline exceeded");
                    VerificationOutcome::Failed(format!(
                        "verification exceeded its {}s deadline",
                        deadline.as_secs()
                    ))
                }
            };

        self.commit(node_id, &snapshot.claims, outcome).await
    }

    /// Fetch every reference and compare `claims` against what could be read.
    pub async fn evaluate(&self, claims: &[Claim], references: &[Reference]) -> VerificationOutcome {
        let fetches = references.iter().filter_map(|reference| {
            let fetch_url = reference.fetch_url()?;
            Some(async move {
                let result = fetch_with_retry(self.fetcher.as_ref(), &fetch_url, &self.config).await;
                (reference, result)
            })
        });

        let mut documents = Vec::new();
        let mut failures = Vec::new();
        for (reference, result) in join_all(fetches).await {
            match result {
                Ok(body) => documents.push(Document::new(&reference.url, &body)),
                Err(e) => {
                    warn!(url = reference.url.as_str(), error = %e, "Reference fetch exhausted");
                    failures.push(format!("{}: {e}", reference.url));
                }
            }
        }

        if documents.is_empty() {
            return VerificationOutcome::Failed(format!(
                "could not fetch any reference ({})",
                failures.join("; ")
            ));
        }

        let checks = claims
            .iter()
            .map(|claim| {
                check_claim_across(
                    claim,
                    &documents,
                    self.config.numeric_tolerance,
                    self.config.proximity_tokens,
                )
            })
            .collect();
        aggregate(checks)
    }

    async fn commit(
        &self,
        node_id: Uuid,
        claims_snapshot: &[Claim],
        outcome: VerificationOutcome,
    ) -> Result<VerificationRun> {
        let _guard = self.locks.lock(node_id).await;
        let mut node = self.store.get(node_id).await?;

        if node.claims != claims_snapshot {
            info!(%node_id, "Claims changed during verification, discarding result");
            return Ok(VerificationRun::Stale);
        }
        if node.verification_status != VerificationStatus::Unverified {
            return Ok(VerificationRun::NotPending);
        }

        let status = outcome.status();
        let discrepancies = match &outcome {
            VerificationOutcome::Discrepant(d) => d.len(),
            _ => 0,
        };
        node.record_verification(outcome, Utc::now())?;
        self.store.put(&node).await?;

        info!(%node_id, %status, discrepancies, "Committed verification result");
        Ok(VerificationRun::Committed(status))
    }
}
