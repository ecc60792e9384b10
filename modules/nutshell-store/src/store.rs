// NodeStore: the one shared mutable resource of the pipeline.
//
// The merge path reads through `nearest` + `get` and writes through `put`;
// verification reads a node snapshot and writes its outcome back through `put`.
// Presentation reads go through `list` and `updated_since`.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use nutshell_common::{IntelligenceNode, Result, VerificationStatus};

/// One similarity-index hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredNode {
    pub node_id: Uuid,
    /// Cosine similarity in [-1, 1].
    pub similarity: f64,
    pub created_at: DateTime<Utc>,
}

/// Read filter for presentation queries. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub tag: Option<String>,
    pub status: Option<VerificationStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn matches(&self, node: &IntelligenceNode) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tags.contains(tag) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if node.verification_status != status {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if node.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if node.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Resume point for `updated_since`: the `updated_at` and id of the last node a
/// reader saw. Without an id every node stamped exactly at `updated_at` is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCursor {
    pub updated_at: DateTime<Utc>,
    pub id: Option<Uuid>,
}

impl UpdateCursor {
    pub fn since(updated_at: DateTime<Utc>) -> Self {
        Self { updated_at, id: None }
    }

    /// Continue right after `node` in `(updated_at, id)` order.
    pub fn after(node: &IntelligenceNode) -> Self {
        Self {
            updated_at: node.updated_at,
            id: Some(node.id),
        }
    }

    pub fn precedes(&self, node: &IntelligenceNode) -> bool {
        match node.updated_at.cmp(&self.updated_at) {
            Ordering::Greater => true,
            Ordering::Equal => self.id.is_some_and(|id| node.id > id),
            Ordering::Less => false,
        }
    }
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Upsert by id. The similarity index reflects the stored embedding only.
    async fn put(&self, node: &IntelligenceNode) -> Result<()>;

    /// Exact lookup. `NutshellError::NotFound` if absent.
    async fn get(&self, id: Uuid) -> Result<IntelligenceNode>;

    /// Up to `k` nodes created within `window` of now, most similar first.
    /// Equal similarities list the older node first.
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        window: chrono::Duration,
    ) -> Result<Vec<ScoredNode>>;

    /// Filtered listing, newest first.
    async fn list(&self, filter: &NodeFilter) -> Result<Vec<IntelligenceNode>>;

    /// Poll contract for incremental readers: nodes after `cursor` in
    /// `(updated_at, id)` order, oldest update first. Feed
    /// `UpdateCursor::after(last)` back in to page without gaps.
    async fn updated_since(
        &self,
        cursor: &UpdateCursor,
        limit: usize,
    ) -> Result<Vec<IntelligenceNode>>;
}

/// Order hits by similarity descending, then creation ascending, and keep `k`.
pub fn rank_hits(mut hits: Vec<ScoredNode>, k: usize) -> Vec<ScoredNode> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then(a.created_at.cmp(&b.created_at))
    });
    hits.truncate(k);
    hits
}
