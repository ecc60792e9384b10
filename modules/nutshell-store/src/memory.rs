//! In-memory node store for tests, local runs, and deployments without Postgres.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use nutshell_common::{cosine_similarity, IntelligenceNode, NutshellError, Result};

use crate::store::{rank_hits, NodeFilter, NodeStore, ScoredNode, UpdateCursor};

/// Nodes keyed by id. The similarity index is a linear scan over the same map,
/// so an index entry can never disagree with the node's stored embedding.
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<Uuid, IntelligenceNode>>,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored node, oldest first.
    pub fn all(&self) -> Vec<IntelligenceNode> {
        let mut nodes: Vec<IntelligenceNode> = self
            .nodes
            .read()
            .map(|n| n.values().cloned().collect())
            .unwrap_or_default();
        nodes.sort_by_key(|n| n.created_at);
        nodes
    }
}

fn poisoned() -> NutshellError {
    NutshellError::Store("node map lock poisoned".into())
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn put(&self, node: &IntelligenceNode) -> Result<()> {
        self.nodes
            .write()
            .map_err(|_| poisoned())?
            .insert(node.id, node.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<IntelligenceNode> {
        self.nodes
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned()
            .ok_or(NutshellError::NotFound(id))
    }

    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        window: chrono::Duration,
    ) -> Result<Vec<ScoredNode>> {
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        let hits = nodes
            .values()
            .filter(|n| n.created_at >= cutoff)
            .map(|n| ScoredNode {
                node_id: n.id,
                similarity: cosine_similarity(vector, &n.embedding),
                created_at: n.created_at,
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn list(&self, filter: &NodeFilter) -> Result<Vec<IntelligenceNode>> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        let mut matched: Vec<IntelligenceNode> =
            nodes.values().filter(|n| filter.matches(n)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(filter.effective_limit());
        Ok(matched)
    }

    async fn updated_since(
        &self,
        cursor: &UpdateCursor,
        limit: usize,
    ) -> Result<Vec<IntelligenceNode>> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        let mut updated: Vec<IntelligenceNode> = nodes
            .values()
            .filter(|n| cursor.precedes(n))
            .cloned()
            .collect();
        updated.sort_by_key(|n| (n.updated_at, n.id));
        updated.truncate(limit);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;
    use nutshell_common::{CandidateNode, SourceRef, VerificationStatus};

    use super::*;

    fn node(headline: &str, embedding: Vec<f32>, age_hours: i64) -> IntelligenceNode {
        let created = Utc::now() - Duration::hours(age_hours);
        let candidate = CandidateNode {
            headline: headline.into(),
            summary: format!("{headline} happened."),
            source: SourceRef {
                newsletter_id: "n1".into(),
                published_at: created,
                snippet: headline.into(),
                url: None,
                authority: 0,
            },
            tags: BTreeSet::from(["llm".to_string()]),
            relevance_score: 5,
            claims: vec![],
            category: None,
            links: vec![],
        };
        IntelligenceNode::from_candidate(candidate, embedding, created)
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryNodeStore::new();
        let id = Uuid::new_v4();
        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, NutshellError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn put_upserts_and_reindexes() {
        let store = MemoryNodeStore::new();
        let mut n = node("a", vec![1.0, 0.0], 0);
        store.put(&n).await.unwrap();

        n.embedding = vec![0.0, 1.0];
        store.put(&n).await.unwrap();
        assert_eq!(store.len(), 1);

        let hits = store
            .nearest(&[0.0, 1.0], 5, Duration::hours(72))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn nearest_respects_window_and_k() {
        let store = MemoryNodeStore::new();
        let recent = node("recent", vec![1.0, 0.0], 1);
        let close = node("close", vec![0.9, 0.1], 2);
        let stale = node("stale", vec![1.0, 0.0], 100);
        for n in [&recent, &close, &stale] {
            store.put(n).await.unwrap();
        }

        let hits = store
            .nearest(&[1.0, 0.0], 5, Duration::hours(72))
            .await
            .unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(ids, vec![recent.id, close.id]);

        let top = store.nearest(&[1.0, 0.0], 1, Duration::hours(72)).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn window_reaching_past_the_calendar_includes_everything() {
        let store = MemoryNodeStore::new();
        store.put(&node("old", vec![1.0], 100)).await.unwrap();
        let hits = store
            .nearest(&[1.0], 5, Duration::weeks(1_000_000_000))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn nearest_on_empty_store_is_empty() {
        let store = MemoryNodeStore::new();
        let hits = store.nearest(&[1.0], 5, Duration::hours(72)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_tag_status_and_time() {
        let store = MemoryNodeStore::new();
        let mut verified = node("verified", vec![1.0], 1);
        verified.verification_status = VerificationStatus::Verified;
        let mut other_tag = node("other", vec![1.0], 2);
        other_tag.tags = BTreeSet::from(["robotics".to_string()]);
        let old = node("old", vec![1.0], 48);
        for n in [&verified, &other_tag, &old] {
            store.put(n).await.unwrap();
        }

        let by_tag = store
            .list(&NodeFilter {
                tag: Some("llm".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            by_tag.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![verified.id, old.id]
        );

        let by_status = store
            .list(&NodeFilter {
                status: Some(VerificationStatus::Verified),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);

        let recent = store
            .list(&NodeFilter {
                created_from: Some(Utc::now() - Duration::hours(24)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn updated_since_is_strict_and_ordered() {
        let store = MemoryNodeStore::new();
        let base = Utc::now();
        let mut first = node("first", vec![1.0], 0);
        first.updated_at = base + Duration::seconds(1);
        let mut second = node("second", vec![1.0], 0);
        second.updated_at = base + Duration::seconds(2);
        store.put(&second).await.unwrap();
        store.put(&first).await.unwrap();

        let all = store.updated_since(&UpdateCursor::since(base), 10).await.unwrap();
        assert_eq!(
            all.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let after_first = store
            .updated_since(&UpdateCursor::since(first.updated_at), 10)
            .await
            .unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id, second.id);
    }

    #[tokio::test]
    async fn paging_through_equal_stamps_loses_nothing() {
        let store = MemoryNodeStore::new();
        let stamp = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut n = node(&format!("node {i}"), vec![1.0], 0);
            n.updated_at = stamp;
            ids.push(n.id);
            store.put(&n).await.unwrap();
        }
        ids.sort();

        let mut cursor = UpdateCursor::since(stamp - Duration::seconds(1));
        let mut seen = Vec::new();
        loop {
            let page = store.updated_since(&cursor, 2).await.unwrap();
            let Some(last) = page.last() else { break };
            cursor = UpdateCursor::after(last);
            seen.extend(page.iter().map(|n| n.id));
        }
        assert_eq!(seen, ids);
    }
}
