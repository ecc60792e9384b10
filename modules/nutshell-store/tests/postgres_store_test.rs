//! Postgres node store against a real database.
//!
//! **Requires:** Docker (for Postgres via testcontainers).
//!
//! Run with: cargo test -p nutshell-store --features test-utils --test postgres_store_test

#![cfg(feature = "test-utils")]

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use uuid::Uuid;

use nutshell_common::{
    CandidateNode, Claim, ClaimValue, IntelligenceNode, NutshellError, SourceRef,
    VerificationOutcome, VerificationStatus,
};
use nutshell_store::{NodeFilter, NodeStore, UpdateCursor};

fn make_node(headline: &str, embedding: Vec<f32>, tag: &str, age_hours: i64) -> IntelligenceNode {
    let created = Utc::now() - Duration::hours(age_hours);
    let candidate = CandidateNode {
        headline: headline.into(),
        summary: format!("{headline}. More detail follows."),
        source: SourceRef {
            newsletter_id: "the-batch".into(),
            published_at: created,
            snippet: headline.into(),
            url: Some("https://arxiv.org/abs/2402.00002".into()),
            authority: 3,
        },
        tags: BTreeSet::from([tag.to_string()]),
        relevance_score: 6,
        claims: vec![Claim {
            claim_text: "90 on MMLU".into(),
            metric_name: "MMLU".into(),
            claimed_value: ClaimValue::Numeric(90.0),
        }],
        category: Some("Model Release".into()),
        links: vec![],
    };
    IntelligenceNode::from_candidate(candidate, embedding, created)
}

#[tokio::test]
async fn round_trips_and_upserts() {
    let (_container, store) = nutshell_store::testutil::postgres_container().await;

    let mut node = make_node("Acme ships Model X", vec![1.0, 0.0, 0.0], "llm", 1);
    store.put(&node).await.unwrap();

    let loaded = store.get(node.id).await.unwrap();
    assert_eq!(loaded.headline, node.headline);
    assert_eq!(loaded.claims, node.claims);
    assert_eq!(loaded.embedding, node.embedding);

    node.record_verification(VerificationOutcome::Verified, Utc::now())
        .unwrap();
    store.put(&node).await.unwrap();

    let verified = store
        .list(&NodeFilter {
            status: Some(VerificationStatus::Verified),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].id, node.id);
}

#[tokio::test]
async fn missing_node_is_not_found() {
    let (_container, store) = nutshell_store::testutil::postgres_container().await;
    let err = store.get(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, NutshellError::NotFound(_)));
}

#[tokio::test]
async fn nearest_scopes_to_window() {
    let (_container, store) = nutshell_store::testutil::postgres_container().await;

    let recent = make_node("recent", vec![1.0, 0.0, 0.0], "llm", 2);
    let sideways = make_node("sideways", vec![0.0, 1.0, 0.0], "llm", 3);
    let stale = make_node("stale", vec![1.0, 0.0, 0.0], "llm", 200);
    for n in [&recent, &sideways, &stale] {
        store.put(n).await.unwrap();
    }

    let hits = store
        .nearest(&[1.0, 0.0, 0.0], 5, Duration::hours(72))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].node_id, recent.id);
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].node_id, sideways.id);
}

#[tokio::test]
async fn tag_filter_and_update_polling() {
    let (_container, store) = nutshell_store::testutil::postgres_container().await;
    let before = Utc::now() - Duration::minutes(1);

    let llm = make_node("llm node", vec![1.0, 0.0, 0.0], "llm", 0);
    let robotics = make_node("robotics node", vec![0.0, 0.0, 1.0], "robotics", 0);
    store.put(&llm).await.unwrap();
    store.put(&robotics).await.unwrap();

    let tagged = store
        .list(&NodeFilter {
            tag: Some("robotics".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].id, robotics.id);

    let updates = store.updated_since(&UpdateCursor::since(before), 10).await.unwrap();
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn update_polling_pages_through_equal_stamps() {
    let (_container, store) = nutshell_store::testutil::postgres_container().await;
    let stamp = chrono::DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let mut node = make_node(&format!("node {i}"), vec![1.0, 0.0, 0.0], "llm", 0);
        node.updated_at = stamp;
        ids.push(node.id);
        store.put(&node).await.unwrap();
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
