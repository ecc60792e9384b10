//! Field-level merge policy: how a candidate's fields land on its merge target.
//!
//! All gateway calls happen before the node is touched, so an embedding
//! failure leaves the node exactly as it was read.

use std::cmp::Ordering;

use tracing::debug;

use nutshell_common::text::{embedding_text, is_bulleted, normalize_text, split_sentences, token_count};
use nutshell_common::{cosine_similarity, meets_threshold, CandidateNode, DedupConfig, IntelligenceNode, Result};

use crate::embedder::TextEmbedder;

/// What a merge changed on the target node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub headline_replaced: bool,
    pub sentences_added: usize,
    pub source_appended: bool,
    pub tags_added: usize,
    pub claims_added: usize,
    pub links_added: usize,
    /// New reference URLs (source urls plus links) the node can be verified against.
    pub references_added: usize,
    pub relevance_raised: bool,
    pub category_changed: bool,
    pub reembedded: bool,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.headline_replaced
            || self.sentences_added > 0
            || self.source_appended
            || self.tags_added > 0
            || self.claims_added > 0
            || self.links_added > 0
            || self.relevance_raised
            || self.category_changed
    }
}

/// Higher-authority source wins; on equal authority the more specific
/// (more tokens, then longer) headline wins. Equal headlines keep the existing one.
pub fn candidate_headline_wins(node: &IntelligenceNode, candidate: &CandidateNode) -> bool {
    match candidate.source.authority.cmp(&node.headline_authority) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => specificity(&candidate.headline) > specificity(&node.headline),
    }
}

fn specificity(headline: &str) -> (usize, usize) {
    (token_count(headline), normalize_text(headline).chars().count())
}

/// Candidate sentences not covered by the existing summary, in candidate order.
///
/// A sentence is covered when its normalized text already appears, or when its
/// embedding scores at or above `threshold` against any existing sentence (or a
/// sentence accepted earlier from the same candidate).
pub async fn uncovered_sentences(
    existing: &str,
    incoming: &str,
    embedder: &dyn TextEmbedder,
    threshold: f64,
) -> Result<Vec<String>> {
    let existing_norm: Vec<String> = split_sentences(existing)
        .iter()
        .map(|s| normalize_text(s))
        .collect();

    let mut fresh: Vec<(String, String)> = Vec::new();
    for sentence in split_sentences(incoming) {
        let norm = normalize_text(&sentence);
        if existing_norm.contains(&norm) || fresh.iter().any(|(_, n)| *n == norm) {
            continue;
        }
        fresh.push((sentence, norm));
    }
    if fresh.is_empty() || existing_norm.is_empty() {
        return Ok(fresh.into_iter().map(|(s, _)| s).collect());
    }

    let mut texts = existing_norm.clone();
    texts.extend(fresh.iter().map(|(_, n)| n.clone()));
    let vectors = embedder.embed_batch(texts).await?;
    let (existing_vecs, fresh_vecs) = vectors.split_at(existing_norm.len());

    let mut covered_by: Vec<&Vec<f32>> = existing_vecs.iter().collect();
    let mut accepted = Vec::new();
    for ((sentence, _), vector) in fresh.into_iter().zip(fresh_vecs.iter()) {
        let best = covered_by
            .iter()
            .map(|v| cosine_similarity(vector, v))
            .fold(f64::MIN, f64::max);
        if meets_threshold(best, threshold) {
            debug!(sentence = sentence.as_str(), similarity = best, "Sentence already covered");
            continue;
        }
        covered_by.push(vector);
        accepted.push(sentence);
    }
    Ok(accepted)
}

fn append_sentences(summary: &str, sentences: &[String]) -> String {
    let mut merged = summary.trim_end().to_string();
    let bulleted = is_bulleted(&merged);
    for sentence in sentences {
        if bulleted {
            merged.push_str("\n- ");
            merged.push_str(sentence);
        } else {
            if !merged.is_empty() {
                if !merged.ends_with(['.', '!', '?']) {
                    merged.push('.');
                }
                merged.push(' ');
            }
            merged.push_str(sentence);
        }
    }
    merged
}

/// Apply the merge policy for `candidate` onto `node`. The caller stamps
/// `updated_at` when it persists a changed node.
pub async fn apply_merge(
    node: &mut IntelligenceNode,
    candidate: CandidateNode,
    embedder: &dyn TextEmbedder,
    config: &DedupConfig,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let references_before = node.reference_urls().len();

    // --- Gateway work first ---
    let new_sentences = uncovered_sentences(
        &node.summary,
        &candidate.summary,
        embedder,
        config.sentence_merge_threshold,
    )
    .await?;
    let take_headline = candidate_headline_wins(node, &candidate);

    let headline = if take_headline {
        candidate.headline.trim().to_string()
    } else {
        node.headline.clone()
    };
    let summary = if new_sentences.is_empty() {
        node.summary.clone()
    } else {
        append_sentences(&node.summary, &new_sentences)
    };

    let embedding = if embedding_text(&headline, &summary) != embedding_text(&node.headline, &node.summary) {
        Some(embedder.embed(&embedding_text(&headline, &summary)).await?)
    } else {
        None
    };

    // --- Mutations ---
    if take_headline {
        report.headline_replaced = headline != node.headline;
        node.headline = headline;
        node.headline_authority = candidate.source.authority;
        if candidate.category.is_some() && candidate.category != node.category {
            node.category = candidate.category.clone();
            report.category_changed = true;
        }
    }
    if node.category.is_none() && candidate.category.is_some() {
        node.category = candidate.category.clone();
        report.category_changed = true;
    }

    report.sentences_added = new_sentences.len();
    node.summary = summary;

    if let Some(embedding) = embedding {
        node.embedding = embedding;
        report.reembedded = true;
    }

    if !node.sources.iter().any(|s| s.same_reference(&candidate.source)) {
        node.sources.push(candidate.source);
        report.source_appended = true;
    }

    for tag in candidate.tags {
        if node.tags.insert(tag) {
            report.tags_added += 1;
        }
    }

    if candidate.relevance_score > node.relevance_score {
        node.relevance_score = candidate.relevance_score;
        report.relevance_raised = true;
    }

    for claim in candidate.claims {
        if !node.claims.iter().any(|c| c.same_assertion(&claim)) {
            node.claims.push(claim);
            report.claims_added += 1;
        }
    }

    for link in candidate.links {
        if !node.links.contains(&link) {
            node.links.push(link);
            report.links_added += 1;
        }
    }

    report.references_added = node.reference_urls().len() - references_before;
    if report.claims_added > 0 {
        node.reset_verification();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use nutshell_common::{Claim, ClaimValue, SourceRef, VerificationStatus};

    use super::*;
    use crate::testing::FixedEmbedder;

    fn source(newsletter: &str, authority: u8) -> SourceRef {
        SourceRef {
            newsletter_id: newsletter.into(),
            published_at: Utc::now(),
            snippet: format!("snippet from {newsletter}"),
            url: None,
            authority,
        }
    }

    fn candidate(headline: &str, summary: &str, newsletter: &str) -> CandidateNode {
        CandidateNode {
            headline: headline.into(),
            summary: summary.into(),
            source: source(newsletter, 0),
            tags: BTreeSet::new(),
            relevance_score: 5,
            claims: vec![],
            category: None,
            links: vec![],
        }
    }

    fn base_node() -> IntelligenceNode {
        IntelligenceNode::from_candidate(
            candidate(
                "Acme ships Model X with open weights",
                "Model X is released today. It has 70B parameters.",
                "tldr",
            ),
            vec![1.0, 0.0],
            Utc::now(),
        )
    }

    #[test]
    fn headline_authority_then_specificity() {
        let node = base_node();

        let mut shorter_but_primary = candidate("Model X out", "x", "acme-blog");
        shorter_but_primary.source.authority = 9;
        assert!(candidate_headline_wins(&node, &shorter_but_primary));

        let longer = candidate("Acme ships Model X with open weights and a 1M context", "x", "b");
        assert!(candidate_headline_wins(&node, &longer));

        let shorter = candidate("Model X ships", "x", "c");
        assert!(!candidate_headline_wins(&node, &shorter));

        let same = candidate("Acme ships Model X with open weights", "x", "d");
        assert!(!candidate_headline_wins(&node, &same));
    }

    #[test]
    fn appended_sentences_keep_sentence_boundaries() {
        assert_eq!(
            append_sentences("One fact", &["Two facts.".into()]),
            "One fact. Two facts."
        );
        assert_eq!(
            append_sentences("- One fact\n- Another", &["Third".into()]),
            "- One fact\n- Another\n- Third"
        );
        assert_eq!(append_sentences("", &["Only.".into()]), "Only.");
    }

    #[test]
    fn paragraphs_are_not_treated_as_bullets() {
        assert_eq!(
            append_sentences("Model X is out.\n\nWeights follow next week.", &["It is MIT licensed.".into()]),
            "Model X is out.\n\nWeights follow next week. It is MIT licensed."
        );
    }

    #[tokio::test]
    async fn exact_repeats_are_covered_without_embedding() {
        let embedder = FixedEmbedder::new(16);
        let fresh = uncovered_sentences(
            "Model X is released today. It has 70B parameters.",
            "model x is **released** today.",
            &embedder,
            0.75,
        )
        .await
        .unwrap();
        assert!(fresh.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn semantically_covered_sentences_are_dropped() {
        let embedder = FixedEmbedder::new(2)
            .on_text("it has 70b parameters.", vec![1.0, 0.0])
            .on_text("the model has seventy billion parameters.", vec![0.95, 0.05])
            .on_text("it is licensed apache 2.0.", vec![0.0, 1.0]);
        let fresh = uncovered_sentences(
            "It has 70B parameters.",
            "The model has seventy billion parameters. It is licensed Apache 2.0.",
            &embedder,
            0.75,
        )
        .await
        .unwrap();
        assert_eq!(fresh, vec!["It is licensed Apache 2.0.".to_string()]);
    }

    #[tokio::test]
    async fn merge_unions_fields_and_resets_verification_on_new_claims() {
        let embedder = FixedEmbedder::new(16);
        let mut node = base_node();
        node.verification_status = VerificationStatus::Verified;
        node.tags.insert("llm".into());

        let mut incoming = candidate("Model X ships", "It has 70B parameters.", "the-batch");
        incoming.tags = BTreeSet::from(["llm".to_string(), "acme".to_string()]);
        incoming.relevance_score = 9;
        incoming.links = vec!["https://github.com/acme/model-x".into()];
        incoming.claims = vec![Claim {
            claim_text: "90 on MMLU".into(),
            metric_name: "MMLU".into(),
            claimed_value: ClaimValue::Numeric(90.0),
        }];

        let report = apply_merge(&mut node, incoming, &embedder, &DedupConfig::default())
            .await
            .unwrap();

        assert!(!report.headline_replaced);
        assert_eq!(report.sentences_added, 0);
        assert!(report.source_appended);
        assert_eq!(report.tags_added, 1);
        assert_eq!(report.claims_added, 1);
        assert!(!report.reembedded);
        assert_eq!(node.sources.len(), 2);
        assert_eq!(node.relevance_score, 9);
        assert_eq!(node.links.len(), 1);
        assert_eq!(report.references_added, 1);
        assert_eq!(node.verification_status, VerificationStatus::Unverified);
        assert_eq!(node.embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn replacing_the_headline_reembeds() {
        let embedder = FixedEmbedder::new(2);
        let mut node = base_node();
        let mut incoming = candidate("Model X", "Model X is released today.", "acme-blog");
        incoming.source.authority = 10;
        incoming.category = Some("Model Release".into());

        let report = apply_merge(&mut node, incoming, &embedder, &DedupConfig::default())
            .await
            .unwrap();

        assert!(report.headline_replaced);
        assert!(report.reembedded);
        assert_eq!(node.headline, "Model X");
        assert_eq!(node.headline_authority, 10);
        assert_eq!(node.category.as_deref(), Some("Model Release"));
        assert_ne!(node.embedding, vec![1.0, 0.0]);
    }
}
