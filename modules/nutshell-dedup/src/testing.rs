// Test doubles for the dedup engine.
//
// - FixedEmbedder (TextEmbedder): registered texts get exact vectors, the rest hash
// - FailingEmbedder (TextEmbedder): fails a configurable number of calls, then delegates
//
// Plus fixture helpers for candidates and unit vectors at a given angle.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use nutshell_common::text::embedding_text;
use nutshell_common::{CandidateNode, Claim, ClaimValue, NutshellError, Result, SourceRef};

use crate::embedder::TextEmbedder;

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 64;

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder for testing. Registered texts get exact vectors;
/// unmatched texts get a unique hash-based vector (low similarity to everything).
///
/// Keys are matched verbatim, so register the normalized text the engine embeds
/// (see [`FixedEmbedder::on_candidate`]).
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    /// Register a text→vector mapping for controlled similarity.
    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Register the vector a candidate's node-level text should embed to.
    pub fn on_candidate(self, candidate: &CandidateNode, vector: Vec<f32>) -> Self {
        let key = embedding_text(&candidate.headline, &candidate.summary);
        self.on_text(&key, vector)
    }

    /// Gateway calls made so far (a batch counts once).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_vector(text))
    }

    /// Generate a deterministic hash-based vector for unmatched text.
    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        let mut state = seed;
        for v in vec.iter_mut() {
            // Simple LCG PRNG
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 32) as u32 as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        // Normalize to unit vector
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// FailingEmbedder
// ---------------------------------------------------------------------------

/// Fails the first `failures` calls with `EmbeddingUnavailable`, then delegates.
pub struct FailingEmbedder<E> {
    inner: E,
    remaining: AtomicU32,
}

impl<E: TextEmbedder> FailingEmbedder<E> {
    pub fn new(inner: E, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
        }
    }

    /// Never recovers.
    pub fn always(inner: E) -> Self {
        Self::new(inner, u32::MAX)
    }

    /// Make the next `failures` calls fail again.
    pub fn fail_next(&self, failures: u32) {
        self.remaining.store(failures, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<E: TextEmbedder> TextEmbedder for FailingEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.should_fail() {
            return Err(NutshellError::EmbeddingUnavailable("gateway down".into()));
        }
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.should_fail() {
            return Err(NutshellError::EmbeddingUnavailable("gateway down".into()));
        }
        self.inner.embed_batch(texts).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Unit vector in the first two dimensions at `degrees` from the x axis.
pub fn unit_at(degrees: f64, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension.max(2)];
    let radians = degrees.to_radians();
    v[0] = radians.cos() as f32;
    v[1] = radians.sin() as f32;
    v
}

pub fn source(newsletter_id: &str, published_at: DateTime<Utc>) -> SourceRef {
    SourceRef {
        newsletter_id: newsletter_id.to_string(),
        published_at,
        snippet: format!("as covered by {newsletter_id}"),
        url: None,
        authority: 0,
    }
}

pub fn candidate(headline: &str, summary: &str, newsletter_id: &str) -> CandidateNode {
    CandidateNode {
        headline: headline.to_string(),
        summary: summary.to_string(),
        source: source(newsletter_id, Utc::now()),
        tags: BTreeSet::new(),
        relevance_score: 5,
        claims: Vec::new(),
        category: None,
        links: Vec::new(),
    }
}

pub fn numeric_claim(metric: &str, value: f64) -> Claim {
    Claim {
        claim_text: format!("{value} on {metric}"),
        metric_name: metric.to_string(),
        claimed_value: ClaimValue::Numeric(value),
    }
}
