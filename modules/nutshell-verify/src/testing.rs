// Test doubles for claim verification.
//
// - MockFetcher (DocumentFetcher): HashMap-based URL→body, with scripted failures
//
// Plus fixture helpers for nodes that cite reference documents.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use nutshell_common::{CandidateNode, Claim, ClaimValue, IntelligenceNode, SourceRef};

use crate::error::FetchError;
use crate::fetcher::DocumentFetcher;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based document fetcher. Returns a retryable `Err` for unregistered URLs.
/// Builder pattern: `.on_document()`, `.fail_first()`, `.with_status()`, `.with_delay()`.
#[derive(Default)]
pub struct MockFetcher {
    documents: HashMap<String, String>,
    statuses: HashMap<String, u16>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.to_string());
        self
    }

    /// The first `n` fetches of `url` fail with a transport error.
    pub fn fail_first(self, url: &str, n: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), n);
        self
    }

    /// Every fetch of `url` answers with this HTTP status.
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DocumentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted_failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(url) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if scripted_failure {
            return Err(FetchError::Request(format!("connection reset: {url}")));
        }
        if let Some(status) = self.statuses.get(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: *status,
            });
        }
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Request(format!("no document registered for {url}")))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn claim(metric: &str, value: ClaimValue) -> Claim {
    Claim {
        claim_text: format!("{value} {metric}"),
        metric_name: metric.to_string(),
        claimed_value: value,
    }
}

/// An unverified node citing `reference_url` and carrying `claims`.
pub fn node_citing(reference_url: &str, claims: Vec<Claim>) -> IntelligenceNode {
    let candidate = CandidateNode {
        headline: "Acme releases Model X".into(),
        summary: "Model X posts strong benchmark results.".into(),
        source: SourceRef {
            newsletter_id: "tldr-ai".into(),
            published_at: Utc::now(),
            snippet: "Acme's Model X posts strong results".into(),
            url: Some(reference_url.to_string()),
            authority: 2,
        },
        tags: BTreeSet::new(),
        relevance_score: 7,
        claims,
        category: None,
        links: Vec::new(),
    };
    IntelligenceNode::from_candidate(candidate, vec![1.0, 0.0], Utc::now())
}
