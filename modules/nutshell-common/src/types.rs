use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{NutshellError, Result};

// --- Sources ---

/// One newsletter mention of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceRef {
    pub newsletter_id: String,
    pub published_at: DateTime<Utc>,
    pub snippet: String,
    #[serde(default)]
    pub url: Option<String>,
    /// 0 (unknown) to 10 (primary source). Decides headline ownership on merge.
    #[serde(default)]
    pub authority: u8,
}

impl SourceRef {
    /// Two references describe the same mention (replayed delivery of one newsletter item).
    pub fn same_reference(&self, other: &SourceRef) -> bool {
        self.newsletter_id == other.newsletter_id
            && self.snippet.trim() == other.snippet.trim()
            && self.url == other.url
    }
}

// --- Claims ---

/// A claimed or found value. Numbers compare with tolerance, text after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ClaimValue {
    Numeric(f64),
    Text(String),
}

impl ClaimValue {
    /// Parse a raw value: "90", "90.5%", "1,024" become numeric, anything else is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let numeric = trimmed.trim_end_matches('%').trim().replace(',', "");
        match numeric.parse::<f64>() {
            Ok(n) if n.is_finite() => ClaimValue::Numeric(n),
            _ => ClaimValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ClaimValue::Numeric(n) => Some(*n),
            ClaimValue::Text(_) => None,
        }
    }

    /// Exact identity used for claim de-duplication (not tolerance matching).
    pub fn same_value(&self, other: &ClaimValue) -> bool {
        match (self, other) {
            (ClaimValue::Numeric(a), ClaimValue::Numeric(b)) => a == b,
            (ClaimValue::Text(a), ClaimValue::Text(b)) => {
                crate::text::normalize_text(a) == crate::text::normalize_text(b)
            }
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for ClaimValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(ClaimValue::Numeric)
                .ok_or_else(|| de::Error::custom("claim value out of range")),
            serde_json::Value::String(s) => Ok(ClaimValue::parse(&s)),
            other => Err(de::Error::custom(format!(
                "claim value must be a number or string, got {other}"
            ))),
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::Numeric(n) => write!(f, "{n}"),
            ClaimValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Claim {
    pub claim_text: String,
    pub metric_name: String,
    pub claimed_value: ClaimValue,
}

impl Claim {
    /// Same metric and same value. Differently worded claim text does not matter.
    pub fn same_assertion(&self, other: &Claim) -> bool {
        self.metric_name.trim().eq_ignore_ascii_case(other.metric_name.trim())
            && self.claimed_value.same_value(&other.claimed_value)
    }
}

// --- Verification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Discrepant,
    VerificationFailed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Unverified => write!(f, "unverified"),
            VerificationStatus::Verified => write!(f, "verified"),
            VerificationStatus::Discrepant => write!(f, "discrepant"),
            VerificationStatus::VerificationFailed => write!(f, "verification_failed"),
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = NutshellError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unverified" => Ok(VerificationStatus::Unverified),
            "verified" => Ok(VerificationStatus::Verified),
            "discrepant" => Ok(VerificationStatus::Discrepant),
            "verification_failed" | "failed" => Ok(VerificationStatus::VerificationFailed),
            other => Err(NutshellError::Validation(format!(
                "unknown verification status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Discrepancy {
    pub metric_name: String,
    pub claimed_value: ClaimValue,
    pub found_value: ClaimValue,
    pub source_url: String,
}

/// Result of one completed verification, ready to be committed to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Verified,
    Discrepant(Vec<Discrepancy>),
    Failed(String),
}

impl VerificationOutcome {
    pub fn status(&self) -> VerificationStatus {
        match self {
            VerificationOutcome::Verified => VerificationStatus::Verified,
            VerificationOutcome::Discrepant(_) => VerificationStatus::Discrepant,
            VerificationOutcome::Failed(_) => VerificationStatus::VerificationFailed,
        }
    }
}

/// Emitted by the merge path for a node whose claims need (re-)verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationTask {
    pub node_id: Uuid,
}

// --- Candidates and nodes ---

/// Structured output of the extraction agent: one event mention from one newsletter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateNode {
    pub headline: String,
    pub summary: String,
    pub source: SourceRef,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub relevance_score: u8,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceNode {
    pub id: Uuid,
    pub headline: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub sources: Vec<SourceRef>,
    pub tags: BTreeSet<String>,
    pub relevance_score: u8,
    pub claims: Vec<Claim>,
    pub verification_status: VerificationStatus,
    pub discrepancies: Vec<Discrepancy>,
    pub verification_error: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub links: Vec<String>,
    /// Authority of the source that supplied the current headline.
    pub headline_authority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntelligenceNode {
    pub fn from_candidate(candidate: CandidateNode, embedding: Vec<f32>, now: DateTime<Utc>) -> Self {
        let mut links = Vec::new();
        for link in candidate.links {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        Self {
            id: Uuid::new_v4(),
            headline: candidate.headline.trim().to_string(),
            summary: candidate.summary.trim().to_string(),
            embedding,
            headline_authority: candidate.source.authority,
            sources: vec![candidate.source],
            tags: candidate.tags,
            relevance_score: candidate.relevance_score,
            claims: candidate.claims,
            verification_status: VerificationStatus::Unverified,
            discrepancies: Vec::new(),
            verification_error: None,
            verified_at: None,
            category: candidate.category,
            links,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mention_count(&self) -> usize {
        self.sources.len()
    }

    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.sources.iter().map(|s| s.published_at).min()
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.sources.iter().map(|s| s.published_at).max()
    }

    /// Source URLs in arrival order, then merged links, without repeats.
    pub fn reference_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let candidates = self
            .sources
            .iter()
            .filter_map(|s| s.url.as_ref())
            .chain(self.links.iter());
        for url in candidates {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Commit a verification result. Only an `Unverified` node accepts one.
    pub fn record_verification(
        &mut self,
        outcome: VerificationOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.verification_status != VerificationStatus::Unverified {
            return Err(NutshellError::InvalidTransition {
                from: self.verification_status,
                to: outcome.status(),
            });
        }
        self.verification_status = outcome.status();
        match outcome {
            VerificationOutcome::Verified => {}
            VerificationOutcome::Discrepant(discrepancies) => {
                self.discrepancies = discrepancies;
            }
            VerificationOutcome::Failed(reason) => {
                self.verification_error = Some(reason);
            }
        }
        self.verified_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Send the node back through verification after its claim set grew.
    pub fn reset_verification(&mut self) {
        self.verification_status = VerificationStatus::Unverified;
        self.discrepancies.clear();
        self.verification_error = None;
        self.verified_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> IntelligenceNode {
        let candidate = CandidateNode {
            headline: "Acme releases Model X".into(),
            summary: "Model X tops MMLU.".into(),
            source: SourceRef {
                newsletter_id: "tldr-ai".into(),
                published_at: Utc::now(),
                snippet: "Acme shipped Model X".into(),
                url: Some("https://arxiv.org/abs/2401.00001".into()),
                authority: 0,
            },
            tags: BTreeSet::new(),
            relevance_score: 7,
            claims: vec![],
            category: None,
            links: vec![
                "https://github.com/acme/model-x".into(),
                "https://arxiv.org/abs/2401.00001".into(),
            ],
        };
        IntelligenceNode::from_candidate(candidate, vec![1.0, 0.0], Utc::now())
    }

    #[test]
    fn claim_value_parses_numbers_and_percentages() {
        assert_eq!(ClaimValue::parse("90"), ClaimValue::Numeric(90.0));
        assert_eq!(ClaimValue::parse(" 87.5% "), ClaimValue::Numeric(87.5));
        assert_eq!(ClaimValue::parse("1,024"), ClaimValue::Numeric(1024.0));
        assert_eq!(ClaimValue::parse("Apache 2.0"), ClaimValue::Text("Apache 2.0".into()));
    }

    #[test]
    fn claim_value_deserializes_from_number_or_string() {
        let n: ClaimValue = serde_json::from_str("90").unwrap();
        let s: ClaimValue = serde_json::from_str("\"86%\"").unwrap();
        let t: ClaimValue = serde_json::from_str("\"MIT\"").unwrap();
        assert_eq!(n, ClaimValue::Numeric(90.0));
        assert_eq!(s, ClaimValue::Numeric(86.0));
        assert_eq!(t, ClaimValue::Text("MIT".into()));
        assert!(serde_json::from_str::<ClaimValue>("true").is_err());
    }

    #[test]
    fn same_assertion_ignores_claim_wording() {
        let a = Claim {
            claim_text: "scores 90 on MMLU".into(),
            metric_name: "MMLU".into(),
            claimed_value: ClaimValue::Numeric(90.0),
        };
        let b = Claim {
            claim_text: "reaches 90% MMLU accuracy".into(),
            metric_name: "mmlu".into(),
            claimed_value: ClaimValue::Numeric(90.0),
        };
        let c = Claim {
            claimed_value: ClaimValue::Numeric(91.0),
            ..b.clone()
        };
        assert!(a.same_assertion(&b));
        assert!(!a.same_assertion(&c));
    }

    #[test]
    fn reference_urls_are_deduplicated_in_order() {
        let node = node();
        assert_eq!(
            node.reference_urls(),
            vec![
                "https://arxiv.org/abs/2401.00001".to_string(),
                "https://github.com/acme/model-x".to_string(),
            ]
        );
    }

    #[test]
    fn verification_only_moves_forward() {
        let mut node = node();
        node.record_verification(VerificationOutcome::Verified, Utc::now())
            .unwrap();
        assert_eq!(node.verification_status, VerificationStatus::Verified);

        let err = node
            .record_verification(VerificationOutcome::Failed("late".into()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, NutshellError::InvalidTransition { .. }));
        assert_eq!(node.verification_status, VerificationStatus::Verified);

        node.reset_verification();
        assert_eq!(node.verification_status, VerificationStatus::Unverified);
        assert!(node.verified_at.is_none());
    }

    #[test]
    fn failed_verification_records_reason_without_discrepancies() {
        let mut node = node();
        node.record_verification(VerificationOutcome::Failed("timeout".into()), Utc::now())
            .unwrap();
        assert_eq!(node.verification_status, VerificationStatus::VerificationFailed);
        assert_eq!(node.verification_error.as_deref(), Some("timeout"));
        assert!(node.discrepancies.is_empty());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            VerificationStatus::Unverified,
            VerificationStatus::Verified,
            VerificationStatus::Discrepant,
            VerificationStatus::VerificationFailed,
        ] {
            assert_eq!(status.to_string().parse::<VerificationStatus>().unwrap(), status);
        }
    }
}
