use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{NutshellError, Result};

/// Tuning for the deduplication and merge path.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Candidate merges into the best match at or above this cosine similarity.
    pub similarity_threshold: f64,
    /// A candidate summary sentence is new if it scores below this against every existing sentence.
    pub sentence_merge_threshold: f64,
    /// Only nodes created within this window are merge targets.
    pub lookback_window: chrono::Duration,
    pub nearest_k: usize,
    pub min_candidate_tokens: usize,
    pub embed_attempts: u32,
    pub embed_backoff_base: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            sentence_merge_threshold: 0.75,
            lookback_window: chrono::Duration::hours(72),
            nearest_k: 5,
            min_candidate_tokens: 3,
            embed_attempts: 3,
            embed_backoff_base: Duration::from_millis(500),
        }
    }
}

/// Tuning for claim verification.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Maximum relative difference for a numeric claim to count as matching.
    pub numeric_tolerance: f64,
    pub fetch_timeout: Duration,
    pub fetch_attempts: u32,
    pub fetch_backoff_base: Duration,
    /// How many tokens around a metric mention are searched for its value.
    pub proximity_tokens: usize,
    pub max_concurrent: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.05,
            fetch_timeout: Duration::from_secs(10),
            fetch_attempts: 3,
            fetch_backoff_base: Duration::from_secs(2),
            proximity_tokens: 12,
            max_concurrent: 8,
        }
    }
}

impl VerificationConfig {
    /// Backoff slept before retry `attempt` (0-based): base * 2^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.fetch_backoff_base * 2u32.saturating_pow(attempt)
    }

    /// Worst-case wall time for fetching one reference: every attempt times out
    /// and every retry backs off.
    pub fn reference_budget(&self) -> Duration {
        let attempts = self.fetch_attempts.max(1);
        let timeouts = self.fetch_timeout * attempts;
        let backoffs: Duration = (0..attempts - 1).map(|a| self.backoff(a)).sum();
        timeouts + backoffs
    }

    /// Deadline for verifying a node that cites `references` supported documents.
    pub fn deadline(&self, references: usize) -> Duration {
        self.reference_budget() * references.max(1) as u32
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub dedup: DedupConfig,
    pub verification: VerificationConfig,

    // Embedding gateway (OpenAI-compatible /embeddings endpoint)
    pub embedding_api_key: String,
    pub embedding_base_url: String,
    pub embedding_model: String,

    // Postgres; the in-memory store is used when unset
    pub database_url: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let dedup_defaults = DedupConfig::default();
        let verify_defaults = VerificationConfig::default();

        let dedup = DedupConfig {
            similarity_threshold: parse_env(
                "SIMILARITY_THRESHOLD",
                dedup_defaults.similarity_threshold,
            )?,
            sentence_merge_threshold: parse_env(
                "SENTENCE_MERGE_THRESHOLD",
                dedup_defaults.sentence_merge_threshold,
            )?,
            lookback_window: lookback_window(parse_env("LOOKBACK_WINDOW_HOURS", 72i64)?)?,
            nearest_k: parse_env("NEAREST_K", dedup_defaults.nearest_k)?,
            min_candidate_tokens: parse_env(
                "MIN_CANDIDATE_TOKENS",
                dedup_defaults.min_candidate_tokens,
            )?,
            embed_attempts: parse_env("EMBED_RETRIES", dedup_defaults.embed_attempts)?,
            embed_backoff_base: Duration::from_millis(parse_env("EMBED_BACKOFF_BASE_MS", 500u64)?),
        };

        let verification = VerificationConfig {
            numeric_tolerance: parse_env("NUMERIC_TOLERANCE", verify_defaults.numeric_tolerance)?,
            fetch_timeout: Duration::from_secs(parse_env("FETCH_TIMEOUT_SECS", 10u64)?),
            fetch_attempts: parse_env("FETCH_RETRIES", verify_defaults.fetch_attempts)?,
            fetch_backoff_base: Duration::from_millis(parse_env("FETCH_BACKOFF_BASE_MS", 2000u64)?),
            proximity_tokens: parse_env("METRIC_PROXIMITY_TOKENS", verify_defaults.proximity_tokens)?,
            max_concurrent: parse_env(
                "MAX_CONCURRENT_VERIFICATIONS",
                verify_defaults.max_concurrent,
            )?,
        };

        let config = Self {
            dedup,
            verification,
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            embedding_base_url: env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_env("API_PORT", 3000u16)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(NutshellError::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        unit("SIMILARITY_THRESHOLD", self.dedup.similarity_threshold)?;
        unit("SENTENCE_MERGE_THRESHOLD", self.dedup.sentence_merge_threshold)?;
        unit("NUMERIC_TOLERANCE", self.verification.numeric_tolerance)?;
        let window_hours = self.dedup.lookback_window.num_hours();
        if !(1..=MAX_LOOKBACK_HOURS).contains(&window_hours) {
            return Err(NutshellError::Config(format!(
                "lookback window must be within 1..={MAX_LOOKBACK_HOURS} hours, got {window_hours}"
            )));
        }
        if self.dedup.nearest_k == 0 {
            return Err(NutshellError::Config("NEAREST_K must be at least 1".into()));
        }
        if self.verification.fetch_attempts == 0 || self.dedup.embed_attempts == 0 {
            return Err(NutshellError::Config("retry counts must be at least 1".into()));
        }
        if self.embedding_api_key.is_empty() {
            return Err(NutshellError::Config(
                "EMBEDDING_API_KEY environment variable is required".into(),
            ));
        }
        Ok(())
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            similarity_threshold = self.dedup.similarity_threshold,
            sentence_merge_threshold = self.dedup.sentence_merge_threshold,
            lookback_hours = self.dedup.lookback_window.num_hours(),
            numeric_tolerance = self.verification.numeric_tolerance,
            fetch_timeout_secs = self.verification.fetch_timeout.as_secs(),
            fetch_attempts = self.verification.fetch_attempts,
            embedding_base_url = self.embedding_base_url.as_str(),
            embedding_model = self.embedding_model.as_str(),
            embedding_api_key = redact(&self.embedding_api_key).as_str(),
            database = if self.database_url.is_some() { "postgres" } else { "memory" },
            "Loaded config"
        );
    }
}

/// Ten years.
const MAX_LOOKBACK_HOURS: i64 = 24 * 365 * 10;

fn lookback_window(hours: i64) -> Result<chrono::Duration> {
    if !(1..=MAX_LOOKBACK_HOURS).contains(&hours) {
        return Err(NutshellError::Config(format!(
            "LOOKBACK_WINDOW_HOURS must be within 1..={MAX_LOOKBACK_HOURS}, got {hours}"
        )));
    }
    Ok(chrono::Duration::hours(hours))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| NutshellError::Config(format!("{key}: {e}"))),
        _ => Ok(default),
    }
}

fn redact(secret: &str) -> String {
    match secret.len() {
        0 => "<unset>".to_string(),
        n if n <= 8 => "****".to_string(),
        _ => format!("{}****", secret.chars().take(4).collect::<String>()),
    }
}
