//! Metric extraction from reference documents.
//!
//! Documents are normalized and tokenized once. A claim's metric is located by
//! its name or a known synonym; the value is read from the tokens around each
//! mention, at most `proximity` tokens away.

use std::sync::LazyLock;

use regex::Regex;

use nutshell_common::text::normalize_text;
use nutshell_common::ClaimValue;

static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?%?$").unwrap());

/// Groups of interchangeable metric names, all normalized.
const SYNONYMS: &[&[&str]] = &[
    &["accuracy", "acc", "top-1 accuracy", "top1 accuracy"],
    &["parameters", "params", "parameter count", "model size"],
    &["context window", "context length", "context size", "max context"],
    &["mmlu", "massive multitask language understanding"],
    &["humaneval", "human eval", "human-eval"],
    &["gsm8k", "gsm-8k", "gsm 8k"],
    &["math", "math benchmark"],
    &["latency", "response time"],
    &["throughput", "tokens per second", "tokens/s", "tok/s"],
    &["win rate", "winrate", "win-rate"],
    &["f1", "f1 score", "f1-score"],
    &["bleu", "bleu score"],
    &["license", "licence", "licensed under"],
    &["price", "pricing", "cost"],
];

/// A reference document prepared for extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub source_url: String,
    tokens: Vec<String>,
}

impl Document {
    pub fn new(source_url: &str, body: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            tokens: tokenize(body),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Where a metric name occurs: token span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mention {
    pub start: usize,
    pub end: usize,
}

fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .map(trim_token)
        .filter(|t| !t.is_empty())
        .collect()
}

fn trim_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
        .to_string()
}

/// The metric name plus every synonym from its group.
pub fn metric_aliases(metric: &str) -> Vec<Vec<String>> {
    let normalized = normalize_text(metric);
    let mut names: Vec<String> = vec![normalized.clone()];
    if let Some(group) = SYNONYMS.iter().find(|g| g.contains(&normalized.as_str())) {
        for name in group.iter() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
        .iter()
        .map(|n| tokenize(n))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Every place the metric (or a synonym) occurs, in document order.
pub fn find_mentions(document: &Document, metric: &str) -> Vec<Mention> {
    let tokens = document.tokens();
    let mut mentions: Vec<Mention> = Vec::new();
    for alias in metric_aliases(metric) {
        if alias.len() > tokens.len() {
            continue;
        }
        for start in 0..=tokens.len() - alias.len() {
            if tokens[start..start + alias.len()] == alias[..] {
                let mention = Mention {
                    start,
                    end: start + alias.len(),
                };
                if !mentions.iter().any(|m| m.start < mention.end && mention.start < m.end) {
                    mentions.push(mention);
                }
            }
        }
    }
    mentions.sort_by_key(|m| m.start);
    mentions
}

fn parse_number(token: &str) -> Option<f64> {
    let cleaned = token.replace(',', "");
    if !RE_NUMBER.is_match(&cleaned) {
        return None;
    }
    cleaned.trim_end_matches('%').parse().ok()
}

/// The number closest to `mention`, within `proximity` tokens on either side.
/// On equal distance the number after the mention wins.
pub fn nearest_number(document: &Document, mention: Mention, proximity: usize) -> Option<f64> {
    let tokens = document.tokens();
    for distance in 1..=proximity {
        let after = mention.end + distance - 1;
        if let Some(value) = tokens.get(after).and_then(|t| parse_number(t)) {
            return Some(value);
        }
        let before = mention
            .start
            .checked_sub(distance)
            .and_then(|i| parse_number(&tokens[i]));
        if before.is_some() {
            return before;
        }
    }
    None
}

/// Tokens within `proximity` of the mention, excluding the mention itself.
pub fn neighborhood(document: &Document, mention: Mention, proximity: usize) -> (String, String) {
    let tokens = document.tokens();
    let from = mention.start.saturating_sub(proximity);
    let to = (mention.end + proximity).min(tokens.len());
    (
        tokens[from..mention.start].join(" "),
        tokens[mention.end..to].join(" "),
    )
}

/// Read a value of the claimed kind from around `mention`.
pub fn value_near(
    document: &Document,
    mention: Mention,
    claimed: &ClaimValue,
    proximity: usize,
) -> Option<ClaimValue> {
    match claimed {
        ClaimValue::Numeric(_) => nearest_number(document, mention, proximity).map(ClaimValue::Numeric),
        ClaimValue::Text(claimed) => {
            let (before, after) = neighborhood(document, mention, proximity);
            let phrase = if contains_phrase(&after, claimed) {
                after
            } else if contains_phrase(&before, claimed) {
                before
            } else if after.is_empty() {
                before
            } else {
                after
            };
            (!phrase.is_empty()).then_some(ClaimValue::Text(phrase))
        }
    }
}

/// Whether `haystack` contains the tokens of `phrase` contiguously, after normalization.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let needle = tokenize(phrase);
    let haystack = tokenize(haystack);
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}
