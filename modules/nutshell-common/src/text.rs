//! Text normalization shared by the embedding path and claim verification.
//!
//! Newsletter copy arrives with markdown emphasis, stray HTML tags and entities,
//! and bullet lists. Everything that is embedded or compared goes through
//! [`normalize_text`] first so two renderings of the same sentence look alike.

use std::sync::LazyLock;

use regex::Regex;

static RE_HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static RE_MD_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_MD_MARKERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_`~#>|]+").unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+•]|\d+[.)])\s+").unwrap());

/// Lowercase, strip markdown/HTML artifacts, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let text = RE_HTML_TAG.replace_all(text, " ");
    let text = decode_entities(&text);
    let text = RE_MD_IMAGE.replace_all(&text, " ");
    let text = RE_MD_LINK.replace_all(&text, "$1");
    let text = RE_MD_MARKERS.replace_all(&text, " ");
    let text = RE_WHITESPACE.replace_all(&text, " ");
    text.trim().to_lowercase()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Split a summary into sentences. Bullet lines are sentences of their own;
/// a terminator only ends a sentence when followed by whitespace, so "87.5" stays whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let line = RE_BULLET.replace(line, "");
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            let at_boundary = matches!(c, '.' | '!' | '?')
                && chars.peek().is_none_or(|next| next.is_whitespace());
            if at_boundary {
                push_sentence(&mut sentences, &current);
                current.clear();
            }
        }
        push_sentence(&mut sentences, &current);
    }
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if trimmed.chars().any(|c| c.is_alphanumeric()) {
        sentences.push(trimmed.to_string());
    }
}

/// Whether any line of `text` starts with a list marker.
pub fn is_bulleted(text: &str) -> bool {
    text.lines().any(|line| RE_BULLET.is_match(line))
}

pub fn first_sentence(text: &str) -> Option<String> {
    split_sentences(text).into_iter().next()
}

/// Number of whitespace tokens after normalization.
pub fn token_count(text: &str) -> usize {
    normalize_text(text).split_whitespace().count()
}

/// The text whose vector represents a node: headline plus first summary sentence.
pub fn embedding_text(headline: &str, summary: &str) -> String {
    match first_sentence(summary) {
        Some(sentence) => normalize_text(&format!("{headline} {sentence}")),
        None => normalize_text(headline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullets_need_a_list_marker() {
        assert!(is_bulleted("- Model X is out.\n- Weights on HF."));
        assert!(is_bulleted("Highlights:\n1. Faster decoding"));
        assert!(!is_bulleted("First paragraph.\n\nSecond paragraph."));
        assert!(!is_bulleted("-5% latency overall."));
    }

    #[test]
    fn normalize_strips_markup_and_collapses_whitespace() {
        let raw = "**Acme** ships <b>Model&nbsp;X</b>\n\n see [the paper](https://arxiv.org/abs/1)";
        assert_eq!(normalize_text(raw), "acme ships model x see the paper");
    }

    #[test]
    fn normalize_drops_images() {
        assert_eq!(normalize_text("![chart](x.png) Big   jump"), "big jump");
    }

    #[test]
    fn sentences_keep_decimals_and_split_bullets() {
        let summary = "- Model X scores 87.5 on MMLU. It is open weights!\n- Ships under Apache 2.0";
        assert_eq!(
            split_sentences(summary),
            vec![
                "Model X scores 87.5 on MMLU.",
                "It is open weights!",
                "Ships under Apache 2.0",
            ]
        );
    }

    #[test]
    fn empty_or_punctuation_only_yields_no_sentences() {
        assert!(split_sentences("  \n - \n ...").is_empty());
        assert_eq!(first_sentence(""), None);
    }

    #[test]
    fn embedding_text_uses_headline_and_first_sentence() {
        let text = embedding_text(
            "Acme releases **Model X**",
            "Model X beats GPT. Weights are public.",
        );
        assert_eq!(text, "acme releases model x model x beats gpt.");
    }

    #[test]
    fn token_count_ignores_markup() {
        assert_eq!(token_count("<p>**Hi**</p> there"), 2);
        assert_eq!(token_count("   "), 0);
    }
}
