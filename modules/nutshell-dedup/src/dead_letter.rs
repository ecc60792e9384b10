use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use nutshell_common::CandidateNode;

/// A candidate that could not be embedded after every retry.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub candidate: CandidateNode,
    pub error: String,
    pub attempts: u32,
    pub parked_at: DateTime<Utc>,
}

/// Parked candidates awaiting replay. Order of arrival is preserved.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, candidate: CandidateNode, error: String, attempts: u32) {
        warn!(
            newsletter = candidate.source.newsletter_id.as_str(),
            headline = candidate.headline.as_str(),
            attempts,
            error = error.as_str(),
            "Parking candidate in dead-letter queue"
        );
        let letter = DeadLetter {
            candidate,
            error,
            attempts,
            parked_at: Utc::now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(letter);
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remove and return everything parked so far.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
