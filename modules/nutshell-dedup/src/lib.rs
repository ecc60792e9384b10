pub mod dead_letter;
pub mod embedder;
pub mod engine;
pub mod merge;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use embedder::{HttpEmbedder, TextEmbedder};
pub use engine::{
    select_merge_target, validate_candidate, DedupDeps, DedupEngine, MergeOutcome, ReplayReport,
};
pub use merge::MergeReport;
