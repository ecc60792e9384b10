pub mod compare;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod reference;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod worker;

pub use compare::{aggregate, check_claim, check_claim_across, numeric_matches, ClaimCheck};
pub use engine::{VerificationEngine, VerificationRun};
pub use error::FetchError;
pub use extract::Document;
pub use fetcher::{fetch_with_retry, DocumentFetcher, HttpFetcher};
pub use reference::{classify_reference, supported_references, Reference, ReferenceKind};
pub use worker::VerificationWorker;
