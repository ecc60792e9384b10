pub mod config;
pub mod error;
pub mod text;
pub mod types;
pub mod vector;

pub use config::{Config, DedupConfig, VerificationConfig};
pub use error::{NutshellError, Result};
pub use types::*;
pub use vector::{cosine_similarity, meets_threshold};
