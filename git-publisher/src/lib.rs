//! Provider client and publisher for the PR review pipeline.
//!
//! Two layers:
//! 1. **Client**: a narrow, typed surface over the provider REST API
//!    (pull requests, files, diffs, check-runs, reviews, statuses) with
//!    enum dispatch per provider and a unified error hierarchy.
//! 2. **Publisher**: idempotent artifact publishing on top of the client,
//!    marker-keyed dedup, per-installation token-bucket rate limiting, and
//!    jittered retries for transient failures.
//!
//! No async-trait, no heap trait objects; providers are enum variants.

pub mod client;
pub mod errors;
pub mod merge_ready;
pub mod publish;
pub mod rate_limit;
pub mod types;

pub use client::{ProviderClient, ProviderConfig};
pub use errors::{Error, GitResult, ProviderError};
pub use merge_ready::{evaluate as evaluate_merge_ready, MergeReadyInput, MergeReadyReport};
pub use publish::{artifact_key, PublishConfig, PublishTarget, Publisher};
pub use rate_limit::{InstallationLimiter, RateLimitSnapshot};
pub use types::*;

use sha2::{Digest, Sha256};

/// Content hash for artifact payloads (hex SHA-256 of canonical JSON).
///
/// The same payload always hashes identically, which is what makes
/// re-publish idempotent across retries and resumes.
pub fn content_hash(payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_is_stable_and_distinct() {
        let a = content_hash(&json!({"k": 1, "v": [1, 2]}));
        let b = content_hash(&json!({"k": 1, "v": [1, 2]}));
        let c = content_hash(&json!({"k": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
