//! post-relay domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `filter`: Keyword/author allow-lists
//! - `retry`: Bounded exponential backoff
//! - `usecases`: The dispatch pipeline and message rendering

pub mod filter;
pub mod model;
pub mod ports;
pub mod retry;
pub mod usecases;

pub use filter::{FilterConfig, MatchMode};
pub use model::*;
pub use ports::*;
pub use retry::{RetryFailure, RetryPolicy, Transient};

use sha2::{Digest, Sha256};

/// Deterministic identifier for items whose source provides none
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_is_deterministic_and_separated() {
        assert_eq!(stable_id(&["a", "b"]), stable_id(&["a", "b"]));
        assert_ne!(stable_id(&["ab", ""]), stable_id(&["a", "b"]));
        assert_eq!(stable_id(&["x"]).len(), 64);
    }
}
