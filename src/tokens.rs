//! The access/refresh credential pair.
//!
//! A [`TokenPair`] is the unit the session store persists and replaces: both
//! credentials are written together on login and on every successful refresh,
//! and removed together on logout. Consumers never observe one half updated
//! without the other.

use serde::{Deserialize, Serialize};
use veil::Redact;

/// Bearer credentials for the AiMusic backend.
///
/// * `access` is the short-lived token attached to every authenticated call.
/// * `refresh` is the long-lived token spent only by the refresh protocol.
///
/// Debug output is redacted so the pair can be logged safely.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Redact)]
pub struct TokenPair {
    /// Short-lived bearer token for authenticated calls.
    #[redact]
    #[serde(rename = "access_token")]
    pub access: String,

    /// Long-lived token exchanged for a fresh pair.
    #[redact]
    #[serde(rename = "refresh_token")]
    pub refresh: String,
}

impl TokenPair {
    /// Creates a pair from its two halves.
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}
