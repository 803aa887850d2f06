//! Authentication request and response types.
//!
//! Covers the three token endpoints:
//! * `POST /api/auth/register` — create an account, returns the profile
//! * `POST /api/auth/login` — exchange credentials for a token pair
//! * `POST /api/auth/refresh` — exchange a refresh token for a fresh pair
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "secret",
//!     "refresh_token": "secret",
//!     "token_type": "bearer"
//! }
//! ```
//!
//! Credential-carrying fields are redacted from debug output.

use serde::{Deserialize, Serialize};
use veil::Redact;

/// Credentials for `POST /api/auth/login`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Redact)]
pub struct LoginRequest {
    pub email: String,

    #[redact]
    pub password: String,
}

/// Account creation payload for `POST /api/auth/register`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Redact)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,

    #[redact]
    pub password: String,
}

/// Body of `POST /api/auth/refresh`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Redact)]
pub struct RefreshRequest {
    #[redact]
    pub refresh_token: String,
}

/// Token pair issued by login and refresh.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Redact)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[redact]
    pub refresh_token: String,

    /// Always `"bearer"`.
    pub token_type: String,
}

/// Public profile returned by registration.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub struct UserPublic {
    pub id: String,
    pub email: String,
    pub username: String,
}
