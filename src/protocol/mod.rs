//! Wire types for the AiMusic backend.
//!
//! The backend speaks conventional JSON over HTTP, bearer-authenticated,
//! with `401` reserved for "access token expired, refresh and retry". This
//! module holds the typed request and response bodies:
//! * Authentication and token exchange ([`auth`])
//! * Music generation tasks and their progress stream ([`generate`])

pub mod auth;
pub mod generate;

pub use auth::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse, UserPublic};
pub use generate::{
    GenerationCreated, GenerationRequest, GenerationResult, TaskState, TaskStatus,
};
