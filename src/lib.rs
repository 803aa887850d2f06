//! Headless session and playback core for the AiMusic generative-music
//! service.
//!
//! Two subsystems do the real work, and everything else exists to serve
//! them:
//!
//! * [`session`] + [`gateway`] — the token lifecycle: durable access/refresh
//!   pair, reactive change notification, and transparent re-authentication
//!   with single-flight refresh coalescing.
//! * [`player`] — the shared playback queue state machine that UI surfaces
//!   push tracks into and observe.
//!
//! The crate performs no audio decoding or output; a playback surface binds
//! the [`player::Player`] store to a real sink (see that module's docs for
//! the contract).

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod player;
pub mod protocol;
pub mod session;
pub mod tokens;
