//! Generation task types and the progress stream contract.
//!
//! `POST /api/generate` starts a task and answers with the task id and a
//! relative server-sent-events URL. The stream then emits `progress` events
//! whose data is a full [`TaskState`] snapshot; the stream ends after a
//! snapshot whose status is `completed` or `failed`. Progress is a
//! monotonically non-decreasing percentage.
//!
//! Only the initial `POST` is this crate's concern (it goes through the
//! authenticated gateway); consuming the stream is left to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Body of `POST /api/generate`.
///
/// The backend accepts durations of 1 to 300 seconds and debits one credit
/// per task.
#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct GenerationRequest {
    /// Free-text description of the desired track.
    pub prompt: String,

    /// Optional lyrics to sing; `None` for instrumental.
    pub lyrics: Option<String>,

    /// Requested track length; integer seconds on the wire.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,
}

/// Answer to a successfully queued generation.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub struct GenerationCreated {
    /// Opaque task identifier.
    pub task_id: String,

    /// Relative URL of the progress event stream.
    pub events_url: String,
}

/// Lifecycle of a generation task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the stream will emit no further states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One snapshot from the progress stream.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,

    /// Percentage, 0–100, non-decreasing.
    pub progress: u8,

    /// Human-readable stage description, e.g. `"uploading audio"`. On a
    /// failed task this carries the failure reason.
    #[serde(default)]
    pub message: Option<String>,

    /// Present once the task completed.
    #[serde(default)]
    pub result: Option<GenerationResult>,
}

/// Payload of a completed generation.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub struct GenerationResult {
    /// Identifier of the song saved to the user's library.
    pub song_id: String,

    /// Location of the rendered audio; may be relative to the service base.
    pub audio_url: String,

    /// Cover art, when image generation succeeded.
    #[serde(default)]
    pub cover_image_url: Option<String>,
}
