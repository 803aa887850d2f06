//! Playback queue store: the process-wide "now playing" model.
//!
//! Every surface that can start playback pushes tracks in here, and every
//! surface that renders transport state observes it. The store itself is a
//! pure state machine — no I/O, no audio — whose operations are synchronous
//! total functions: they clamp or ignore out-of-range input instead of
//! failing.
//!
//! # States
//!
//! The store is either *empty* (`queue` empty, no current index, not
//! playing) or *loaded* (`queue` non-empty, current index valid). Queues are
//! replaced wholesale with [`Player::set_queue`], never edited in place, and
//! an empty replacement is the explicit "close the player" transition.
//!
//! Navigation stops at the queue boundaries rather than wrapping: `next()`
//! on the last track keeps the position and drops the transport flag, so a
//! later `play()` resumes the final track. This is deliberate stop-at-end
//! behavior, not an off-by-one.
//!
//! # Playback surface contract
//!
//! An actual audio sink binds to this store from the outside: it observes
//! snapshots, loads the current item's `audio_url`, and mirrors the
//! transport flag. Two duties run the other way — when a track reaches its
//! end the surface calls [`next`](Player::next), and when the environment
//! refuses playback (an autoplay policy, a missing output device) it calls
//! [`pause`](Player::pause) so the store keeps describing what is actually
//! audible. `is_playing` is a request to play, never a guarantee.

use std::sync::Mutex;

use url::Url;

use crate::events::{Listeners, Subscription};

/// One playable track reference in the queue.
///
/// Immutable once enqueued; `id` is unique within a queue but nothing more.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QueueItem {
    /// Opaque track identifier.
    pub id: String,

    /// Display label.
    pub title: String,

    /// Fully-resolved, fetchable media location.
    pub audio_url: Url,
}

impl QueueItem {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, audio_url: Url) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            audio_url,
        }
    }
}

/// Immutable snapshot of the player.
///
/// `current_index` is `None` exactly when `queue` is empty; otherwise it is
/// a valid index. `is_playing` is always `false` while the queue is empty,
/// and `volume` stays within `[0.0, 1.0]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerState {
    pub queue: Vec<QueueItem>,
    pub current_index: Option<usize>,
    pub is_playing: bool,
    pub volume: f32,
}

impl PlayerState {
    /// The item the cursor points at, if any.
    #[must_use]
    pub fn current(&self) -> Option<&QueueItem> {
        self.current_index.and_then(|index| self.queue.get(index))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            current_index: None,
            is_playing: false,
            volume: 1.0,
        }
    }
}

/// The playback queue store.
///
/// An owned object rather than a module global: the application creates one
/// and shares it, tests create as many isolated instances as they like. All
/// mutation goes through the methods below; each state-changing call wakes
/// subscribers exactly once with the post-transition snapshot.
pub struct Player {
    state: Mutex<PlayerState>,
    listeners: Listeners<PlayerState>,
}

impl Player {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState::default()),
            listeners: Listeners::new(),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn state(&self) -> PlayerState {
        self.state.lock().expect("player state poisoned").clone()
    }

    /// Replaces the queue wholesale.
    ///
    /// An empty `items` closes the player regardless of prior state. A
    /// non-empty queue starts playing at `start_index`, clamped to the last
    /// valid position — starting a new queue is an implicit play request.
    pub fn set_queue(&self, items: Vec<QueueItem>, start_index: usize) {
        self.mutate(|state| {
            if items.is_empty() {
                state.queue = Vec::new();
                state.current_index = None;
                state.is_playing = false;
            } else {
                let last = items.len() - 1;
                state.current_index = Some(start_index.min(last));
                state.queue = items;
                state.is_playing = true;
            }
        });
    }

    /// Requests playback; no-op while the queue is empty.
    pub fn play(&self) {
        self.mutate(|state| {
            if !state.queue.is_empty() {
                state.is_playing = true;
            }
        });
    }

    /// Drops the transport flag; always legal.
    ///
    /// Also the channel through which a playback surface reports that the
    /// environment refused to play.
    pub fn pause(&self) {
        self.mutate(|state| {
            state.is_playing = false;
        });
    }

    /// Advances to the next track, or stops at the end of the queue.
    ///
    /// On the last track the position is held and only the transport flag
    /// drops — no wraparound. No-op while empty.
    pub fn next(&self) {
        self.mutate(|state| match state.current_index {
            None => {}
            Some(index) if index + 1 < state.queue.len() => {
                state.current_index = Some(index + 1);
                state.is_playing = true;
            }
            Some(_) => {
                state.is_playing = false;
            }
        });
    }

    /// Steps back to the previous track.
    ///
    /// At the first track the position stays put and the transport flag is
    /// left untouched. No-op while empty.
    pub fn prev(&self) {
        self.mutate(|state| match state.current_index {
            None | Some(0) => {}
            Some(index) => {
                state.current_index = Some(index - 1);
                state.is_playing = true;
            }
        });
    }

    /// Sets the volume, clamped to `[0.0, 1.0]`.
    ///
    /// Independent of queue state. A NaN input is ignored — clamping would
    /// propagate it and break the volume invariant.
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            return;
        }

        self.mutate(|state| {
            state.volume = volume.clamp(0.0, 1.0);
        });
    }

    /// Registers a listener invoked with the snapshot after every
    /// state-changing operation (once per call, not per field).
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PlayerState) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Applies `mutation` and notifies subscribers if anything changed.
    ///
    /// The state lock is released before listeners run, so a listener may
    /// re-enter the store.
    fn mutate(&self, mutation: impl FnOnce(&mut PlayerState)) {
        let changed = {
            let mut state = self.state.lock().expect("player state poisoned");
            let before = state.clone();
            mutation(&mut state);
            (*state != before).then(|| state.clone())
        };

        if let Some(snapshot) = changed {
            self.listeners.notify(&snapshot);
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}
