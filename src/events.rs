//! Change notification for the session and player stores.
//!
//! Both stores expose the same reactive surface: `subscribe` registers a
//! callback, every state-changing operation invokes the callbacks
//! synchronously after the change lands, and the returned [`Subscription`]
//! detaches the callback again.
//!
//! The session store feeds one listener set from two event sources: writes
//! performed by this process ([`SessionEvent::LocalChange`]) and writes some
//! other process performed against the same durable keys
//! ([`SessionEvent::ExternalChange`]). Keeping the channels distinct in the
//! event payload lets the same store run headless, server-side, or behind a
//! file watcher without a browser's storage events.

use std::sync::{Arc, Mutex};

/// Why session subscribers are being woken.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// `set_tokens` or `clear_tokens` ran in this process.
    LocalChange,

    /// Another process changed the durable token keys.
    ///
    /// Raised via [`SessionStore::notify_external`](crate::session::SessionStore::notify_external);
    /// the new values are already visible to reads when listeners run.
    ExternalChange,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    entries: Vec<(u64, Callback<E>)>,
}

/// A set of callbacks observing one store.
///
/// Callbacks are invoked in registration order, outside the registry lock, so
/// a listener may freely read the store or manage subscriptions re-entrantly.
pub struct Listeners<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Listeners<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a callback and returns its detach handle.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.inner.lock().expect("listener registry poisoned");
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(listener)));
            id
        };

        let registry = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    let mut registry = registry.lock().expect("listener registry poisoned");
                    registry.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Invokes every registered callback with `event`.
    pub fn notify(&self, event: &E) {
        // Snapshot under the lock, invoke outside it.
        let callbacks: Vec<Callback<E>> = {
            let registry = self.inner.lock().expect("listener registry poisoned");
            registry
                .entries
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Detach handle returned by `subscribe`.
///
/// [`unsubscribe`](Self::unsubscribe) removes the callback from the owning
/// store. It is idempotent, and a no-op once the store itself is gone — the
/// handle only holds a weak reference, so keeping it around cannot leak a
/// dropped store.
pub struct Subscription {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Removes the callback this handle was created for.
    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}
