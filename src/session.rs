//! Session store: the single source of truth for "am I authenticated".
//!
//! The store owns the durable access/refresh token pair and a listener set.
//! Reads pass straight through to durable storage, so a token written by
//! another process is visible the moment it lands; writes go through
//! [`SessionStore::set_tokens`] / [`SessionStore::clear_tokens`] only, which
//! gives the write-then-notify ordering a single choke point. Listeners run
//! synchronously after the write completes — a subscriber that re-reads the
//! store from its callback always observes the new pair, never the old one.
//!
//! Every operation here is total: storage failures are logged and read as
//! "no tokens", the same way a browser treats unusable local storage.
//! Concurrent writers are last-write-wins; there is no merge logic.

use std::{
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use crate::{
    events::{Listeners, SessionEvent, Subscription},
    tokens::TokenPair,
};

/// Durable two-key storage for the token pair.
///
/// The pair is loaded and stored as one unit: a half-written or unparsable
/// store reads as absent, which downstream is simply "unauthenticated".
/// Implementations never fail — they log and degrade instead.
pub trait TokenStorage: Send + Sync {
    /// Reads the stored pair, if both halves are present and well-formed.
    fn load(&self) -> Option<TokenPair>;

    /// Replaces the stored pair.
    fn store(&self, tokens: &TokenPair);

    /// Removes the stored pair.
    fn clear(&self);
}

/// Token storage in a small TOML file.
///
/// The file holds the two string keys `access_token` and `refresh_token`.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Upper bound on the token file size.
    ///
    /// Prevents an out-of-memory condition on load: a legitimate token file
    /// is a few hundred bytes.
    const MAX_FILE_SIZE: u64 = 4096;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Option<TokenPair> {
        let attributes = match fs::metadata(&self.path) {
            Ok(attributes) => attributes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("could not stat {}: {e}", self.path.display());
                return None;
            }
        };

        if attributes.len() > Self::MAX_FILE_SIZE {
            warn!("{} is too large", self.path.display());
            return None;
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("could not read {}: {e}", self.path.display());
                return None;
            }
        };

        match toml::from_str::<TokenPair>(&contents) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!("{} format is invalid: {e}", self.path.display());
                None
            }
        }
    }

    fn store(&self, tokens: &TokenPair) {
        match toml::to_string(tokens) {
            Ok(contents) => {
                if let Err(e) = fs::write(&self.path, contents) {
                    warn!("could not write {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("could not serialize tokens: {e}"),
        }
    }

    fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove {}: {e}", self.path.display());
            }
        }
    }
}

/// In-memory token storage for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Option<TokenPair> {
        self.tokens.lock().expect("token storage poisoned").clone()
    }

    fn store(&self, tokens: &TokenPair) {
        *self.tokens.lock().expect("token storage poisoned") = Some(tokens.clone());
    }

    fn clear(&self) {
        *self.tokens.lock().expect("token storage poisoned") = None;
    }
}

/// Owned session state with a constrained mutation API.
///
/// Construct one per process for real use, or one per test for isolation —
/// nothing here is a module-level global.
pub struct SessionStore {
    storage: Box<dyn TokenStorage>,
    listeners: Listeners<SessionEvent>,
}

impl SessionStore {
    /// Creates a store over the given durable storage.
    #[must_use]
    pub fn new(storage: impl TokenStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
            listeners: Listeners::new(),
        }
    }

    /// Creates a store persisting to a TOML file at `path`.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileStorage::new(path))
    }

    /// Creates a store with no persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Reads the current token pair from durable storage.
    #[must_use]
    pub fn tokens(&self) -> Option<TokenPair> {
        self.storage.load()
    }

    /// Reads the current access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.tokens().map(|tokens| tokens.access)
    }

    /// Reads the current refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.tokens().map(|tokens| tokens.refresh)
    }

    /// Whether an access token is present.
    ///
    /// Presence is the definition of "authenticated" — expiry is discovered
    /// by the gateway when the backend rejects the token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Replaces both tokens, then wakes subscribers.
    ///
    /// The pair is written as one unit before any listener runs, so a
    /// listener that immediately re-reads the store observes the new pair.
    pub fn set_tokens(&self, access: impl Into<String>, refresh: impl Into<String>) {
        self.storage.store(&TokenPair::new(access, refresh));
        self.listeners.notify(&SessionEvent::LocalChange);
    }

    /// Removes both tokens, then wakes subscribers.
    ///
    /// Used on logout and by the gateway on unrecoverable refresh failure.
    pub fn clear_tokens(&self) {
        self.storage.clear();
        self.listeners.notify(&SessionEvent::LocalChange);
    }

    /// External-change channel: wakes subscribers without writing.
    ///
    /// Call this when something outside this process is observed mutating
    /// the durable keys (file watcher, IPC signal). Reads pass through to
    /// storage, so the changed values are already visible to listeners.
    pub fn notify_external(&self) {
        self.listeners.notify(&SessionEvent::ExternalChange);
    }

    /// Registers `listener` on both change channels.
    ///
    /// The listener fires after every local `set_tokens`/`clear_tokens` and
    /// after every reported external change. The returned handle detaches it
    /// from both channels at once; detaching twice is harmless.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn set_tokens_replaces_both_halves() {
        let session = SessionStore::in_memory();
        assert!(!session.is_authenticated());

        session.set_tokens("access-1", "refresh-1");
        assert_eq!(session.access_token().as_deref(), Some("access-1"));
        assert_eq!(session.refresh_token().as_deref(), Some("refresh-1"));

        session.set_tokens("access-2", "refresh-2");
        assert_eq!(session.access_token().as_deref(), Some("access-2"));
        assert_eq!(session.refresh_token().as_deref(), Some("refresh-2"));
    }

    #[test]
    fn clear_removes_both_halves() {
        let session = SessionStore::in_memory();
        session.set_tokens("access", "refresh");

        session.clear_tokens();
        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn listener_observes_new_token_not_old() {
        let session = Arc::new(SessionStore::in_memory());
        session.set_tokens("old", "old-refresh");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&session);
        let log = Arc::clone(&seen);
        let _subscription = session.subscribe(move |_| {
            log.lock().unwrap().push(store.access_token());
        });

        session.set_tokens("new", "new-refresh");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [Some("new".to_string())]
        );
    }

    #[test]
    fn channels_are_distinguished() {
        let session = SessionStore::in_memory();
        let events = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&events);
        let _subscription = session.subscribe(move |event| {
            log.lock().unwrap().push(*event);
        });

        session.set_tokens("access", "refresh");
        session.notify_external();

        assert_eq!(
            events.lock().unwrap().as_slice(),
            [SessionEvent::LocalChange, SessionEvent::ExternalChange]
        );
    }

    #[test]
    fn unsubscribe_detaches_both_channels() {
        let session = SessionStore::in_memory();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let subscription = session.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        subscription.unsubscribe();

        session.set_tokens("access", "refresh");
        session.notify_external();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn file_storage_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");

        let session = SessionStore::with_file(&path);
        session.set_tokens("access", "refresh");

        // A second store over the same file sees the pair.
        let other = SessionStore::with_file(&path);
        assert_eq!(other.access_token().as_deref(), Some("access"));

        session.clear_tokens();
        assert_eq!(other.access_token(), None);
        assert!(!path.exists());
    }

    #[test]
    fn oversized_token_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        fs::write(&path, "x".repeat(8192)).unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.load().is_none());
    }

    #[test]
    fn malformed_token_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        fs::write(&path, "access_token = 42").unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.load().is_none());
    }
}
