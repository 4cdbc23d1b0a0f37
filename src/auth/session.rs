use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::storage::{StorageError, TokenStorage};

/// Storage key for the access credential
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh credential
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Buffer size for the session event channel.
/// Events are rare (login, logout, expiry), a slow subscriber only loses stale ones.
const EVENT_CHANNEL_SIZE: usize = 16;

/// Changes to the session that UI code may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials were saved after a login or registration
    Established,
    /// The user logged out locally
    LoggedOut,
    /// The server rejected the stored credential; the session was cleared
    /// and the user should be sent to the login surface.
    Invalidated { status: u16 },
}

/// The client-local session: an access/refresh credential pair in persistent
/// storage.
///
/// Clone is cheap and all clones share the same storage and event channel,
/// so one value created at start-up can be handed to every consumer.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { storage, events }
    }

    /// True iff an access credential is present
    pub fn has(&self) -> bool {
        self.get().is_some()
    }

    /// The current access credential, if any.
    /// Storage failures are logged and reported as "no credential".
    pub fn get(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    /// The stored refresh credential. Nothing refreshes sessions yet, but the
    /// credential is kept alongside the access token.
    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    /// Persist both credentials, replacing any previous pair.
    ///
    /// If the refresh slot cannot be written the access slot is rolled back,
    /// so the store never holds half a pair.
    pub fn save(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, access)?;
        if let Err(e) = self.storage.set(REFRESH_TOKEN_KEY, refresh) {
            if let Err(rollback) = self.storage.remove(ACCESS_TOKEN_KEY) {
                warn!(error = %rollback, "Failed to roll back access token");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove both credentials. Both removals are attempted even if the
    /// first one fails; the first error is returned.
    pub fn clear(&self) -> Result<(), StorageError> {
        let access = self.storage.remove(ACCESS_TOKEN_KEY);
        let refresh = self.storage.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    /// Save a freshly issued pair and announce the new session
    pub(crate) fn establish(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.save(access, refresh)?;
        info!("Session established");
        self.emit(SessionEvent::Established);
        Ok(())
    }

    /// Local logout: clear credentials and announce it
    pub fn logout(&self) {
        if let Err(e) = self.clear() {
            warn!(error = %e, "Failed to clear session on logout");
        }
        info!("Logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    /// Forced logout after the server rejected the credential.
    /// Emits exactly one `Invalidated` event per call.
    pub fn invalidate(&self, status: u16) {
        if let Err(e) = self.clear() {
            warn!(error = %e, "Failed to clear session after rejection");
        }
        warn!(status, "Session invalidated by server");
        self.emit(SessionEvent::Invalidated { status });
    }

    /// Subscribe to session changes. Only events sent after subscribing are
    /// received.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session storage");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the credentials themselves
        f.debug_struct("SessionStore")
            .field("authenticated", &self.has())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;

    /// Storage that refuses to write the refresh slot
    struct BrokenRefreshSlot(MemoryStorage);

    impl TokenStorage for BrokenRefreshSlot {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == REFRESH_TOKEN_KEY {
                return Err(StorageError::Io {
                    path: "refresh".into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove(key)
        }
    }

    fn memory_store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_empty_store() {
        let store = memory_store();
        assert!(!store.has());
        assert_eq!(store.get(), None);
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_save_then_clear() {
        let store = memory_store();
        store.save("T1", "T2").unwrap();
        assert!(store.has());
        assert_eq!(store.get().as_deref(), Some("T1"));
        assert_eq!(store.refresh_token().as_deref(), Some("T2"));

        store.clear().unwrap();
        assert!(!store.has());
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_save_overwrites_previous_pair() {
        let store = memory_store();
        store.save("old-access", "old-refresh").unwrap();
        store.save("new-access", "new-refresh").unwrap();
        assert_eq!(store.get().as_deref(), Some("new-access"));
        assert_eq!(store.refresh_token().as_deref(), Some("new-refresh"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = memory_store();
        let other = store.clone();
        store.save("T1", "T2").unwrap();
        assert!(other.has());
        other.clear().unwrap();
        assert!(!store.has());
    }

    #[test]
    fn test_failed_refresh_write_rolls_back_access() {
        let store = SessionStore::new(Arc::new(BrokenRefreshSlot(MemoryStorage::new())));
        assert!(store.save("T1", "T2").is_err());
        assert!(!store.has());
    }

    #[test]
    fn test_invalidate_clears_and_emits_once() {
        let store = memory_store();
        let mut events = store.subscribe();
        store.save("T1", "T2").unwrap();

        store.invalidate(401);

        assert!(!store.has());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated { status: 401 });
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_establish_and_logout_events() {
        let store = memory_store();
        let mut events = store.subscribe();

        store.establish("T1", "T2").unwrap();
        store.logout();

        assert_eq!(events.try_recv().unwrap(), SessionEvent::Established);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
        assert!(!store.has());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let store = memory_store();
        store.save("secret-access", "secret-refresh").unwrap();
        let printed = format!("{:?}", store);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("authenticated: true"));
    }
}
