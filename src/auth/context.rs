//! The session provider handed to UI code.
//!
//! `AuthContext` wraps an `ApiClient` and keeps the signed-in user, a loading
//! flag and the last authentication error. UI surfaces read from it instead
//! of talking to the session store directly.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::api::{ApiClient, ApiError};
use crate::models::{LoginCredentials, RegisterData, User};

use super::{SessionEvent, SessionStore};

#[derive(Debug)]
struct AuthState {
    user: Option<User>,
    is_loading: bool,
    error: Option<String>,
}

/// Shared authentication state. Clone is cheap; clones see the same state.
#[derive(Clone, Debug)]
pub struct AuthContext {
    api: ApiClient,
    state: Arc<RwLock<AuthState>>,
}

impl AuthContext {
    /// Starts in the loading state until [`init`](Self::init) has run
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(AuthState {
                user: None,
                is_loading: true,
                error: None,
            })),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionStore {
        self.api.session()
    }

    /// Restore a stored session on start-up.
    ///
    /// If credentials exist, the current user is fetched; when that fails the
    /// stale session is dropped locally.
    pub async fn init(&self) {
        if self.api.is_authenticated() {
            match self.api.current_user().await {
                Ok(user) => {
                    debug!(user_id = user.id, "Restored session");
                    self.state.write().await.user = Some(user);
                }
                Err(e) => {
                    error!(error = %e, "Failed to get current user");
                    self.api.logout();
                }
            }
        }
        self.state.write().await.is_loading = false;
    }

    /// Log in, then load the user the new session belongs to
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, ApiError> {
        self.begin().await;
        let result: Result<User, ApiError> = async {
            self.api.login(credentials).await?;
            self.api.current_user().await
        }
        .await;
        self.finish(result).await
    }

    /// Register, then load the newly created user
    pub async fn register(&self, data: &RegisterData) -> Result<User, ApiError> {
        self.begin().await;
        let result: Result<User, ApiError> = async {
            self.api.register(data).await?;
            self.api.current_user().await
        }
        .await;
        self.finish(result).await
    }

    pub async fn logout(&self) {
        self.api.logout();
        let mut state = self.state.write().await;
        state.user = None;
        state.error = None;
    }

    /// The signed-in user. Returns None once the session has been cleared,
    /// even if a user was loaded before.
    pub async fn user(&self) -> Option<User> {
        if !self.api.is_authenticated() {
            return None;
        }
        self.state.read().await.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.is_authenticated()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Apply a session event to the cached state. UI loops that subscribe to
    /// the session can forward events here.
    pub async fn handle_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Invalidated { .. } | SessionEvent::LoggedOut => {
                self.state.write().await.user = None;
            }
            SessionEvent::Established => {}
        }
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
    }

    /// Record the outcome. `ApiError` always carries a non-empty message, so
    /// it is stored as-is.
    async fn finish(&self, result: Result<User, ApiError>) -> Result<User, ApiError> {
        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok(user) => {
                state.user = Some(user.clone());
                Ok(user)
            }
            Err(e) => {
                state.error = Some(e.error.clone());
                Err(e)
            }
        }
    }
}
