//! Authentication module for managing the client-side session.
//!
//! This module provides:
//! - `SessionStore`: the access/refresh credential pair and session events
//! - `TokenStorage` backends: JSON file, OS keychain, in-memory
//! - `AuthContext`: the signed-in user and login/register/logout flows
//!
//! Credentials are opaque bearer tokens. Nothing refreshes them; a 401 from
//! the server ends the session.

pub mod context;
pub mod session;
pub mod storage;

pub use context::AuthContext;
pub use session::{SessionEvent, SessionStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, StorageError, TokenStorage};
