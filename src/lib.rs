//! BookSwap client library.
//!
//! A typed client for the BookSwap book-exchange API built around the
//! client-side session:
//!
//! - [`auth::SessionStore`] keeps the access/refresh credential pair in
//!   persistent storage and broadcasts [`auth::SessionEvent`]s.
//! - [`api::ApiClient`] attaches the access token to every request, clears
//!   the session on a 401 and normalizes all failures into
//!   [`api::ApiError`].
//! - [`auth::AuthContext`] holds the signed-in user for UI code.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use bookswap::{config::Config, models::LoginCredentials, AuthContext};
//!
//! let config = Config::load()?;
//! let session = config.session_store()?;
//! let auth = AuthContext::new(config.api_client(session)?);
//! auth.init().await;
//! auth.login(&LoginCredentials::new("a@b.com", "secret")).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, ErrorKind};
pub use auth::{AuthContext, SessionEvent, SessionStore};
