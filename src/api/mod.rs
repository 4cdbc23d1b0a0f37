//! REST API client module for the BookSwap backend.
//!
//! This module provides the `ApiClient` for authenticating and fetching
//! users, books and the social endpoints. Failures of any kind surface as
//! the `ApiError` envelope.
//!
//! The API uses JWT bearer token authentication; tokens are obtained from
//! `/auth/login` or `/auth/register` and kept in the `SessionStore`.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, ErrorKind};
