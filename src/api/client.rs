//! API client for the BookSwap REST API.
//!
//! Every request goes through one pipeline: the stored access token is
//! attached as a bearer header, and every response is checked before it is
//! decoded. A 401 clears the session and emits
//! [`SessionEvent::Invalidated`](crate::auth::SessionEvent) so the UI can
//! send the user back to the login surface.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::models::{AuthResponse, Book, LoginCredentials, RegisterData, User};

use super::error::{ErrorKind, DEFAULT_ERROR_STATUS};
use super::ApiError;

/// API client for BookSwap.
/// Clone is cheap - reqwest::Client and SessionStore are both shared handles.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionStore,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000/api`).
    /// No request timeout is applied.
    pub fn new(base_url: &str, session: SessionStore) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, session, None)
    }

    pub fn with_timeout(
        base_url: &str,
        session: SessionStore,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ApiError::transport(&e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    // ------------------------------------------------------------------------
    // Request pipeline
    // ------------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the access token, as it is right now, to an outgoing request
    fn authorize(&self, request: RequestBuilder) -> (RequestBuilder, bool) {
        match self.session.get() {
            Some(token) => (request.bearer_auth(token), true),
            None => (request, false),
        }
    }

    /// Pass through success responses; normalize everything else.
    /// A 401 invalidates the session as soon as the status is known, before
    /// the body is read.
    async fn check_response(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate(status.as_u16());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    async fn send(&self, method: Method, path: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        let (request, authorized) = self.authorize(request);
        debug!(%method, path, authorized, "Sending request");

        let response = request.send().await.map_err(|e| {
            warn!(%method, path, error = %e, "Request failed");
            ApiError::transport(&e)
        })?;

        self.check_response(response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await.map_err(|e| ApiError::transport(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path, error = %e, "Failed to parse JSON response");
            ApiError::invalid_response(&e)
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.client.get(self.url(path));
        let response = self.send(Method::GET, path, request).await?;
        Self::decode(path, response).await
    }

    async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let request = self.client.get(self.url(path)).query(query);
        let response = self.send(Method::GET, path, request).await?;
        Self::decode(path, response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.send(Method::POST, path, request).await?;
        Self::decode(path, response).await
    }

    /// Raw pass-through; an empty body decodes as JSON `null`
    async fn raw(&self, method: Method, path: &str) -> Result<Value, ApiError> {
        let request = self.client.request(method.clone(), self.url(path));
        let response = self.send(method, path, request).await?;
        let bytes = response.bytes().await.map_err(|e| ApiError::transport(&e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::invalid_response(&e))
    }

    fn persist(&self, auth: &AuthResponse) -> Result<(), ApiError> {
        self.session
            .establish(&auth.access_token, &auth.refresh_token)
            .map_err(|e| {
                ApiError::new(
                    format!("Failed to store session: {}", e),
                    DEFAULT_ERROR_STATUS,
                    ErrorKind::Unknown,
                )
            })
    }

    // ------------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------------

    /// Log in and store the issued credential pair
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        let auth: AuthResponse = self.post("/auth/login", credentials).await?;
        self.persist(&auth)?;
        info!(email = %credentials.email, "Logged in");
        Ok(auth)
    }

    /// Create an account and store the issued credential pair
    pub async fn register(&self, data: &RegisterData) -> Result<AuthResponse, ApiError> {
        let auth: AuthResponse = self.post("/auth/register", data).await?;
        self.persist(&auth)?;
        info!(username = %data.username, "Registered");
        Ok(auth)
    }

    /// The user the stored access token belongs to
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    /// Local logout. The server is not contacted.
    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.has()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.session.get()
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub async fn get_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/auth/users").await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User, ApiError> {
        self.get(&format!("/auth/users/{}", user_id)).await
    }

    // ------------------------------------------------------------------------
    // Books
    // ------------------------------------------------------------------------

    pub async fn get_books(&self) -> Result<Vec<Book>, ApiError> {
        self.get("/books/").await
    }

    pub async fn get_book(&self, book_id: i64) -> Result<Book, ApiError> {
        self.get(&format!("/books/{}", book_id)).await
    }

    /// `GET /books/?search=<query>`, query URL-encoded
    pub async fn search_books(&self, query: &str) -> Result<Vec<Book>, ApiError> {
        self.get_with_query("/books/", &[("search", query)]).await
    }

    // ------------------------------------------------------------------------
    // Friends, exchanges, messages
    //
    // The backend endpoints are not finished; these take no parameters and
    // return the raw JSON until the contracts settle.
    // ------------------------------------------------------------------------

    pub async fn get_friendships(&self) -> Result<Value, ApiError> {
        self.raw(Method::GET, "/friends/").await
    }

    pub async fn send_friend_request(&self) -> Result<Value, ApiError> {
        self.raw(Method::POST, "/friends/request").await
    }

    pub async fn get_exchanges(&self) -> Result<Value, ApiError> {
        self.raw(Method::GET, "/exchanges/").await
    }

    pub async fn request_exchange(&self) -> Result<Value, ApiError> {
        self.raw(Method::POST, "/exchanges/request").await
    }

    pub async fn get_messages(&self) -> Result<Value, ApiError> {
        self.raw(Method::GET, "/messages/").await
    }

    pub async fn send_message(&self) -> Result<Value, ApiError> {
        self.raw(Method::POST, "/messages/send").await
    }
}
