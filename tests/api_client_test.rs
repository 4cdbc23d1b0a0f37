//! Integration tests for the authenticated transport against a mock backend

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use bookswap::auth::MemoryStorage;
use bookswap::models::{LoginCredentials, RegisterData};
use bookswap::{ApiClient, ErrorKind, SessionEvent, SessionStore};

const USER_BODY: &str = r#"{
    "id": 1,
    "email": "a@b.com",
    "username": "reader",
    "first_name": "Ada",
    "last_name": "Lovelace",
    "bio": "",
    "location": "",
    "is_profile_public": true,
    "created_at": "2024-03-01T12:30:00Z"
}"#;

fn client_for(server: &ServerGuard) -> ApiClient {
    let session = SessionStore::new(Arc::new(MemoryStorage::new()));
    ApiClient::new(&format!("{}/api", server.url()), session).expect("client")
}

#[tokio::test]
async fn login_saves_credential_pair() {
    //* Given
    let mut server = Server::new_async().await;
    let login_mock = server
        .mock("POST", "/api/auth/login")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "x"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "T1", "refresh_token": "T2", "token_type": "bearer"}"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);
    let mut events = api.session().subscribe();

    //* When
    let auth = api
        .login(&LoginCredentials::new("a@b.com", "x"))
        .await
        .expect("login should succeed");

    //* Then
    login_mock.assert_async().await;
    assert_eq!(auth.token_type, "bearer");
    assert!(api.is_authenticated());
    assert_eq!(api.session().get().as_deref(), Some("T1"));
    assert_eq!(api.session().refresh_token().as_deref(), Some("T2"));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Established);
}

#[tokio::test]
async fn register_saves_credential_pair() {
    //* Given
    let mut server = Server::new_async().await;
    let register_mock = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::PartialJson(json!({"username": "reader", "confirm_password": "pw"})))
        .with_status(200)
        .with_body(r#"{"access_token": "R1", "refresh_token": "R2", "token_type": "bearer"}"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let data = RegisterData {
        email: "a@b.com".to_string(),
        username: "reader".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        password: "pw".to_string(),
        confirm_password: "pw".to_string(),
    };
    api.register(&data).await.expect("register should succeed");

    //* Then
    register_mock.assert_async().await;
    assert_eq!(api.auth_token().as_deref(), Some("R1"));
    assert_eq!(api.session().refresh_token().as_deref(), Some("R2"));
}

#[tokio::test]
async fn bad_credentials_return_envelope_without_session() {
    //* Given
    let mut server = Server::new_async().await;
    let login_mock = server
        .mock("POST", "/api/auth/login")
        .with_status(401)
        .with_body(r#"{"error": "Invalid credentials", "status": 401}"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let err = api
        .login(&LoginCredentials::new("a@b.com", "wrong"))
        .await
        .expect_err("login should fail");

    //* Then
    login_mock.assert_async().await;
    assert_eq!(err.error, "Invalid credentials");
    assert_eq!(err.status, 401);
    assert_eq!(err.details, None);
    assert!(err.is_unauthorized());
    assert!(!api.is_authenticated());
    assert_eq!(api.session().refresh_token(), None);
}

#[tokio::test]
async fn unauthorized_response_clears_session_and_emits_once() {
    //* Given
    let mut server = Server::new_async().await;
    let me_mock = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .with_body(r#"{"detail": "Unauthorized"}"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("expired", "R").unwrap();
    let mut events = api.session().subscribe();

    //* When
    let err = api.current_user().await.expect_err("should be rejected");

    //* Then
    me_mock.assert_async().await;
    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.error, "Unauthorized");
    assert!(!api.session().has());
    assert_eq!(api.session().refresh_token(), None);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Invalidated { status: 401 }
    );
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_clears_session_before_body_arrives() {
    //* Given
    let mut server = Server::new_async().await;
    let (release, hold) = std::sync::mpsc::channel::<()>();
    let hold = Mutex::new(hold);
    server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .with_chunked_body(move |w| {
            // Headers are already out; keep the body back until released
            let _ = hold.lock().unwrap().recv_timeout(Duration::from_secs(5));
            w.write_all(br#"{"detail": "Unauthorized"}"#)
        })
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("stale", "R").unwrap();
    let mut events = api.session().subscribe();

    //* When
    let pending = tokio::spawn({
        let api = api.clone();
        async move { api.current_user().await }
    });
    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("session should be invalidated while the body is still pending")
        .unwrap();

    //* Then
    assert_eq!(event, SessionEvent::Invalidated { status: 401 });
    assert!(!api.session().has());
    assert!(!pending.is_finished());

    release.send(()).unwrap();
    let err = pending.await.unwrap().expect_err("should be rejected");
    assert_eq!(err.status, 401);
    assert_eq!(err.error, "Unauthorized");
}

#[tokio::test]
async fn each_unauthorized_response_emits_one_event() {
    //* Given
    let mut server = Server::new_async().await;
    let books_mock = server
        .mock("GET", "/api/books/")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("T1", "T2").unwrap();
    let mut events = api.session().subscribe();

    //* When
    assert!(api.get_books().await.is_err());
    assert!(api.get_books().await.is_err());

    //* Then
    books_mock.assert_async().await;
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Invalidated { .. })));
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Invalidated { .. })));
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn stored_token_is_attached_as_bearer() {
    //* Given
    let mut server = Server::new_async().await;
    let me_mock = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", "Bearer T1")
        .with_status(200)
        .with_body(USER_BODY)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("T1", "T2").unwrap();

    //* When
    let user = api.current_user().await.expect("current user");

    //* Then
    me_mock.assert_async().await;
    assert_eq!(user.username, "reader");
    assert_eq!(user.avatar, None);
}

#[tokio::test]
async fn token_is_read_at_dispatch_time() {
    //* Given
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/api/auth/users")
        .match_header("authorization", "Bearer first")
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/api/auth/users")
        .match_header("authorization", "Bearer second")
        .with_status(200)
        .with_body(format!("[{}]", USER_BODY))
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    api.session().save("first", "r").unwrap();
    let before = api.get_users().await.expect("users");
    api.session().save("second", "r").unwrap();
    let after = api.get_users().await.expect("users");

    //* Then
    first.assert_async().await;
    second.assert_async().await;
    assert!(before.is_empty());
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn no_header_without_session() {
    //* Given
    let mut server = Server::new_async().await;
    let book_mock = server
        .mock("GET", "/api/books/3")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(r#"{"id": 3, "title": "Emma", "author_names": "Jane Austen"}"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let book = api.get_book(3).await.expect("book");

    //* Then
    book_mock.assert_async().await;
    assert_eq!(book.title, "Emma");
}

#[tokio::test]
async fn search_books_encodes_query() {
    //* Given
    let mut server = Server::new_async().await;
    let search_mock = server
        .mock("GET", "/api/books/")
        .match_query(Matcher::UrlEncoded("search".into(), "the great gatsby".into()))
        .with_status(200)
        .with_body(r#"[{"id": 1, "title": "The Great Gatsby", "author_names": "F. Scott Fitzgerald"}]"#)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let books = api.search_books("the great gatsby").await.expect("search");

    //* Then
    search_mock.assert_async().await;
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "The Great Gatsby");
}

#[tokio::test]
async fn get_user_uses_id_path() {
    //* Given
    let mut server = Server::new_async().await;
    let user_mock = server
        .mock("GET", "/api/auth/users/1")
        .with_status(200)
        .with_body(USER_BODY)
        .expect(1)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let user = api.get_user(1).await.expect("user");

    //* Then
    user_mock.assert_async().await;
    assert_eq!(user.email, "a@b.com");
}

#[tokio::test]
async fn validation_errors_carry_field_details() {
    //* Given
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/register")
        .with_status(422)
        .with_body(r#"{"error": "Invalid data", "details": {"email": ["Enter a valid email."]}}"#)
        .create_async()
        .await;
    let api = client_for(&server);
    let data = RegisterData {
        email: "nope".to_string(),
        username: "reader".to_string(),
        first_name: String::new(),
        last_name: String::new(),
        password: "pw".to_string(),
        confirm_password: "pw".to_string(),
    };

    //* When
    let err = api.register(&data).await.expect_err("should fail");

    //* Then
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.status, 422);
    assert_eq!(err.field_errors("email"), ["Enter a valid email."]);
    assert!(!api.is_authenticated());
}

#[tokio::test]
async fn server_error_without_body_uses_status_message() {
    //* Given
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/books/")
        .with_status(503)
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("T1", "T2").unwrap();

    //* When
    let err = api.get_books().await.expect_err("should fail");

    //* Then
    assert_eq!(err.error, "Request failed with status code 503");
    assert_eq!(err.status, 503);
    assert_eq!(err.kind, ErrorKind::Server);
    // Only a 401 ends the session
    assert!(api.is_authenticated());
}

#[tokio::test]
async fn malformed_json_is_normalized() {
    //* Given
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/books/")
        .with_status(200)
        .with_body("<html>oops</html>")
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let err = api.get_books().await.expect_err("should fail");

    //* Then
    assert_eq!(err.kind, ErrorKind::InvalidResponse);
    assert_eq!(err.status, 500);
    assert!(!err.error.is_empty());
}

#[tokio::test]
async fn network_failure_is_normalized() {
    //* Given
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = SessionStore::new(Arc::new(MemoryStorage::new()));
    let api = ApiClient::new(&format!("http://127.0.0.1:{}/api", port), session).unwrap();

    //* When
    let err = api.get_books().await.expect_err("nothing is listening");

    //* Then
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(err.status, 500);
    assert!(!err.error.is_empty());
}

#[tokio::test]
async fn placeholder_endpoints_pass_through() {
    //* Given
    let mut server = Server::new_async().await;
    let friends = server
        .mock("GET", "/api/friends/")
        .with_status(200)
        .with_body(r#"{"message": "Friends list - to be implemented"}"#)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/api/messages/send")
        .with_status(200)
        .create_async()
        .await;
    let api = client_for(&server);

    //* When
    let listed = api.get_friendships().await.expect("friends");
    let sent = api.send_message().await.expect("send");

    //* Then
    friends.assert_async().await;
    send.assert_async().await;
    assert_eq!(listed["message"], "Friends list - to be implemented");
    assert_eq!(sent, serde_json::Value::Null);
}

#[tokio::test]
async fn logout_is_local_only() {
    //* Given
    let mut server = Server::new_async().await;
    let any = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let api = client_for(&server);
    api.session().save("T1", "T2").unwrap();
    let mut events = api.session().subscribe();

    //* When
    api.logout();

    //* Then
    any.assert_async().await;
    assert!(!api.is_authenticated());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
}
