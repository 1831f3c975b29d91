use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use bazaar_api::{AppState, AppStateInner, Config, build_router};
use bazaar_db::Database;
use bazaar_gateway::dispatcher::Dispatcher;

fn app() -> (Router, AppState) {
    let db = Database::open_in_memory().unwrap();
    let state = AppStateInner::new(db, Config::default(), Dispatcher::new()).unwrap();
    (build_router(state.clone()), state)
}

/// A browser stand-in: remembers the session cookie and the last CSRF token.
struct TestClient {
    app: Router,
    cookie: Option<String>,
    csrf: Option<String>,
    forwarded_for: Option<String>,
}

impl TestClient {
    fn new(app: &Router) -> Self {
        Self {
            app: app.clone(),
            cookie: None,
            csrf: None,
            forwarded_for: None,
        }
    }

    async fn send(&mut self, method: Method, path: &str, body: Option<Value>, with_csrf: bool) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, format!("bazaar.sid={}", cookie));
        }
        if let Some(chain) = &self.forwarded_for {
            builder = builder.header("x-forwarded-for", chain);
        }
        if with_csrf {
            if let Some(token) = &self.csrf {
                builder = builder.header("x-csrf-token", token);
            }
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();

        for set_cookie in response.headers().get_all(header::SET_COOKIE) {
            let raw = set_cookie.to_str().unwrap();
            if let Some(rest) = raw.strip_prefix("bazaar.sid=") {
                let value = rest.split(';').next().unwrap_or_default();
                self.cookie = (!value.is_empty()).then(|| value.to_string());
            }
        }

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&mut self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None, false).await
    }

    /// Mutating request carrying the current token.
    async fn post(&mut self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body), true).await
    }

    async fn refresh_csrf(&mut self) -> String {
        let (status, body) = self.get("/api/csrf-token").await;
        assert_eq!(status, StatusCode::OK);
        let token = body["csrfToken"].as_str().unwrap().to_string();
        self.csrf = Some(token.clone());
        token
    }

    async fn register(&mut self, username: &str, password: &str) -> Uuid {
        self.refresh_csrf().await;
        let (status, body) = self
            .post("/api/register", json!({ "username": username, "password": password }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        self.refresh_csrf().await;
        body["id"].as_str().unwrap().parse().unwrap()
    }

    async fn login(&mut self, username: &str, password: &str) -> StatusCode {
        let (status, _) = self
            .post("/api/login", json!({ "username": username, "password": password }))
            .await;
        status
    }
}

async fn open_conversation(alice: &mut TestClient, alice_id: Uuid, bob_id: Uuid) -> Uuid {
    let (status, body) = alice
        .post(
            "/api/conversations",
            json!({ "buyerId": alice_id, "sellerId": bob_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn buyer_and_seller_exchange_messages() {
    let (app, state) = app();
    let mut alice = TestClient::new(&app);
    let mut bob = TestClient::new(&app);

    let alice_id = alice.register("alice", "secret1").await;
    let bob_id = bob.register("bob", "secret2").await;

    let product_id = Uuid::new_v4();
    state
        .db
        .create_product(&product_id.to_string(), &bob_id.to_string(), "Road bike")
        .unwrap();

    let (status, conversation) = alice
        .post(
            "/api/conversations",
            json!({ "buyerId": alice_id, "sellerId": bob_id, "productId": product_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(conversation["productId"], product_id.to_string());
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    let messages_path = format!("/api/conversations/{}/messages", conversation_id);
    let (status, message) = alice.post(&messages_path, json!({ "content": "  Is it available?  " })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "Is it available?");
    assert_eq!(message["isRead"], false);

    let (status, _) = bob.post(&messages_path, json!({ "content": "Yes" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, listed) = bob.get(&messages_path).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["Is it available?", "Yes"]);

    let (status, read) = bob
        .post(&format!("/api/conversations/{}/read", conversation_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["updated"], 1);

    let (_, listed) = bob.get(&messages_path).await;
    let flags: Vec<bool> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["isRead"].as_bool().unwrap())
        .collect();
    assert_eq!(flags, [true, false]);

    let (_, conversations) = alice.get("/api/conversations").await;
    assert_eq!(conversations.as_array().unwrap().len(), 1);

    let (status, fetched) = bob.get(&format!("/api/conversations/{}", conversation_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["buyerId"], alice_id.to_string());
}

#[tokio::test]
async fn registration_returns_the_user_without_its_password() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.refresh_csrf().await;

    let (status, body) = client
        .post(
            "/api/register",
            json!({ "username": "alice", "password": "secret1", "phoneNumber": "09120000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["phoneNumber"], "09120000000");
    assert!(body.get("password").is_none());

    let (status, me) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], body["id"]);
}

#[tokio::test]
async fn login_replaces_the_pre_login_session() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;
    client.send(Method::POST, "/api/logout", None, true).await;

    let anonymous_token = client.refresh_csrf().await;
    let anonymous_cookie = client.cookie.clone().unwrap();

    assert_eq!(client.login("alice", "secret1").await, StatusCode::OK);
    let authed_cookie = client.cookie.clone().unwrap();
    assert_ne!(authed_cookie, anonymous_cookie);
    assert_ne!(client.refresh_csrf().await, anonymous_token);

    // A fixated pre-login identifier gains nothing.
    client.cookie = Some(anonymous_cookie);
    let (status, _) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    client.cookie = Some(authed_cookie);
    let (status, _) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn mutations_require_the_session_csrf_token() {
    let (app, _) = app();
    let mut alice = TestClient::new(&app);
    let mut bob = TestClient::new(&app);
    let alice_id = alice.register("alice", "secret1").await;
    let bob_id = bob.register("bob", "secret2").await;
    let conversation_id = open_conversation(&mut alice, alice_id, bob_id).await;
    let path = format!("/api/conversations/{}/messages", conversation_id);

    let (status, body) = alice
        .send(Method::POST, &path, Some(json!({ "content": "hi" })), false)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Invalid CSRF token");

    // Another session's token is no good either.
    let valid = alice.csrf.clone();
    alice.csrf = bob.csrf.clone();
    let (status, _) = alice.post(&path, json!({ "content": "hi" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    alice.csrf = valid.clone();
    let (status, _) = alice.post(&path, json!({ "content": "hi" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, message) = alice
        .send(
            Method::POST,
            &path,
            Some(json!({ "content": "via body", "_csrf": valid.unwrap() })),
            false,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "via body");
}

#[tokio::test]
async fn token_from_before_login_is_rejected_after_it() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.refresh_csrf().await;
    let (status, _) = client
        .post("/api/register", json!({ "username": "alice", "password": "secret1" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = client
        .send(Method::PATCH, "/api/user", Some(json!({ "phoneNumber": "1" })), true)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    client.refresh_csrf().await;
    let (status, _) = client
        .send(Method::PATCH, "/api/user", Some(json!({ "phoneNumber": "1" })), true)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn repeated_login_failures_are_throttled() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    // Successful attempts are not counted.
    for _ in 0..3 {
        assert_eq!(client.login("alice", "secret1").await, StatusCode::OK);
    }

    for _ in 0..5 {
        assert_eq!(client.login("alice", "wrong-password").await, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = client
        .post("/api/login", json!({ "username": "alice", "password": "secret1" }))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "Too many attempts. Please try again later.");

    // Register shares the budget.
    let (status, _) = client
        .post("/api/register", json!({ "username": "carol", "password": "secret3" }))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rotating_the_leftmost_forwarded_entry_does_not_reset_the_budget() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    for i in 0..5 {
        client.forwarded_for = Some(format!("10.9.9.{}, 198.51.100.7", i));
        assert_eq!(client.login("alice", "wrong-password").await, StatusCode::UNAUTHORIZED);
    }
    client.forwarded_for = Some("10.9.9.200, 198.51.100.7".into());
    assert_eq!(client.login("alice", "secret1").await, StatusCode::TOO_MANY_REQUESTS);

    // A different proxied client still has its own budget.
    client.forwarded_for = Some("10.9.9.0, 198.51.100.8".into());
    assert_eq!(client.login("alice", "secret1").await, StatusCode::OK);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    let (status_a, body_a) = client
        .post("/api/login", json!({ "username": "alice", "password": "nope-nope" }))
        .await;
    let (status_b, body_b) = client
        .post("/api/login", json!({ "username": "nobody", "password": "nope-nope" }))
        .await;
    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_b, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn duplicate_usernames_conflict() {
    let (app, _) = app();
    let mut first = TestClient::new(&app);
    first.register("alice", "secret1").await;

    let mut second = TestClient::new(&app);
    second.refresh_csrf().await;
    let (status, _) = second
        .post("/api/register", json!({ "username": "alice", "password": "another1" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_registration_lists_field_errors() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.refresh_csrf().await;

    let (status, body) = client
        .post("/api/register", json!({ "username": "al", "password": "123" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, ["password", "username"]);
}

#[tokio::test]
async fn profile_updates_only_touch_allow_listed_fields() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    let (status, body) = client
        .send(
            Method::PATCH,
            "/api/user",
            Some(json!({ "phoneNumber": "09121111111", "username": "mallory", "password": "x" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["phoneNumber"], "09121111111");

    let (status, _) = client
        .send(Method::PATCH, "/api/user", Some(json!({ "username": "mallory" })), true)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(client.login("alice", "secret1").await, StatusCode::OK);
}

#[tokio::test]
async fn changing_password_checks_the_current_one() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    let (status, _) = client
        .post(
            "/api/change-password",
            json!({ "currentPassword": "not-it", "newPassword": "secret9" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = client
        .post(
            "/api/change-password",
            json!({ "currentPassword": "secret1", "newPassword": "secret9" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(client.login("alice", "secret1").await, StatusCode::UNAUTHORIZED);
    assert_eq!(client.login("alice", "secret9").await, StatusCode::OK);
}

#[tokio::test]
async fn outsiders_cannot_read_or_write_a_conversation() {
    let (app, _) = app();
    let mut alice = TestClient::new(&app);
    let mut bob = TestClient::new(&app);
    let mut carol = TestClient::new(&app);
    let alice_id = alice.register("alice", "secret1").await;
    let bob_id = bob.register("bob", "secret2").await;
    let carol_id = carol.register("carol", "secret3").await;
    let conversation_id = open_conversation(&mut alice, alice_id, bob_id).await;
    let path = format!("/api/conversations/{}/messages", conversation_id);

    let (status, _) = carol.get(&path).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = carol.post(&path, json!({ "content": "hello?" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = carol
        .get(&format!("/api/conversations/{}/messages", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nor open one on other people's behalf.
    let (status, _) = carol
        .post(
            "/api/conversations",
            json!({ "buyerId": alice_id, "sellerId": bob_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = carol
        .post(
            "/api/conversations",
            json!({ "buyerId": carol_id, "sellerId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_messages_are_rejected() {
    let (app, _) = app();
    let mut alice = TestClient::new(&app);
    let mut bob = TestClient::new(&app);
    let alice_id = alice.register("alice", "secret1").await;
    let bob_id = bob.register("bob", "secret2").await;
    let conversation_id = open_conversation(&mut alice, alice_id, bob_id).await;
    let path = format!("/api/conversations/{}/messages", conversation_id);

    let (status, body) = alice.post(&path, json!({ "content": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "content");

    let (status, _) = alice.post(&path, json!({ "content": "x".repeat(5001) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn anonymous_callers_are_turned_away() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);

    let (status, body) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not logged in");

    let (status, _) = client.get("/ws").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    client.refresh_csrf().await;
    let (status, _) = client.get("/api/conversations").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;
    let cookie = client.cookie.clone();

    let (status, body) = client.send(Method::POST, "/api/logout", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");
    assert!(client.cookie.is_none());

    client.cookie = cookie;
    let (status, _) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn blank_phone_number_clears_it() {
    let (app, _) = app();
    let mut client = TestClient::new(&app);
    client.refresh_csrf().await;
    let (status, _) = client
        .post(
            "/api/register",
            json!({ "username": "alice", "password": "secret1", "phoneNumber": "09120000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    client.refresh_csrf().await;

    let (status, body) = client
        .send(Method::PATCH, "/api/user", Some(json!({ "phoneNumber": "   " })), true)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phoneNumber"], Value::Null);

    let (_, me) = client.get("/api/user").await;
    assert_eq!(me["phoneNumber"], Value::Null);
}

#[tokio::test]
async fn sent_messages_are_pushed_to_the_conversation() {
    let (app, state) = app();
    let mut alice = TestClient::new(&app);
    let mut bob = TestClient::new(&app);
    let alice_id = alice.register("alice", "secret1").await;
    let bob_id = bob.register("bob", "secret2").await;
    let conversation_id = open_conversation(&mut alice, alice_id, bob_id).await;

    let mut push = state.dispatcher.subscribe();
    let (status, message) = alice
        .post(
            &format!("/api/conversations/{}/messages", conversation_id),
            json!({ "content": "hello" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let envelope = push.try_recv().unwrap();
    assert_eq!(envelope.conversation_id, conversation_id);
    assert!(envelope.participants.contains(&alice_id));
    assert!(envelope.participants.contains(&bob_id));

    let frame: Value = serde_json::from_str(&envelope.json).unwrap();
    assert_eq!(frame["type"], "new_message");
    assert_eq!(frame["message"], message);

    // Rejected sends publish nothing.
    let (status, _) = alice
        .post(
            &format!("/api/conversations/{}/messages", conversation_id),
            json!({ "content": " " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(push.try_recv().is_err());
}

#[tokio::test]
async fn session_of_a_deleted_user_is_not_logged_in() {
    let (app, state) = app();
    let mut client = TestClient::new(&app);
    client.register("alice", "secret1").await;

    // Keep the session row while the user row goes away.
    state
        .db
        .with_conn(|conn| {
            conn.execute("PRAGMA foreign_keys = OFF", [])?;
            conn.execute("DELETE FROM users WHERE username = 'alice'", [])?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            Ok(())
        })
        .unwrap();

    let (status, body) = client.get("/api/user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not logged in");

    let (status, _) = client.get("/api/conversations").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_closes_the_sessions_push_connections() {
    let (app, state) = app();
    let mut alice = TestClient::new(&app);
    let alice_id = alice.register("alice", "secret1").await;
    let session_id = alice.cookie.clone().unwrap();

    let (_, mut this_session) = state.dispatcher.register(alice_id, &session_id).await;
    let (_, mut other_session) = state.dispatcher.register(alice_id, "another-device").await;

    let (status, _) = alice.send(Method::POST, "/api/logout", None, true).await;
    assert_eq!(status, StatusCode::OK);

    assert!(this_session.try_recv().is_ok());
    assert!(other_session.try_recv().is_err());
    assert_eq!(state.dispatcher.connected_clients().await, 1);
}
