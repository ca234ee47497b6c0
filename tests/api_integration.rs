//! Integration tests for the HTTP API and the notification fan-out.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! database and recording channel connectors, then drives it over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use letter_desk::accounts::{NewAccount, Role, ensure_admin};
use letter_desk::api::{self, AppState};
use letter_desk::auth::password::hash_password;
use letter_desk::auth::{AccessGate, TokenSigner};
use letter_desk::channels::{ChannelConnector, ChannelKind, ChannelManager};
use letter_desk::config::{BootstrapAdmin, DispatchConfig};
use letter_desk::error::ChannelError;
use letter_desk::letters::LetterWorkflow;
use letter_desk::notifications::{Dispatcher, NotificationRouter};
use letter_desk::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connector that records every send instead of talking to a service.
struct Recording {
    kind: ChannelKind,
    sent: Mutex<Vec<(String, String)>>,
}

impl Recording {
    fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelConnector for Recording {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    store: Arc<dyn Database>,
    telegram: Arc<Recording>,
    whatsapp: Arc<Recording>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/users/login"))
            .json(&json!({"email": email, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "login as {email}");
        let body: Value = resp.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    /// Create an account directly in the store and log in as it.
    async fn account(&self, role: Role, name: &str, email: &str) -> (i64, String) {
        let role_id = self.store.get_role_by_name(role).await.unwrap().unwrap().id;
        let account = self
            .store
            .create_account(&NewAccount {
                role_id,
                name: name.into(),
                email: email.into(),
                password_hash: hash_password("secret123"),
            })
            .await
            .unwrap();
        let token = self.login(email, "secret123").await;
        (account.id, token)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

async fn start_server() -> TestServer {
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    ensure_admin(
        store.as_ref(),
        &BootstrapAdmin {
            name: "Admin".into(),
            email: "admin@mail.com".into(),
            password: SecretString::from("admin123"),
        },
    )
    .await
    .unwrap();

    let telegram = Recording::new(ChannelKind::Telegram);
    let whatsapp = Recording::new(ChannelKind::WhatsApp);
    let mut channels = ChannelManager::new();
    channels.add(telegram.clone());
    channels.add(whatsapp.clone());

    let (dispatcher, _task) = Dispatcher::spawn(channels, &DispatchConfig::default());
    let router = Arc::new(NotificationRouter::new(store.clone(), dispatcher));
    let workflow = Arc::new(LetterWorkflow::new(store.clone(), router));
    let gate = AccessGate::new(TokenSigner::new(
        SecretString::from("integration-secret"),
        Duration::from_secs(3600),
    ));

    let app = api::router(AppState {
        store: store.clone(),
        gate,
        workflow,
        session: None,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        store,
        telegram,
        whatsapp,
    }
}

/// Poll until `pred` holds, failing the test after `TEST_TIMEOUT`.
async fn eventually(mut pred: impl FnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn create_letter_type(server: &TestServer, admin: &str, name: &str) -> i64 {
    let (status, body) = server
        .send(
            reqwest::Method::POST,
            "/api/letter_types",
            Some(admin),
            Some(json!({"name": name, "description": "test type"})),
        )
        .await;
    assert_eq!(status, 201);
    body["id"].as_i64().unwrap()
}

async fn create_setting(server: &TestServer, admin: &str, body: Value) -> (u16, Value) {
    server
        .send(reqwest::Method::POST, "/api/settings", Some(admin), Some(body))
        .await
}

#[tokio::test]
async fn health_is_public() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, body) = server
            .send(reqwest::Method::GET, "/health", None, None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn register_login_and_auth_errors() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = server
            .send(
                reqwest::Method::POST,
                "/api/users/register",
                None,
                Some(json!({"name": "Ann", "email": "ann@mail.com", "password": "pw123456"})),
            )
            .await;
        assert_eq!(status, 201);
        assert_eq!(body["user"]["role"], "user");
        assert!(body["user"].get("password_hash").is_none());

        let (status, body) = server
            .send(
                reqwest::Method::POST,
                "/api/users/register",
                None,
                Some(json!({"name": "Ann 2", "email": "ann@mail.com", "password": "x"})),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["code"], "conflict");

        let token = server.login("ann@mail.com", "pw123456").await;
        let (status, _) = server
            .send(reqwest::Method::GET, "/api/letters", Some(&token), None)
            .await;
        assert_eq!(status, 200);

        let (status, body) = server
            .send(
                reqwest::Method::POST,
                "/api/users/login",
                None,
                Some(json!({"email": "ann@mail.com", "password": "wrong"})),
            )
            .await;
        assert_eq!(status, 401);
        assert_eq!(body["code"], "authentication_error");

        let (status, unknown) = server
            .send(
                reqwest::Method::POST,
                "/api/users/login",
                None,
                Some(json!({"email": "nobody@mail.com", "password": "pw123456"})),
            )
            .await;
        assert_eq!(status, 401);
        assert_eq!(unknown, body, "unknown email looks like a wrong password");

        for bad in [None, Some("not-a-token")] {
            let (status, body) = server
                .send(reqwest::Method::GET, "/api/letters", bad, None)
                .await;
            assert_eq!(status, 401);
            assert_eq!(body["code"], "authentication_error");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn admin_routes_are_admin_only() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (_, user) = server.account(Role::User, "Ann", "ann@mail.com").await;
        let (_, reviewer) = server.account(Role::Reviewer, "Rex", "rex@mail.com").await;

        for path in ["/api/users", "/api/roles", "/api/letter_types", "/api/settings", "/api/session"] {
            for token in [&user, &reviewer] {
                let (status, body) = server
                    .send(reqwest::Method::GET, path, Some(token), None)
                    .await;
                assert_eq!(status, 403, "{path}");
                assert_eq!(body["code"], "forbidden");
            }
        }

        let admin = server.login("admin@mail.com", "admin123").await;
        let (status, body) = server
            .send(reqwest::Method::GET, "/api/roles", Some(&admin), None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, body) = server
            .send(reqwest::Method::GET, "/api/session", Some(&admin), None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["enabled"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_setting_is_conflict_and_original_survives() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let admin = server.login("admin@mail.com", "admin123").await;
        let (user_id, _) = server.account(Role::User, "Ann", "ann@mail.com").await;

        let (status, original) = create_setting(
            &server,
            &admin,
            json!({"user_id": user_id, "telegram_chatid": "111", "allow_telegram": "yes"}),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(original["telegram_chatid"], "111");

        let (status, body) = create_setting(
            &server,
            &admin,
            json!({"user_id": user_id, "telegram_chatid": "222", "allow_telegram": true}),
        )
        .await;
        assert_eq!(status, 409);
        assert_eq!(body["code"], "conflict");

        let pref = server
            .store
            .get_preference_for_user(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pref.telegram_chat_id, "111");

        let (status, _) = create_setting(&server, &admin, json!({"user_id": 9999})).await;
        assert_eq!(status, 400);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn letter_permissions_over_http() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let admin = server.login("admin@mail.com", "admin123").await;
        let (user_id, user) = server.account(Role::User, "Ann", "ann@mail.com").await;
        let (_, reviewer) = server.account(Role::Reviewer, "Rex", "rex@mail.com").await;
        let type_id = create_letter_type(&server, &admin, "Recommendation").await;

        // Users cannot file on someone else's behalf.
        let (status, letter) = server
            .send(
                reqwest::Method::POST,
                "/api/letters",
                Some(&user),
                Some(json!({"user_id": 1, "type_id": type_id})),
            )
            .await;
        assert_eq!(status, 201);
        assert_eq!(letter["user_id"], user_id);
        assert_eq!(letter["status"], "pending");
        assert_eq!(letter["user"]["role"]["name"], "user");
        assert_eq!(letter["letter_type"]["name"], "Recommendation");
        let path = format!("/api/letters/{}", letter["id"]);

        let (status, _) = server
            .send(
                reqwest::Method::POST,
                "/api/letters",
                Some(&reviewer),
                Some(json!({"type_id": type_id})),
            )
            .await;
        assert_eq!(status, 403);

        let (status, _) = server
            .send(
                reqwest::Method::PUT,
                &path,
                Some(&user),
                Some(json!({"status": "accepted"})),
            )
            .await;
        assert_eq!(status, 403);

        let (status, body) = server
            .send(
                reqwest::Method::PUT,
                &path,
                Some(&reviewer),
                Some(json!({"status": "rejected"})),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "validation_error");

        let (status, _) = server
            .send(
                reqwest::Method::PUT,
                "/api/letters/9999",
                Some(&reviewer),
                Some(json!({"status": "accepted"})),
            )
            .await;
        assert_eq!(status, 404);

        let (status, _) = server
            .send(reqwest::Method::DELETE, &path, Some(&reviewer), None)
            .await;
        assert_eq!(status, 403);
        let (status, _) = server
            .send(reqwest::Method::DELETE, &path, Some(&admin), None)
            .await;
        assert_eq!(status, 200);
        let (status, _) = server
            .send(reqwest::Method::GET, &path, Some(&user), None)
            .await;
        assert_eq!(status, 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn new_letter_notifies_reviewer_once_per_enabled_channel() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let admin = server.login("admin@mail.com", "admin123").await;
        let (reviewer_id, _) = server.account(Role::Reviewer, "Rex", "rex@mail.com").await;
        let (quiet_id, _) = server.account(Role::Reviewer, "Quinn", "quinn@mail.com").await;
        let (_, user) = server.account(Role::User, "Ann", "ann@mail.com").await;
        let type_id = create_letter_type(&server, &admin, "Recommendation").await;

        let (status, _) = create_setting(
            &server,
            &admin,
            json!({
                "user_id": reviewer_id,
                "telegram_chatid": "-100200",
                "allow_telegram": "yes",
                "wa_number": "6281234567890",
                "allow_wa": "no"
            }),
        )
        .await;
        assert_eq!(status, 201);
        // Flag on but no address: effectively disabled.
        let (status, _) = create_setting(
            &server,
            &admin,
            json!({"user_id": quiet_id, "allow_telegram": true, "allow_wa": true}),
        )
        .await;
        assert_eq!(status, 201);

        let (status, _) = server
            .send(
                reqwest::Method::POST,
                "/api/letters",
                Some(&user),
                Some(json!({"type_id": type_id})),
            )
            .await;
        assert_eq!(status, 201);

        eventually(|| !server.telegram.sent().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            server.telegram.sent(),
            vec![(
                "-100200".to_string(),
                "📩 New letter request from *Ann* for letter type *Recommendation* (status: pending)."
                    .to_string()
            )]
        );
        assert!(server.whatsapp.sent().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejection_notifies_requester_with_reason() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let admin = server.login("admin@mail.com", "admin123").await;
        let (_, reviewer) = server.account(Role::Reviewer, "Rex", "rex@mail.com").await;
        let (user_id, user) = server.account(Role::User, "Ann", "ann@mail.com").await;
        let type_id = create_letter_type(&server, &admin, "Transcript").await;

        let (status, _) = create_setting(
            &server,
            &admin,
            json!({"user_id": user_id, "wa_number": "6281234567890", "allow_wa": true}),
        )
        .await;
        assert_eq!(status, 201);

        let (_, letter) = server
            .send(
                reqwest::Method::POST,
                "/api/letters",
                Some(&user),
                Some(json!({"type_id": type_id})),
            )
            .await;
        let path = format!("/api/letters/{}", letter["id"]);

        let (status, body) = server
            .send(
                reqwest::Method::PUT,
                &path,
                Some(&reviewer),
                Some(json!({"status": "rejected", "reject_reason": "missing stamp"})),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["reject_reason"], "missing stamp");

        eventually(|| !server.whatsapp.sent().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            server.whatsapp.sent(),
            vec![(
                "6281234567890".to_string(),
                "📢 Your letter (Transcript) is now: *rejected*.\nReason: missing stamp"
                    .to_string()
            )]
        );
        assert!(server.telegram.sent().is_empty());

        let (_, body) = server
            .send(
                reqwest::Method::PUT,
                &path,
                Some(&reviewer),
                Some(json!({"status": "accepted"})),
            )
            .await;
        assert_eq!(body["reject_reason"], "");
    })
    .await
    .expect("test timed out");
}
