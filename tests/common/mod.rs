// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use mock_exam::{
    config::{Config, ModuleDurations},
    exam::proctor::ProctorConfig,
    models::exam_code::ExamCode,
    repository::{ExamRepository, MemoryRepository},
    routes,
    state::AppState,
    utils::hash::hash_password,
};
use serde_json::{Value, json};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const FINGERPRINT: &str = "fp-browser-0001";

pub struct TestApp {
    pub address: String,
    pub repo: Arc<MemoryRepository>,
    pub client: reqwest::Client,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        session_token_ttl: 600,
        rust_log: "error".to_string(),
        port: 0,
        admin_email: None,
        admin_password: None,
        proctoring: ProctorConfig::default(),
        module_durations: ModuleDurations::default(),
    }
}

/// Spawns the app on a random port, backed by the in-memory repository.
pub async fn spawn_app() -> TestApp {
    let repo = Arc::new(MemoryRepository::new());
    let state = AppState::new(repo.clone(), test_config());
    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        repo,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Issues an active exam code straight through the repository.
    pub async fn seed_code(&self, code: &str, user_id: Option<i64>) {
        self.repo
            .insert_exam_code(ExamCode {
                code: code.to_string(),
                candidate_name: "Test Candidate".to_string(),
                contact_phone: Some("0912000000".to_string()),
                national_id: Some("1234567890".to_string()),
                listening_set: 1,
                reading_set: 2,
                writing_set: 3,
                user_id,
                is_active: true,
                created_at: None,
            })
            .await
            .expect("Failed to seed exam code");
    }

    pub async fn seed_user(&self, email: &str, password: &str, role: &str) -> i64 {
        let hash = hash_password(password).unwrap();
        self.repo.create_user(email, &hash, role).await.unwrap().id
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let res = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to login");
        assert_eq!(res.status().as_u16(), 200);
        let body: Value = res.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.seed_user(ADMIN_EMAIL, ADMIN_PASSWORD, "admin").await;
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Starts the exam for `code` from `fingerprint`; returns the raw response.
    pub async fn start(&self, code: &str, fingerprint: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/exam/start"))
            .json(&json!({
                "code": code,
                "candidate": {
                    "name": "Test Candidate",
                    "contact_phone": "0912000000",
                    "national_id": "1234567890"
                },
                "fingerprint": fingerprint
            }))
            .send()
            .await
            .expect("Failed to start exam")
    }

    /// Starts the exam and returns the session token.
    pub async fn start_token(&self, code: &str) -> String {
        let res = self.start(code, FINGERPRINT).await;
        assert_eq!(res.status().as_u16(), 201);
        let body: Value = res.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    pub fn session_post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .header("x-exam-fingerprint", FINGERPRINT)
    }

    pub fn session_get(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .header("x-exam-fingerprint", FINGERPRINT)
    }

    pub async fn complete(&self, token: &str, module: &str, score: Value) -> reqwest::Response {
        self.session_post(&format!("/api/exam/session/modules/{}/complete", module), token)
            .json(&score)
            .send()
            .await
            .expect("Failed to complete module")
    }

    pub async fn enter(&self, token: &str, module: &str) -> reqwest::Response {
        self.session_post(&format!("/api/exam/session/modules/{}/enter", module), token)
            .send()
            .await
            .expect("Failed to enter module")
    }

    /// Walks a session through all three modules.
    pub async fn finish_modules(&self, token: &str) {
        for (module, score) in [
            ("listening", json!({"type": "objective", "raw_score": 30, "total_possible": 40})),
            ("reading", json!({"type": "objective", "raw_score": 30, "total_possible": 40})),
            ("writing", json!({"type": "writing", "task1_words": 180, "task2_words": 300})),
        ] {
            assert_eq!(self.enter(token, module).await.status().as_u16(), 200);
            assert_eq!(self.complete(token, module, score).await.status().as_u16(), 200);
        }
    }
}
