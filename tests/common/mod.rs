//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::net::TcpListener;
use toxic_philosopher::clock::ManualClock;
use toxic_philosopher::data::{JsonFileStore, Stores};
use toxic_philosopher::error::Result as AppResult;
use toxic_philosopher::verify::VisionClient;
use toxic_philosopher::{AppState, config};

pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

/// Smallest valid PNG header; the vision client is scripted so the pixels
/// never matter.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

/// Vision client that answers every prompt with a canned reply
#[derive(Default)]
pub struct ScriptedVision {
    reply: Mutex<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedVision {
    pub fn set_reply(&self, reply: impl Into<String>) {
        *self.reply.lock().unwrap() = reply.into();
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn describe(&self, _image: &[u8], _mime_type: &str, prompt: &str) -> AppResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.lock().unwrap().clone())
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub vision: Arc<ScriptedVision>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance with a scripted vision client
    pub async fn new() -> Self {
        Self::start(true).await
    }

    /// Test server with no vision API configured
    pub async fn without_vision() -> Self {
        Self::start(false).await
    }

    async fn start(with_vision: bool) -> Self {
        toxic_philosopher::metrics::init_metrics();

        // Create temporary directory for the JSON store and screenshots
        let temp_dir = TempDir::new().unwrap();

        let config = test_config(&temp_dir);

        // 2026-10-18 12:00 at UTC+8
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 4, 0, 0).unwrap(),
        ));
        let vision = Arc::new(ScriptedVision::default());

        let store = Arc::new(JsonFileStore::open(&config.storage.data_dir).await.unwrap());
        let state = AppState::from_parts(
            config,
            Stores::from_backend(store),
            clock.clone(),
            with_vision.then(|| vision.clone() as Arc<dyn VisionClient>),
        )
        .await
        .unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = toxic_philosopher::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            clock,
            vision,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST /api/apply-code with a PNG screenshot
    pub async fn apply(
        &self,
        user_name: &str,
        extracted_name: &str,
        comment: &str,
        comment_time: Option<&str>,
    ) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new()
            .text("userName", user_name.to_string())
            .text("extractedName", extracted_name.to_string())
            .text("comment", comment.to_string())
            .part("screenshot", png_part());
        if let Some(time) = comment_time {
            form = form.text("commentTime", time.to_string());
        }

        self.client
            .post(self.url("/api/apply-code"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// POST /api/verify-code
    pub async fn verify_code(&self, code: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/verify-code"))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .unwrap()
    }

    /// Log in as admin and return the session token
    pub async fn admin_token(&self) -> String {
        let response = self
            .client
            .post(self.url("/api/admin/login"))
            .json(&serde_json::json!({ "password": ADMIN_PASSWORD }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }
}

pub fn png_part() -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(PNG_BYTES.to_vec())
        .file_name("comment.png")
        .mime_str("image/png")
        .unwrap()
}

fn test_config(temp_dir: &TempDir) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            public_url: "http://localhost:3000".to_string(),
            trust_forwarded_for: false,
        },
        storage: config::StorageConfig {
            backend: config::StorageBackend::Json,
            data_dir: temp_dir.path().join("data"),
            screenshot_dir: temp_dir.path().join("screenshots"),
            redis_url: None,
            redis_max_connections: 1,
        },
        access: config::AccessConfig {
            code_prefix: "PHIL2024".to_string(),
            min_comment_chars: 10,
            max_comment_age_days: 2,
            timezone_offset_hours: 8,
            link_secret: None,
        },
        rate_limit: config::RateLimitConfig {
            apply_max_requests: 3,
            apply_window_seconds: 3600,
            sweep_interval_seconds: 3600,
            max_tracked_clients: 1000,
        },
        upload: config::UploadConfig {
            max_screenshot_bytes: 1024 * 1024,
        },
        vision: config::VisionConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9/v1".to_string(),
            model: "test-model".to_string(),
            max_tokens: 500,
            timeout_seconds: 5,
        },
        admin: config::AdminConfig {
            password: ADMIN_PASSWORD.to_string(),
            session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
            session_max_age: 3600,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}
