#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use proctor_api::{
    config::Config,
    create_router,
    models::{Question, QuestionError},
    services::{question_bank::QuestionBank, AppState},
    utils::clock::ManualClock,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Bank whose correct answer is always the first option, so tests can answer
/// deliberately.
pub struct FirstOptionBank;

impl QuestionBank for FirstOptionBank {
    fn generate(&self, skills: &[String], count: usize) -> Result<Vec<Question>, QuestionError> {
        if count == 0 {
            return Err(QuestionError::InvalidCount(count));
        }
        let topic = skills.first().cloned().unwrap_or_else(|| "general".to_string());
        (0..count)
            .map(|i| {
                Question::new(
                    format!("{} question {}", topic, i + 1),
                    vec!["right".into(), "wrong".into(), "worse".into(), "worst".into()],
                    0,
                )
            })
            .collect()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: ManualClock,
}

pub const COMPLETED_TTL_SECS: u64 = 30;

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.clock.tick_interval_ms = 20;
    config.monitor.poll_interval_ms = 50;
    config.retention.completed_ttl_secs = COMPLETED_TTL_SECS;
    config
}

pub fn create_test_app() -> TestApp {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let clock = ManualClock::default();
    let state = Arc::new(AppState::with_parts(
        test_config(),
        Arc::new(clock.clone()),
        Arc::new(FirstOptionBank),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        clock,
    }
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, json)
    }

    pub async fn create_assessment(&self, skills: &[&str]) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/assessments",
                Some(serde_json::json!({ "skills": skills })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "body: {}", body);
        body["session_id"].as_str().unwrap().to_string()
    }

    pub async fn start(&self, id: &str) -> Value {
        let (status, body) = self
            .send("POST", &format!("/api/v1/assessments/{}/start", id), None)
            .await;
        assert_eq!(status, StatusCode::OK, "body: {}", body);
        body
    }

    /// Polls the view until `check` accepts it or two seconds pass. Run under
    /// paused time so the sleeps advance the clock instantly.
    pub async fn wait_for_view(&self, id: &str, check: impl Fn(&Value) -> bool) -> Value {
        let uri = format!("/api/v1/assessments/{}", id);
        for _ in 0..100 {
            let (_, view) = self.send("GET", &uri, None).await;
            if check(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("view never reached the expected state");
    }
}
