#![allow(dead_code)]

use assessment_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{Question, QuestionType, QuizDefinition, QuizOption},
    services::{
        clock::{ClockAuthority, ManualClock},
        lifecycle::SessionLifecycle,
        quiz_catalog::InMemoryQuizCatalog,
        session_store::MemorySessionStore,
        submission_sink::InMemorySubmissionSink,
        AppState,
    },
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const QUIZ_ID: &str = "quiz-algebra";
pub const DRAFT_QUIZ_ID: &str = "quiz-draft";

pub struct TestApp {
    pub router: Router,
    pub clock: ManualClock,
    pub sink: Arc<InMemorySubmissionSink>,
}

impl TestApp {
    pub async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let clock = ManualClock::new(Utc::now());
        let catalog = Arc::new(InMemoryQuizCatalog::new());
        catalog.insert(ten_minute_quiz(QUIZ_ID, true)).await;
        catalog.insert(ten_minute_quiz(DRAFT_QUIZ_ID, false)).await;

        let sink = Arc::new(InMemorySubmissionSink::new());
        let config = Config::for_memory_backend(JWT_SECRET);

        let engine = Arc::new(SessionLifecycle::new(
            catalog,
            Arc::new(MemorySessionStore::new()),
            sink.clone(),
            Arc::new(ClockAuthority::new(
                Arc::new(clock.clone()),
                config.drift_threshold_seconds,
            )),
            config.max_arbiter_retries,
        ));

        let router = create_router(Arc::new(AppState::from_parts(config, engine)));

        Self {
            router,
            clock,
            sink,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = builder
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn get_text(&self, uri: &str, token: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn student_token(student_id: &str) -> String {
    token_with_role(student_id, "student")
}

pub fn token_with_role(user_id: &str, role: &str) -> String {
    let mut claims = JwtClaims::for_student(user_id, 3600);
    claims.role = role.to_string();
    JwtService::new(JWT_SECRET).generate_token(&claims).unwrap()
}

fn option(id: &str, is_correct: bool) -> QuizOption {
    QuizOption {
        id: id.to_string(),
        text: id.to_uppercase(),
        is_correct,
    }
}

/// q1: single choice (2 marks), m1: multi choice (4 marks, a+b), yn: yes/no (1 mark).
pub fn ten_minute_quiz(id: &str, is_published: bool) -> QuizDefinition {
    let now = Utc::now();
    QuizDefinition {
        id: id.to_string(),
        title: "Algebra checkpoint".to_string(),
        questions: vec![
            Question {
                id: "q1".to_string(),
                question_type: QuestionType::SingleChoice,
                marks: 2.0,
                options: vec![option("a", true), option("b", false)],
            },
            Question {
                id: "m1".to_string(),
                question_type: QuestionType::MultiChoice,
                marks: 4.0,
                options: vec![option("a", true), option("b", true), option("c", false)],
            },
            Question {
                id: "yn".to_string(),
                question_type: QuestionType::YesNo,
                marks: 1.0,
                options: vec![option("yes", true), option("no", false)],
            },
        ],
        duration_minutes: 10,
        start_date: now - Duration::hours(1),
        end_date: now + Duration::hours(1),
        total_marks: 7.0,
        is_published,
    }
}
