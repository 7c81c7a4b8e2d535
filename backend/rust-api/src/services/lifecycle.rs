use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::{
    Answers, Provenance, QuizDefinition, Session, SessionKey, SessionStatus, SubmissionResult,
};
use crate::services::arbiter::SubmissionArbiter;
use crate::services::autosave::AutosaveService;
use crate::services::clock::ClockAuthority;
use crate::services::error::EngineError;
use crate::services::quiz_catalog::QuizCatalog;
use crate::services::session_store::{CreateOutcome, SessionStore};
use crate::services::submission_sink::SubmissionSink;

#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: Session,
    pub remaining_seconds: u64,
    pub resumed: bool,
}

#[derive(Debug, Clone)]
pub struct SessionView {
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub remaining_seconds: u64,
    pub duration_seconds: u64,
    pub answers: Option<Answers>,
    pub result: Option<SubmissionResult>,
    pub resync: bool,
}

/// Public entry point of the engine. The student id always comes from the
/// authenticated caller, so a session can only be touched by its owner.
pub struct SessionLifecycle {
    catalog: Arc<dyn QuizCatalog>,
    store: Arc<dyn SessionStore>,
    clock: Arc<ClockAuthority>,
    autosave: AutosaveService,
    arbiter: SubmissionArbiter,
}

impl SessionLifecycle {
    pub fn new(
        catalog: Arc<dyn QuizCatalog>,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn SubmissionSink>,
        clock: Arc<ClockAuthority>,
        max_arbiter_attempts: usize,
    ) -> Self {
        Self {
            autosave: AutosaveService::new(store.clone()),
            arbiter: SubmissionArbiter::new(
                store.clone(),
                sink,
                clock.clone(),
                max_arbiter_attempts,
            ),
            catalog,
            store,
            clock,
        }
    }

    pub fn clock(&self) -> &ClockAuthority {
        &self.clock
    }

    pub async fn start(&self, quiz_id: &str, student_id: &str) -> Result<StartedSession, EngineError> {
        let key = SessionKey::new(quiz_id, student_id);

        // Resume wins over the publish window: an attempt begun before
        // end_date stays reachable until it completes.
        if let Some(existing) = self.store.load(&key).await? {
            return self.resume(existing);
        }

        let quiz = self.quiz(quiz_id).await?;
        let now = self.clock.now();
        if !quiz.is_available_at(now) {
            tracing::warn!(
                "Start refused for session {}: quiz outside its publish window",
                key
            );
            return Err(EngineError::NotAvailable(quiz_id.to_string()));
        }

        let session = Session::begin(&key, now, quiz.duration_seconds());
        match self.store.create_if_absent(session).await? {
            CreateOutcome::Created(session) => {
                SESSIONS_TOTAL.with_label_values(&["started"]).inc();
                SESSIONS_ACTIVE.inc();
                tracing::info!(
                    "Session started: {} ({}s)",
                    key,
                    session.duration_seconds
                );
                Ok(StartedSession {
                    remaining_seconds: self.clock.remaining(&session),
                    session,
                    resumed: false,
                })
            }
            CreateOutcome::Existing(existing) => self.resume(existing),
        }
    }

    fn resume(&self, session: Session) -> Result<StartedSession, EngineError> {
        if let Some(result) = session.result() {
            return Err(EngineError::AlreadyCompleted {
                status: session.status,
                result: Box::new(result),
            });
        }

        SESSIONS_TOTAL.with_label_values(&["resumed"]).inc();
        tracing::info!(
            "Session resumed: {}:{}",
            session.quiz_id,
            session.student_id
        );
        Ok(StartedSession {
            remaining_seconds: self.clock.remaining(&session),
            session,
            resumed: true,
        })
    }

    /// Reports the session state. An in-progress session whose time is up is
    /// completed here with the last autosaved answers.
    pub async fn status(
        &self,
        quiz_id: &str,
        student_id: &str,
        client_remaining: Option<u64>,
    ) -> Result<SessionView, EngineError> {
        let key = SessionKey::new(quiz_id, student_id);

        let Some(mut session) = self.store.load(&key).await? else {
            let quiz = self.quiz(quiz_id).await?;
            return Ok(SessionView {
                status: SessionStatus::NotStarted,
                started_at: None,
                remaining_seconds: quiz.duration_seconds(),
                duration_seconds: quiz.duration_seconds(),
                answers: None,
                result: None,
                resync: false,
            });
        };

        if session.status == SessionStatus::InProgress && self.clock.is_expired(&session) {
            tracing::info!("Deadline passed for session {}, forcing submission", key);
            let quiz = self.quiz(quiz_id).await?;
            session = self
                .arbiter
                .submit(&quiz, &key, None, Provenance::Auto)
                .await?
                .session;
        }

        let remaining_seconds = if session.status == SessionStatus::InProgress {
            self.clock.remaining(&session)
        } else {
            0
        };
        let resync = client_remaining
            .map(|client| self.clock.needs_resync(client, remaining_seconds))
            .unwrap_or(false);

        Ok(SessionView {
            status: session.status,
            started_at: Some(session.started_at),
            remaining_seconds,
            duration_seconds: session.duration_seconds,
            result: session.result(),
            answers: Some(session.answers),
            resync,
        })
    }

    pub async fn autosave(
        &self,
        quiz_id: &str,
        student_id: &str,
        answers: Answers,
    ) -> Result<u64, EngineError> {
        self.autosave
            .save(&SessionKey::new(quiz_id, student_id), answers)
            .await
    }

    /// Submits and grades. A session someone else already completed yields
    /// its stored result rather than an error.
    pub async fn submit(
        &self,
        quiz_id: &str,
        student_id: &str,
        answers: Option<Answers>,
        provenance: Provenance,
    ) -> Result<(SessionStatus, SubmissionResult), EngineError> {
        let key = SessionKey::new(quiz_id, student_id);

        let existing = self
            .store
            .load(&key)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                quiz_id: quiz_id.to_string(),
                student_id: student_id.to_string(),
            })?;

        let session = if existing.status.is_completed() {
            // Covers a crash between the winning write and the sink publish.
            self.arbiter.republish(&existing).await;
            existing
        } else {
            let quiz = self.quiz(quiz_id).await?;
            self.arbiter
                .submit(&quiz, &key, answers, provenance)
                .await?
                .session
        };

        let result = session.result().ok_or_else(|| {
            EngineError::Store(anyhow::anyhow!(
                "Completed session {} has no stored result",
                key
            ))
        })?;
        Ok((session.status, result))
    }

    async fn quiz(&self, quiz_id: &str) -> Result<QuizDefinition, EngineError> {
        self.catalog
            .fetch_quiz(quiz_id)
            .await?
            .ok_or_else(|| EngineError::QuizNotFound(quiz_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerValue, Question, QuestionType, QuizOption};
    use crate::services::clock::{Clock, ManualClock};
    use crate::services::quiz_catalog::InMemoryQuizCatalog;
    use crate::services::session_store::MemorySessionStore;
    use crate::models::SubmissionRecord;
    use crate::services::submission_sink::InMemorySubmissionSink;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that rejects its first record, like a downstream outage right
    /// after the completion was stored.
    struct FlakySink {
        inner: InMemorySubmissionSink,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl SubmissionSink for FlakySink {
        async fn record(&self, record: &SubmissionRecord) -> anyhow::Result<()> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                anyhow::bail!("submission sink unavailable");
            }
            self.inner.record(record).await
        }
    }

    const QUIZ: &str = "quiz-1";
    const STUDENT: &str = "student-1";

    fn option(id: &str, is_correct: bool) -> QuizOption {
        QuizOption {
            id: id.to_string(),
            text: id.to_string(),
            is_correct,
        }
    }

    fn quiz(now: chrono::DateTime<Utc>) -> QuizDefinition {
        QuizDefinition {
            id: QUIZ.to_string(),
            title: "Ten minute quiz".to_string(),
            questions: vec![
                Question {
                    id: "m1".to_string(),
                    question_type: QuestionType::MultiChoice,
                    marks: 4.0,
                    options: vec![
                        option("a", true),
                        option("b", true),
                        option("c", false),
                    ],
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
            total_marks: 5.0,
            is_published: true,
        }
    }

    async fn engine() -> (SessionLifecycle, ManualClock, Arc<InMemoryQuizCatalog>) {
        let t0 = Utc::now();
        let clock = ManualClock::new(t0);
        let catalog = Arc::new(InMemoryQuizCatalog::new());
        catalog.insert(quiz(t0)).await;

        let engine = SessionLifecycle::new(
            catalog.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(InMemorySubmissionSink::new()),
            Arc::new(ClockAuthority::new(Arc::new(clock.clone()), 2)),
            5,
        );
        (engine, clock, catalog)
    }

    fn both_correct() -> Answers {
        let mut answers = Answers::new();
        answers.insert(
            "m1".to_string(),
            AnswerValue::Choices(vec!["a".to_string(), "b".to_string()]),
        );
        answers
    }

    #[tokio::test]
    async fn start_twice_returns_same_started_at() {
        let (engine, clock, _) = engine().await;

        let first = engine.start(QUIZ, STUDENT).await.unwrap();
        clock.advance(Duration::seconds(45));
        let second = engine.start(QUIZ, STUDENT).await.unwrap();

        assert!(!first.resumed);
        assert!(second.resumed);
        assert_eq!(first.session.started_at, second.session.started_at);
        assert_eq!(first.remaining_seconds, 600);
        assert_eq!(second.remaining_seconds, 555);
    }

    #[tokio::test]
    async fn start_outside_window_is_not_available() {
        let (engine, clock, _) = engine().await;
        clock.advance(Duration::hours(2));

        let err = engine.start(QUIZ, STUDENT).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAvailable(_)));
    }

    #[tokio::test]
    async fn start_unpublished_or_unknown_quiz_fails() {
        let (engine, clock, catalog) = engine().await;
        let mut draft = quiz(clock.now());
        draft.id = "draft".to_string();
        draft.is_published = false;
        catalog.insert(draft).await;

        assert!(matches!(
            engine.start("draft", STUDENT).await.unwrap_err(),
            EngineError::NotAvailable(_)
        ));
        assert!(matches!(
            engine.start("missing", STUDENT).await.unwrap_err(),
            EngineError::QuizNotFound(_)
        ));
    }

    #[tokio::test]
    async fn start_after_completion_reports_existing_result() {
        let (engine, _, _) = engine().await;
        engine.start(QUIZ, STUDENT).await.unwrap();
        engine
            .submit(QUIZ, STUDENT, Some(both_correct()), Provenance::Explicit)
            .await
            .unwrap();

        match engine.start(QUIZ, STUDENT).await.unwrap_err() {
            EngineError::AlreadyCompleted { status, result } => {
                assert_eq!(status, SessionStatus::Submitted);
                assert_eq!(result.total_score, 4.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abandoned_session_is_graded_by_late_poll() {
        let (engine, clock, _) = engine().await;
        engine.start(QUIZ, STUDENT).await.unwrap();

        clock.advance(Duration::minutes(2));
        engine.autosave(QUIZ, STUDENT, both_correct()).await.unwrap();

        clock.advance(Duration::minutes(9));
        let view = engine.status(QUIZ, STUDENT, None).await.unwrap();

        assert_eq!(view.status, SessionStatus::AutoSubmitted);
        assert_eq!(view.remaining_seconds, 0);
        let result = view.result.unwrap();
        assert!(result.is_auto_submit);
        assert_eq!(result.total_score, 4.0);
        assert_eq!(result.max_score, 5.0);
        assert_eq!(view.answers.unwrap(), both_correct());
    }

    #[tokio::test]
    async fn explicit_submit_then_late_poll_keeps_result() {
        let (engine, clock, _) = engine().await;
        engine.start(QUIZ, STUDENT).await.unwrap();

        clock.advance(Duration::minutes(9));
        let (status, submitted) = engine
            .submit(QUIZ, STUDENT, Some(both_correct()), Provenance::Explicit)
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Submitted);
        assert_eq!(submitted.time_taken_seconds, 540);

        clock.advance(Duration::minutes(2));
        let view = engine.status(QUIZ, STUDENT, None).await.unwrap();
        assert_eq!(view.status, SessionStatus::Submitted);
        assert_eq!(view.result.unwrap(), submitted);
    }

    #[tokio::test]
    async fn status_before_deadline_is_read_only() {
        let (engine, clock, _) = engine().await;
        engine.start(QUIZ, STUDENT).await.unwrap();
        clock.advance(Duration::seconds(100));

        let view = engine.status(QUIZ, STUDENT, Some(510)).await.unwrap();
        assert_eq!(view.status, SessionStatus::InProgress);
        assert_eq!(view.remaining_seconds, 500);
        assert!(view.result.is_none());
        assert!(view.resync);

        let close = engine.status(QUIZ, STUDENT, Some(501)).await.unwrap();
        assert!(!close.resync);
    }

    #[tokio::test]
    async fn status_without_session_is_not_started() {
        let (engine, _, _) = engine().await;
        let view = engine.status(QUIZ, STUDENT, None).await.unwrap();
        assert_eq!(view.status, SessionStatus::NotStarted);
        assert_eq!(view.remaining_seconds, 600);
    }

    #[tokio::test]
    async fn autosave_after_completion_is_rejected() {
        let (engine, _, _) = engine().await;
        assert!(matches!(
            engine.autosave(QUIZ, STUDENT, both_correct()).await.unwrap_err(),
            EngineError::SessionNotActive
        ));

        engine.start(QUIZ, STUDENT).await.unwrap();
        engine
            .submit(QUIZ, STUDENT, None, Provenance::Auto)
            .await
            .unwrap();

        assert!(matches!(
            engine.autosave(QUIZ, STUDENT, both_correct()).await.unwrap_err(),
            EngineError::SessionNotActive
        ));
    }

    #[tokio::test]
    async fn submit_without_session_is_not_found() {
        let (engine, _, _) = engine().await;
        let err = engine
            .submit(QUIZ, STUDENT, None, Provenance::Explicit)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn resubmit_republishes_a_lost_record() {
        let t0 = Utc::now();
        let catalog = Arc::new(InMemoryQuizCatalog::new());
        catalog.insert(quiz(t0)).await;
        let sink = Arc::new(FlakySink {
            inner: InMemorySubmissionSink::new(),
            failed_once: AtomicBool::new(false),
        });
        let engine = SessionLifecycle::new(
            catalog,
            Arc::new(MemorySessionStore::new()),
            sink.clone(),
            Arc::new(ClockAuthority::new(Arc::new(ManualClock::new(t0)), 2)),
            5,
        );

        engine.start(QUIZ, STUDENT).await.unwrap();
        let (_, first) = engine
            .submit(QUIZ, STUDENT, Some(both_correct()), Provenance::Explicit)
            .await
            .unwrap();
        assert!(sink.inner.records().await.is_empty());

        let (_, second) = engine
            .submit(QUIZ, STUDENT, None, Provenance::Explicit)
            .await
            .unwrap();
        assert_eq!(second, first);

        let records = sink.inner.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_score, 4.0);
    }
}
