use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{Answers, GradeReport, Session, SessionKey, SessionStatus};

pub enum CreateOutcome {
    Created(Session),
    Existing(Session),
}

pub enum AutosaveOutcome {
    Saved { version: u64 },
    NotActive(SessionStatus),
    NotFound,
}

/// Everything the arbiter writes when it wins the transition.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: SessionStatus,
    pub submitted_at: DateTime<Utc>,
    pub answers: Answers,
    pub report: GradeReport,
    /// Set when `answers` were read from the store; the write is refused if an
    /// autosave landed in between.
    pub expected_version: Option<u64>,
}

impl Completion {
    pub fn apply_to(&self, session: &mut Session) {
        session.status = self.status;
        session.submitted_at = Some(self.submitted_at);
        session.is_auto_submit = self.status == SessionStatus::AutoSubmitted;
        session.answers = self.answers.clone();
        session.score = Some(self.report.total_score);
        session.max_score = Some(self.report.max_score);
        session.breakdown = self.report.questions.clone();
    }
}

pub enum CompletionOutcome {
    Won(Session),
    AlreadyCompleted(Session),
    VersionMismatch,
    NotFound,
}

/// Durable storage of one session per (quiz, student).
///
/// Every mutating method is a single atomic operation on the backend; callers
/// never read-then-write to change status.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>>;

    async fn create_if_absent(&self, session: Session) -> Result<CreateOutcome>;

    /// Replaces the answer map, only while the session is in progress.
    async fn replace_answers(&self, key: &SessionKey, answers: &Answers) -> Result<AutosaveOutcome>;

    /// Compare-and-swap from `in_progress` to a completed status.
    async fn complete_if_in_progress(
        &self,
        key: &SessionKey,
        completion: Completion,
    ) -> Result<CompletionOutcome>;
}

/// Embedded single-process store; the mutex makes each operation atomic.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn create_if_absent(&self, session: Session) -> Result<CreateOutcome> {
        let mut sessions = self.sessions.lock().await;
        let key = session.key();
        if let Some(existing) = sessions.get(&key) {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        sessions.insert(key, session.clone());
        Ok(CreateOutcome::Created(session))
    }

    async fn replace_answers(&self, key: &SessionKey, answers: &Answers) -> Result<AutosaveOutcome> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(key) else {
            return Ok(AutosaveOutcome::NotFound);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(AutosaveOutcome::NotActive(session.status));
        }
        session.answers = answers.clone();
        session.answers_version += 1;
        Ok(AutosaveOutcome::Saved {
            version: session.answers_version,
        })
    }

    async fn complete_if_in_progress(
        &self,
        key: &SessionKey,
        completion: Completion,
    ) -> Result<CompletionOutcome> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(key) else {
            return Ok(CompletionOutcome::NotFound);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(CompletionOutcome::AlreadyCompleted(session.clone()));
        }
        if let Some(expected) = completion.expected_version {
            if expected != session.answers_version {
                return Ok(CompletionOutcome::VersionMismatch);
            }
        }
        completion.apply_to(session);
        Ok(CompletionOutcome::Won(session.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerValue;

    fn key() -> SessionKey {
        SessionKey::new("quiz-1", "student-1")
    }

    fn completion(status: SessionStatus, expected_version: Option<u64>) -> Completion {
        Completion {
            status,
            submitted_at: Utc::now(),
            answers: Answers::new(),
            report: GradeReport {
                total_score: 1.0,
                max_score: 2.0,
                questions: vec![],
            },
            expected_version,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = MemorySessionStore::new();
        let first = Session::begin(&key(), Utc::now(), 600);
        let started_at = first.started_at;

        assert!(matches!(
            store.create_if_absent(first).await.unwrap(),
            CreateOutcome::Created(_)
        ));

        let second = Session::begin(&key(), started_at + chrono::Duration::seconds(5), 600);
        match store.create_if_absent(second).await.unwrap() {
            CreateOutcome::Existing(existing) => assert_eq!(existing.started_at, started_at),
            CreateOutcome::Created(_) => panic!("second create must not overwrite"),
        }
    }

    #[tokio::test]
    async fn autosave_bumps_version_until_completed() {
        let store = MemorySessionStore::new();
        store
            .create_if_absent(Session::begin(&key(), Utc::now(), 600))
            .await
            .unwrap();

        let mut answers = Answers::new();
        answers.insert("q1".to_string(), AnswerValue::Choice("a".to_string()));

        assert!(matches!(
            store.replace_answers(&key(), &answers).await.unwrap(),
            AutosaveOutcome::Saved { version: 1 }
        ));

        store
            .complete_if_in_progress(&key(), completion(SessionStatus::Submitted, None))
            .await
            .unwrap();

        assert!(matches!(
            store.replace_answers(&key(), &answers).await.unwrap(),
            AutosaveOutcome::NotActive(SessionStatus::Submitted)
        ));
        assert!(matches!(
            store
                .replace_answers(&SessionKey::new("other", "x"), &answers)
                .await
                .unwrap(),
            AutosaveOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn completion_is_compare_and_swap() {
        let store = MemorySessionStore::new();
        store
            .create_if_absent(Session::begin(&key(), Utc::now(), 600))
            .await
            .unwrap();

        let stale = store
            .complete_if_in_progress(&key(), completion(SessionStatus::AutoSubmitted, Some(7)))
            .await
            .unwrap();
        assert!(matches!(stale, CompletionOutcome::VersionMismatch));

        let won = store
            .complete_if_in_progress(&key(), completion(SessionStatus::AutoSubmitted, Some(0)))
            .await
            .unwrap();
        let CompletionOutcome::Won(session) = won else {
            panic!("first completion must win");
        };
        assert!(session.is_auto_submit);
        assert_eq!(session.score, Some(1.0));

        let lost = store
            .complete_if_in_progress(&key(), completion(SessionStatus::Submitted, None))
            .await
            .unwrap();
        let CompletionOutcome::AlreadyCompleted(existing) = lost else {
            panic!("second completion must lose");
        };
        assert_eq!(existing.status, SessionStatus::AutoSubmitted);
    }
}
