use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{GRADING_DURATION_SECONDS, SESSIONS_ACTIVE, SUBMISSIONS_TOTAL};
use crate::models::{Answers, Provenance, QuizDefinition, Session, SessionKey, SessionStatus, SubmissionRecord};
use crate::services::clock::ClockAuthority;
use crate::services::error::EngineError;
use crate::services::grading;
use crate::services::session_store::{Completion, CompletionOutcome, SessionStore};
use crate::services::submission_sink::SubmissionSink;

/// Outcome of an arbitration. `won` is true for the single caller whose
/// transition was applied; every other caller gets the stored terminal record.
#[derive(Debug, Clone)]
pub struct Settled {
    pub session: Session,
    pub won: bool,
}

/// Owns the `in_progress -> completed` transition.
///
/// The answers are graded first and the graded result is committed together
/// with the status change in one conditional store write, so a grading error
/// leaves the session untouched and no caller can observe a half-finished
/// completion.
pub struct SubmissionArbiter {
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn SubmissionSink>,
    clock: Arc<ClockAuthority>,
    max_attempts: usize,
}

impl SubmissionArbiter {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn SubmissionSink>,
        clock: Arc<ClockAuthority>,
        max_attempts: usize,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// `answers == None` grades whatever was last autosaved.
    pub async fn submit(
        &self,
        quiz: &QuizDefinition,
        key: &SessionKey,
        answers: Option<Answers>,
        provenance: Provenance,
    ) -> Result<Settled, EngineError> {
        for attempt in 1..=self.max_attempts {
            let current = self.load(key).await?;
            if current.status.is_completed() {
                return Ok(self.lost(current, provenance));
            }

            let (final_answers, expected_version) = match &answers {
                Some(submitted) => (submitted.clone(), None),
                None => (current.answers.clone(), Some(current.answers_version)),
            };

            let started = Instant::now();
            let graded = grading::grade(quiz, &final_answers);
            GRADING_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
            let report = graded.map_err(|e| {
                SUBMISSIONS_TOTAL
                    .with_label_values(&[provenance.as_str(), "grading_failed"])
                    .inc();
                tracing::error!("Grading failed for session {}: {}", key, e);
                e
            })?;

            let completion = Completion {
                status: SessionStatus::completed_by(provenance),
                submitted_at: self.clock.now(),
                answers: final_answers,
                report,
                expected_version,
            };

            match self.store.complete_if_in_progress(key, completion).await? {
                CompletionOutcome::Won(session) => {
                    SUBMISSIONS_TOTAL
                        .with_label_values(&[provenance.as_str(), "won"])
                        .inc();
                    SESSIONS_ACTIVE.dec();
                    tracing::info!(
                        "Session {} completed as {} with score {:?}/{:?}",
                        key,
                        session.status.as_str(),
                        session.score,
                        session.max_score
                    );
                    self.publish(&session).await;
                    return Ok(Settled { session, won: true });
                }
                CompletionOutcome::AlreadyCompleted(session) => {
                    return Ok(self.lost(session, provenance));
                }
                CompletionOutcome::VersionMismatch => {
                    tracing::debug!(
                        "Answers for session {} changed during grading (attempt {}), retrying",
                        key,
                        attempt
                    );
                }
                CompletionOutcome::NotFound => return Err(not_found(key)),
            }
        }

        tracing::warn!(
            "Session {} still contended after {} attempts",
            key,
            self.max_attempts
        );
        Err(EngineError::Contention(self.max_attempts))
    }

    async fn load(&self, key: &SessionKey) -> Result<Session, EngineError> {
        self.store.load(key).await?.ok_or_else(|| not_found(key))
    }

    fn lost(&self, session: Session, provenance: Provenance) -> Settled {
        SUBMISSIONS_TOTAL
            .with_label_values(&[provenance.as_str(), "already_completed"])
            .inc();
        tracing::debug!(
            "Submission ({}) for session {}:{} found it already {}",
            provenance.as_str(),
            session.quiz_id,
            session.student_id,
            session.status.as_str()
        );
        Settled {
            session,
            won: false,
        }
    }

    /// Pushes a completed session to the sink again. The sink upserts by
    /// session key, so repeating it is harmless.
    pub async fn republish(&self, session: &Session) {
        tracing::debug!(
            "Republishing submission record for {}:{}",
            session.quiz_id,
            session.student_id
        );
        self.publish(session).await;
    }

    // The completion is already durable; sink trouble is only logged.
    async fn publish(&self, session: &Session) {
        let Some(record) = SubmissionRecord::from_session(session) else {
            return;
        };
        if let Err(e) = self.sink.record(&record).await {
            tracing::error!("Failed to publish submission record {}: {:#}", record.id, e);
        }
    }
}

fn not_found(key: &SessionKey) -> EngineError {
    EngineError::SessionNotFound {
        quiz_id: key.quiz_id.clone(),
        student_id: key.student_id.clone(),
    }
}
