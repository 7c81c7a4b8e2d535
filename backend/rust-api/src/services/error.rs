use thiserror::Error;

use crate::models::{SessionStatus, SubmissionResult};
use crate::services::grading::GradingError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Quiz {0} is not available")]
    NotAvailable(String),
    #[error("Quiz {0} not found")]
    QuizNotFound(String),
    #[error("No session for quiz {quiz_id} and student {student_id}")]
    SessionNotFound { quiz_id: String, student_id: String },
    /// Start on a finished attempt; carries the existing result.
    #[error("Session already completed")]
    AlreadyCompleted {
        status: SessionStatus,
        result: Box<SubmissionResult>,
    },
    #[error("Session is not active")]
    SessionNotActive,
    #[error("Grading failed: {0}")]
    GradingFailure(#[from] GradingError),
    #[error("Submission still contended after {0} attempts")]
    Contention(usize),
    #[error("Storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}
