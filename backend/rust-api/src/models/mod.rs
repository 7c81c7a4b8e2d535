use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

pub mod answer;
pub mod quiz;
pub mod submission;
pub mod timer;

pub use answer::{collect_answers, AnswerEntry, AnswerValue, Answers, Provenance};
pub use quiz::{Question, QuestionType, QuizDefinition, QuizOption};
pub use submission::{GradeReport, QuestionScore, SubmissionRecord, SubmissionResult};

/// Identity of an attempt. A student has at most one session per quiz, ever.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub quiz_id: String,
    pub student_id: String,
}

impl SessionKey {
    pub fn new(quiz_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            quiz_id: quiz_id.into(),
            student_id: student_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.quiz_id, self.student_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Submitted,
    AutoSubmitted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
            SessionStatus::AutoSubmitted => "auto_submitted",
        }
    }

    /// Both submission spellings are the same terminal state.
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionStatus::Submitted | SessionStatus::AutoSubmitted)
    }

    pub fn completed_by(provenance: Provenance) -> Self {
        match provenance {
            Provenance::Explicit => SessionStatus::Submitted,
            Provenance::Auto => SessionStatus::AutoSubmitted,
        }
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(SessionStatus::NotStarted),
            "in_progress" => Ok(SessionStatus::InProgress),
            "submitted" => Ok(SessionStatus::Submitted),
            "auto_submitted" => Ok(SessionStatus::AutoSubmitted),
            other => Err(anyhow::anyhow!("Unknown session status: {}", other)),
        }
    }
}

/// Stored attempt. Rows only exist once started, so `started_at` is always set;
/// the completion fields are populated together by the arbiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub quiz_id: String,
    pub student_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub answers: Answers,
    pub answers_version: u64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_auto_submit: bool,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    #[serde(default)]
    pub breakdown: Vec<QuestionScore>,
}

impl Session {
    pub fn begin(key: &SessionKey, started_at: DateTime<Utc>, duration_seconds: u64) -> Self {
        Self {
            quiz_id: key.quiz_id.clone(),
            student_id: key.student_id.clone(),
            status: SessionStatus::InProgress,
            started_at,
            duration_seconds,
            answers: Answers::new(),
            answers_version: 0,
            submitted_at: None,
            is_auto_submit: false,
            score: None,
            max_score: None,
            breakdown: Vec::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.quiz_id.clone(), self.student_id.clone())
    }

    /// Result summary, present once the session is completed.
    pub fn result(&self) -> Option<SubmissionResult> {
        if !self.status.is_completed() {
            return None;
        }
        let submitted_at = self.submitted_at?;
        let total_score = self.score?;
        let max_score = self.max_score?;

        Some(SubmissionResult {
            total_score,
            max_score,
            percentage: percentage(total_score, max_score),
            time_taken_seconds: (submitted_at - self.started_at).num_seconds().max(0) as u64,
            is_auto_submit: self.is_auto_submit,
            submitted_at,
            breakdown: self.breakdown.clone(),
        })
    }
}

pub fn percentage(score: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    ((score / max_score) * 10000.0).round() / 100.0
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(length(min = 1, max = 128, message = "quiz_id must not be empty"))]
    pub quiz_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub status: SessionStatus,
    pub remaining_seconds: u64,
    pub duration_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Answers>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AutoSaveRequest {
    #[validate(length(min = 1, max = 128, message = "quiz_id must not be empty"))]
    pub quiz_id: String,
    #[validate(nested)]
    pub answers: Vec<AnswerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoSaveResponse {
    pub ok: bool,
    pub version: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusQuery {
    #[validate(length(min = 1, max = 128, message = "quiz_id must not be empty"))]
    pub quiz_id: String,
    pub client_remaining_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    pub remaining_seconds: u64,
    pub duration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Answers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    /// Client countdown drifted past the threshold and should adopt `remaining_seconds`.
    pub resync: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1, max = 128, message = "quiz_id must not be empty"))]
    pub quiz_id: String,
    #[validate(nested)]
    pub answers: Option<Vec<AnswerEntry>>,
    #[serde(default)]
    pub is_auto_submit: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub status: SessionStatus,
    pub result: SubmissionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            SessionStatus::NotStarted,
            SessionStatus::InProgress,
            SessionStatus::Submitted,
            SessionStatus::AutoSubmitted,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("graded".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn only_submission_states_are_completed() {
        assert!(!SessionStatus::InProgress.is_completed());
        assert!(SessionStatus::completed_by(Provenance::Auto).is_completed());
        assert_eq!(
            SessionStatus::completed_by(Provenance::Explicit),
            SessionStatus::Submitted
        );
    }

    #[test]
    fn in_progress_session_has_no_result() {
        let key = SessionKey::new("quiz-1", "student-1");
        let session = Session::begin(&key, Utc::now(), 600);
        assert!(session.result().is_none());
        assert_eq!(session.key(), key);
        assert_eq!(session.duration_seconds, 600);
    }

    #[test]
    fn time_taken_comes_from_server_timestamps() {
        let key = SessionKey::new("quiz-1", "student-1");
        let started = Utc::now();
        let mut session = Session::begin(&key, started, 600);
        session.status = SessionStatus::Submitted;
        session.submitted_at = Some(started + chrono::Duration::seconds(540));
        session.score = Some(3.0);
        session.max_score = Some(4.0);

        let result = session.result().unwrap();
        assert_eq!(result.time_taken_seconds, 540);
        assert_eq!(result.percentage, 75.0);
        assert!(!result.is_auto_submit);
    }

    #[test]
    fn percentage_handles_empty_quiz() {
        assert_eq!(percentage(0.0, 0.0), 0.0);
        assert_eq!(percentage(1.0, 3.0), 33.33);
    }
}
