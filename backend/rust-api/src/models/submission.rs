use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Session, SessionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: String,
    pub score: f64,
    pub max_score: f64,
    pub answered: bool,
}

/// Output of the grading engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub total_score: f64,
    pub max_score: f64,
    pub questions: Vec<QuestionScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub time_taken_seconds: u64,
    pub is_auto_submit: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub breakdown: Vec<QuestionScore>,
}

/// Row handed to downstream reporting after a session completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub time_taken_seconds: u64,
    pub is_auto_submit: bool,
    pub breakdown: Vec<QuestionScore>,
}

impl SubmissionRecord {
    pub fn from_session(session: &Session) -> Option<Self> {
        let result = session.result()?;
        Some(Self {
            id: session.key().to_string(),
            quiz_id: session.quiz_id.clone(),
            student_id: session.student_id.clone(),
            status: session.status,
            started_at: session.started_at,
            submitted_at: result.submitted_at,
            total_score: result.total_score,
            max_score: result.max_score,
            percentage: result.percentage,
            time_taken_seconds: result.time_taken_seconds,
            is_auto_submit: result.is_auto_submit,
            breakdown: result.breakdown,
        })
    }
}
