use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quiz as published by the content side. The engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub duration_minutes: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_marks: f64,
    #[serde(default)]
    pub is_published: bool,
}

impl QuizDefinition {
    /// Length of an attempt, frozen into the session when it starts.
    pub fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }

    /// Quiz accepts new attempts: published and inside `[start_date, end_date]`.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.is_published && self.start_date <= now && now <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub marks: f64,
    #[serde(default)]
    pub options: Vec<QuizOption>,
}

impl Question {
    pub fn correct_option_ids(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    YesNo,
}

/// Answer option. Yes/no questions use the ids `yes` and `no`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizOption {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub is_correct: bool,
}
