use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Question id -> submitted value. Ordered so that persisted snapshots are stable.
pub type Answers = BTreeMap<String, AnswerValue>;

/// What a client sends for a single question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Yes/no shorthand, `true` is `yes`.
    Flag(bool),
    Choice(String),
    Choices(Vec<String>),
}

impl AnswerValue {
    /// Option ids the value selects.
    pub fn selected_ids(&self) -> Vec<String> {
        match self {
            AnswerValue::Flag(true) => vec!["yes".to_string()],
            AnswerValue::Flag(false) => vec!["no".to_string()],
            AnswerValue::Choice(id) if id.trim().is_empty() => Vec::new(),
            AnswerValue::Choice(id) => vec![id.clone()],
            AnswerValue::Choices(ids) => ids
                .iter()
                .filter(|id| !id.trim().is_empty())
                .cloned()
                .collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.selected_ids().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnswerEntry {
    #[validate(length(min = 1, max = 128, message = "question_id must not be empty"))]
    pub question_id: String,
    pub answer: AnswerValue,
}

/// Folds the wire list into a map; a repeated question keeps its last value.
pub fn collect_answers(entries: Vec<AnswerEntry>) -> Answers {
    entries
        .into_iter()
        .map(|entry| (entry.question_id, entry.answer))
        .collect()
}

/// Who forced the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Explicit,
    Auto,
}

impl Provenance {
    pub fn from_auto_flag(is_auto_submit: bool) -> Self {
        if is_auto_submit {
            Provenance::Auto
        } else {
            Provenance::Explicit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Explicit => "explicit",
            Provenance::Auto => "auto",
        }
    }
}
