use std::sync::Arc;

use crate::metrics::AUTOSAVES_TOTAL;
use crate::models::{Answers, SessionKey};
use crate::services::error::EngineError;
use crate::services::session_store::{AutosaveOutcome, SessionStore};

/// Persists the client's full in-progress answer set. Never touches status.
pub struct AutosaveService {
    store: Arc<dyn SessionStore>,
}

impl AutosaveService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Replaces the stored answers and returns the new answers version.
    pub async fn save(&self, key: &SessionKey, answers: Answers) -> Result<u64, EngineError> {
        match self.store.replace_answers(key, &answers).await? {
            AutosaveOutcome::Saved { version } => {
                AUTOSAVES_TOTAL.with_label_values(&["saved"]).inc();
                tracing::debug!(
                    "Autosaved {} answers for session {} (version {})",
                    answers.len(),
                    key,
                    version
                );
                Ok(version)
            }
            AutosaveOutcome::NotActive(status) => {
                AUTOSAVES_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::warn!(
                    "Autosave rejected for session {}: status is {}",
                    key,
                    status.as_str()
                );
                Err(EngineError::SessionNotActive)
            }
            AutosaveOutcome::NotFound => {
                AUTOSAVES_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::warn!("Autosave rejected for session {}: no session", key);
                Err(EngineError::SessionNotActive)
            }
        }
    }
}
