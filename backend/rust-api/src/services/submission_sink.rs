use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ReplaceOptions;
use mongodb::Database;
use tokio::sync::Mutex;

use crate::metrics::track_db_operation;
use crate::models::SubmissionRecord;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Downstream consumer of completed sessions (reporting, gradebook sync).
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn record(&self, record: &SubmissionRecord) -> Result<()>;
}

pub struct MongoSubmissionSink {
    mongo: Database,
}

impl MongoSubmissionSink {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl SubmissionSink for MongoSubmissionSink {
    // Upsert keyed by quiz:student so a replayed record cannot duplicate.
    async fn record(&self, record: &SubmissionRecord) -> Result<()> {
        let collection = self
            .mongo
            .collection::<SubmissionRecord>("quiz_submissions");

        track_db_operation("replace_one", "quiz_submissions", async {
            retry_async_with_config(
                "submission record upsert",
                RetryConfig::aggressive(),
                || async {
                    collection
                        .replace_one(doc! { "_id": &record.id }, record)
                        .with_options(ReplaceOptions::builder().upsert(true).build())
                        .await
                        .map(|_| ())
                },
            )
            .await
            .map_err(|e: mongodb::error::Error| anyhow::anyhow!(e))
        })
        .await?;

        tracing::info!(
            "Submission record stored: quiz={}, student={}, score={}/{}",
            record.quiz_id,
            record.student_id,
            record.total_score,
            record.max_score
        );
        Ok(())
    }
}

/// Keeps records in memory; the test and local backend.
#[derive(Default)]
pub struct InMemorySubmissionSink {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl InMemorySubmissionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl SubmissionSink for InMemorySubmissionSink {
    async fn record(&self, record: &SubmissionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.retain(|existing| existing.id != record.id);
        records.push(record.clone());
        Ok(())
    }
}
