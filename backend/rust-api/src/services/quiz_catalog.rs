use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::Database;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::metrics::track_db_operation;
use crate::models::QuizDefinition;

/// Read-only access to quiz definitions owned by the content side.
#[async_trait]
pub trait QuizCatalog: Send + Sync {
    async fn fetch_quiz(&self, quiz_id: &str) -> Result<Option<QuizDefinition>>;
}

pub struct MongoQuizCatalog {
    mongo: Database,
}

impl MongoQuizCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl QuizCatalog for MongoQuizCatalog {
    async fn fetch_quiz(&self, quiz_id: &str) -> Result<Option<QuizDefinition>> {
        let collection = self.mongo.collection::<QuizDefinition>("quizzes");

        let quiz = track_db_operation("find_one", "quizzes", async {
            collection
                .find_one(doc! { "_id": quiz_id })
                .await
                .context("Failed to query quizzes collection")
        })
        .await?;

        if quiz.is_none() {
            tracing::debug!("Quiz {} not found in MongoDB", quiz_id);
        }
        Ok(quiz)
    }
}

#[derive(Default)]
pub struct InMemoryQuizCatalog {
    quizzes: RwLock<HashMap<String, QuizDefinition>>,
}

impl InMemoryQuizCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, quiz: QuizDefinition) {
        self.quizzes.write().await.insert(quiz.id.clone(), quiz);
    }
}

#[async_trait]
impl QuizCatalog for InMemoryQuizCatalog {
    async fn fetch_quiz(&self, quiz_id: &str) -> Result<Option<QuizDefinition>> {
        Ok(self.quizzes.read().await.get(quiz_id).cloned())
    }
}
