use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use clock::ClockAuthority;
use lifecycle::SessionLifecycle;
use quiz_catalog::{MongoQuizCatalog, QuizCatalog};
use redis_store::RedisSessionStore;
use session_store::{MemorySessionStore, SessionStore};
use submission_sink::{MongoSubmissionSink, SubmissionSink};

pub mod arbiter;
pub mod autosave;
pub mod clock;
pub mod error;
pub mod grading;
pub mod lifecycle;
pub mod quiz_catalog;
pub mod redis_store;
pub mod session_store;
pub mod submission_sink;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<SessionLifecycle>,
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let (store, redis): (Arc<dyn SessionStore>, Option<ConnectionManager>) =
            match config.store_backend {
                StoreBackend::Redis => {
                    let redis = connect_redis(&config.redis_uri).await?;
                    (Arc::new(RedisSessionStore::new(redis.clone())), Some(redis))
                }
                StoreBackend::Memory => {
                    tracing::warn!(
                        "Using in-memory session store; sessions are lost on restart and not shared between instances"
                    );
                    (Arc::new(MemorySessionStore::new()), None)
                }
            };

        let catalog: Arc<dyn QuizCatalog> = Arc::new(MongoQuizCatalog::new(mongo.clone()));
        let sink: Arc<dyn SubmissionSink> = Arc::new(MongoSubmissionSink::new(mongo.clone()));
        let clock = Arc::new(ClockAuthority::system(config.drift_threshold_seconds));

        let engine = Arc::new(SessionLifecycle::new(
            catalog,
            store,
            sink,
            clock,
            config.max_arbiter_retries,
        ));

        Ok(Self {
            config,
            engine,
            mongo: Some(mongo),
            redis,
        })
    }

    /// Assembles state from ready-made parts, without any network backends.
    pub fn from_parts(config: Config, engine: Arc<SessionLifecycle>) -> Self {
        Self {
            config,
            engine,
            mongo: None,
            redis: None,
        }
    }
}

async fn connect_redis(redis_uri: &str) -> anyhow::Result<ConnectionManager> {
    let redis_client = redis::Client::open(redis_uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(redis_client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
