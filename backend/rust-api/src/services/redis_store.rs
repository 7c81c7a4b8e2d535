use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metrics::track_store_operation;
use crate::models::{Answers, QuestionScore, Session, SessionKey, SessionStatus};
use crate::services::session_store::{
    AutosaveOutcome, Completion, CompletionOutcome, CreateOutcome, SessionStore,
};

// Each session is one hash. Status and answers_version are separate fields so
// the Lua guards can compare them without decoding JSON.
const FIELD_STATUS: &str = "status";
const FIELD_STARTED_AT: &str = "started_at";
const FIELD_DURATION: &str = "duration_seconds";
const FIELD_ANSWERS: &str = "answers";
const FIELD_VERSION: &str = "answers_version";
const FIELD_OUTCOME: &str = "outcome";

const CREATE_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('HSET', KEYS[1],
        'status', ARGV[1],
        'started_at', ARGV[2],
        'duration_seconds', ARGV[3],
        'answers', ARGV[4],
        'answers_version', 0)
    return 1
"#;

const AUTOSAVE_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return {'not_found', ''}
    end
    if status ~= 'in_progress' then
        return {'not_active', status}
    end
    redis.call('HSET', KEYS[1], 'answers', ARGV[1])
    local version = redis.call('HINCRBY', KEYS[1], 'answers_version', 1)
    return {'saved', tostring(version)}
"#;

const COMPLETE_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return {'not_found', ''}
    end
    if status ~= 'in_progress' then
        return {'completed', status}
    end
    if ARGV[4] ~= '' and redis.call('HGET', KEYS[1], 'answers_version') ~= ARGV[4] then
        return {'version_mismatch', ''}
    end
    redis.call('HSET', KEYS[1],
        'status', ARGV[1],
        'answers', ARGV[2],
        'outcome', ARGV[3])
    return {'won', ARGV[1]}
"#;

#[derive(Debug, Serialize, Deserialize)]
struct StoredOutcome {
    submitted_at: DateTime<Utc>,
    is_auto_submit: bool,
    score: f64,
    max_score: f64,
    breakdown: Vec<QuestionScore>,
}

pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn redis_key(key: &SessionKey) -> String {
        format!("assessment:session:{}:{}", key.quiz_id, key.student_id)
    }

    async fn load_existing(&self, key: &SessionKey) -> Result<Session> {
        self.load(key)
            .await?
            .ok_or_else(|| anyhow!("Session {} vanished after a guarded write", key))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        let mut conn = self.redis.clone();
        let redis_key = Self::redis_key(key);

        let fields: HashMap<String, String> = track_store_operation("hgetall", async {
            redis::cmd("HGETALL")
                .arg(&redis_key)
                .query_async(&mut conn)
                .await
                .context("Failed to load session from Redis")
        })
        .await?;

        session_from_fields(key, &fields)
    }

    async fn create_if_absent(&self, session: Session) -> Result<CreateOutcome> {
        let mut conn = self.redis.clone();
        let key = session.key();
        let redis_key = Self::redis_key(&key);
        let answers_json =
            serde_json::to_string(&session.answers).context("Failed to serialize answers")?;

        let created: i64 = track_store_operation("create", async {
            redis::Script::new(CREATE_SCRIPT)
                .key(&redis_key)
                .arg(session.status.as_str())
                .arg(session.started_at.to_rfc3339())
                .arg(session.duration_seconds)
                .arg(&answers_json)
                .invoke_async(&mut conn)
                .await
                .context("Failed to execute session create Lua script")
        })
        .await?;

        if created == 1 {
            Ok(CreateOutcome::Created(session))
        } else {
            Ok(CreateOutcome::Existing(self.load_existing(&key).await?))
        }
    }

    async fn replace_answers(&self, key: &SessionKey, answers: &Answers) -> Result<AutosaveOutcome> {
        let mut conn = self.redis.clone();
        let redis_key = Self::redis_key(key);
        let answers_json = serde_json::to_string(answers).context("Failed to serialize answers")?;

        let (outcome, detail): (String, String) = track_store_operation("autosave", async {
            redis::Script::new(AUTOSAVE_SCRIPT)
                .key(&redis_key)
                .arg(&answers_json)
                .invoke_async(&mut conn)
                .await
                .context("Failed to execute autosave Lua script")
        })
        .await?;

        match outcome.as_str() {
            "saved" => Ok(AutosaveOutcome::Saved {
                version: detail.parse().context("Invalid answers_version")?,
            }),
            "not_active" => Ok(AutosaveOutcome::NotActive(detail.parse()?)),
            "not_found" => Ok(AutosaveOutcome::NotFound),
            other => Err(anyhow!("Unexpected autosave script reply: {}", other)),
        }
    }

    async fn complete_if_in_progress(
        &self,
        key: &SessionKey,
        completion: Completion,
    ) -> Result<CompletionOutcome> {
        let mut conn = self.redis.clone();
        let redis_key = Self::redis_key(key);

        let answers_json =
            serde_json::to_string(&completion.answers).context("Failed to serialize answers")?;
        let outcome_json = serde_json::to_string(&StoredOutcome {
            submitted_at: completion.submitted_at,
            is_auto_submit: completion.status == SessionStatus::AutoSubmitted,
            score: completion.report.total_score,
            max_score: completion.report.max_score,
            breakdown: completion.report.questions.clone(),
        })
        .context("Failed to serialize outcome")?;
        let expected_version = completion
            .expected_version
            .map(|v| v.to_string())
            .unwrap_or_default();

        let (outcome, _detail): (String, String) = track_store_operation("complete", async {
            redis::Script::new(COMPLETE_SCRIPT)
                .key(&redis_key)
                .arg(completion.status.as_str())
                .arg(&answers_json)
                .arg(&outcome_json)
                .arg(&expected_version)
                .invoke_async(&mut conn)
                .await
                .context("Failed to execute completion Lua script")
        })
        .await?;

        match outcome.as_str() {
            "won" => Ok(CompletionOutcome::Won(self.load_existing(key).await?)),
            "completed" => Ok(CompletionOutcome::AlreadyCompleted(
                self.load_existing(key).await?,
            )),
            "version_mismatch" => Ok(CompletionOutcome::VersionMismatch),
            "not_found" => Ok(CompletionOutcome::NotFound),
            other => Err(anyhow!("Unexpected completion script reply: {}", other)),
        }
    }
}

fn session_from_fields(key: &SessionKey, fields: &HashMap<String, String>) -> Result<Option<Session>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| anyhow!("Session {} is missing field {}", key, name))
    };

    let status: SessionStatus = field(FIELD_STATUS)?.parse()?;
    let started_at = DateTime::parse_from_rfc3339(field(FIELD_STARTED_AT)?)
        .context("Invalid started_at")?
        .with_timezone(&Utc);
    let duration_seconds = field(FIELD_DURATION)?
        .parse()
        .context("Invalid duration_seconds")?;
    let answers: Answers =
        serde_json::from_str(field(FIELD_ANSWERS)?).context("Failed to deserialize answers")?;
    let answers_version = match fields.get(FIELD_VERSION) {
        Some(raw) => raw.parse().context("Invalid answers_version")?,
        None => 0,
    };

    let mut session = Session::begin(key, started_at, duration_seconds);
    session.status = status;
    session.answers = answers;
    session.answers_version = answers_version;

    if let Some(raw) = fields.get(FIELD_OUTCOME) {
        let outcome: StoredOutcome =
            serde_json::from_str(raw).context("Failed to deserialize outcome")?;
        session.submitted_at = Some(outcome.submitted_at);
        session.is_auto_submit = outcome.is_auto_submit;
        session.score = Some(outcome.score);
        session.max_score = Some(outcome.max_score);
        session.breakdown = outcome.breakdown;
    }

    Ok(Some(session))
}
