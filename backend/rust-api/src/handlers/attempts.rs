use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::{
    collect_answers, AutoSaveRequest, AutoSaveResponse, Provenance, SessionStatus,
    StartAttemptRequest, StartAttemptResponse, StatusQuery, StatusResponse, SubmissionResult,
    SubmitAttemptRequest, SubmitAttemptResponse,
};
use crate::services::error::EngineError;
use crate::services::AppState;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Completed {
        status: SessionStatus,
        result: Box<SubmissionResult>,
    },
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotAvailable(_) => ApiError::Forbidden(err.to_string()),
            EngineError::QuizNotFound(_) | EngineError::SessionNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            EngineError::AlreadyCompleted { status, result } => {
                ApiError::Completed { status, result }
            }
            EngineError::SessionNotActive => ApiError::Conflict(err.to_string()),
            EngineError::Contention(_) => ApiError::Unavailable(err.to_string()),
            EngineError::GradingFailure(_) | EngineError::Store(_) => {
                tracing::error!("Attempt request failed: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Completed { status, result } => {
                let body = json!({
                    "message": "Attempt already completed",
                    "status": status,
                    "result": result,
                });
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// POST /api/v1/attempts/start
pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<StartAttemptRequest>,
) -> Result<Json<StartAttemptResponse>, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let started = state.engine.start(&req.quiz_id, &claims.sub).await?;

    Ok(Json(StartAttemptResponse {
        status: started.session.status,
        remaining_seconds: started.remaining_seconds,
        duration_seconds: started.session.duration_seconds,
        started_at: started.session.started_at,
        resumed: started.resumed,
        answers: started.resumed.then_some(started.session.answers),
    }))
}

/// POST /api/v1/attempts/auto-save
pub async fn auto_save(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<AutoSaveRequest>,
) -> Result<Json<AutoSaveResponse>, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let version = state
        .engine
        .autosave(&req.quiz_id, &claims.sub, collect_answers(req.answers))
        .await?;

    Ok(Json(AutoSaveResponse { ok: true, version }))
}

/// GET /api/v1/attempts/status?quiz_id=..&client_remaining_seconds=..
pub async fn attempt_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    query
        .validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let view = state
        .engine
        .status(&query.quiz_id, &claims.sub, query.client_remaining_seconds)
        .await?;

    if view.resync {
        tracing::debug!(
            "Client clock drift for {}:{}: client={:?}, server={}",
            query.quiz_id,
            claims.sub,
            query.client_remaining_seconds,
            view.remaining_seconds
        );
    }

    Ok(Json(StatusResponse {
        status: view.status,
        remaining_seconds: view.remaining_seconds,
        duration_seconds: view.duration_seconds,
        answers: view.answers,
        result: view.result,
        resync: view.resync,
    }))
}

/// POST /api/v1/attempts/submit
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<SubmitAttemptRequest>,
) -> Result<Json<SubmitAttemptResponse>, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let provenance = Provenance::from_auto_flag(req.is_auto_submit);
    let (status, result) = state
        .engine
        .submit(
            &req.quiz_id,
            &claims.sub,
            req.answers.map(collect_answers),
            provenance,
        )
        .await?;

    Ok(Json(SubmitAttemptResponse { status, result }))
}
