use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::handlers::attempts::ApiError;
use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::middlewares::auth::JwtClaims;
use crate::models::timer::{TimeExpired, TimerEvent, TimerTick};
use crate::models::SessionStatus;
use crate::services::clock::remaining_seconds;
use crate::services::AppState;

/// SSE endpoint for timer events
/// GET /api/v1/attempts/{quiz_id}/stream
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.engine.status(&quiz_id, &claims.sub, None).await?;

    let started_at = match (view.status, view.started_at) {
        (SessionStatus::NotStarted, _) | (_, None) => {
            return Err(ApiError::NotFound(format!(
                "No attempt started for quiz {}",
                quiz_id
            )));
        }
        (_, Some(started_at)) => started_at,
    };

    let phase = if view.status == SessionStatus::InProgress {
        Phase::Ticking
    } else {
        Phase::Expiring
    };
    let tick_interval = Duration::from_millis(state.config.tick_interval_ms.max(1));

    tracing::info!(
        "Client connected to timer stream: quiz={}, student={}, remaining={}s, tick_interval={:?}",
        quiz_id,
        claims.sub,
        view.remaining_seconds,
        tick_interval
    );

    let timer = TimerStream {
        state,
        quiz_id,
        student_id: claims.sub,
        started_at,
        total_seconds: view.duration_seconds,
        tick_interval,
        phase,
        first_tick: true,
        _connection: ConnectionGuard::open(),
    };

    Ok(Sse::new(timer_events(timer)).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ticking,
    Expiring,
    Done,
}

struct TimerStream {
    state: Arc<AppState>,
    quiz_id: String,
    student_id: String,
    started_at: DateTime<Utc>,
    total_seconds: u64,
    tick_interval: Duration,
    phase: Phase,
    first_tick: bool,
    _connection: ConnectionGuard,
}

struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

/// Ticks until the server-side remaining time reaches zero, then forces the
/// deadline transition through `status` and emits one `time-expired` event.
fn timer_events(timer: TimerStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(timer, |mut timer| async move {
        match timer.phase {
            Phase::Done => None,
            Phase::Expiring => {
                let event = expired_event(&timer).await;
                timer.phase = Phase::Done;
                Some((Ok(to_sse(&event)), timer))
            }
            Phase::Ticking => {
                if !timer.first_tick {
                    sleep(timer.tick_interval).await;
                }
                timer.first_tick = false;

                let now = timer.state.engine.clock().now();
                let remaining = remaining_seconds(timer.started_at, timer.total_seconds, now);
                if remaining == 0 {
                    let event = expired_event(&timer).await;
                    timer.phase = Phase::Done;
                    return Some((Ok(to_sse(&event)), timer));
                }

                let tick = TimerEvent::TimerTick(TimerTick {
                    quiz_id: timer.quiz_id.clone(),
                    remaining_seconds: remaining,
                    elapsed_seconds: timer.total_seconds.saturating_sub(remaining),
                    total_seconds: timer.total_seconds,
                    timestamp: now,
                });
                Some((Ok(to_sse(&tick)), timer))
            }
        }
    })
}

async fn expired_event(timer: &TimerStream) -> TimerEvent {
    let engine = &timer.state.engine;
    let timestamp = engine.clock().now();

    let (status, result, message) = match engine
        .status(&timer.quiz_id, &timer.student_id, None)
        .await
    {
        Ok(view) => (view.status, view.result, "Time limit reached".to_string()),
        Err(e) => {
            tracing::error!(
                "Failed to settle expired attempt {}:{}: {}",
                timer.quiz_id,
                timer.student_id,
                e
            );
            (
                SessionStatus::InProgress,
                None,
                "Time limit reached; result pending".to_string(),
            )
        }
    };

    tracing::info!(
        "Timer expired: quiz={}, student={}, status={}",
        timer.quiz_id,
        timer.student_id,
        status.as_str()
    );

    TimerEvent::TimeExpired(TimeExpired {
        quiz_id: timer.quiz_id.clone(),
        timestamp,
        status,
        result,
        message,
    })
}

fn to_sse(event: &TimerEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.to_sse_data())
}
