use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SessionStatus, SubmissionResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

/// Server-computed countdown; clients correct their local timer against it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub quiz_id: String,
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub total_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub quiz_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    pub message: String,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_serializes_with_kebab_case_tag() {
        let event = TimerEvent::TimerTick(TimerTick {
            quiz_id: "quiz-1".to_string(),
            remaining_seconds: 42,
            elapsed_seconds: 18,
            total_seconds: 60,
            timestamp: Utc::now(),
        });

        let json: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["type"], "timer-tick");
        assert_eq!(json["remaining_seconds"], 42);
        assert_eq!(event.event_name(), "timer-tick");
    }
}
