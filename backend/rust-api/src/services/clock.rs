use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

use crate::models::Session;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and local simulations.
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(at)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Server-side authority for "now" and for how long a session has left.
///
/// `now()` never goes backwards within a process: the highest instant handed
/// out so far is remembered, so a wall-clock step back cannot make a
/// session's remaining time grow again.
pub struct ClockAuthority {
    source: Arc<dyn Clock>,
    high_water: Mutex<Option<DateTime<Utc>>>,
    drift_threshold_seconds: u64,
}

impl ClockAuthority {
    pub fn new(source: Arc<dyn Clock>, drift_threshold_seconds: u64) -> Self {
        Self {
            source,
            high_water: Mutex::new(None),
            drift_threshold_seconds,
        }
    }

    pub fn system(drift_threshold_seconds: u64) -> Self {
        Self::new(Arc::new(SystemClock), drift_threshold_seconds)
    }

    pub fn now(&self) -> DateTime<Utc> {
        let observed = self.source.now();
        let mut high_water = self.high_water.lock().unwrap_or_else(|p| p.into_inner());
        match *high_water {
            Some(previous) if previous > observed => previous,
            _ => {
                *high_water = Some(observed);
                observed
            }
        }
    }

    pub fn remaining(&self, session: &Session) -> u64 {
        remaining_seconds(session.started_at, session.duration_seconds, self.now())
    }

    pub fn is_expired(&self, session: &Session) -> bool {
        self.remaining(session) == 0
    }

    /// Client countdowns are hints only; past the threshold they must adopt ours.
    pub fn needs_resync(&self, client_remaining: u64, server_remaining: u64) -> bool {
        client_remaining.abs_diff(server_remaining) > self.drift_threshold_seconds
    }
}

/// `max(0, duration - (now - started_at))` in whole seconds.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration_seconds: u64, now: DateTime<Utc>) -> u64 {
    let elapsed = (now - started_at).num_seconds().max(0);
    (duration_seconds as i64).saturating_sub(elapsed).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionKey;

    fn authority(clock: &ManualClock) -> ClockAuthority {
        ClockAuthority::new(Arc::new(clock.clone()), 2)
    }

    #[test]
    fn remaining_counts_down_and_stops_at_zero() {
        let t0 = Utc::now();
        assert_eq!(remaining_seconds(t0, 600, t0), 600);
        assert_eq!(remaining_seconds(t0, 600, t0 + Duration::seconds(120)), 480);
        assert_eq!(remaining_seconds(t0, 600, t0 + Duration::seconds(600)), 0);
        assert_eq!(remaining_seconds(t0, 600, t0 + Duration::minutes(11)), 0);
    }

    #[test]
    fn clock_skew_before_start_does_not_add_time() {
        let t0 = Utc::now();
        assert_eq!(remaining_seconds(t0, 600, t0 - Duration::seconds(30)), 600);
    }

    #[test]
    fn remaining_is_monotonic_when_wall_clock_steps_back() {
        let t0 = Utc::now();
        let clock = ManualClock::new(t0);
        let authority = authority(&clock);
        let session = Session::begin(&SessionKey::new("q", "s"), t0, 600);

        clock.advance(Duration::seconds(100));
        let before = authority.remaining(&session);

        clock.set(t0 + Duration::seconds(40));
        let after = authority.remaining(&session);

        assert_eq!(before, 500);
        assert!(after <= before);
    }

    #[test]
    fn sub_millisecond_start_survives_a_step_back() {
        let t0 = DateTime::<Utc>::from_timestamp(1_700_000_000, 600_000_500).unwrap();
        let clock = ManualClock::new(t0);
        let authority = authority(&clock);
        let session = Session::begin(&SessionKey::new("q", "s"), authority.now(), 600);

        clock.advance(Duration::seconds(100));
        let before = authority.remaining(&session);

        clock.set(t0 + Duration::seconds(40));
        let after = authority.remaining(&session);

        assert_eq!(before, 500);
        assert_eq!(after, 500);
        assert_eq!(authority.now(), t0 + Duration::seconds(100));
    }

    #[test]
    fn remaining_never_increases_over_a_walk() {
        let t0 = Utc::now();
        let clock = ManualClock::new(t0);
        let authority = authority(&clock);
        let session = Session::begin(&SessionKey::new("q", "s"), t0, 90);

        let mut last = authority.remaining(&session);
        for step in [7, 0, 13, 30, 25, 40, 1] {
            clock.advance(Duration::seconds(step));
            let current = authority.remaining(&session);
            assert!(current <= last);
            last = current;
        }
        assert_eq!(last, 0);
        assert!(authority.is_expired(&session));
    }

    #[test]
    fn drift_beyond_threshold_requests_resync() {
        let authority = ClockAuthority::system(2);
        assert!(!authority.needs_resync(100, 100));
        assert!(!authority.needs_resync(102, 100));
        assert!(!authority.needs_resync(98, 100));
        assert!(authority.needs_resync(103, 100));
        assert!(authority.needs_resync(90, 100));
    }
}
