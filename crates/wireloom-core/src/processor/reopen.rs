//! Reopen helper (component J): exponential backoff with tremble detection,
//! one instance embedded per processor [`Object`] (§4.5).

use std::time::{Duration, Instant};

/// What happened that might warrant scheduling a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenTrigger {
    OpeningFailed,
    ActiveToError,
    /// A clean, non-error close/shutdown. Always reopens immediately with
    /// `count` reset, per §4.5 "Closed without error".
    ClosedCleanly,
}

#[derive(Debug, Clone, Copy)]
pub struct ReopenPolicy {
    pub timeout_min: Duration,
    pub timeout_max: Duration,
    pub tremble_min: Duration,
    /// Whether a clean, user-initiated close within `tremble_min` of Active
    /// should also count as "unstable" and trigger backoff. The source
    /// behavior here is ambiguous (Design Notes, Open Questions); default is
    /// `false` — only an Error-triggered close within the tremble window is
    /// treated as unstable.
    pub tremble_on_clean_close: bool,
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        ReopenPolicy {
            timeout_min: Duration::from_millis(100),
            timeout_max: Duration::from_secs(1),
            tremble_min: Duration::from_secs(5),
            tremble_on_clean_close: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReopenState {
    policy: ReopenPolicy,
    count: u32,
    next_ts: Option<Instant>,
    active_ts: Option<Instant>,
}

impl ReopenState {
    pub fn new(policy: ReopenPolicy) -> Self {
        ReopenState {
            policy,
            count: 0,
            next_ts: None,
            active_ts: None,
        }
    }

    pub fn record_active(&mut self, now: Instant) {
        self.active_ts = Some(now);
    }

    pub fn next_ts(&self) -> Option<Instant> {
        self.next_ts
    }

    pub fn clear_schedule(&mut self) {
        self.next_ts = None;
    }

    /// Schedules the next attempt per §4.5's reopen table, returning the
    /// computed timeout so callers can log it.
    pub fn schedule(&mut self, trigger: ReopenTrigger, now: Instant) -> Duration {
        let unstable_start = matches!(trigger, ReopenTrigger::OpeningFailed)
            || self.within_tremble(now, trigger);

        let timeout = if matches!(trigger, ReopenTrigger::ClosedCleanly) {
            self.count = 0;
            Duration::ZERO
        } else if unstable_start {
            self.count += 1;
            let scaled = self.policy.timeout_min.saturating_mul(1u32 << (self.count - 1).min(30));
            scaled.min(self.policy.timeout_max)
        } else {
            // Active past the tremble window, then failed: immediate retry,
            // reset count (§4.5 "Active->Error after tremble_min").
            self.count = 0;
            Duration::ZERO
        };

        self.next_ts = Some(now + timeout);
        timeout
    }

    fn within_tremble(&self, now: Instant, trigger: ReopenTrigger) -> bool {
        let applies = match trigger {
            ReopenTrigger::ActiveToError => true,
            ReopenTrigger::ClosedCleanly => self.policy.tremble_on_clean_close,
            ReopenTrigger::OpeningFailed => return true,
        };
        if !applies {
            return false;
        }
        match self.active_ts {
            Some(ts) => now.duration_since(ts) < self.policy.tremble_min,
            None => true,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_matches_min_times_two_pow_capped_at_max() {
        let policy = ReopenPolicy {
            timeout_min: Duration::from_millis(100),
            timeout_max: Duration::from_secs(1),
            tremble_min: Duration::from_secs(5),
            tremble_on_clean_close: false,
        };
        let mut state = ReopenState::new(policy);
        let now = Instant::now();
        let expected = [100, 200, 400, 800, 1000, 1000, 1000];
        for &ms in &expected {
            let timeout = state.schedule(ReopenTrigger::OpeningFailed, now);
            assert_eq!(timeout.as_millis() as u64, ms);
        }
    }

    #[test]
    fn sustained_active_resets_count_on_next_failure() {
        let policy = ReopenPolicy {
            timeout_min: Duration::from_millis(100),
            timeout_max: Duration::from_secs(1),
            tremble_min: Duration::from_millis(50),
            tremble_on_clean_close: false,
        };
        let mut state = ReopenState::new(policy);
        let t0 = Instant::now();
        state.schedule(ReopenTrigger::OpeningFailed, t0);
        state.schedule(ReopenTrigger::OpeningFailed, t0);
        assert_eq!(state.count(), 2);

        let active_at = t0 + Duration::from_millis(10);
        state.record_active(active_at);
        let well_past_tremble = active_at + Duration::from_millis(200);
        let timeout = state.schedule(ReopenTrigger::ActiveToError, well_past_tremble);
        assert_eq!(timeout, Duration::ZERO);
        assert_eq!(state.count(), 0);
    }

    #[test]
    fn error_within_tremble_window_is_treated_as_unstable() {
        let policy = ReopenPolicy {
            timeout_min: Duration::from_millis(100),
            timeout_max: Duration::from_secs(1),
            tremble_min: Duration::from_secs(5),
            tremble_on_clean_close: false,
        };
        let mut state = ReopenState::new(policy);
        let t0 = Instant::now();
        state.record_active(t0);
        let soon = t0 + Duration::from_millis(10);
        let timeout = state.schedule(ReopenTrigger::ActiveToError, soon);
        assert_eq!(timeout.as_millis(), 100);
    }

    #[test]
    fn clean_close_reopens_immediately_with_count_reset() {
        let mut state = ReopenState::new(ReopenPolicy::default());
        state.schedule(ReopenTrigger::OpeningFailed, Instant::now());
        let timeout = state.schedule(ReopenTrigger::ClosedCleanly, Instant::now());
        assert_eq!(timeout, Duration::ZERO);
        assert_eq!(state.count(), 0);
    }
}
