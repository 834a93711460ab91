//! # Time Gate
//!
//! Interval gate deciding whether an event is due. Used to space accepted GPS
//! fixes and to rate-limit the lock progress report.
//!
//! The stored timestamp moves only when the caller commits an acceptance, so
//! the gate does not drift when an event is rejected further down the line.

use std::time::Duration;

use tokio::time::Instant;

/// Last-accepted timestamp for one event stream
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeGate {
    last: Option<Instant>,
}

impl TimeGate {
    /// Gate that is due on first use
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Check the gate against the current time
    ///
    /// # Arguments
    ///
    /// * `interval` - Minimum spacing between accepted events
    /// * `commit` - Record `now` as the last acceptance when due
    ///
    /// # Returns
    ///
    /// `true` if at least `interval` has elapsed since the last commit, if
    /// nothing was ever committed, or if `interval` is zero
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use coldchain_tracker::gate::TimeGate;
    ///
    /// let mut gate = TimeGate::new();
    /// assert!(gate.is_due(Duration::from_secs(3), true));
    /// assert!(!gate.is_due(Duration::from_secs(3), true));
    /// assert!(gate.is_due(Duration::ZERO, false));
    /// ```
    pub fn is_due(&mut self, interval: Duration, commit: bool) -> bool {
        self.is_due_at(Instant::now(), interval, commit)
    }

    /// Same as [`is_due`](Self::is_due) with an explicit clock reading
    pub fn is_due_at(&mut self, now: Instant, interval: Duration, commit: bool) -> bool {
        let due = interval.is_zero()
            || match self.last {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= interval,
            };

        if due && commit {
            self.last = Some(now);
        }
        due
    }

    #[cfg(test)]
    fn last_accepted(&self) -> Option<Instant> {
        self.last
    }
}
