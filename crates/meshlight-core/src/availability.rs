//! Availability tracking with failure-threshold hysteresis
//!
//! A node starts out `Unknown`. A single successful contact marks it
//! `Online`; it only goes `Offline` after `threshold` consecutive failures,
//! so one lost poll does not make the node flap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observable availability of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// No contact attempted yet
    #[default]
    Unknown,
    /// Node is responding
    Online,
    /// Node missed `threshold` consecutive contacts
    Offline,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Consecutive-failure counter driving [`Availability`] transitions
#[derive(Debug, Clone)]
pub struct AvailabilityTracker {
    state: Availability,
    failures: u32,
    threshold: u32,
    last_success: Option<DateTime<Utc>>,
    last_transition: Option<DateTime<Utc>>,
}

impl AvailabilityTracker {
    /// Create a tracker; a threshold of 0 is raised to 1
    pub fn new(threshold: u32) -> Self {
        Self {
            state: Availability::Unknown,
            failures: 0,
            threshold: threshold.max(1),
            last_success: None,
            last_transition: None,
        }
    }

    pub fn state(&self) -> Availability {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_transition(&self) -> Option<DateTime<Utc>> {
        self.last_transition
    }

    /// Record a successful contact. Returns the new state if it changed.
    pub fn record_success(&mut self) -> Option<Availability> {
        let now = Utc::now();
        self.failures = 0;
        self.last_success = Some(now);
        if self.state != Availability::Online {
            self.state = Availability::Online;
            self.last_transition = Some(now);
            return Some(Availability::Online);
        }
        None
    }

    /// Record a failed contact. Returns the new state if it changed.
    pub fn record_failure(&mut self) -> Option<Availability> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.threshold && self.state != Availability::Offline {
            self.state = Availability::Offline;
            self.last_transition = Some(Utc::now());
            return Some(Availability::Offline);
        }
        None
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let tracker = AvailabilityTracker::new(3);
        assert_eq!(tracker.state(), Availability::Unknown);
        assert_eq!(tracker.failures(), 0);
        assert!(tracker.last_success().is_none());
    }

    #[test]
    fn test_threshold_floor() {
        assert_eq!(AvailabilityTracker::new(0).threshold(), 1);
    }

    #[test]
    fn test_offline_exactly_at_threshold() {
        let mut tracker = AvailabilityTracker::new(3);
        assert_eq!(tracker.record_failure(), None);
        assert_eq!(tracker.record_failure(), None);
        assert_eq!(tracker.record_failure(), Some(Availability::Offline));
        assert_eq!(tracker.state(), Availability::Offline);

        // Further failures do not transition again
        assert_eq!(tracker.record_failure(), None);
        assert_eq!(tracker.failures(), 4);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut tracker = AvailabilityTracker::new(3);
        tracker.record_failure();
        tracker.record_failure();
        assert_eq!(tracker.record_success(), Some(Availability::Online));
        assert_eq!(tracker.failures(), 0);

        assert_eq!(tracker.record_failure(), None);
        assert_eq!(tracker.record_failure(), None);
        assert_eq!(tracker.state(), Availability::Online);
        assert_eq!(tracker.record_failure(), Some(Availability::Offline));
    }

    #[test]
    fn test_success_only_transitions_once() {
        let mut tracker = AvailabilityTracker::new(1);
        assert_eq!(tracker.record_success(), Some(Availability::Online));
        assert_eq!(tracker.record_success(), None);
        assert!(tracker.last_success().is_some());
    }

    #[test]
    fn test_recover_from_offline() {
        let mut tracker = AvailabilityTracker::new(1);
        assert_eq!(tracker.record_failure(), Some(Availability::Offline));
        assert_eq!(tracker.record_success(), Some(Availability::Online));
        assert_eq!(tracker.record_failure(), Some(Availability::Offline));
    }
}
