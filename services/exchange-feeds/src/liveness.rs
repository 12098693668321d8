//! Connection liveness supervision
//!
//! Pure bookkeeping for the two session timers: the heartbeat emitter and
//! the liveness watchdog. The driver owns the actual `tokio::time::Interval`s
//! and calls into the session on each tick; this module only decides what a
//! tick means. `tokio::time::Instant` is used so paused-clock tests can
//! advance time deterministically.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Timer settings for one exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessPolicy {
    /// How often to send a ping. `None` when the exchange pings us.
    pub ping_interval: Option<Duration>,
    /// How often to check for staleness. `None` disables the watchdog.
    pub watchdog_interval: Option<Duration>,
    /// Maximum silence tolerated before the connection is force-closed.
    pub deadline: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            ping_interval: Some(Duration::from_secs(20)),
            watchdog_interval: Some(Duration::from_secs(60)),
            deadline: Duration::from_secs(60),
        }
    }
}

impl LivenessPolicy {
    /// Policy with both timers disabled.
    pub fn disabled() -> Self {
        Self {
            ping_interval: None,
            watchdog_interval: None,
            deadline: Duration::from_secs(60),
        }
    }
}

/// Outcome of a watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// A liveness signal arrived within the deadline.
    Alive,
    /// The deadline was exceeded. Reported exactly once per start.
    TimedOut { elapsed: Duration },
    /// Supervisor is stopped or the watchdog is disabled.
    Inactive,
}

/// Tracks the last liveness signal of one connection.
#[derive(Debug, Clone)]
pub struct LivenessSupervisor {
    policy: LivenessPolicy,
    last_seen: Option<Instant>,
    active: bool,
}

impl LivenessSupervisor {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            policy,
            last_seen: None,
            active: false,
        }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Arm the supervisor when the connection opens.
    pub fn start(&mut self, now: Instant) {
        self.active = true;
        self.last_seen = Some(now);
    }

    /// Record a liveness signal.
    pub fn touch(&mut self, now: Instant) {
        if self.active {
            self.last_seen = Some(now);
        }
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a heartbeat tick should produce a ping.
    pub fn heartbeat_due(&self) -> bool {
        self.active && self.policy.ping_interval.is_some()
    }

    /// Evaluate a watchdog tick. A timeout disarms the supervisor.
    pub fn check(&mut self, now: Instant) -> LivenessVerdict {
        if !self.active || self.policy.watchdog_interval.is_none() {
            return LivenessVerdict::Inactive;
        }
        let Some(last_seen) = self.last_seen else {
            return LivenessVerdict::Inactive;
        };
        let elapsed = now.saturating_duration_since(last_seen);
        if elapsed > self.policy.deadline {
            self.active = false;
            LivenessVerdict::TimedOut { elapsed }
        } else {
            LivenessVerdict::Alive
        }
    }

    /// Disarm both timers. Idempotent.
    pub fn stop(&mut self) {
        self.active = false;
    }
}
