use std::time::Duration;
use tracing::{error, info};

/// Result of asking the policy for another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A retry is already armed
    AlreadyPending,
    Retry { attempt: u32, delay: Duration },
    /// Attempts used up; the counter has been reset
    Exhausted,
}

/// Bounded, fixed-delay retry bookkeeping.
///
/// At most one retry is pending at a time. A successful connect resets the
/// attempt counter.
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempt_count: u32,
    max_attempts: u32,
    delay: Duration,
    reconnecting: bool,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            delay,
            reconnecting: false,
        }
    }

    pub fn schedule(&mut self) -> ReconnectDecision {
        if self.reconnecting {
            return ReconnectDecision::AlreadyPending;
        }

        self.reconnecting = true;
        self.attempt_count += 1;

        if self.attempt_count <= self.max_attempts {
            info!(
                "Scheduling reconnection attempt {}/{} in {} ms",
                self.attempt_count,
                self.max_attempts,
                self.delay.as_millis()
            );
            return ReconnectDecision::Retry {
                attempt: self.attempt_count,
                delay: self.delay,
            };
        }

        error!("Max reconnection attempts ({}) reached", self.max_attempts);
        self.attempt_count = 0;
        self.reconnecting = false;
        ReconnectDecision::Exhausted
    }

    /// The armed retry has fired
    pub fn fire(&mut self) {
        self.reconnecting = false;
    }

    /// Drops a pending retry without touching the attempt counter
    pub fn cancel(&mut self) {
        self.reconnecting = false;
    }

    pub fn on_connected(&mut self) {
        self.attempt_count = 0;
        self.reconnecting = false;
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
