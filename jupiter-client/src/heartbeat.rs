use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Consecutive stale ticks tolerated before the connection is declared dead
pub const MISS_THRESHOLD: u32 = 3;

/// What the engine should do after a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to send (not authenticated yet)
    Idle,
    SendPing,
    TimedOut,
}

/// Tracks server liveness while a connection is up
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_liveness: Instant,
    missed: u32,
    miss_threshold: u32,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            last_liveness: now,
            missed: 0,
            miss_threshold: MISS_THRESHOLD,
            timeout,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_liveness = now;
        self.missed = 0;
    }

    /// Any liveness-refreshing traffic from the server
    pub fn on_liveness(&mut self, now: Instant) {
        if self.missed > 0 {
            debug!("Liveness restored after {} missed interval(s)", self.missed);
        }
        self.reset(now);
    }

    /// Periodic check; pings are suppressed until the session is authenticated
    pub fn on_tick(&mut self, now: Instant, authenticated: bool) -> TickOutcome {
        if !authenticated {
            self.last_liveness = now;
            return TickOutcome::Idle;
        }

        let silence = now.saturating_duration_since(self.last_liveness);
        if silence > self.timeout {
            self.missed += 1;
            warn!(
                "No traffic from server for {} ms (missed {}/{})",
                silence.as_millis(),
                self.missed,
                self.miss_threshold
            );

            if self.missed >= self.miss_threshold {
                return TickOutcome::TimedOut;
            }
        }

        TickOutcome::SendPing
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn last_liveness(&self) -> Instant {
        self.last_liveness
    }
}
