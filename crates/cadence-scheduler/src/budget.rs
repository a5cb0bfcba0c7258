//! Invocation budget guard.

use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock deadline for one invocation.
///
/// Checked cooperatively at account boundaries; an in-flight publish is
/// always allowed to finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started + budget,
        }
    }

    /// Returns true once the budget has been used up.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time spent since the invocation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
