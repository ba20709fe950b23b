use std::time::Duration;
use tokio::time::Instant;

/// Gate that admits at most one attempt per `spacing`.
#[derive(Debug, Clone)]
pub struct Backoff {
    spacing: Duration,
    last: Option<Instant>,
}

impl Backoff {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: None,
        }
    }

    /// True if an attempt may be made at `now`; records the attempt if so.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.spacing => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
