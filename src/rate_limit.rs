use std::time::Duration;
use tokio::time::Instant;

/// Cooldown gate for one job type, tripped when a provider reports rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cooldown: Duration,
    limited: bool,
    until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        RateLimiter {
            cooldown,
            limited: false,
            until: None,
        }
    }

    pub fn is_blocked(&mut self) -> bool {
        self.is_blocked_at(Instant::now())
    }

    /// True while `now` is before the end of the cooldown. Clears itself once
    /// the cooldown has passed.
    pub fn is_blocked_at(&mut self, now: Instant) -> bool {
        match self.until {
            Some(until) if self.limited && now < until => true,
            _ => {
                self.limited = false;
                self.until = None;
                false
            }
        }
    }

    pub fn trip(&mut self) {
        self.trip_at(Instant::now());
    }

    pub fn trip_at(&mut self, now: Instant) {
        self.limited = true;
        self.until = Some(now + self.cooldown);
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }
}
