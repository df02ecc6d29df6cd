use std::time::Duration;

use tokio::time::Instant;

/// Shared backpressure for every pull trigger.
#[derive(Debug)]
pub struct Throttle {
    cooldown: Duration,
    in_flight: bool,
    cooling_until: Option<Instant>,
}

impl Throttle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            in_flight: false,
            cooling_until: None,
        }
    }

    /// Claim the pull slot, or return how long until it frees up.
    pub fn try_begin(&mut self, now: Instant) -> Result<(), Duration> {
        if self.in_flight {
            return Err(Duration::ZERO);
        }
        if let Some(remaining) = self.remaining(now) {
            return Err(remaining);
        }
        self.in_flight = true;
        Ok(())
    }

    /// Release the slot and start the cooldown.
    pub fn finish(&mut self, now: Instant) {
        self.in_flight = false;
        self.cooling_until = Some(now + self.cooldown);
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Cooldown left at `now`; `None` once it ran out. Ignores the in-flight
    /// flag.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.cooling_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}
