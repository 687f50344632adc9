//! # Timers
//!
//! Deadline sources for timed waits and alt timeouts. A timer is anything
//! that can produce a deadline instant and answer whether it has expired;
//! the three shapes cover one-shot relative, periodic and absolute waits.

use std::time::{Duration, Instant};

/// A deadline source usable with [`crate::Alt::timeout`].
pub trait Timer {
    /// The instant at which the timer fires.
    fn deadline(&self) -> Instant;

    /// Whether the deadline has passed. May mutate periodic timers.
    fn expired(&mut self) -> bool;

    /// Re-arm the timer where that makes sense; a no-op otherwise.
    fn reset(&mut self);
}

/// One-shot timer expiring a fixed duration after creation (or after the
/// last [`Egg::reset`]).
#[derive(Debug, Clone)]
pub struct Egg {
    deadline: Instant,
    duration: Duration,
}

impl Egg {
    /// Start a timer expiring `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            duration,
        }
    }
}

impl Timer for Egg {
    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn expired(&mut self) -> bool {
        Instant::now() >= self.deadline
    }

    fn reset(&mut self) {
        self.deadline = Instant::now() + self.duration;
    }
}

/// Periodic timer: expires every `duration`, re-arming itself each time
/// expiry is observed.
#[derive(Debug, Clone)]
pub struct Repeat {
    deadline: Instant,
    duration: Duration,
}

impl Repeat {
    /// Start a periodic timer with the given interval.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            duration,
        }
    }
}

impl Timer for Repeat {
    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn expired(&mut self) -> bool {
        let timeout = Instant::now() >= self.deadline;
        if timeout {
            self.deadline += self.duration;
        }
        timeout
    }

    fn reset(&mut self) {}
}

/// Absolute timer: expires at a fixed instant, once.
#[derive(Debug, Clone)]
pub struct Date {
    deadline: Instant,
}

impl Date {
    /// A timer expiring at `deadline`.
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }
}

impl Timer for Date {
    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn expired(&mut self) -> bool {
        Instant::now() >= self.deadline
    }

    fn reset(&mut self) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_egg_expiry_and_reset() {
        let mut egg = Egg::new(Duration::from_millis(5));
        assert!(!egg.expired());
        std::thread::sleep(Duration::from_millis(10));
        assert!(egg.expired());

        egg.reset();
        assert!(!egg.expired());
    }

    #[test]
    fn test_repeat_rearms() {
        let mut tick = Repeat::new(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(8));
        assert!(tick.expired());
        // Re-armed one interval later, not yet due again.
        let next = tick.deadline();
        assert!(next > Instant::now() - Duration::from_millis(5));
    }

    #[test]
    fn test_date_is_single_shot() {
        let mut date = Date::new(Instant::now());
        assert!(date.expired());
        date.reset();
        // Reset is a no-op for absolute timers.
        assert!(date.expired());
    }
}
