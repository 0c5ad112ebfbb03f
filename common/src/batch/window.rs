// Trailing-edge flush window for the batch scheduler

use std::time::Duration;
use tokio::time::Instant;

/// Fixed-length window armed by the first item and closed by a flush.
///
/// Items arriving while the window is armed never move the deadline, so a
/// steady stream of requests still flushes once per interval. Each arming
/// gets a generation number, so a timer armed for a window that has since
/// been closed can tell it is stale.
#[derive(Debug, Clone)]
pub struct FlushWindow {
    interval: Duration,
    deadline: Option<Instant>,
    generation: u64,
}

impl FlushWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            generation: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the window if it is idle.
    ///
    /// Returns the new deadline and the generation of this arming when this
    /// call armed it, `None` when a flush is already due.
    pub fn arm(&mut self, now: Instant) -> Option<(Instant, u64)> {
        if self.deadline.is_some() {
            return None;
        }
        let deadline = now + self.interval;
        self.deadline = Some(deadline);
        Some((deadline, self.generation))
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the window. Returns whether it was armed.
    pub fn fire(&mut self) -> bool {
        let armed = self.deadline.take().is_some();
        if armed {
            self.generation += 1;
        }
        armed
    }

    /// Close the window only if it is still the arming `generation` refers to
    pub fn fire_generation(&mut self, generation: u64) -> bool {
        self.is_armed() && self.generation == generation && self.fire()
    }
}
