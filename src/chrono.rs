//! Chrono & Pacer: steady wall clock plus a heartbeat pacer.

use std::thread;
use std::time::{Duration, Instant};

/// Steady wall-clock time source, `now_us()`/`now_ns()` relative to process start.
#[derive(Debug, Clone)]
pub struct Chrono {
    epoch: Instant,
}

impl Chrono {
    pub fn new() -> Self {
        Chrono { epoch: Instant::now() }
    }

    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub fn now_us(&self) -> u64 {
        self.now_ns() / 1_000
    }
}

impl Default for Chrono {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame pacer: sleeps until the next heartbeat deadline, resynchronizing
/// instead of accumulating catch-up debt when a step overruns its budget.
#[derive(Debug, Clone)]
pub struct Pacer {
    heartbeat_ns: u64,
    next_deadline: Instant,
}

impl Pacer {
    pub fn new(heartbeat_ns: u64) -> Self {
        let now = Instant::now();
        Pacer { heartbeat_ns, next_deadline: now + Duration::from_nanos(heartbeat_ns) }
    }

    pub fn heartbeat_ns(&self) -> u64 {
        self.heartbeat_ns
    }

    pub fn set_heartbeat_ns(&mut self, heartbeat_ns: u64) {
        self.heartbeat_ns = heartbeat_ns;
    }

    /// Aligns this pacer's next deadline to a peer's phase so sibling threads'
    /// heartbeats stay in lockstep.
    pub fn calibrate(&mut self, other: &Pacer) {
        self.next_deadline = other.next_deadline;
    }

    /// Sleeps until the next deadline (hybrid sleep + spin for sub-ms
    /// precision, mirroring the player thread's `wait_until`), then advances
    /// the deadline by one heartbeat. If the caller fell behind, the deadline
    /// resynchronizes to `now + heartbeat` rather than accumulating drift.
    pub fn wait(&mut self) -> Duration {
        let start = Instant::now();
        if start < self.next_deadline {
            let remaining = self.next_deadline - start;
            if remaining > Duration::from_micros(1_500) {
                thread::sleep(remaining - Duration::from_micros(1_000));
            }
            while Instant::now() < self.next_deadline {
                std::hint::spin_loop();
            }
            self.next_deadline += Duration::from_nanos(self.heartbeat_ns);
        } else {
            // Overran the budget: resynchronize, no cumulative catch-up.
            self.next_deadline = Instant::now() + Duration::from_nanos(self.heartbeat_ns);
        }
        start.elapsed()
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrono_is_monotone() {
        let c = Chrono::new();
        let a = c.now_ns();
        let b = c.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn pacer_wait_advances_deadline_by_heartbeat_on_time() {
        let mut p = Pacer::new(1_000_000);
        let before = p.next_deadline();
        p.wait();
        let after = p.next_deadline();
        assert_eq!(after - before, Duration::from_nanos(1_000_000));
    }

    #[test]
    fn pacer_calibrate_shares_phase() {
        let a = Pacer::new(5_000_000);
        let mut b = Pacer::new(5_000_000);
        b.calibrate(&a);
        assert_eq!(a.next_deadline(), b.next_deadline());
    }
}
