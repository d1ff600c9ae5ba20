//! Cooperative cancellation, shared by every long-running loop in the
//! station. Servo pulses and strip refreshes cannot be preempted mid-write,
//! so nothing here is preemptive: loops poll [`RunToken::should_continue`]
//! at least once per [`POLL_INTERVAL`] and wind down on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often a polling loop re-checks its token. This bounds stop latency
/// to roughly one interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A shared "keep going" flag. Clones observe the same flag, so one token
/// can be handed to a worker thread while its owner keeps the other end.
#[derive(Debug, Clone)]
pub struct RunToken {
    running: Arc<AtomicBool>,
}

impl RunToken {
    /// A fresh token in the running state.
    pub fn new() -> Self {
        RunToken {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the loop holding this token should keep going.
    pub fn should_continue(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Asks every holder of this token to wind down. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Sleeps for `total`, waking every [`POLL_INTERVAL`] to re-check the
    /// token. Returns `false` if the token stopped before the full duration
    /// elapsed.
    pub fn sleep_while_running(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while self.should_continue() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(POLL_INTERVAL));
        }
        false
    }
}

impl Default for RunToken {
    fn default() -> Self {
        RunToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running_and_stop_is_idempotent() {
        let token = RunToken::new();
        assert!(token.should_continue());
        token.stop();
        token.stop();
        assert!(!token.should_continue());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = RunToken::new();
        let clone = token.clone();
        clone.stop();
        assert!(!token.should_continue());
    }

    #[test]
    fn sleep_completes_when_left_alone() {
        let token = RunToken::new();
        assert!(token.sleep_while_running(Duration::from_millis(5)));
    }

    #[test]
    fn sleep_is_cut_short_by_stop() {
        let token = RunToken::new();
        let stopper = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });
        let start = Instant::now();
        assert!(!token.sleep_while_running(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
