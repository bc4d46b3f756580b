//! Cooperative shutdown: SIGTERM/SIGINT set a shared flag that every loop and
//! the cascade poll between units of work.
//!
//! Registration uses `signal-hook` and is only compiled with the `daemon`
//! feature; the flag itself is always available so library users can drive
//! shutdown programmatically.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep; bounds shutdown latency.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared shutdown flag. Clones observe the same state.
///
/// `Ordering::Relaxed` is enough: loops re-read the flag every iteration and
/// nothing else is published through it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// A fresh, unset signal with no OS hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that SIGTERM and SIGINT will set.
    ///
    /// Registration is best-effort; failures go to stderr and are not fatal.
    #[cfg(feature = "daemon")]
    #[must_use]
    pub fn with_os_hooks() -> Self {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let signal = Self::new();
        for (name, sig) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&signal.flag)) {
                eprintln!("[AEH-SIGNAL] failed to register {name}: {e}");
            }
        }
        signal
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Sleep for `duration` in short slices, returning early once shutdown is
    /// requested. Returns `true` if shutdown was observed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn sleep_runs_full_duration_when_not_requested() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_returns_early_on_request() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request();
        });
        let start = Instant::now();
        assert!(signal.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }

    #[test]
    fn already_requested_sleep_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.request();
        assert!(signal.sleep(Duration::from_secs(60)));
    }
}
