//! Cooperative deadlines for blocking I/O.
//!
//! Every external call takes its own timeout, clamped to whatever is left of
//! the per-invocation [`Deadline`]. Work that cannot be interrupted directly
//! (file reads on a wedged sysfs attribute) runs on a worker thread via
//! [`run_bounded`] so the caller can give up on it.

use crate::error::{Error, Result};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Outer limit for a whole dispatched command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Clamp a per-call timeout to the time left on this deadline.
    pub fn bound(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::after(DEFAULT_COMMAND_TIMEOUT)
    }
}

/// Run `work` on a worker thread and wait at most `timeout` for it.
///
/// A worker that misses the deadline is detached, not joined.
pub fn run_bounded<T, F>(operation: &str, timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    if timeout.is_zero() {
        return Err(Error::Timeout {
            operation: operation.to_string(),
            after: timeout,
        });
    }

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("bounded:{}", operation))
        .spawn(move || {
            let _ = tx.send(work());
        })
        .map_err(|e| Error::Other(format!("failed to spawn worker for {}: {}", operation, e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout {
            operation: operation.to_string(),
            after: timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Other(format!(
            "worker for {} exited without a result",
            operation
        ))),
    }
}

/// Safety net for the whole invocation: if the command is still running when
/// the deadline passes, `on_expire` runs on the watchdog thread.
pub struct Watchdog {
    cancel: mpsc::Sender<()>,
}

impl Watchdog {
    pub fn arm<F>(deadline: Deadline, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) =
                    cancelled.recv_timeout(deadline.remaining())
                {
                    on_expire();
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("could not start watchdog thread: {}", e);
        }
        Self { cancel }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.cancel.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_bound_clamps_to_remaining() {
        let deadline = Deadline::after(Duration::from_secs(2));
        assert!(deadline.bound(Duration::from_secs(10)) <= Duration::from_secs(2));
        assert_eq!(
            deadline.bound(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_expired_deadline_bounds_to_zero() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.bound(Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_run_bounded_returns_value() {
        let value = run_bounded("add", Duration::from_secs(1), || Ok(40 + 2)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_bounded_times_out() {
        let err = run_bounded("sleep", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_run_bounded_zero_budget_is_timeout() {
        let err = run_bounded("noop", Duration::ZERO, || Ok(())).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_disarmed_watchdog_does_not_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        {
            let _watchdog = Watchdog::arm(Deadline::after(Duration::from_millis(200)), move || {
                flag.store(true, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(300));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_watchdog_fires_after_deadline() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _watchdog = Watchdog::arm(Deadline::after(Duration::from_millis(10)), move || {
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(300));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timed_out_worker_still_finishes() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let result = run_bounded("slow write", Duration::from_millis(20), move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(!done.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(400));
        assert!(done.load(Ordering::SeqCst));
    }
}
