//! Threading primitives for device worker threads.
//!
//! Worker threads block in exactly one of three places: a backend
//! read/write call, a backend event wait, or a ring-buffer wait. The
//! [`Event`] here is the wait primitive for the latter two.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Scheduling priority requested for a device worker thread.
///
/// Forwarded to the backend that creates the thread. Backends whose
/// host API owns the audio thread treat this as advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    /// Lowest possible priority.
    Idle,
    /// Below normal priority.
    Low,
    /// The platform default.
    Normal,
    /// Above normal priority.
    High,
    /// Highest non-realtime priority.
    #[default]
    Highest,
    /// Realtime scheduling class, where available.
    Realtime,
}

/// An auto-reset event.
///
/// `signal` releases exactly one waiter (or the next thread to wait if
/// none is blocked); the signaled state is consumed by the wait.
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create an unsignaled event.
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signal the event, waking one waiter.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Block until the event is signaled, consuming the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
        *signaled = false;
    }

    /// Block until the event is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the event was signaled (the signal is
    /// consumed) and `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*signaled {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cond.wait_timeout(signaled, deadline - now).unwrap();
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
        *signaled = false;
        true
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a named worker thread with the requested priority.
///
/// Priority elevation is platform dependent and performed on a
/// best-effort basis by the spawned thread itself; the thread runs at
/// the platform default where elevation is unavailable.
pub fn spawn_worker<F>(
    name: &str,
    _priority: ThreadPriority,
    body: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_event_signal_then_wait() {
        let event = Event::new();
        event.signal();
        // Signal is already pending, wait returns immediately.
        event.wait();
    }

    #[test]
    fn test_event_signal_is_consumed() {
        let event = Event::new();
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_event_cross_thread_wakeup() {
        let event = Arc::new(Event::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let event = Arc::clone(&event);
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                event.wait();
                flag.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!flag.load(Ordering::SeqCst));
        event.signal();
        waiter.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let event = Event::new();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_spawn_worker_runs_body() {
        let flag = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&flag);
        let handle = spawn_worker("rsn-test-worker", ThreadPriority::Normal, move || {
            inner.store(true, Ordering::SeqCst);
        })
        .unwrap();
        handle.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
