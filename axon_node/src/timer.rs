//! Periodic tick source with cooperative readiness check.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A timer holds a period and a callback; the executor polls `is_ready`
/// each spin cycle and runs `execute` on a pool worker when it fires.
pub struct Timer {
    period: Duration,
    callback: Arc<dyn Fn() + Send + Sync>,
    last_fired: Mutex<Instant>,
    active: AtomicBool,
}

impl Timer {
    /// Create an active timer. The first tick lands one full period after
    /// creation.
    pub fn new(period: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            period,
            callback: Arc::new(callback),
            last_fired: Mutex::new(Instant::now()),
            active: AtomicBool::new(true),
        }
    }

    /// True when a full period has elapsed since the last firing,
    /// atomically advancing the firing time on a true result. A stopped
    /// timer is never ready.
    pub fn is_ready(&self) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        let mut last = self.last_fired.lock();
        let now = Instant::now();
        if now.duration_since(*last) >= self.period {
            *last = now;
            true
        } else {
            false
        }
    }

    /// Invoke the callback. No-op once stopped.
    pub fn execute(&self) {
        if self.active.load(Ordering::Acquire) {
            (self.callback)();
        }
    }

    /// Deactivate the timer permanently.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the timer is still active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_not_ready_before_period() {
        let timer = Timer::new(Duration::from_millis(50), || {});
        assert!(!timer.is_ready());
    }

    #[test]
    fn test_ready_once_per_period() {
        let timer = Timer::new(Duration::from_millis(20), || {});
        std::thread::sleep(Duration::from_millis(25));
        assert!(timer.is_ready());
        // Readiness consumed the elapsed period.
        assert!(!timer.is_ready());
    }

    #[test]
    fn test_stopped_timer_never_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let timer = {
            let hits = Arc::clone(&hits);
            Timer::new(Duration::from_millis(1), move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        timer.stop();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!timer.is_ready());
        timer.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execute_invokes_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let timer = {
            let hits = Arc::clone(&hits);
            Timer::new(Duration::from_millis(1), move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        timer.execute();
        timer.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
