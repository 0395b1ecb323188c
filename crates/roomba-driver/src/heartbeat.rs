//! Connection Monitor - tracks the time of the last byte received from the robot
//!
//! Uses monotonic time anchored to application start, so the value fits in an
//! `AtomicU64` and is unaffected by system clock changes.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global anchor point for monotonic time
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic time as microseconds since app start
fn get_monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Stream inactivity monitor
///
/// The delivery thread calls [`register_activity`](Self::register_activity)
/// whenever bytes arrive; [`check_connection`](Self::check_connection) is
/// false once nothing has arrived for longer than the timeout.
pub struct ConnectionMonitor {
    last_activity: AtomicU64,
    timeout: Duration,
}

impl ConnectionMonitor {
    /// # Example
    /// ```
    /// # use roomba_driver::ConnectionMonitor;
    /// # use std::time::Duration;
    /// let monitor = ConnectionMonitor::new(Duration::from_secs(1));
    /// assert!(monitor.check_connection());
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_activity: AtomicU64::new(get_monotonic_micros()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True if bytes were received within the timeout window
    pub fn check_connection(&self) -> bool {
        self.time_since_last_activity() < self.timeout
    }

    /// Record that bytes were received (also used to re-arm on stream start)
    pub fn register_activity(&self) {
        self.last_activity
            .store(get_monotonic_micros(), Ordering::Relaxed);
    }

    pub fn time_since_last_activity(&self) -> Duration {
        let last_us = self.last_activity.load(Ordering::Relaxed);
        let now_us = get_monotonic_micros();
        Duration::from_micros(now_us.saturating_sub(last_us))
    }
}
