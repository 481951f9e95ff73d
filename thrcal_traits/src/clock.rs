use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction used for retry pacing.
///
/// - now(): returns a monotonic Instant
/// - sleep(): blocks the calling worker for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when slept on or advanced.
///
/// Retry loops in tests and simulated runs sleep through this clock so a full
/// device calibration finishes instantly while the accumulated back-off stays
/// observable through [`ManualClock::slept`].
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    slept: Duration,
    sleeps: u32,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Advance the clock without counting it as a sleep.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut s) = self.state.lock() {
            s.offset = s.offset.saturating_add(d);
        }
    }

    /// Total time spent in `sleep` so far.
    pub fn slept(&self) -> Duration {
        self.state.lock().map(|s| s.slept).unwrap_or(Duration::ZERO)
    }

    /// Number of `sleep` calls so far.
    pub fn sleep_count(&self) -> u32 {
        self.state.lock().map(|s| s.sleeps).unwrap_or(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.state.lock().map(|s| s.offset).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        if let Ok(mut s) = self.state.lock() {
            s.offset = s.offset.saturating_add(d);
            s.slept = s.slept.saturating_add(d);
            s.sleeps = s.sleeps.saturating_add(1);
        }
    }
}
