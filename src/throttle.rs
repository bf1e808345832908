//! Sleep-based write throughput cap.
//!
//! The segment writer charges every piece of payload it writes to one
//! `Throttle`. After each piece the throttle compares the time the bytes
//! written so far *should* have taken at the configured rate with the time
//! that actually elapsed, and sleeps the calling thread for the difference.
//! Time comes from a [`Clock`] so tests can run without real delays.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MB: u64 = 1024 * 1024;

/// Monotonic time source plus the ability to block for a while.
pub trait Clock: Send + Sync + Debug {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    slept_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Total time spent in `sleep`.
    pub fn slept(&self) -> Duration {
        Duration::from_nanos(self.slept_nanos.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        let nanos = duration.as_nanos() as u64;
        self.slept_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

/// Throughput cap shared across one whole payload write.
#[derive(Debug)]
pub struct Throttle {
    clock: Arc<dyn Clock>,
    bytes_per_sec: Option<u64>,
    start: Duration,
    consumed: u64,
}

impl Throttle {
    /// Cap at `write_mbytes_per_sec` MiB/s; 0 disables the cap.
    pub fn new(clock: Arc<dyn Clock>, write_mbytes_per_sec: u32) -> Self {
        let bytes_per_sec = match write_mbytes_per_sec {
            0 => None,
            mb => Some(u64::from(mb) * MB),
        };
        Self::with_bytes_per_sec(clock, bytes_per_sec)
    }

    pub fn with_bytes_per_sec(clock: Arc<dyn Clock>, bytes_per_sec: Option<u64>) -> Self {
        let start = clock.now();
        Self {
            clock,
            bytes_per_sec: bytes_per_sec.filter(|&rate| rate > 0),
            start,
            consumed: 0,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.bytes_per_sec.is_some()
    }

    /// Bytes charged so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Charge `bytes` and block until the running rate is back under the cap.
    pub fn consume(&mut self, bytes: u64) {
        self.consumed += bytes;
        let Some(rate) = self.bytes_per_sec else {
            return;
        };
        let expected = Duration::from_secs_f64(self.consumed as f64 / rate as f64);
        let elapsed = self.clock.now().saturating_sub(self.start);
        if expected > elapsed {
            self.clock.sleep(expected - elapsed);
        }
    }
}
