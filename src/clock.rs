//! A minimal clock abstraction so that expiration/blacklist arithmetic can be driven
//! deterministically in tests instead of depending on wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since an arbitrary but fixed epoch, consistent with whatever clock the
/// [`crate::directory::DirectorySource`] uses to stamp its expirations.
pub type Seconds = f64;

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Seconds;
}

/// Wall-clock time, expressed as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Seconds {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

/// A clock whose value is advanced explicitly by the test driving it.
///
/// Stored as fixed-point microseconds in an atomic so `FakeClock` can be cloned and shared
/// between a balancer and its test harness without a lock.
#[derive(Debug, Clone)]
pub struct FakeClock {
    micros: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start: Seconds) -> Self {
        Self { micros: Arc::new(AtomicU64::new((start * 1_000_000.0) as u64)) }
    }

    pub fn advance(&self, delta: Seconds) {
        let delta_micros = (delta * 1_000_000.0) as u64;
        self.micros.fetch_add(delta_micros, Ordering::SeqCst);
    }

    pub fn set(&self, value: Seconds) {
        self.micros.store((value * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Seconds {
        self.micros.load(Ordering::SeqCst) as Seconds / 1_000_000.0
    }
}
