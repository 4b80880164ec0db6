//! Per-peer exponentially weighted moving average of throughput (samples/second).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, Default)]
struct State {
    samples_per_second: f64,
    num_updates: u64,
    paused: bool,
    /// Lifetime sum of `elapsed` across every completed lease.
    accumulated_time: f64,
    /// Lifetime sum of `task_size` across every completed lease.
    accumulated_work: f64,
}

/// Tracks a single peer's measured throughput as an EMA of `task_size / elapsed_time`.
///
/// Paused by default: a tracker with no completed leases has no `samples_per_second` estimate
/// and callers fall back to `initial_throughput` (see [`crate::balancer::LoadBalancer`]).
///
/// Reads of the current estimate (`samples_per_second`, `num_updates`, `accumulated_time`,
/// `accumulated_work`) are plain synchronous locks. Exclusivity across the lifetime of a lease --
/// "at most one lease is measured at a time" -- is a separate one-permit semaphore that
/// [`begin`](Self::begin) acquires and the returned [`Lease`] holds until it is resolved, so it
/// can be held across the RPC await without blocking readers of the estimate.
#[derive(Debug, Clone)]
pub struct ThroughputTracker {
    state: Arc<Mutex<State>>,
    gate: Arc<Semaphore>,
    alpha: f64,
}

impl ThroughputTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            gate: Arc::new(Semaphore::new(1)),
            alpha,
        }
    }

    /// Current EMA estimate. `None` until at least one lease has completed.
    pub fn samples_per_second(&self) -> Option<f64> {
        let state = self.state.lock();
        (state.num_updates > 0).then_some(state.samples_per_second)
    }

    pub fn num_updates(&self) -> u64 {
        self.state.lock().num_updates
    }

    /// Lifetime sum of measured wall-clock seconds across every completed lease.
    pub fn accumulated_time(&self) -> f64 {
        self.state.lock().accumulated_time
    }

    /// Lifetime sum of `task_size` charged across every completed lease.
    pub fn accumulated_work(&self) -> f64 {
        self.state.lock().accumulated_work
    }

    /// Begins measuring a lease of the given `task_size`. Suspends until any concurrent lease on
    /// this tracker has been resolved.
    pub async fn begin(&self, task_size: f64) -> Lease {
        let permit =
            Arc::clone(&self.gate).acquire_owned().await.expect("tracker semaphore never closed");
        self.state.lock().paused = false;
        Lease {
            state: Arc::clone(&self.state),
            permit: Some(permit),
            task_size,
            started_at: Instant::now(),
            alpha: self.alpha,
        }
    }
}

/// A scoped, in-flight throughput measurement. Exactly one of [`complete`](Self::complete) or
/// [`abandon`](Self::abandon) should be called; if dropped without either, the measurement is
/// silently discarded, equivalent to `abandon`.
pub struct Lease {
    state: Arc<Mutex<State>>,
    permit: Option<OwnedSemaphorePermit>,
    task_size: f64,
    started_at: Instant,
    alpha: f64,
}

impl Lease {
    /// Records a successful completion: updates the EMA with `task_size / elapsed`.
    pub fn complete(mut self) {
        let elapsed = self.started_at.elapsed().as_secs_f64().max(f64::EPSILON);
        let rate = self.task_size / elapsed;
        let mut state = self.state.lock();
        if state.num_updates == 0 {
            state.samples_per_second = rate;
        } else {
            state.samples_per_second = self.alpha * rate + (1.0 - self.alpha) * state.samples_per_second;
        }
        state.num_updates += 1;
        state.accumulated_time += elapsed;
        state.accumulated_work += self.task_size;
        state.paused = true;
        drop(state);
        self.permit.take();
    }

    /// Discards the timing without touching the EMA.
    pub fn abandon(mut self) {
        self.state.lock().paused = true;
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unmeasured_tracker_reports_no_rate() {
        let tracker = ThroughputTracker::new(0.1);
        assert_eq!(tracker.samples_per_second(), None);
        assert_eq!(tracker.num_updates(), 0);
    }

    #[tokio::test]
    async fn completions_accumulate_lifetime_time_and_work() {
        let tracker = ThroughputTracker::new(0.1);
        let lease = tracker.begin(10.0).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        lease.complete();

        let lease = tracker.begin(5.0).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        lease.complete();

        assert_eq!(tracker.accumulated_work(), 15.0);
        assert!(tracker.accumulated_time() > 0.0);
    }

    #[tokio::test]
    async fn first_completion_sets_rate_directly() {
        let tracker = ThroughputTracker::new(0.1);
        let lease = tracker.begin(10.0).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        lease.complete();
        assert_eq!(tracker.num_updates(), 1);
        assert!(tracker.samples_per_second().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn abandon_does_not_update_ema() {
        let tracker = ThroughputTracker::new(0.1);
        let lease = tracker.begin(10.0).await;
        lease.abandon();
        assert_eq!(tracker.num_updates(), 0);
        assert_eq!(tracker.samples_per_second(), None);
    }

    #[tokio::test]
    async fn dropped_lease_behaves_like_abandon() {
        let tracker = ThroughputTracker::new(0.1);
        {
            let _lease = tracker.begin(10.0).await;
        }
        assert_eq!(tracker.num_updates(), 0);
    }

    #[tokio::test]
    async fn subsequent_completions_blend_via_ema() {
        let tracker = ThroughputTracker::new(0.5);
        let lease = tracker.begin(100.0).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        lease.complete();
        let first = tracker.samples_per_second().unwrap();

        let lease = tracker.begin(100.0).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        lease.complete();
        let second = tracker.samples_per_second().unwrap();

        assert_eq!(tracker.num_updates(), 2);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn concurrent_leases_serialize() {
        let tracker = ThroughputTracker::new(0.1);
        let t1 = tracker.clone();
        let t2 = tracker.clone();
        let h1 = tokio::spawn(async move {
            let lease = t1.begin(1.0).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            lease.complete();
        });
        let h2 = tokio::spawn(async move {
            let lease = t2.begin(1.0).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            lease.complete();
        });
        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(tracker.num_updates(), 2);
    }
}
