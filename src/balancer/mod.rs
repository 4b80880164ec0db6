//! The concurrent, throughput-weighted peer scheduler.
//!
//! [`LoadBalancer`] keeps a live view of peers from a periodically refreshed
//! [`DirectorySource`](crate::directory::DirectorySource), selects one peer per request off a
//! min-priority queue keyed on expected completion time, tracks per-peer throughput, and
//! blacklists peers that fail.

mod lease;
mod pool;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::LoadBalancerConfig;
use crate::directory::DirectorySource;
use crate::error::DispatchError;

pub use lease::PeerLease;
use pool::{Pool, SelectOutcome};

/// State shared between the public [`LoadBalancer`] handle and its background refresh task.
struct Shared {
    config: LoadBalancerConfig,
    directory: Arc<dyn DirectorySource>,
    clock: Arc<dyn Clock>,
    pool: parking_lot::Mutex<Pool>,
    refresh_trigger: Notify,
    refresh_done: Notify,
    refresh_generation: AtomicU64,
    shut_down: AtomicBool,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Triggers an out-of-band refresh and waits for it to complete, using a
    /// check-enable-check-await sequence on [`Notify`] so a refresh that completes between the
    /// trigger and the wait is never missed.
    async fn trigger_refresh_and_wait(&self) {
        let start_generation = self.refresh_generation.load(Ordering::SeqCst);
        self.refresh_trigger.notify_one();
        loop {
            if self.refresh_generation.load(Ordering::SeqCst) != start_generation {
                return;
            }
            let notified = self.refresh_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.refresh_generation.load(Ordering::SeqCst) != start_generation {
                return;
            }
            notified.await;
        }
    }

    #[tracing::instrument(target = "expert_net::balancer", level = "debug", skip(self))]
    async fn do_refresh(&self) {
        let fetched = self.directory.fetch_latest().await;
        match fetched {
            Some(records) => {
                let mut pool = self.pool.lock();
                for record in records.into_values() {
                    match record.validate() {
                        Ok(record) => pool.apply_record(record, &self.config, self.clock.as_ref()),
                        Err(reason) => {
                            tracing::warn!(reason = %reason, "skipping malformed directory record")
                        }
                    }
                }
                let pool_size = pool.active_count();
                drop(pool);
                if pool_size == 0 {
                    tracing::warn!("refresh found no peers");
                } else {
                    tracing::info!(pool_size, "refresh completed");
                }
            }
            None => tracing::warn!("refresh found no peers"),
        }
        self.pool.lock().last_update = self.clock.now();
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        self.refresh_done.notify_waiters();
    }

    async fn run_refresh_loop(self: Arc<Self>) {
        loop {
            if self.is_shut_down() {
                self.wake_waiters_on_shutdown();
                return;
            }
            let now = self.clock.now();
            let last_update = self.pool.lock().last_update;
            let wait_secs =
                (last_update + self.config.update_period.as_secs_f64() - now).max(0.0);

            let notified = self.refresh_trigger.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_secs_f64(wait_secs)) => {}
            }

            if self.is_shut_down() {
                self.wake_waiters_on_shutdown();
                return;
            }
            self.do_refresh().await;
        }
    }

    /// Unblocks any `lease()` currently parked in [`trigger_refresh_and_wait`] so it observes
    /// [`DispatchError::Shutdown`] instead of waiting on a refresh that will never run again.
    fn wake_waiters_on_shutdown(&self) {
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        self.refresh_done.notify_waiters();
    }

    #[tracing::instrument(target = "expert_net::balancer", level = "debug", skip(self))]
    fn ban(&self, uid: &crate::types::PeerUid) {
        let expiration = self.pool.lock().ban(uid, self.clock.as_ref());
        if let Some(expiration) = expiration {
            tracing::debug!(uid = %uid, expiration, "peer banned");
        }
    }
}

/// A throughput-weighted, concurrency-safe peer scheduler.
///
/// Cloning a `LoadBalancer` is cheap (it's a handle over an `Arc`); all clones share the same
/// pool, blacklist, and background refresh task. The refresh task and the peer pool are torn
/// down once, on [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct LoadBalancer {
    shared: Arc<Shared>,
    refresh_task: Arc<JoinHandle<()>>,
}

impl LoadBalancer {
    /// Builds a balancer over `directory` using the system wall clock and spawns its background
    /// refresh task on the current tokio runtime.
    pub fn new(config: LoadBalancerConfig, directory: Arc<dyn DirectorySource>) -> Self {
        Self::with_clock(config, directory, Arc::new(SystemClock))
    }

    /// Builds a balancer with an explicit [`Clock`], primarily for deterministic tests.
    pub fn with_clock(
        config: LoadBalancerConfig,
        directory: Arc<dyn DirectorySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_update = clock.now();
        let shared = Arc::new(Shared {
            config,
            directory,
            clock,
            pool: parking_lot::Mutex::new(Pool::new(last_update)),
            refresh_trigger: Notify::new(),
            refresh_done: Notify::new(),
            refresh_generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        });
        let refresh_task = tokio::spawn(Arc::clone(&shared).run_refresh_loop());
        Self { shared, refresh_task: Arc::new(refresh_task) }
    }

    /// Acquires a scoped lease on one peer.
    ///
    /// Retries across empty-pool refresh cycles up to `config.max_retries` times before raising
    /// [`DispatchError::NoPeers`]. Stale and expired heap entries encountered along the way do
    /// not count against this budget -- only an empty heap that required a refresh does.
    #[tracing::instrument(target = "expert_net::balancer", level = "debug", skip(self))]
    pub async fn lease(&self, task_size: f64) -> Result<PeerLease, DispatchError> {
        if self.shared.is_shut_down() {
            return Err(DispatchError::Shutdown);
        }
        let mut attempts = 0usize;
        loop {
            let outcome = self.shared.pool.lock().select(task_size, &self.shared.config, self.shared.clock.as_ref());
            match outcome {
                SelectOutcome::Selected { uid, address, tracker } => {
                    tracing::debug!(
                        uid = %uid,
                        samples_per_second = tracker.samples_per_second(),
                        "lease granted"
                    );
                    let tracker_lease = tracker.begin(task_size).await;
                    return Ok(PeerLease::new(Arc::clone(&self.shared), uid, address, tracker_lease));
                }
                SelectOutcome::Empty => {
                    if attempts >= self.shared.config.max_retries {
                        return Err(DispatchError::NoPeers { attempts });
                    }
                    attempts += 1;
                    self.shared.trigger_refresh_and_wait().await;
                    if self.shared.is_shut_down() {
                        return Err(DispatchError::Shutdown);
                    }
                }
            }
        }
    }

    /// Current pool size, forcing a synchronous refresh first if the pool is empty (cold-start
    /// bootstrap before any request has run).
    pub async fn active_count(&self) -> usize {
        let empty = self.shared.pool.lock().active_count() == 0;
        if empty {
            self.shared.trigger_refresh_and_wait().await;
        }
        self.shared.pool.lock().active_count()
    }

    /// Stops the background refresh task. Any operation after this returns
    /// [`DispatchError::Shutdown`].
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        self.shared.refresh_trigger.notify_waiters();
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        // Only the last handle tears down the refresh task; clones share the same `Arc<Shared>`.
        if Arc::strong_count(&self.shared) == 1 {
            self.refresh_task.abort();
        }
    }
}
