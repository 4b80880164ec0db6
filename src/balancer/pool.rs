use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::clock::{Clock, Seconds};
use crate::config::LoadBalancerConfig;
use crate::throughput::ThroughputTracker;
use crate::timed_store::TimedStore;
use crate::types::{DirectoryRecord, HeapEntry, PeerAddress, PeerUid};

/// All of the balancer's mutable state, guarded by one coarse lock
/// ([`super::Shared::pool`]) held only for short, synchronous critical sections -- never across
/// the RPC itself.
pub(super) struct Pool {
    pub(super) peers: TimedStore<PeerUid, PeerAddress>,
    pub(super) blacklist: TimedStore<PeerUid, ()>,
    pub(super) throughput: HashMap<PeerUid, ThroughputTracker>,
    pub(super) heap: BinaryHeap<Reverse<HeapEntry>>,
    pub(super) uid_to_entry: HashMap<PeerUid, HeapEntry>,
    pub(super) last_update: Seconds,
}

pub(super) enum SelectOutcome {
    Selected { uid: PeerUid, address: PeerAddress, tracker: ThroughputTracker },
    Empty,
}

impl Pool {
    pub(super) fn new(last_update: Seconds) -> Self {
        Self {
            peers: TimedStore::new(),
            blacklist: TimedStore::new(),
            throughput: HashMap::new(),
            heap: BinaryHeap::new(),
            uid_to_entry: HashMap::new(),
            last_update,
        }
    }

    pub(super) fn active_count(&self) -> usize {
        self.uid_to_entry.len()
    }

    /// Applies one validated directory record: skip if blacklisted with an equal-or-newer
    /// expiration, otherwise add or refresh the peer.
    pub(super) fn apply_record(
        &mut self,
        record: DirectoryRecord,
        config: &LoadBalancerConfig,
        clock: &dyn Clock,
    ) {
        if let Some((_, blacklisted_expiration)) = self.blacklist.get(&record.peer_uid, clock) {
            if blacklisted_expiration >= record.expiration {
                tracing::debug!(uid = %record.peer_uid, "not adding blacklisted peer");
                return;
            }
        }
        self.peers.store(record.peer_uid.clone(), record.peer_address, record.expiration);
        if self.uid_to_entry.contains_key(&record.peer_uid) {
            tracing::debug!(uid = %record.peer_uid, expiration = record.expiration, "peer refreshed");
            return;
        }
        tracing::debug!(uid = %record.peer_uid, expiration = record.expiration, "peer added");
        self.throughput.insert(record.peer_uid.clone(), ThroughputTracker::new(config.ema_alpha));
        let base_load =
            self.heap.peek().map(|Reverse(entry)| entry.expected_completion).unwrap_or(0.0);
        let entry = HeapEntry {
            expected_completion: base_load,
            tiebreak: rand::random::<f64>(),
            uid: record.peer_uid.clone(),
        };
        self.heap.push(Reverse(entry.clone()));
        self.uid_to_entry.insert(record.peer_uid, entry);
    }

    /// Pops entries until it finds a live, current one (dropping stale/expired ones along the
    /// way), advances its scheduling horizon by the expected duration of `task_size`, and
    /// returns it -- or [`SelectOutcome::Empty`] if the heap has nothing left.
    pub(super) fn select(
        &mut self,
        task_size: f64,
        config: &LoadBalancerConfig,
        clock: &dyn Clock,
    ) -> SelectOutcome {
        loop {
            let Some(Reverse(entry)) = self.heap.pop() else {
                return SelectOutcome::Empty;
            };
            let address = match self.peers.get(&entry.uid, clock) {
                Some((address, _)) => address.clone(),
                None => {
                    self.uid_to_entry.remove(&entry.uid);
                    self.throughput.remove(&entry.uid);
                    continue;
                }
            };
            if self.uid_to_entry.get(&entry.uid) != Some(&entry) {
                continue;
            }
            let tracker = self
                .throughput
                .get(&entry.uid)
                .cloned()
                .expect("uid_to_entry and throughput are maintained together");
            let expected_duration = if tracker.num_updates() > 0 {
                task_size / tracker.samples_per_second().expect("num_updates > 0 implies a rate")
            } else {
                config.initial_throughput * task_size
            };
            let new_entry = HeapEntry {
                expected_completion: entry.expected_completion + expected_duration,
                tiebreak: rand::random::<f64>(),
                uid: entry.uid.clone(),
            };
            self.heap.push(Reverse(new_entry.clone()));
            self.uid_to_entry.insert(entry.uid.clone(), new_entry);
            return SelectOutcome::Selected { uid: entry.uid, address, tracker };
        }
    }

    /// Bans `uid`: blacklists it at its last-known (or current) expiration and removes it from
    /// the active pool. Returns `None` if `uid` was already gone -- banning an already-banned peer
    /// is a no-op. Returns the blacklist expiration on success so the caller can log it.
    pub(super) fn ban(&mut self, uid: &PeerUid, clock: &dyn Clock) -> Option<Seconds> {
        let live_expiration = self.peers.get(uid, clock).map(|(_, expiration)| expiration);
        if live_expiration.is_none() && !self.uid_to_entry.contains_key(uid) {
            return None;
        }
        let expiration = live_expiration.unwrap_or_else(|| clock.now());
        self.blacklist.store(uid.clone(), (), expiration);
        self.uid_to_entry.remove(uid);
        self.throughput.remove(uid);
        self.peers.remove(uid);
        Some(expiration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn good_record(uid: &str) -> DirectoryRecord {
        DirectoryRecord {
            peer_uid: PeerUid::new(uid),
            peer_address: PeerAddress::new(format!("addr-{uid}")),
            expiration: 1000.0,
        }
    }

    #[test]
    fn apply_record_adds_a_new_peer_at_the_current_minimum_load() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);

        pool.apply_record(good_record("a"), &config, &clock);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.uid_to_entry[&PeerUid::new("a")].expected_completion, 0.0);
    }

    #[test]
    fn apply_record_twice_refreshes_without_moving_the_heap_entry() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);

        pool.apply_record(good_record("a"), &config, &clock);
        let before = pool.uid_to_entry[&PeerUid::new("a")].clone();
        pool.apply_record(good_record("a"), &config, &clock);
        let after = pool.uid_to_entry[&PeerUid::new("a")].clone();
        assert_eq!(before, after);
    }

    #[test]
    fn select_on_empty_pool_is_empty() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);
        assert!(matches!(pool.select(1.0, &config, &clock), SelectOutcome::Empty));
    }

    #[test]
    fn select_advances_the_horizon_by_the_initial_throughput_estimate() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig { initial_throughput: 2.0, ..Default::default() };
        let mut pool = Pool::new(0.0);
        pool.apply_record(good_record("a"), &config, &clock);

        match pool.select(3.0, &config, &clock) {
            SelectOutcome::Selected { uid, .. } => assert_eq!(uid.as_str(), "a"),
            SelectOutcome::Empty => panic!("expected a peer"),
        }
        // initial_throughput(2.0) * task_size(3.0) == 6.0
        assert_eq!(pool.uid_to_entry[&PeerUid::new("a")].expected_completion, 6.0);
    }

    #[test]
    fn ban_removes_peer_from_pool_and_throughput_and_is_idempotent() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);
        let uid = PeerUid::new("a");
        pool.apply_record(good_record("a"), &config, &clock);

        assert_eq!(pool.ban(&uid, &clock), Some(1000.0));
        assert!(!pool.uid_to_entry.contains_key(&uid));
        assert!(!pool.throughput.contains_key(&uid));
        assert_eq!(pool.peers.get(&uid, &clock), None);

        assert_eq!(
            pool.ban(&uid, &clock),
            None,
            "banning an already-banned peer must be a no-op"
        );
    }

    #[test]
    fn banned_peer_is_not_re_added_with_an_equal_expiration() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);
        let uid = PeerUid::new("a");
        pool.apply_record(good_record("a"), &config, &clock);
        pool.ban(&uid, &clock);

        pool.apply_record(good_record("a"), &config, &clock);
        assert_eq!(pool.active_count(), 0, "equal expiration must not resurrect a banned peer");
    }

    #[test]
    fn banned_peer_is_re_added_with_a_strictly_greater_expiration() {
        let clock = FakeClock::new(0.0);
        let config = LoadBalancerConfig::default();
        let mut pool = Pool::new(0.0);
        let uid = PeerUid::new("a");
        pool.apply_record(good_record("a"), &config, &clock);
        pool.ban(&uid, &clock);

        let mut newer = good_record("a");
        newer.expiration = 2000.0;
        pool.apply_record(newer, &config, &clock);
        assert_eq!(pool.active_count(), 1, "strictly greater expiration must resurrect the peer");
    }
}
