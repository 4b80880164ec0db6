use std::sync::Arc;

use crate::error::PeerFailure;
use crate::throughput::Lease as ThroughputLease;
use crate::types::{PeerAddress, PeerUid};

use super::Shared;

/// A scoped acquisition of one peer.
///
/// Exactly one of [`success`](Self::success) or [`fail`](Self::fail) should be called once the
/// RPC is done. If the lease is dropped without either -- including on panic, early `?` return,
/// or task cancellation -- it behaves as a failure: the peer is banned and its in-flight
/// throughput measurement is discarded. This is what makes "guaranteed release on all exit
/// paths" true without the caller needing a `finally` block.
pub struct PeerLease {
    shared: Arc<Shared>,
    uid: PeerUid,
    address: PeerAddress,
    tracker_lease: Option<ThroughputLease>,
    resolved: bool,
}

impl PeerLease {
    pub(super) fn new(
        shared: Arc<Shared>,
        uid: PeerUid,
        address: PeerAddress,
        tracker_lease: ThroughputLease,
    ) -> Self {
        Self { shared, uid, address, tracker_lease: Some(tracker_lease), resolved: false }
    }

    pub fn uid(&self) -> &PeerUid {
        &self.uid
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Records a successful RPC: the throughput EMA is updated and the peer remains in the pool.
    pub fn success(mut self) {
        self.resolved = true;
        if let Some(tracker_lease) = self.tracker_lease.take() {
            tracker_lease.complete();
        }
    }

    /// Records a failed RPC: the peer is banned and the in-flight measurement is discarded.
    /// Transient network errors and logical schema errors are treated identically here -- both
    /// ban the peer and leave retrying to the caller.
    pub fn fail(mut self, cause: anyhow::Error) {
        self.resolved = true;
        if let Some(tracker_lease) = self.tracker_lease.take() {
            tracker_lease.abandon();
        }
        let failure = PeerFailure::Rpc { uid: self.uid.clone(), source: cause };
        tracing::warn!(uid = %failure.uid(), error_class = failure.class(), "rpc failed");
        self.shared.ban(&self.uid);
    }
}

impl Drop for PeerLease {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if let Some(tracker_lease) = self.tracker_lease.take() {
            tracker_lease.abandon();
        }
        let failure = PeerFailure::Abandoned { uid: self.uid.clone() };
        tracing::warn!(uid = %failure.uid(), error_class = failure.class(), "rpc failed");
        self.shared.ban(&self.uid);
    }
}
