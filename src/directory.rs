//! Abstraction over the external peer directory (the reference transport is a DHT read).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::RawDirectoryRecord;

/// Reads the latest snapshot of `{index -> (peer_uid, peer_address, expiration)}` from an
/// external directory.
///
/// The balancer is agnostic to the transport. Records are handed back unvalidated
/// ([`RawDirectoryRecord`]); individual malformed records, or a malformed response as a whole,
/// are the balancer's concern to skip and log, not this trait's. This trait's contract is just
/// "give me whatever you currently have, or `None` if you have nothing".
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn fetch_latest(&self) -> Option<HashMap<u64, RawDirectoryRecord>>;
}

/// An in-memory directory fixture for tests: a shared, mutable map the test mutates between
/// refresh cycles, so a test can simulate peers appearing, renewing, or aging out without a
/// real DHT.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    records: std::sync::Arc<parking_lot::Mutex<HashMap<u64, RawDirectoryRecord>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, index: u64, record: RawDirectoryRecord) {
        self.records.lock().insert(index, record);
    }

    pub fn remove(&self, index: u64) {
        self.records.lock().remove(&index);
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl DirectorySource for InMemoryDirectory {
    async fn fetch_latest(&self) -> Option<HashMap<u64, RawDirectoryRecord>> {
        let records = self.records.lock();
        if records.is_empty() {
            return None;
        }
        Some(records.clone())
    }
}
