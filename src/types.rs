//! Types shared across the balancer, dispatcher, and their external collaborators.

use std::fmt;
use std::sync::Arc;

use crate::clock::Seconds;

/// Opaque, comparable identifier for a peer ("expert").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerUid(Arc<str>);

impl PeerUid {
    pub fn new(uid: impl Into<Arc<str>>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for PeerUid {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Opaque network address for a peer (e.g. a multiaddress). Carried through unmodified; the
/// core never parses or dials it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress(Arc<str>);

impl PeerAddress {
    pub fn new(addr: impl Into<Arc<str>>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for PeerAddress {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Absolute expiration time, seconds on the same clock the directory uses.
pub type Expiration = Seconds;

/// A single entry in the selection min-heap: `(expected_completion, tiebreak, uid)`.
///
/// `expected_completion` is a cumulative scheduling horizon, not a wall-clock time.
/// `tiebreak` is a uniformly random value in `[0, 1)`, compared only when two entries have equal
/// `expected_completion` -- without it, ordered insertion biases selection toward whichever peer
/// was discovered first under zero-measured-latency conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapEntry {
    pub expected_completion: f64,
    pub tiebreak: f64,
    pub uid: PeerUid,
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expected_completion
            .total_cmp(&other.expected_completion)
            .then_with(|| self.tiebreak.total_cmp(&other.tiebreak))
    }
}

/// A well-formed record read from the directory for a single index.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryRecord {
    pub peer_uid: PeerUid,
    pub peer_address: PeerAddress,
    pub expiration: Expiration,
}

/// A directory record as read off the wire, before the balancer has validated it.
///
/// Individual bad records (an empty uid, a non-finite expiration) are expected to occur in a
/// live directory and must not abort the whole refresh; see
/// [`crate::balancer::LoadBalancer`]'s refresh loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDirectoryRecord {
    pub peer_uid: String,
    pub peer_address: String,
    pub expiration: Expiration,
}

impl RawDirectoryRecord {
    /// Validates and converts to a [`DirectoryRecord`], or a short reason it was rejected.
    pub fn validate(self) -> Result<DirectoryRecord, String> {
        if self.peer_uid.is_empty() {
            return Err("empty peer_uid".to_string());
        }
        if self.peer_address.is_empty() {
            return Err("empty peer_address".to_string());
        }
        if !self.expiration.is_finite() {
            return Err(format!("non-finite expiration {}", self.expiration));
        }
        Ok(DirectoryRecord {
            peer_uid: PeerUid::new(self.peer_uid),
            peer_address: PeerAddress::new(self.peer_address),
            expiration: self.expiration,
        })
    }
}

/// An opaque serialized tensor payload.
///
/// Tensor encoding, tokenization, and autograd plumbing are external collaborators (see
/// crate-level docs); this crate only ever moves bytes produced and consumed by the caller and
/// the peer RPC.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tensor(pub Vec<u8>);

impl Tensor {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

/// Describes a single positional or keyword tensor slot in a peer's I/O schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
}

/// A peer's advertised input/output contract, acquired once via [`crate::schema_probe::SchemaProbe`]
/// and cached for the lifetime of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub keyword_names: Vec<String>,
    pub forward_schema: Vec<TensorSpec>,
    pub outputs_schema: Vec<TensorSpec>,
}

impl Schema {
    /// Validates a positional input batch against `forward_schema`. Caller errors here are
    /// never peer errors: they do not cause a ban (see [`crate::error::DispatchError::SchemaMismatch`]).
    pub fn validate_inputs(&self, inputs: &[Tensor]) -> Result<(), String> {
        if inputs.len() != self.forward_schema.len() {
            return Err(format!(
                "expected {} input tensor(s), got {}",
                self.forward_schema.len(),
                inputs.len()
            ));
        }
        Ok(())
    }
}
