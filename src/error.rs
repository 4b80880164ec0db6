use crate::types::PeerUid;

/// Error taxonomy surfaced across a component boundary.
///
/// Only [`DispatchError::NoPeers`], [`DispatchError::SchemaMismatch`] and
/// [`DispatchError::Shutdown`] ever escape the [`crate::Dispatcher`]; everything else is folded
/// into retry-and-ban inside the balancer's lease scope.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no peers available after {attempts} refresh attempt(s)")]
    NoPeers { attempts: usize },

    #[error("input batch does not match the cached peer schema: {0}")]
    SchemaMismatch(String),

    #[error("load balancer has been shut down")]
    Shutdown,
}

/// Why a lease ended in failure and its peer was banned.
///
/// This never escapes [`crate::balancer::LoadBalancer`]; it is folded into a ban and a retry at
/// the point it's raised. Kept as a typed value (rather than a bare string) so call sites can log
/// an error class without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum PeerFailure {
    #[error("rpc transport error talking to {uid}: {source}")]
    Rpc {
        uid: PeerUid,
        #[source]
        source: anyhow::Error,
    },

    #[error("lease on {uid} was dropped without a resolution (cancellation or panic)")]
    Abandoned { uid: PeerUid },
}

impl PeerFailure {
    pub fn uid(&self) -> &PeerUid {
        match self {
            PeerFailure::Rpc { uid, .. } => uid,
            PeerFailure::Abandoned { uid } => uid,
        }
    }

    /// A short, stable label for log fields -- never the full `Display`, which may embed
    /// arbitrary transport error text.
    pub fn class(&self) -> &'static str {
        match self {
            PeerFailure::Rpc { .. } => "rpc",
            PeerFailure::Abandoned { .. } => "abandoned",
        }
    }
}
