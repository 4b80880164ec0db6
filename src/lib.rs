//! A client-side dispatcher for a decentralized fabric of peer-hosted model experts.
//!
//! The core keeps a live, throughput-weighted view of reachable peers
//! ([`balancer::LoadBalancer`]), leases one out per call, and retries across peers on failure.
//! Discovering peers (the [`directory::DirectorySource`]) and talking to one once chosen (the
//! [`rpc::PeerRpc`]) are both external collaborators: this crate never dials a socket or reads a
//! DHT record itself.
//!
//! ```text
//! Dispatcher::call
//!   -> SchemaProbe (once)         -- get_schema via PeerRpc
//!   -> LoadBalancer::lease        -- pick a peer off the min-heap
//!   -> PeerRpc::forward
//!   -> PeerLease::success/fail    -- update throughput EMA, or ban and retry
//! ```

pub mod balancer;
pub mod clock;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod rpc;
pub mod schema_probe;
pub mod throughput;
pub mod timed_store;
pub mod types;

pub use balancer::{LoadBalancer, PeerLease};
pub use config::{LoadBalancerConfig, RawLoadBalancerConfig};
pub use directory::{DirectorySource, InMemoryDirectory};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, PeerFailure};
pub use rpc::PeerRpc;
pub use schema_probe::SchemaProbe;
pub use types::{
    DirectoryRecord, PeerAddress, PeerUid, RawDirectoryRecord, Schema, Tensor, TensorSpec,
};
