//! The on-wire RPC to a selected peer: an external collaborator, opaque to the core.

use async_trait::async_trait;

use crate::types::{PeerAddress, Schema, Tensor};

/// Transport-level operations against a chosen peer. Both may fail with a transport error,
/// which the core treats uniformly as a lease failure (ban + retry), never distinguishing
/// "timeout" from "connection refused" from "protocol error".
#[async_trait]
pub trait PeerRpc: Send + Sync {
    async fn get_schema(&self, peer: &PeerAddress) -> anyhow::Result<Schema>;

    async fn forward(
        &self,
        peer: &PeerAddress,
        schema: &Schema,
        inputs: &[Tensor],
    ) -> anyhow::Result<Vec<Tensor>>;
}
