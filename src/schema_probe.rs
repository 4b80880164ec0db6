//! One-time acquisition of a peer's I/O schema, cached for the dispatcher's lifetime.

use tokio::sync::OnceCell;

use crate::balancer::LoadBalancer;
use crate::error::DispatchError;
use crate::rpc::PeerRpc;
use crate::types::Schema;

/// Probes one peer for its advertised schema on first use and caches the result.
///
/// Probing itself goes through the same lease/ban/retry path as any other request: a peer that
/// fails to answer is banned and another is tried, except [`DispatchError::NoPeers`], which
/// propagates immediately.
#[derive(Debug, Default)]
pub struct SchemaProbe {
    schema: OnceCell<Schema>,
}

impl SchemaProbe {
    pub fn new() -> Self {
        Self { schema: OnceCell::new() }
    }

    /// Returns the cached schema, probing a peer for it if this is the first call.
    pub async fn get_or_probe(
        &self,
        balancer: &LoadBalancer,
        rpc: &dyn PeerRpc,
    ) -> Result<&Schema, DispatchError> {
        self.schema
            .get_or_try_init(|| async {
                loop {
                    let lease = balancer.lease(1.0).await?;
                    match rpc.get_schema(lease.address()).await {
                        Ok(schema) => {
                            lease.success();
                            return Ok(schema);
                        }
                        Err(cause) => lease.fail(cause),
                    }
                }
            })
            .await
    }
}
