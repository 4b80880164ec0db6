//! Top-level entry point: validates a call against the cached schema, leases a peer, and forwards
//! the call, retrying across peers until one succeeds or the balancer runs out of peers to try.

use std::sync::Arc;

use crate::balancer::LoadBalancer;
use crate::error::DispatchError;
use crate::rpc::PeerRpc;
use crate::schema_probe::SchemaProbe;
use crate::types::Tensor;

/// Drives calls to the expert fabric through a [`LoadBalancer`].
///
/// One `Dispatcher` owns one schema probe, so the first call through it pays the one-time cost of
/// discovering the peer's I/O schema; every call after that validates locally before ever reaching
/// the network.
pub struct Dispatcher {
    balancer: LoadBalancer,
    rpc: Arc<dyn PeerRpc>,
    schema: SchemaProbe,
}

impl Dispatcher {
    pub fn new(balancer: LoadBalancer, rpc: Arc<dyn PeerRpc>) -> Self {
        Self { balancer, rpc, schema: SchemaProbe::new() }
    }

    /// Forwards `inputs` to a peer, retrying on peer failure until one succeeds or the balancer
    /// reports [`DispatchError::NoPeers`].
    pub async fn call(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, DispatchError> {
        let schema = self.schema.get_or_probe(&self.balancer, self.rpc.as_ref()).await?;
        schema.validate_inputs(&inputs).map_err(DispatchError::SchemaMismatch)?;

        let task_size = inputs.len() as f64;
        loop {
            let lease = self.balancer.lease(task_size).await?;
            match self.rpc.forward(lease.address(), schema, &inputs).await {
                Ok(outputs) => {
                    lease.success();
                    return Ok(outputs);
                }
                Err(cause) => {
                    tracing::warn!(error = %cause, "forward failed, trying another peer");
                    lease.fail(cause);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::LoadBalancerConfig;
    use crate::directory::InMemoryDirectory;
    use crate::types::{PeerAddress, RawDirectoryRecord, Schema, TensorSpec};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Schema {
        Schema {
            keyword_names: vec!["x".into()],
            forward_schema: vec![TensorSpec { name: "x".into() }],
            outputs_schema: vec![TensorSpec { name: "y".into() }],
        }
    }

    struct FakeRpc {
        forward_failures_before_success: AtomicUsize,
    }

    #[async_trait]
    impl PeerRpc for FakeRpc {
        async fn get_schema(&self, _peer: &PeerAddress) -> anyhow::Result<Schema> {
            Ok(schema())
        }

        async fn forward(
            &self,
            _peer: &PeerAddress,
            _schema: &Schema,
            inputs: &[Tensor],
        ) -> anyhow::Result<Vec<Tensor>> {
            let remaining = self.forward_failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.forward_failures_before_success.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("simulated forward failure");
            }
            Ok(inputs.to_vec())
        }
    }

    fn directory_with(peers: &[(&str, &str)]) -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        for (i, (uid, addr)) in peers.iter().enumerate() {
            directory.set(
                i as u64,
                RawDirectoryRecord {
                    peer_uid: uid.to_string(),
                    peer_address: addr.to_string(),
                    expiration: 1000.0,
                },
            );
        }
        directory
    }

    #[tokio::test]
    async fn a_successful_call_round_trips_the_input_tensor() {
        let directory = directory_with(&[("p1", "addr1")]);
        let balancer = LoadBalancer::with_clock(
            LoadBalancerConfig::default(),
            Arc::new(directory),
            Arc::new(FakeClock::new(0.0)),
        );
        let rpc = Arc::new(FakeRpc { forward_failures_before_success: AtomicUsize::new(0) });
        let dispatcher = Dispatcher::new(balancer, rpc);

        let outputs = dispatcher.call(vec![Tensor(vec![1, 2, 3])]).await.unwrap();
        assert_eq!(outputs, vec![Tensor(vec![1, 2, 3])]);
    }

    #[tokio::test]
    async fn a_rejected_input_shape_is_a_schema_mismatch_without_touching_the_network() {
        let directory = directory_with(&[("p1", "addr1")]);
        let balancer = LoadBalancer::with_clock(
            LoadBalancerConfig::default(),
            Arc::new(directory),
            Arc::new(FakeClock::new(0.0)),
        );
        let rpc = Arc::new(FakeRpc { forward_failures_before_success: AtomicUsize::new(0) });
        let dispatcher = Dispatcher::new(balancer, rpc);

        let err = dispatcher.call(vec![Tensor(vec![1]), Tensor(vec![2])]).await.unwrap_err();
        assert_matches!(err, DispatchError::SchemaMismatch(_));
    }

    #[tokio::test]
    async fn a_forward_failure_retries_on_another_peer() {
        let directory = directory_with(&[("p1", "addr1"), ("p2", "addr2")]);
        let balancer = LoadBalancer::with_clock(
            LoadBalancerConfig::default(),
            Arc::new(directory),
            Arc::new(FakeClock::new(0.0)),
        );
        let rpc = Arc::new(FakeRpc { forward_failures_before_success: AtomicUsize::new(1) });
        let dispatcher = Dispatcher::new(balancer, rpc);

        let outputs = dispatcher.call(vec![Tensor(vec![9])]).await.unwrap();
        assert_eq!(outputs, vec![Tensor(vec![9])]);
    }

    #[tokio::test]
    async fn exhausting_every_peer_propagates_no_peers() {
        let directory = InMemoryDirectory::new();
        let balancer = LoadBalancer::with_clock(
            LoadBalancerConfig::default(),
            Arc::new(directory),
            Arc::new(FakeClock::new(0.0)),
        );
        let rpc = Arc::new(FakeRpc { forward_failures_before_success: AtomicUsize::new(0) });
        let dispatcher = Dispatcher::new(balancer, rpc);

        let err = dispatcher.call(vec![Tensor(vec![1])]).await.unwrap_err();
        assert_matches!(err, DispatchError::NoPeers { .. });
    }
}
