//! The edge-node lifecycle controller.
//!
//! The first sample seen from an edge node starts a command loop that asks
//! the node to re-announce its full metric inventory, so a gateway restart
//! (or a registry reset) converges back to a complete picture. One loop
//! runs per node for the life of the process; publish failures never
//! terminate it.

use std::time::Duration;

use prost::Message as _;
use rumqttc::{AsyncClient, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sparkplug_proto::{metric::Value, DataType, Metric, Payload};

use crate::common::{now_millis, NODE_REBIRTH_METRIC};
use crate::registry::Registry;
use crate::topic::NodeLabels;

/// Spawns and configures per-node rebirth loops.
#[derive(Clone)]
pub struct RebirthSpawner {
    client: AsyncClient,
    registry: Registry,
    shutdown: CancellationToken,
    period: Duration,
    retry: Duration,
}

impl RebirthSpawner {
    /// Creates a spawner publishing through `client`.
    pub fn new(
        client: AsyncClient,
        registry: Registry,
        shutdown: CancellationToken,
        period: Duration,
        retry: Duration,
    ) -> RebirthSpawner {
        RebirthSpawner { client, registry, shutdown, period, retry }
    }

    /// Starts the endless rebirth loop for one node.
    pub fn spawn(&self, node: NodeLabels) {
        let spawner = self.clone();
        tokio::spawn(async move {
            spawner.run(node).await;
        });
    }

    async fn run(self, node: NodeLabels) {
        let topic = command_topic(&node);

        loop {
            let delay = if self.registry.is_connected() {
                debug!(topic = %topic, "sending rebirth command");
                self.registry.inc_rebirth_attempt(&node);

                let payload = command_payload(now_millis()).encode_to_vec();
                match self.client.publish(topic.clone(), QoS::AtMostOnce, false, payload).await {
                    Ok(()) => self.registry.inc_rebirth_success(&node),
                    Err(error) => {
                        warn!(topic = %topic, %error, "failed to publish rebirth command");
                        self.registry.inc_rebirth_failure(&node);
                    }
                }

                self.period
            } else {
                self.registry.inc_rebirth_delayed(&node);
                self.retry
            };

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// The NCMD topic for a node.
pub(crate) fn command_topic(node: &NodeLabels) -> String {
    format!("{}/{}/NCMD/{}", node.namespace, node.group_id, node.edge_node_id)
}

/// The rebirth command payload: a single boolean metric set to `true`.
pub(crate) fn command_payload(timestamp_ms: u64) -> Payload {
    Payload {
        timestamp: Some(timestamp_ms),
        metrics: vec![Metric::new(
            NODE_REBIRTH_METRIC,
            DataType::Boolean,
            Value::BooleanValue(true),
        )],
        ..Default::default()
    }
}
