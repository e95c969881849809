//! Per-message dispatch: decode, route, and apply a Sparkplug message.

use prost::Message as _;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use sparkplug_proto::Payload;

use crate::events::{EventEntry, EventRecord, FieldRewrite};
use crate::naming::split_metric_name;
use crate::rebirth::RebirthSpawner;
use crate::registry::Registry;
use crate::router::{Attributes, Route, Router};
use crate::topic::DeviceTopic;

/// Where formatted events go for batched delivery.
pub struct EventSink {
    sender: mpsc::Sender<EventEntry>,
    rewrite: FieldRewrite,
}

impl EventSink {
    /// Creates a sink feeding the Loki shipper through `sender`.
    pub fn new(sender: mpsc::Sender<EventEntry>, rewrite: FieldRewrite) -> EventSink {
        EventSink { sender, rewrite }
    }
}

/// The message pipeline invoked for every inbound MQTT delivery.
pub struct MessagePipeline {
    registry: Registry,
    router: Router,
    prefix: String,
    edge_node_position: usize,
    rebirth: Option<RebirthSpawner>,
    events: Option<EventSink>,
}

impl MessagePipeline {
    /// Wires the pipeline. `rebirth` is absent only when there is no
    /// broker client to publish through (tests); `events` is absent when
    /// Loki shipping is disabled.
    pub fn new(
        registry: Registry,
        router: Router,
        prefix: impl Into<String>,
        edge_node_position: usize,
        rebirth: Option<RebirthSpawner>,
        events: Option<EventSink>,
    ) -> MessagePipeline {
        MessagePipeline {
            registry,
            router,
            prefix: prefix.into(),
            edge_node_position,
            rebirth,
            events,
        }
    }

    /// Handles one inbound publish.
    ///
    /// Decode and routing failures are fatal to the message, never to the
    /// connection: they log, and nothing else happens.
    pub fn handle_publish(&self, topic: &str, bytes: &[u8]) {
        let payload = match Payload::decode(bytes) {
            Ok(payload) => payload,
            Err(error) => {
                error!(topic, %error, "failed to decode Sparkplug payload");
                return;
            }
        };

        debug!(topic, metrics = payload.metrics.len(), "received message");

        let attributes = Attributes::from_payload(&payload);
        match self.router.route(&attributes) {
            Ok(Route::Metric) => self.handle_metric(topic, &payload),
            Ok(Route::Event) => self.handle_event(topic, &payload),
            Err(error) => error!(topic, %error, "failed to resolve message route"),
        }
    }

    fn handle_metric(&self, raw_topic: &str, payload: &Payload) {
        let Some(topic) = DeviceTopic::parse(raw_topic, &self.prefix) else {
            debug!(topic = raw_topic, "ignoring topic without device data");
            return;
        };

        let site = topic.site_labels();

        if self.registry.note_edge_node(topic.node_key()) {
            if let Some(rebirth) = &self.rebirth {
                rebirth.spawn(topic.node_labels());
            }
        } else {
            debug!(node = %topic.node_key(), "known edge node");
        }

        for metric in &payload.metrics {
            let split = match split_metric_name(metric.name()) {
                Ok(split) => split,
                Err(name_error) => {
                    if !name_error.silent {
                        error!(
                            node = %site.edge_node_id,
                            name = metric.name(),
                            %name_error,
                            "dropping metric",
                        );
                        self.registry.inc_invalid_name(&site);
                    }
                    continue;
                }
            };

            let Some(value) = metric.as_float() else {
                debug!(name = %split.metric_name, "skipping non-numeric metric");
                continue;
            };

            match self.registry.observe(&site, &split.metric_name, &split.extra_labels, value) {
                Ok(outcome) => {
                    info!(
                        name = %split.metric_name,
                        value,
                        node = %site.edge_node_id,
                        "{}",
                        outcome.describe(),
                    );
                }
                Err(error) => error!(name = %split.metric_name, %error, "dropping sample"),
            }
        }
    }

    fn handle_event(&self, raw_topic: &str, payload: &Payload) {
        let Some(sink) = &self.events else {
            debug!(topic = raw_topic, "event shipping disabled; dropping message");
            return;
        };

        let record =
            EventRecord::from_message(raw_topic, &self.prefix, payload, self.edge_node_position);
        let entry = record.to_entry(&sink.rewrite);

        if let Err(error) = sink.sender.try_send(entry) {
            error!(topic = raw_topic, %error, "event shipper backlogged; dropping event");
        }
    }
}
