//! A gateway that converts Sparkplug-B telemetry received over MQTT into
//! Prometheus timeseries and Loki events.
//!
//! ## Basics
//!
//! The gateway subscribes to a Sparkplug namespace, decodes every device
//! data and device birth payload, and promotes each metric into a
//! timeseries keyed on its name and label-name multiset. The resulting
//! registry is served to Prometheus through a scrape endpoint and,
//! optionally, pushed to a remote-write endpoint on a timer. Messages a
//! decision tree classifies as events are formatted as `key=value` lines
//! and shipped to Loki in batches.
//!
//! ## High-level features
//!
//! - dynamic timeseries registry with per-sample label sets
//! - embedded path segments in metric names become labels
//! - per-edge-node rebirth commands to recover full metric inventories
//! - scrape endpoint plus optional remote-write and Loki push
//! - configurable label and field rewriting on both push paths
//!
//! ## Behavior
//!
//! Per-message failures (undecodable payloads, malformed metric names,
//! unresolvable routes) are logged and counted but never fatal: the
//! gateway's job is to keep the pipeline moving. Only startup
//! misconfiguration ends the process.
//!
//! ## Usage
//!
//! ```ignore
//! let gateway = GatewayBuilder::new()
//!     .with_mqtt_settings(settings)
//!     .with_remote_write("http://localhost:9090/api/v1/write",
//!         Duration::from_secs(30), Duration::from_secs(30), false)?
//!     .build()?;
//!
//! gateway.run().await?;
//! ```
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod common;
pub use self::common::{BuildError, GatheredSample, ObserveOutcome, SampleValue};

pub mod formatting;

mod topic;
pub use self::topic::{DeviceTopic, MessageType, NodeLabels, SiteLabels};

mod naming;
pub use self::naming::{split_metric_name, NameError, SplitName};

mod router;
pub use self::router::{Attributes, DecisionTree, Route, Router, TreeError};

mod registry;
pub use self::registry::{ObserveError, Registry};

mod handler;
pub use self::handler::{EventSink, MessagePipeline};

mod rebirth;
pub use self::rebirth::RebirthSpawner;

mod mqtt;
pub use self::mqtt::{ConnectError, MqttSettings};

pub mod logproto;
pub mod remote_write_proto;

mod events;
pub use self::events::{EventEntry, EventRecord, FieldRewrite};

mod exporter;
pub use self::exporter::{
    ExporterError, ExporterFuture, HttpListeningError, LokiConfig, RemoteWriteConfig,
};

mod builder;
pub use self::builder::{Gateway, GatewayBuilder};
