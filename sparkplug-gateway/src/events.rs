//! The event path: non-numeric messages rendered as `key=value` log lines.
//!
//! A message routed to the event path is flattened into a fixed set of
//! fields taken from its topic and first metric, formatted as a
//! space-separated `k=v` line, and handed to the Loki shipper.

use sparkplug_proto::{DataType, Payload};

use crate::common::now_millis;
use crate::topic::{edge_node_segment, strip_prefix};

/// Field-level renames and drops applied before a line is emitted.
#[derive(Clone, Debug, Default)]
pub struct FieldRewrite {
    /// Renames; an empty target is a no-op.
    pub substitutions: Vec<(String, String)>,
    /// Fields removed from the line.
    pub drop: Vec<String>,
}

impl FieldRewrite {
    fn dropped(&self, field: &str) -> bool {
        self.drop.iter().any(|d| d == field)
    }

    fn renamed<'a>(&'a self, field: &'a str) -> &'a str {
        self.substitutions
            .iter()
            .find(|(from, to)| from == field && !to.is_empty())
            .map_or(field, |(_, to)| to.as_str())
    }
}

/// A formatted event waiting for batched delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventEntry {
    /// When the event happened, milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// The rendered `k=v` line.
    pub line: String,
}

/// The fields extracted from an event message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventRecord {
    /// Payload timestamp, or receive time when the payload carries none.
    pub time: u64,
    /// The topic with the configured prefix stripped.
    pub topic: String,
    /// Name of the first metric, empty when the payload has none.
    pub event_name: String,
    /// Display value of the first metric.
    pub event_value: String,
    /// Datatype name of the first metric.
    pub event_type: String,
    /// The topic segment at the configured edge-node position.
    pub edge_node: String,
}

impl EventRecord {
    /// Extracts the event fields from a message.
    pub fn from_message(
        raw_topic: &str,
        prefix: &str,
        payload: &Payload,
        edge_node_position: usize,
    ) -> EventRecord {
        let first = payload.metrics.first();
        let event_type = first
            .and_then(|m| DataType::from_u32(m.datatype()))
            .unwrap_or(DataType::Unknown)
            .name();

        EventRecord {
            time: payload.timestamp.unwrap_or_else(now_millis),
            topic: strip_prefix(raw_topic, prefix).to_string(),
            event_name: first.map(|m| m.name().to_string()).unwrap_or_default(),
            event_value: first.map(sparkplug_proto::Metric::display_value).unwrap_or_default(),
            event_type: event_type.to_string(),
            edge_node: edge_node_segment(raw_topic, prefix, edge_node_position)
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Renders the record as a space-separated `k=v` line, applying field
    /// substitutions and drops. Values containing whitespace are quoted.
    pub fn to_line(&self, rewrite: &FieldRewrite) -> String {
        let fields: [(&str, String); 6] = [
            ("time", self.time.to_string()),
            ("topic", self.topic.clone()),
            ("event_name", self.event_name.clone()),
            ("event_value", self.event_value.clone()),
            ("event_type", self.event_type.clone()),
            ("edge_node", self.edge_node.clone()),
        ];

        let mut line = String::new();
        for (field, value) in fields {
            if rewrite.dropped(field) {
                continue;
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(rewrite.renamed(field));
            line.push('=');
            push_value(&mut line, &value);
        }
        line
    }

    /// The record as a shippable entry.
    pub fn to_entry(&self, rewrite: &FieldRewrite) -> EventEntry {
        EventEntry { timestamp_ms: self.time, line: self.to_line(rewrite) }
    }
}

fn push_value(line: &mut String, value: &str) {
    if value.chars().any(char::is_whitespace) {
        line.push('"');
        for c in value.chars() {
            if c == '"' {
                line.push('\\');
            }
            line.push(c);
        }
        line.push('"');
    } else {
        line.push_str(value);
    }
}
