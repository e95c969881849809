//! Decomposition of Sparkplug topic names.
//!
//! Sparkplug puts five namespacing elements in the topic name:
//! `<namespace>/<group>/<message type>/<edge node>/<device>`. Only device
//! data and device birth messages carry metric samples; everything else is
//! skipped by the metric path but remains visible to the event path.

/// The nine Sparkplug message types, plus the host-application STATE topic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// Node birth certificate.
    NBirth,
    /// Node data.
    NData,
    /// Node death certificate.
    NDeath,
    /// Node command.
    NCmd,
    /// Device birth certificate.
    DBirth,
    /// Device data.
    DData,
    /// Device death certificate.
    DDeath,
    /// Device command.
    DCmd,
    /// Host application state.
    State,
}

impl MessageType {
    /// Parses the third topic segment.
    pub fn parse(segment: &str) -> Option<MessageType> {
        let message_type = match segment {
            "NBIRTH" => MessageType::NBirth,
            "NDATA" => MessageType::NData,
            "NDEATH" => MessageType::NDeath,
            "NCMD" => MessageType::NCmd,
            "DBIRTH" => MessageType::DBirth,
            "DDATA" => MessageType::DData,
            "DDEATH" => MessageType::DDeath,
            "DCMD" => MessageType::DCmd,
            "STATE" => MessageType::State,
            _ => return None,
        };
        Some(message_type)
    }
}

/// A fully-qualified device topic admitted to the metric path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceTopic {
    /// Sparkplug namespace element, e.g. `spBv1.0`.
    pub namespace: String,
    /// Group identifier.
    pub group_id: String,
    /// Message type; always [`MessageType::DData`] or [`MessageType::DBirth`].
    pub message_type: MessageType,
    /// Edge node identifier.
    pub edge_node_id: String,
    /// Device identifier.
    pub device_id: String,
}

impl DeviceTopic {
    /// Parses a raw topic, admitting only `DDATA`/`DBIRTH` topics with
    /// exactly five segments. Individual segment charsets are not
    /// validated.
    pub fn parse(raw: &str, prefix: &str) -> Option<DeviceTopic> {
        let parts: Vec<&str> = split_topic(raw, prefix).collect();
        if parts.len() != 5 {
            return None;
        }

        let message_type = MessageType::parse(parts[2])?;
        if !matches!(message_type, MessageType::DData | MessageType::DBirth) {
            return None;
        }

        Some(DeviceTopic {
            namespace: parts[0].to_string(),
            group_id: parts[1].to_string(),
            message_type,
            edge_node_id: parts[3].to_string(),
            device_id: parts[4].to_string(),
        })
    }

    /// The `group/node` key used by the edge-node table.
    pub fn node_key(&self) -> String {
        format!("{}/{}", self.group_id, self.edge_node_id)
    }

    /// The labels attached to commands and counters scoped to this node.
    pub fn node_labels(&self) -> NodeLabels {
        NodeLabels {
            namespace: self.namespace.clone(),
            group_id: self.group_id.clone(),
            edge_node_id: self.edge_node_id.clone(),
        }
    }

    /// The site labels attached to every sample from this topic.
    pub fn site_labels(&self) -> SiteLabels {
        SiteLabels {
            namespace: self.namespace.clone(),
            group_id: self.group_id.clone(),
            edge_node_id: self.edge_node_id.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

/// Strips the configured prefix then a leading `/` and splits the rest.
fn split_topic<'a>(raw: &'a str, prefix: &str) -> impl Iterator<Item = &'a str> {
    let stripped = raw.strip_prefix(prefix).unwrap_or(raw);
    let stripped = stripped.strip_prefix('/').unwrap_or(stripped);
    stripped.split('/')
}

/// Strips the configured prefix and the separator that follows it, for the
/// event path's `topic` field.
pub fn strip_prefix<'a>(raw: &'a str, prefix: &str) -> &'a str {
    let stripped = raw.strip_prefix(prefix).unwrap_or(raw);
    stripped.strip_prefix('/').unwrap_or(stripped)
}

/// The topic segment at `position`, used by the event path to name the
/// edge node. The position is configurable because deployments disagree on
/// where the node sits.
pub fn edge_node_segment<'a>(raw: &'a str, prefix: &str, position: usize) -> Option<&'a str> {
    split_topic(raw, prefix).nth(position)
}

/// The four topic-derived labels every sample carries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SiteLabels {
    /// Sparkplug namespace element.
    pub namespace: String,
    /// Group identifier.
    pub group_id: String,
    /// Edge node identifier.
    pub edge_node_id: String,
    /// Device identifier.
    pub device_id: String,
}

impl SiteLabels {
    /// Label names, in wire order.
    pub fn names() -> [&'static str; 4] {
        ["sp_namespace", "sp_group_id", "sp_edge_node_id", "sp_device_id"]
    }

    /// Label values, matching [`names`](Self::names).
    pub fn values(&self) -> [&str; 4] {
        [&self.namespace, &self.group_id, &self.edge_node_id, &self.device_id]
    }
}

/// The three labels scoped to an edge node rather than a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeLabels {
    /// Sparkplug namespace element.
    pub namespace: String,
    /// Group identifier.
    pub group_id: String,
    /// Edge node identifier.
    pub edge_node_id: String,
}

impl NodeLabels {
    /// Label names, in wire order.
    pub fn names() -> [&'static str; 3] {
        ["sp_namespace", "sp_group_id", "sp_edge_node_id"]
    }

    /// Label values, matching [`names`](Self::names).
    pub fn values(&self) -> [&str; 3] {
        [&self.namespace, &self.group_id, &self.edge_node_id]
    }
}

#[cfg(test)]
mod tests {
    use super::{edge_node_segment, strip_prefix, DeviceTopic, MessageType};

    #[test]
    fn admits_ddata_and_dbirth_with_five_parts() {
        let topic = DeviceTopic::parse("spBv1.0/GroupA/DDATA/Node1/Bus", "").unwrap();
        assert_eq!(topic.namespace, "spBv1.0");
        assert_eq!(topic.group_id, "GroupA");
        assert_eq!(topic.message_type, MessageType::DData);
        assert_eq!(topic.edge_node_id, "Node1");
        assert_eq!(topic.device_id, "Bus");

        let topic = DeviceTopic::parse("spBv1.0/GroupA/DBIRTH/Node1/Bus", "").unwrap();
        assert_eq!(topic.message_type, MessageType::DBirth);
    }

    #[test]
    fn rejects_non_device_message_types() {
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA/NDATA/Node1", ""), None);
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA/NBIRTH/Node1", ""), None);
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA/NCMD/Node1", ""), None);
        assert_eq!(DeviceTopic::parse("spBv1.0/STATE/host", ""), None);
    }

    #[test]
    fn rejects_wrong_segment_counts() {
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA/DDATA/Node1", ""), None);
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA/DDATA/Node1/Bus/Extra", ""), None);
        assert_eq!(DeviceTopic::parse("spBv1.0/GroupA", ""), None);
        assert_eq!(DeviceTopic::parse("", ""), None);
    }

    #[test]
    fn strips_the_configured_prefix() {
        let topic =
            DeviceTopic::parse("prometheus/spBv1.0/GroupA/DDATA/Node1/Bus", "prometheus").unwrap();
        assert_eq!(topic.namespace, "spBv1.0");

        // A missing prefix is not an error; the topic is parsed as-is.
        let topic = DeviceTopic::parse("spBv1.0/GroupA/DDATA/Node1/Bus", "prometheus");
        assert!(topic.is_some());

        assert_eq!(
            strip_prefix("prometheus/spBv1.0/GroupA/DDATA/Node1/Bus", "prometheus"),
            "spBv1.0/GroupA/DDATA/Node1/Bus"
        );
    }

    #[test]
    fn edge_node_position_is_configurable() {
        let raw = "spBv1.0/GroupA/DDATA/Node1/Bus";
        assert_eq!(edge_node_segment(raw, "", 3), Some("Node1"));
        assert_eq!(edge_node_segment(raw, "", 4), Some("Bus"));
        assert_eq!(edge_node_segment(raw, "", 9), None);
    }

    #[test]
    fn node_key_is_group_and_node() {
        let topic = DeviceTopic::parse("spBv1.0/GroupA/DDATA/Node1/Bus", "").unwrap();
        assert_eq!(topic.node_key(), "GroupA/Node1");
    }
}
