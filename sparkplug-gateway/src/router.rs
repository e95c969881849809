//! The decision tree that routes a message to the metric or event path.
//!
//! The tree is a flat array of records with parent pointers, loaded from a
//! JSON file once at startup. Resolution walks from the root, evaluating
//! children in declaration order: a node carrying an operator gates on its
//! predicate, a node without one matches unconditionally, and the first
//! descendant reached with a non-empty `name` is the verdict. This accepts
//! both observed tree shapes (operator nodes that are themselves named
//! leaves, and unnamed operator nodes with named children).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use sparkplug_proto::Payload;

/// Which handler a message is routed to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    /// The message carries samples for the registry.
    Metric,
    /// The message is shipped as a log event.
    Event,
}

/// The attribute mapping the tree's predicates evaluate against.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    values: HashMap<String, String>,
}

impl Attributes {
    /// Derives the routing attributes from a decoded payload.
    pub fn from_payload(payload: &Payload) -> Attributes {
        let mut values = HashMap::new();
        values.insert("firstMetricIs".to_string(), payload.first_metric_name().to_string());
        values.insert("metricsLen".to_string(), payload.metrics.len().to_string());
        Attributes { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Attributes {
        Attributes {
            values: pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        }
    }
}

/// Errors from loading or resolving a decision tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The tree file could not be read.
    #[error("failed to read decision tree file: {0}")]
    Io(#[from] std::io::Error),

    /// The tree file is not valid JSON.
    #[error("failed to parse decision tree: {0}")]
    Parse(#[from] serde_json::Error),

    /// No node without a parent was found.
    #[error("decision tree has no root node")]
    NoRoot,

    /// A node carries an operator the resolver does not know.
    #[error("unknown operator {0:?} in decision tree node {1}")]
    UnknownOperator(String, u64),

    /// A node carries an operator but no key to apply it to.
    #[error("decision tree node {0} has an operator but no key")]
    MissingKey(u64),

    /// A predicate referenced an attribute the message does not have.
    #[error("attribute {0:?} is not present in the message")]
    MissingAttribute(String),

    /// No descendant with a name matched the attributes.
    #[error("decision tree resolution reached no named node")]
    Unresolved,
}

/// One record of the flat tree array.
#[derive(Clone, Debug, Deserialize)]
pub struct TreeNode {
    /// Node identifier.
    pub id: u64,
    /// Parent identifier; absent on the root.
    #[serde(default, alias = "parentId")]
    pub parent_id: Option<u64>,
    /// Terminal name; `metric` routes to the registry, anything else to
    /// the event path.
    #[serde(default)]
    pub name: Option<String>,
    /// Attribute the predicate reads.
    #[serde(default)]
    pub key: Option<String>,
    /// Predicate operator.
    #[serde(default)]
    pub operator: Option<String>,
    /// Predicate operand.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl TreeNode {
    fn leaf_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    fn operand(&self) -> String {
        match &self.value {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Evaluates this node's predicate. Nodes without an operator match
    /// unconditionally.
    fn matches(&self, attributes: &Attributes) -> Result<bool, TreeError> {
        let Some(operator) = self.operator.as_deref() else {
            return Ok(true);
        };

        let key = self.key.as_deref().ok_or(TreeError::MissingKey(self.id))?;
        let attribute = attributes
            .get(key)
            .ok_or_else(|| TreeError::MissingAttribute(key.to_string()))?;
        let operand = self.operand();

        let matched = match operator {
            "eq" => attribute == operand,
            "ne" => attribute != operand,
            "contains" => attribute.contains(&operand),
            "lt" | "le" | "lte" | "gt" | "ge" | "gte" => {
                match (attribute.parse::<f64>(), operand.parse::<f64>()) {
                    (Ok(a), Ok(b)) => match operator {
                        "lt" => a < b,
                        "le" | "lte" => a <= b,
                        "gt" => a > b,
                        _ => a >= b,
                    },
                    // Non-numeric operands simply fail the predicate.
                    _ => false,
                }
            }
            other => return Err(TreeError::UnknownOperator(other.to_string(), self.id)),
        };

        Ok(matched)
    }
}

/// A loaded decision tree.
#[derive(Clone, Debug)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
    root: u64,
}

impl DecisionTree {
    /// Parses a tree from its JSON representation.
    pub fn from_json(data: &[u8]) -> Result<DecisionTree, TreeError> {
        let nodes: Vec<TreeNode> = serde_json::from_slice(data)?;
        let root = nodes
            .iter()
            .find(|node| node.parent_id.is_none() || node.parent_id == Some(0))
            .map(|node| node.id)
            .ok_or(TreeError::NoRoot)?;
        Ok(DecisionTree { nodes, root })
    }

    /// Loads a tree from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<DecisionTree, TreeError> {
        let data = std::fs::read(path)?;
        DecisionTree::from_json(&data)
    }

    fn children(&self, parent: u64) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(move |node| node.parent_id == Some(parent))
    }

    /// Walks the tree and returns the name of the first matching named
    /// descendant.
    pub fn resolve(&self, attributes: &Attributes) -> Result<&str, TreeError> {
        let mut current = self.root;

        // A well-formed tree is walked in at most nodes.len() steps; going
        // past that means the parent pointers form a cycle.
        for _ in 0..=self.nodes.len() {
            let mut advanced = false;
            for child in self.children(current) {
                if child.matches(attributes)? {
                    if let Some(name) = child.leaf_name() {
                        return Ok(name);
                    }
                    current = child.id;
                    advanced = true;
                    break;
                }
            }

            if !advanced {
                return Err(TreeError::Unresolved);
            }
        }

        Err(TreeError::Unresolved)
    }
}

/// Routes messages using an optional decision tree.
///
/// Without a tree every message is a metric; a tree load failure at
/// startup degrades to this mode rather than failing the process.
#[derive(Clone, Debug, Default)]
pub struct Router {
    tree: Option<DecisionTree>,
}

impl Router {
    /// A router without a tree: everything is a metric.
    pub fn metric_only() -> Router {
        Router { tree: None }
    }

    /// A router backed by a decision tree.
    pub fn with_tree(tree: DecisionTree) -> Router {
        Router { tree: Some(tree) }
    }

    /// Resolves a message's route. Leaf names other than `metric` route to
    /// the event path.
    pub fn route(&self, attributes: &Attributes) -> Result<Route, TreeError> {
        let Some(tree) = &self.tree else {
            return Ok(Route::Metric);
        };

        let name = tree.resolve(attributes)?;
        Ok(if name == "metric" { Route::Metric } else { Route::Event })
    }
}

#[cfg(test)]
mod tests {
    use super::{Attributes, DecisionTree, Route, Router, TreeError};

    // Shape with unnamed operator nodes and named children.
    const SCAN_RATE_TREE: &str = r#"[
        {"id": 1, "name": "root"},
        {"id": 2, "parent_id": 1, "value": "Device Control/Scan Rate ms", "operator": "eq", "key": "firstMetricIs"},
        {"id": 3, "parent_id": 1, "value": "Device Control/Scan Rate ms", "operator": "ne", "key": "firstMetricIs"},
        {"id": 4, "name": "metric", "parent_id": 2},
        {"id": 5, "name": "event", "parent_id": 3}
    ]"#;

    // Same decision expressed with named operator nodes.
    const FLAT_SCAN_RATE_TREE: &str = r#"[
        {"id": 1, "name": "root"},
        {"id": 2, "parent_id": 1, "name": "metric", "value": "Device Control/Scan Rate ms", "operator": "eq", "key": "firstMetricIs"},
        {"id": 3, "parent_id": 1, "name": "event", "value": "Device Control/Scan Rate ms", "operator": "ne", "key": "firstMetricIs"}
    ]"#;

    fn attrs(first_metric: &str) -> Attributes {
        Attributes::from_pairs(&[("firstMetricIs", first_metric), ("metricsLen", "1")])
    }

    #[test]
    fn absent_tree_routes_everything_to_metrics() {
        let router = Router::metric_only();
        assert_eq!(router.route(&attrs("Temperature")).unwrap(), Route::Metric);
        assert_eq!(router.route(&attrs("")).unwrap(), Route::Metric);
    }

    #[test]
    fn grandchild_shape_resolves() {
        let tree = DecisionTree::from_json(SCAN_RATE_TREE.as_bytes()).unwrap();
        let router = Router::with_tree(tree);

        assert_eq!(router.route(&attrs("Device Control/Scan Rate ms")).unwrap(), Route::Metric);
        assert_eq!(router.route(&attrs("Temperature")).unwrap(), Route::Event);
    }

    #[test]
    fn named_leaf_shape_resolves_identically() {
        let tree = DecisionTree::from_json(FLAT_SCAN_RATE_TREE.as_bytes()).unwrap();
        let router = Router::with_tree(tree);

        assert_eq!(router.route(&attrs("Device Control/Scan Rate ms")).unwrap(), Route::Metric);
        assert_eq!(router.route(&attrs("Temperature")).unwrap(), Route::Event);
    }

    #[test]
    fn children_evaluate_in_declaration_order() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "event", "operator": "contains", "key": "firstMetricIs", "value": "Rate"},
                {"id": 3, "parent_id": 1, "name": "metric", "operator": "contains", "key": "firstMetricIs", "value": "Scan"}
            ]"#
            .as_bytes(),
        )
        .unwrap();

        // Both predicates match; the first declared child wins.
        let verdict = tree.resolve(&attrs("Scan Rate ms")).unwrap();
        assert_eq!(verdict, "event");
    }

    #[test]
    fn unknown_leaf_names_route_to_events() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "mystery"}
            ]"#
            .as_bytes(),
        )
        .unwrap();
        let router = Router::with_tree(tree);
        assert_eq!(router.route(&attrs("anything")).unwrap(), Route::Event);
    }

    #[test]
    fn numeric_operators_compare_as_floats() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "metric", "operator": "ge", "key": "metricsLen", "value": 2},
                {"id": 3, "parent_id": 1, "name": "event"}
            ]"#
            .as_bytes(),
        )
        .unwrap();

        let many = Attributes::from_pairs(&[("firstMetricIs", "a"), ("metricsLen", "3")]);
        let few = Attributes::from_pairs(&[("firstMetricIs", "a"), ("metricsLen", "1")]);
        assert_eq!(tree.resolve(&many).unwrap(), "metric");
        assert_eq!(tree.resolve(&few).unwrap(), "event");
    }

    #[test]
    fn unknown_operator_fails_resolution() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "metric", "operator": "regexp", "key": "firstMetricIs", "value": ".*"}
            ]"#
            .as_bytes(),
        )
        .unwrap();

        assert!(matches!(
            tree.resolve(&attrs("x")),
            Err(TreeError::UnknownOperator(op, 2)) if op == "regexp"
        ));
    }

    #[test]
    fn operator_without_key_fails_resolution() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "metric", "operator": "eq", "value": "x"}
            ]"#
            .as_bytes(),
        )
        .unwrap();

        assert!(matches!(tree.resolve(&attrs("x")), Err(TreeError::MissingKey(2))));
    }

    #[test]
    fn tree_without_root_is_rejected() {
        let result = DecisionTree::from_json(
            r#"[{"id": 2, "parent_id": 1, "name": "metric"}]"#.as_bytes(),
        );
        assert!(matches!(result, Err(TreeError::NoRoot)));
    }

    #[test]
    fn no_matching_branch_is_an_error() {
        let tree = DecisionTree::from_json(
            r#"[
                {"id": 1, "name": "root"},
                {"id": 2, "parent_id": 1, "name": "metric", "operator": "eq", "key": "firstMetricIs", "value": "exact"}
            ]"#
            .as_bytes(),
        )
        .unwrap();

        assert!(matches!(tree.resolve(&attrs("other")), Err(TreeError::Unresolved)));
    }

    #[test]
    fn attributes_come_from_the_payload() {
        use sparkplug_proto::{metric::Value, DataType, Metric, Payload};

        let payload = Payload {
            metrics: vec![Metric::new("Temperature", DataType::Double, Value::DoubleValue(20.0))],
            ..Default::default()
        };
        let attributes = Attributes::from_payload(&payload);
        assert_eq!(attributes.get("firstMetricIs"), Some("Temperature"));
        assert_eq!(attributes.get("metricsLen"), Some("1"));
    }
}
