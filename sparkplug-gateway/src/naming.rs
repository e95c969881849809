//! Splitting of Sparkplug metric identifiers into a metric name and extra
//! labels.
//!
//! Sparkplug metric names frequently embed a path (`Motor/RPM`) or inline
//! label pairs (`line:3/RPM`). The final path segment becomes the exported
//! metric name; the earlier segments become labels so the path information
//! survives without exploding the metric namespace.

use thiserror::Error;

use crate::common::{DEVICE_REBIRTH_METRIC, SCAN_RATE_METRIC};
use crate::formatting::{sanitize_label_key, valid_metric_name};

/// Label name given to the path segment at `index` when the segment does
/// not carry its own `k:v` name.
fn positional_label_name(index: usize) -> String {
    format!("sp_path_{index}")
}

/// A rejected metric identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("metric name {metric_name:?} is not a valid identifier")]
pub struct NameError {
    /// The name after path splitting, as it failed validation.
    pub metric_name: String,
    /// Housekeeping names are dropped without logging or counting.
    pub silent: bool,
}

/// The result of splitting a metric identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SplitName {
    /// The exported metric name (the final path segment).
    pub metric_name: String,
    /// Extra labels recovered from the earlier path segments.
    pub extra_labels: Vec<(String, String)>,
}

/// Splits `name` into an exported metric name and extra labels, and
/// validates the result.
///
/// The device-level rebirth echo passes through unchanged (and fails
/// validation silently); `k:v`-shaped segments contribute a named label;
/// any other leading segment gets a positional label name.
pub fn split_metric_name(name: &str) -> Result<SplitName, NameError> {
    let mut extra_labels = Vec::new();

    let metric_name = if name == DEVICE_REBIRTH_METRIC {
        name
    } else if name.contains('/') {
        let mut segments: Vec<&str> = name.split('/').collect();
        // len >= 2 here since the name contains at least one separator
        let last = segments.pop().unwrap_or(name);
        for (index, segment) in segments.iter().enumerate() {
            match segment.split_once(':') {
                Some((key, value)) if !key.is_empty() => {
                    extra_labels.push((sanitize_label_key(key), value.to_string()));
                }
                _ => {
                    extra_labels.push((positional_label_name(index), (*segment).to_string()));
                }
            }
        }
        last
    } else {
        name
    };

    if !valid_metric_name(metric_name) {
        return Err(NameError {
            metric_name: metric_name.to_string(),
            silent: metric_name == DEVICE_REBIRTH_METRIC || metric_name == SCAN_RATE_METRIC,
        });
    }

    Ok(SplitName { metric_name: metric_name.to_string(), extra_labels })
}
