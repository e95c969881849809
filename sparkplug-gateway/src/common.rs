use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Program name used as the prefix for the gateway's own metric families.
pub const PROGNAME: &str = "sparkplug_gateway";

/// Crate version, exposed as the `version` label on the build-info gauge.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds between rebirth commands to a connected edge node.
pub const REBIRTH_PERIOD_SECS: u64 = 900;

/// Seconds between rebirth retries while the broker link is down.
pub const REBIRTH_RETRY_SECS: u64 = 60;

/// Upper bound on the broker reconnect interval.
pub const RECONNECT_MAX_SECS: u64 = 300;

/// Interval between connection attempts before the first successful connect.
pub const CONNECT_RETRY_SECS: u64 = 10;

/// The metric name carried by outbound rebirth commands.
pub const NODE_REBIRTH_METRIC: &str = "Node Control/Rebirth";

/// The device-level rebirth echo, passed through the name splitter
/// unchanged and dropped without being counted as invalid.
pub const DEVICE_REBIRTH_METRIC: &str = "Device Control/Rebirth";

/// Scan-rate housekeeping metric, dropped without being counted as invalid.
pub const SCAN_RATE_METRIC: &str = "Scan Rate ms";

/// Errors that could occur while building the gateway.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The broker address could not be parsed into scheme, host, and port.
    #[error("failed to parse MQTT broker address: {0}")]
    InvalidBrokerAddress(String),

    /// There was an issue when creating the HTTP listener.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// The given remote-write or Loki endpoint is not a valid URI.
    #[error("endpoint is not valid: {0}")]
    InvalidEndpoint(String),

    /// TLS material could not be read from disk.
    #[error("failed to read TLS material: {0}")]
    FailedToLoadTls(String),
}

/// Outcome of a registry observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObserveOutcome {
    /// The metric name was not present; a first slot was created.
    Created,
    /// The name existed but no slot matched the label-name multiset; a new
    /// slot was appended.
    Extended,
    /// An existing slot matched and its gauge was updated.
    Updated,
}

impl ObserveOutcome {
    /// Short human description, used in per-sample log lines.
    pub fn describe(self) -> &'static str {
        match self {
            ObserveOutcome::Created => "creating metric",
            ObserveOutcome::Extended => "creating new timeseries for existing metric",
            ObserveOutcome::Updated => "updating metric",
        }
    }
}

/// One gathered sample family member, as handed to the remote-write encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct GatheredSample {
    /// Family name.
    pub name: String,
    /// Label pairs in family order, before any rewrite.
    pub labels: Vec<(String, String)>,
    /// The value, typed so the encoder can expand composite families.
    pub value: SampleValue,
}

/// The typed value of a gathered sample.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    /// Monotonic counter.
    Counter(f64),
    /// Point-in-time gauge.
    Gauge(f64),
    /// Untyped passthrough.
    Untyped(f64),
    /// Aggregated summary: quantile/value pairs plus sum and count.
    Summary {
        /// `(quantile, value)` pairs.
        quantiles: Vec<(f64, f64)>,
        /// Sum of all observations.
        sum: f64,
        /// Count of all observations.
        count: u64,
    },
    /// Aggregated histogram: upper-bound/cumulative-count pairs plus sum
    /// and count.
    Histogram {
        /// `(le, cumulative count)` pairs.
        buckets: Vec<(f64, u64)>,
        /// Sum of all observations.
        sum: f64,
        /// Count of all observations.
        count: u64,
    },
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Seconds since the Unix epoch, fractional.
pub fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{now_millis, now_seconds};

    #[test]
    fn clocks_agree() {
        let millis = now_millis();
        let seconds = now_seconds();
        assert!(millis > 1_600_000_000_000);
        assert!((seconds - millis as f64 / 1000.0).abs() < 5.0);
    }
}
