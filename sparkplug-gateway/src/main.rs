use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sparkplug_gateway::{
    DecisionTree, Gateway, GatewayBuilder, MqttSettings, Router,
};

mod pairs {
    /// Splits a `key=value` command-line argument, for clap.
    pub fn parse(raw: &str) -> Result<(String, String), String> {
        match raw.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(format!("expected a key=value pair, got: {raw}")),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sparkplug-gateway", version, about = "Exposes Sparkplug-B telemetry as Prometheus timeseries and Loki events")]
struct Cli {
    /// Address on which to expose metrics and web interface.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9337")]
    listen_address: SocketAddr,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Disable the scrape endpoint entirely.
    #[arg(long = "web.disable-telemetry")]
    disable_telemetry: bool,

    /// Address of the MQTT broker.
    #[arg(long = "mqtt.broker-address", default_value = "tcp://localhost:1883")]
    broker_address: String,

    /// MQTT topic to subscribe to.
    #[arg(long = "mqtt.topic", default_value = "prometheus/#")]
    topic: String,

    /// MQTT topic prefix to remove when creating metrics.
    #[arg(long = "mqtt.prefix", default_value = "prometheus")]
    prefix: String,

    /// MQTT client identifier (limit to 23 characters).
    #[arg(long = "mqtt.client-id", default_value = "sparkplug-gateway")]
    client_id: String,

    /// MQTT username.
    #[arg(long = "mqtt.username")]
    username: Option<String>,

    /// MQTT password.
    #[arg(long = "mqtt.password")]
    password: Option<String>,

    /// CA certificate file for TLS connections to the broker.
    #[arg(long = "mqtt.ca.crt.file")]
    ca_file: Option<PathBuf>,

    /// Client certificate file for mutual TLS.
    #[arg(long = "mqtt.crt.file")]
    cert_file: Option<PathBuf>,

    /// Client key file for mutual TLS.
    #[arg(long = "mqtt.key.file")]
    key_file: Option<PathBuf>,

    /// Skip verification of the broker certificate.
    #[arg(long = "mqtt.insecure-skip-verify")]
    insecure_skip_verify: bool,

    /// Keep retrying the initial broker connection instead of exiting.
    #[arg(long = "mqtt.conn.retry")]
    conn_retry: bool,

    /// Enable verbose MQTT library logging.
    #[arg(long = "mqtt.debug")]
    mqtt_debug: bool,

    /// Enable pushing samples to a remote-write endpoint.
    #[arg(long = "remote-write.enabled")]
    remote_write_enabled: bool,

    /// Remote-write endpoint to push to.
    #[arg(
        long = "remote-write.endpoint",
        default_value = "http://localhost:9090/api/v1/write"
    )]
    remote_write_endpoint: String,

    /// Label appended to every outbound series (repeatable).
    #[arg(long = "remote-write.extra-label", value_name = "KEY=VALUE", value_parser = pairs::parse)]
    remote_write_extra_labels: Vec<(String, String)>,

    /// Label renamed on every outbound series (repeatable).
    #[arg(long = "remote-write.replace-label", value_name = "KEY=NEWKEY", value_parser = pairs::parse)]
    remote_write_replace_labels: Vec<(String, String)>,

    /// Label dropped from every outbound series (repeatable).
    #[arg(long = "remote-write.drop-label", value_name = "KEY")]
    remote_write_drop_labels: Vec<String>,

    /// Remote-write request timeout, in seconds.
    #[arg(long = "remote-write.timeout", value_name = "SECONDS", default_value_t = 30)]
    remote_write_timeout: u64,

    /// Interval between remote-write pushes, in seconds.
    #[arg(long = "remote-write.send-every", value_name = "SECONDS", default_value_t = 30)]
    remote_write_send_every: u64,

    /// Retry remote-write requests rejected with HTTP 429.
    #[arg(long = "remote-write.retry-on-rate-limit")]
    remote_write_retry_on_rate_limit: bool,

    /// Enable shipping events to a Loki endpoint.
    #[arg(long = "loki.enabled")]
    loki_enabled: bool,

    /// Loki push endpoint.
    #[arg(
        long = "loki.push-URL",
        default_value = "http://localhost:3100/loki/api/v1/push"
    )]
    loki_push_url: String,

    /// Stream label attached to every pushed batch (repeatable).
    #[arg(long = "loki.extra-label", value_name = "KEY=VALUE", value_parser = pairs::parse)]
    loki_extra_labels: Vec<(String, String)>,

    /// Event field renamed before lines are formatted (repeatable).
    #[arg(long = "loki.replace-field", value_name = "FIELD=NEWFIELD", value_parser = pairs::parse)]
    loki_replace_fields: Vec<(String, String)>,

    /// Event field dropped before lines are formatted (repeatable).
    #[arg(long = "loki.drop-field", value_name = "FIELD")]
    loki_drop_fields: Vec<String>,

    /// How long events may sit before a batch is flushed, in seconds.
    #[arg(long = "loki.batch-wait", value_name = "SECONDS", default_value_t = 5)]
    loki_batch_wait: u64,

    /// JSON file holding the metric/event decision tree.
    #[arg(long = "decision-tree.file")]
    decision_tree_file: Option<PathBuf>,

    /// Topic segment naming the edge node on the event path.
    #[arg(long = "edge-node.position", default_value_t = 3)]
    edge_node_position: usize,

    /// Job name labelling the gateway's own counters.
    #[arg(long = "job", default_value = "sparkplug-gateway")]
    job: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            broker_address: self.broker_address.clone(),
            client_id: self.client_id.clone(),
            topic: self.topic.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ca_file: self.ca_file.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
            connect_retry: self.conn_retry,
        }
    }

    fn router(&self) -> Router {
        let Some(path) = &self.decision_tree_file else {
            return Router::metric_only();
        };

        match DecisionTree::from_file(path) {
            Ok(tree) => {
                info!(file = %path.display(), "loaded decision tree");
                Router::with_tree(tree)
            }
            Err(error) => {
                // A broken tree degrades to metric-only operation rather
                // than taking the gateway down.
                warn!(file = %path.display(), %error, "failed to load decision tree; treating every message as a metric");
                Router::metric_only()
            }
        }
    }

    fn build(self) -> Result<Gateway, Box<dyn std::error::Error>> {
        let router = self.router();
        let mut builder = GatewayBuilder::new()
            .with_mqtt_settings(self.mqtt_settings())
            .with_router(router)
            .with_topic_prefix(self.prefix)
            .with_job(self.job)
            .with_edge_node_position(self.edge_node_position);

        builder = if self.disable_telemetry {
            builder.disable_http_listener()
        } else {
            builder
                .with_http_listener(self.listen_address)
                .with_telemetry_path(self.telemetry_path)
        };

        if self.remote_write_enabled {
            builder = builder.with_remote_write(
                &self.remote_write_endpoint,
                Duration::from_secs(self.remote_write_send_every),
                Duration::from_secs(self.remote_write_timeout),
                self.remote_write_retry_on_rate_limit,
            )?;
            for (name, value) in self.remote_write_extra_labels {
                builder = builder.add_remote_write_label(name, value);
            }
            for (from, to) in self.remote_write_replace_labels {
                builder = builder.replace_remote_write_label(from, to);
            }
            for name in self.remote_write_drop_labels {
                builder = builder.drop_remote_write_label(name);
            }
        }

        if self.loki_enabled {
            builder = builder
                .with_loki_push(&self.loki_push_url, Duration::from_secs(self.loki_batch_wait))?;
            for (name, value) in self.loki_extra_labels {
                builder = builder.add_loki_label(name, value);
            }
            for (from, to) in self.loki_replace_fields {
                builder = builder.replace_event_field(from, to);
            }
            for name in self.loki_drop_fields {
                builder = builder.drop_event_field(name);
            }
        }

        Ok(builder.build()?)
    }
}

fn init_tracing(log_level: &str, mqtt_debug: bool) {
    let rumqttc_level = if mqtt_debug { "debug" } else { "warn" };
    let directives = format!("{log_level},rumqttc={rumqttc_level}");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.mqtt_debug);

    let gateway = match cli.build() {
        Ok(gateway) => gateway,
        Err(error) => {
            error!(%error, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting gateway");

    match gateway.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "exiting");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["sparkplug-gateway"]);
        assert_eq!(cli.broker_address, "tcp://localhost:1883");
        assert_eq!(cli.topic, "prometheus/#");
        assert_eq!(cli.prefix, "prometheus");
        assert_eq!(cli.telemetry_path, "/metrics");
        assert_eq!(cli.remote_write_endpoint, "http://localhost:9090/api/v1/write");
        assert_eq!(cli.loki_push_url, "http://localhost:3100/loki/api/v1/push");
        assert_eq!(cli.remote_write_send_every, 30);
        assert_eq!(cli.loki_batch_wait, 5);
        assert_eq!(cli.edge_node_position, 3);
        assert!(!cli.remote_write_enabled);
        assert!(!cli.loki_enabled);
    }

    #[test]
    fn repeated_pair_flags_accumulate() {
        let cli = Cli::parse_from([
            "sparkplug-gateway",
            "--remote-write.enabled",
            "--remote-write.extra-label",
            "env=prod",
            "--remote-write.extra-label",
            "region=eu",
            "--remote-write.replace-label",
            "sp_namespace=ns",
            "--remote-write.drop-label",
            "sp_device_id",
        ]);

        assert_eq!(
            cli.remote_write_extra_labels,
            vec![("env".to_string(), "prod".to_string()), ("region".to_string(), "eu".to_string())]
        );
        assert_eq!(
            cli.remote_write_replace_labels,
            vec![("sp_namespace".to_string(), "ns".to_string())]
        );
        assert_eq!(cli.remote_write_drop_labels, vec!["sp_device_id".to_string()]);
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        let result = Cli::try_parse_from([
            "sparkplug-gateway",
            "--loki.extra-label",
            "missing-separator",
        ]);
        assert!(result.is_err());
    }
}
