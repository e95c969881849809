//! Builder wiring the gateway's components and tasks together.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hyper::Uri;
use rumqttc::AsyncClient;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::{BuildError, PROGNAME, REBIRTH_PERIOD_SECS, REBIRTH_RETRY_SECS, VERSION};
use crate::events::FieldRewrite;
use crate::exporter::{
    new_http_listener, new_loki_push, new_remote_write, ExporterError, ExporterFuture, LokiConfig,
    RemoteWriteConfig,
};
use crate::handler::{EventSink, MessagePipeline};
use crate::mqtt::{run_mqtt_loop, MqttSettings};
use crate::rebirth::RebirthSpawner;
use crate::registry::Registry;
use crate::remote_write_proto::LabelRewrite;
use crate::router::Router;

/// Builder for creating and running the gateway.
pub struct GatewayBuilder {
    mqtt: MqttSettings,
    prefix: String,
    router: Router,
    job: String,
    user_agent: String,
    listen_address: Option<SocketAddr>,
    telemetry_path: String,
    edge_node_position: usize,
    rebirth_period: Duration,
    rebirth_retry: Duration,
    remote_write: Option<RemoteWriteConfig>,
    loki: Option<LokiConfig>,
    field_rewrite: FieldRewrite,
}

impl GatewayBuilder {
    /// Creates a new [`GatewayBuilder`] with the stock defaults: scrape
    /// endpoint on `0.0.0.0:9337` at `/metrics`, no remote write, no Loki
    /// shipping.
    pub fn new() -> GatewayBuilder {
        GatewayBuilder {
            mqtt: MqttSettings::default(),
            prefix: "prometheus".to_string(),
            router: Router::metric_only(),
            job: PROGNAME.to_string(),
            user_agent: format!("{PROGNAME}/{VERSION}"),
            listen_address: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 9337)),
            telemetry_path: "/metrics".to_string(),
            edge_node_position: 3,
            rebirth_period: Duration::from_secs(REBIRTH_PERIOD_SECS),
            rebirth_retry: Duration::from_secs(REBIRTH_RETRY_SECS),
            remote_write: None,
            loki: None,
            field_rewrite: FieldRewrite::default(),
        }
    }

    /// Sets the broker connection settings.
    #[must_use]
    pub fn with_mqtt_settings(mut self, settings: MqttSettings) -> Self {
        self.mqtt = settings;
        self
    }

    /// Sets the topic prefix removed when parsing topics.
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the router. Defaults to routing every message to the metric
    /// path.
    #[must_use]
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Sets the job name labelling the connection counters.
    #[must_use]
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    /// Sets the `User-Agent` presented to push endpoints.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Configures the scrape endpoint listen address.
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen_address = Some(addr.into());
        self
    }

    /// Disables the scrape endpoint entirely.
    #[must_use]
    pub fn disable_http_listener(mut self) -> Self {
        self.listen_address = None;
        self
    }

    /// Sets the path the scrape endpoint responds on.
    #[must_use]
    pub fn with_telemetry_path(mut self, path: impl Into<String>) -> Self {
        self.telemetry_path = path.into();
        self
    }

    /// Sets which topic segment names the edge node on the event path.
    #[must_use]
    pub fn with_edge_node_position(mut self, position: usize) -> Self {
        self.edge_node_position = position;
        self
    }

    /// Overrides the rebirth loop timers.
    #[must_use]
    pub fn with_rebirth_timers(mut self, period: Duration, retry: Duration) -> Self {
        self.rebirth_period = period;
        self.rebirth_retry = retry;
        self
    }

    /// Enables periodic pushes to a remote-write endpoint.
    ///
    /// ## Errors
    ///
    /// If the given endpoint cannot be parsed into a valid URI, an error
    /// variant will be returned describing the error.
    pub fn with_remote_write<T>(
        mut self,
        endpoint: T,
        send_every: Duration,
        timeout: Duration,
        retry_on_rate_limit: bool,
    ) -> Result<Self, BuildError>
    where
        T: AsRef<str>,
    {
        let endpoint = endpoint
            .as_ref()
            .parse::<Uri>()
            .map_err(|e| BuildError::InvalidEndpoint(e.to_string()))?;
        self.remote_write = Some(RemoteWriteConfig {
            endpoint,
            send_every,
            timeout,
            user_agent: String::new(),
            retry_on_rate_limit,
            rewrite: LabelRewrite::default(),
        });
        Ok(self)
    }

    /// Drops a label from every outbound remote-write series.
    #[must_use]
    pub fn drop_remote_write_label(mut self, name: impl Into<String>) -> Self {
        if let Some(config) = &mut self.remote_write {
            config.rewrite.drop.push(name.into());
        }
        self
    }

    /// Renames a label on every outbound remote-write series.
    #[must_use]
    pub fn replace_remote_write_label(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        if let Some(config) = &mut self.remote_write {
            config.rewrite.substitutions.push((from.into(), to.into()));
        }
        self
    }

    /// Appends a label to every outbound remote-write series.
    #[must_use]
    pub fn add_remote_write_label(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        if let Some(config) = &mut self.remote_write {
            config.rewrite.extra.push((name.into(), value.into()));
        }
        self
    }

    /// Enables batched event pushes to a Loki endpoint.
    ///
    /// ## Errors
    ///
    /// If the given URL cannot be parsed into a valid URI, an error
    /// variant will be returned describing the error.
    pub fn with_loki_push<T>(mut self, push_url: T, batch_wait: Duration) -> Result<Self, BuildError>
    where
        T: AsRef<str>,
    {
        let push_url = push_url
            .as_ref()
            .parse::<Uri>()
            .map_err(|e| BuildError::InvalidEndpoint(e.to_string()))?;
        self.loki = Some(LokiConfig {
            push_url,
            batch_wait,
            extra_labels: Vec::new(),
            user_agent: String::new(),
        });
        Ok(self)
    }

    /// Adds a stream label to every pushed event batch.
    #[must_use]
    pub fn add_loki_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(config) = &mut self.loki {
            config.extra_labels.push((name.into(), value.into()));
        }
        self
    }

    /// Renames an event field before lines are formatted.
    #[must_use]
    pub fn replace_event_field(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.field_rewrite.substitutions.push((from.into(), to.into()));
        self
    }

    /// Drops an event field before lines are formatted.
    #[must_use]
    pub fn drop_event_field(mut self, name: impl Into<String>) -> Self {
        self.field_rewrite.drop.push(name.into());
        self
    }

    /// Builds the gateway: the registry, the message pipeline, and every
    /// long-running task, wired to one shutdown token.
    ///
    /// ## Panics
    ///
    /// This method must be called from within an existing Tokio runtime or
    /// it will panic.
    ///
    /// ## Errors
    ///
    /// If the broker address or TLS material is invalid, or the scrape
    /// listener cannot bind, an error variant will be returned describing
    /// the error.
    pub fn build(self) -> Result<Gateway, BuildError> {
        let registry = Registry::new(self.job.clone());
        let shutdown = CancellationToken::new();
        let mut tasks: Vec<ExporterFuture> = Vec::new();

        let options = self.mqtt.client_options()?;
        let (client, event_loop) = AsyncClient::new(options, 64);

        let rebirth = RebirthSpawner::new(
            client.clone(),
            registry.clone(),
            shutdown.clone(),
            self.rebirth_period,
            self.rebirth_retry,
        );

        let events = match &self.loki {
            Some(config) => {
                // The job label and user agent are settled only now, so a
                // late `with_job` still applies.
                let mut config = config.clone();
                config.extra_labels.insert(0, ("job".to_string(), self.job.clone()));
                config.user_agent = self.user_agent.clone();

                let (sender, receiver) =
                    tokio::sync::mpsc::channel(crate::exporter::MAX_BATCH_ENTRIES);
                tasks.push(new_loki_push(config, receiver, shutdown.clone()));
                Some(EventSink::new(sender, self.field_rewrite.clone()))
            }
            None => None,
        };

        let pipeline = Arc::new(MessagePipeline::new(
            registry.clone(),
            self.router,
            self.prefix.clone(),
            self.edge_node_position,
            Some(rebirth),
            events,
        ));

        if let Some(listen_address) = self.listen_address {
            tasks.push(new_http_listener(
                registry.clone(),
                listen_address,
                self.telemetry_path.clone(),
                shutdown.clone(),
            )?);
        }

        if let Some(mut config) = self.remote_write {
            config.user_agent = self.user_agent.clone();
            tasks.push(new_remote_write(config, registry.clone(), shutdown.clone()));
        }

        {
            let registry = registry.clone();
            let settings = self.mqtt;
            let shutdown = shutdown.clone();
            tasks.push(Box::pin(async move {
                run_mqtt_loop(client, event_loop, registry, pipeline, settings, shutdown)
                    .await
                    .map_err(ExporterError::Connect)
            }));
        }

        Ok(Gateway { registry, tasks, shutdown })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        GatewayBuilder::new()
    }
}

/// A built gateway, ready to run.
pub struct Gateway {
    registry: Registry,
    tasks: Vec<ExporterFuture>,
    shutdown: CancellationToken,
}

impl Gateway {
    /// A handle to the gateway registry.
    pub fn handle(&self) -> Registry {
        self.registry.clone()
    }

    /// The token cancelling every gateway task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs every task until interrupted or a task fails fatally, then
    /// shuts the rest down.
    ///
    /// ## Errors
    ///
    /// Returns the first fatal task error, after the remaining tasks have
    /// been cancelled and drained.
    pub async fn run(self) -> Result<(), ExporterError> {
        let mut set = JoinSet::new();
        for task in self.tasks {
            set.spawn(task);
        }

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(%error, "failed to listen for interrupt");
                }
                info!("shutting down");
                Ok(())
            }
            joined = set.join_next() => match joined {
                Some(Ok(Err(error))) => {
                    error!(%error, "gateway task failed");
                    Err(error)
                }
                Some(Err(join_error)) => {
                    error!(%join_error, "gateway task panicked");
                    Ok(())
                }
                _ => Ok(()),
            },
        };

        self.shutdown.cancel();

        loop {
            match tokio::time::timeout(Duration::from_secs(10), set.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!("tasks did not stop in time; aborting them");
                    set.abort_all();
                    break;
                }
            }
        }

        result
    }
}
