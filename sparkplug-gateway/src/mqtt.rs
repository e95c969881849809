//! The broker link: connection options, TLS material, and the event loop
//! that feeds the message pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::{BuildError, CONNECT_RETRY_SECS, RECONNECT_MAX_SECS};
use crate::handler::MessagePipeline;
use crate::registry::Registry;

/// Everything needed to reach the broker.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    /// Broker address, `tcp://host:port` or `ssl://host:port`.
    pub broker_address: String,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Topic filter to subscribe to.
    pub topic: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// CA certificate file for TLS connections.
    pub ca_file: Option<PathBuf>,
    /// Client certificate file for mutual TLS.
    pub cert_file: Option<PathBuf>,
    /// Client key file for mutual TLS.
    pub key_file: Option<PathBuf>,
    /// Disable server certificate verification.
    pub insecure_skip_verify: bool,
    /// Keep retrying the initial connection instead of exiting.
    pub connect_retry: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        MqttSettings {
            broker_address: "tcp://localhost:1883".to_string(),
            client_id: "sparkplug-gateway".to_string(),
            topic: "prometheus/#".to_string(),
            username: None,
            password: None,
            ca_file: None,
            cert_file: None,
            key_file: None,
            insecure_skip_verify: false,
            connect_retry: false,
        }
    }
}

impl MqttSettings {
    /// Builds the broker connection options.
    pub fn client_options(&self) -> Result<MqttOptions, BuildError> {
        let (tls, host, port) = parse_broker_address(&self.broker_address)?;

        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }

        if tls || self.ca_file.is_some() || self.insecure_skip_verify {
            options.set_transport(Transport::Tls(self.tls_configuration()?));
        }

        Ok(options)
    }

    fn tls_configuration(&self) -> Result<TlsConfiguration, BuildError> {
        if self.insecure_skip_verify {
            warn!("server certificate verification is disabled");
            if self.cert_file.is_some() || self.key_file.is_some() {
                warn!("client certificates are ignored when verification is disabled");
            }
            let config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerification))
                .with_no_client_auth();
            return Ok(TlsConfiguration::Rustls(Arc::new(config)));
        }

        let ca_file = self.ca_file.as_ref().ok_or_else(|| {
            BuildError::FailedToLoadTls("a CA certificate file is required for TLS".to_string())
        })?;
        let ca = std::fs::read(ca_file).map_err(|e| BuildError::FailedToLoadTls(e.to_string()))?;

        let client_auth = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let cert = std::fs::read(cert_file)
                    .map_err(|e| BuildError::FailedToLoadTls(e.to_string()))?;
                let key = std::fs::read(key_file)
                    .map_err(|e| BuildError::FailedToLoadTls(e.to_string()))?;
                Some((cert, key))
            }
            (None, None) => None,
            _ => {
                return Err(BuildError::FailedToLoadTls(
                    "client certificate and key must be configured together".to_string(),
                ))
            }
        };

        Ok(TlsConfiguration::Simple { ca, alpn: None, client_auth })
    }
}

/// Splits a broker address into TLS flag, host, and port.
fn parse_broker_address(address: &str) -> Result<(bool, String, u16), BuildError> {
    let (tls, rest) = match address.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => (false, rest),
        Some(("ssl" | "tls" | "mqtts", rest)) => (true, rest),
        Some((scheme, _)) => {
            return Err(BuildError::InvalidBrokerAddress(format!("unknown scheme {scheme:?}")))
        }
        None => (false, address),
    };

    if rest.is_empty() {
        return Err(BuildError::InvalidBrokerAddress(address.to_string()));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BuildError::InvalidBrokerAddress(address.to_string()))?;
            Ok((tls, host.to_string(), port))
        }
        None => Ok((tls, rest.to_string(), if tls { 8883 } else { 1883 })),
    }
}

/// The MQTT link failed before it ever came up, with retries disabled.
#[derive(Debug, Error)]
#[error("failed to connect to MQTT broker: {0}")]
pub struct ConnectError(String);

/// Drives the broker event loop until shutdown.
///
/// Subscribes at QoS 2 on every connection acknowledgement so the
/// subscription survives reconnects, maintains the connection counters and
/// the connectivity gauge, and dispatches every publish to the pipeline.
/// Connection errors after the first successful connect are retried
/// forever with a capped backoff; before it, the configured retry policy
/// decides between retrying every few seconds and failing the process.
pub async fn run_mqtt_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    registry: Registry,
    pipeline: Arc<MessagePipeline>,
    settings: MqttSettings,
    shutdown: CancellationToken,
) -> Result<(), ConnectError> {
    let mut ever_connected = false;
    let mut reconnect_delay = Duration::from_secs(1);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %settings.broker_address, "connected to MQTT");
                    ever_connected = true;
                    reconnect_delay = Duration::from_secs(1);
                    registry.set_connected(true);
                    registry.inc_connect();

                    if let Err(error) = client.subscribe(&settings.topic, QoS::ExactlyOnce).await {
                        error!(topic = %settings.topic, %error, "failed to subscribe");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    pipeline.handle_publish(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(error) => {
                    if registry.is_connected() {
                        registry.set_connected(false);
                        registry.inc_disconnect();
                        info!(%error, "disconnected from MQTT");
                    }

                    if !ever_connected && !settings.connect_retry {
                        return Err(ConnectError(error.to_string()));
                    }

                    let delay = if ever_connected {
                        reconnect_delay = (reconnect_delay * 2)
                            .min(Duration::from_secs(RECONNECT_MAX_SECS));
                        reconnect_delay
                    } else {
                        Duration::from_secs(CONNECT_RETRY_SECS)
                    };

                    warn!(%error, ?delay, "MQTT connection error; will retry");
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate. Only reachable behind the
    /// insecure-skip-verify flag.
    #[derive(Debug)]
    pub(super) struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_broker_address, MqttSettings};
    use crate::common::BuildError;

    #[test]
    fn broker_address_parsing() {
        assert_eq!(
            parse_broker_address("tcp://localhost:1883").unwrap(),
            (false, "localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_address("ssl://broker.example.com:8883").unwrap(),
            (true, "broker.example.com".to_string(), 8883)
        );
        assert_eq!(
            parse_broker_address("broker.example.com").unwrap(),
            (false, "broker.example.com".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_address("ssl://broker.example.com").unwrap(),
            (true, "broker.example.com".to_string(), 8883)
        );

        assert!(matches!(
            parse_broker_address("ws://broker:80"),
            Err(BuildError::InvalidBrokerAddress(_))
        ));
        assert!(matches!(
            parse_broker_address("tcp://broker:notaport"),
            Err(BuildError::InvalidBrokerAddress(_))
        ));
        assert!(matches!(
            parse_broker_address("tcp://"),
            Err(BuildError::InvalidBrokerAddress(_))
        ));
    }

    #[test]
    fn options_use_the_parsed_address() {
        let settings = MqttSettings {
            username: Some("edge".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };

        let options = settings.client_options().unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn tls_without_a_ca_file_is_rejected() {
        let settings = MqttSettings {
            broker_address: "ssl://broker.example.com:8883".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            settings.client_options(),
            Err(BuildError::FailedToLoadTls(_))
        ));
    }

    #[test]
    fn client_cert_requires_its_key() {
        let ca_path = std::env::temp_dir().join("sparkplug-gateway-test-ca.pem");
        std::fs::write(&ca_path, b"not really a certificate").unwrap();

        let settings = MqttSettings {
            broker_address: "ssl://broker.example.com:8883".to_string(),
            ca_file: Some(ca_path),
            cert_file: Some("/tmp/does-not-matter-cert.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.client_options(),
            Err(BuildError::FailedToLoadTls(_))
        ));
    }
}
