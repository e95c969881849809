//! The remote-write push loop.
//!
//! On every tick the registry is snapshotted, rewritten into a remote-write
//! request, and POSTed. Afterwards the registry is reset so label churn
//! cannot grow memory without bound across windows; this trades the
//! counters' history for bounded cardinality and only happens when remote
//! write is enabled.

use std::time::Duration;

use http_body_util::{BodyExt, Collected, Full};
use hyper::{body::Bytes, Uri};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::common::now_millis;
use crate::registry::Registry;
use crate::remote_write_proto::{LabelRewrite, WriteRequest};

use super::ExporterFuture;

/// How many delivery attempts one tick makes before giving up.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Configuration of the remote-write task.
#[derive(Clone, Debug)]
pub struct RemoteWriteConfig {
    /// Where to POST.
    pub endpoint: Uri,
    /// Interval between pushes.
    pub send_every: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Whether HTTP 429 responses are retried.
    pub retry_on_rate_limit: bool,
    /// Label transformations applied to every series.
    pub rewrite: LabelRewrite,
}

// Creates an ExporterFuture implementing the remote-write push loop.
pub(crate) fn new_remote_write(
    config: RemoteWriteConfig,
    handle: Registry,
    shutdown: CancellationToken,
) -> ExporterFuture {
    Box::pin(async move {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("no native root CA certificates found")
            .https_or_http()
            .enable_http1()
            .build();
        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(config.send_every) => {}
            }

            let timestamp_ms = now_millis() as i64;
            let samples = handle.gather();
            let request = WriteRequest::from_samples(samples, timestamp_ms, &config.rewrite);
            debug!(series = request.timeseries.len(), "pushing remote-write request");

            send_with_retries(&client, &config, request, &shutdown).await;

            // Success or final failure, the next window starts clean.
            handle.reset();
        }
    })
}

async fn send_with_retries<C>(
    client: &Client<C, Full<Bytes>>,
    config: &RemoteWriteConfig,
    request: WriteRequest,
    shutdown: &CancellationToken,
) where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let mut backoff = Duration::from_millis(500);

    for attempt in 1..=MAX_SEND_ATTEMPTS {
        let http_request =
            match request.clone().build_http_request(&config.endpoint, &config.user_agent) {
                Ok(req) => req,
                Err(e) => {
                    error!("failed to build remote write request: {}", e);
                    return;
                }
            };

        match tokio::time::timeout(config.timeout, client.request(http_request)).await {
            Err(_) => {
                error!(attempt, timeout = ?config.timeout, "remote write request timed out");
            }
            Ok(Err(e)) => {
                error!(attempt, "error sending request to remote write endpoint: {:?}", e);
            }
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    return;
                }

                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map(Collected::to_bytes)
                    .map_err(|_| ())
                    .and_then(|b| String::from_utf8(b[..].to_vec()).map_err(|_| ()))
                    .unwrap_or_else(|()| String::from("<failed to read response body>"));

                let retryable = status.is_server_error()
                    || (status.as_u16() == 429 && config.retry_on_rate_limit);
                if !retryable {
                    error!(
                        message = "remote write endpoint refused the request",
                        status = %status,
                        %body,
                    );
                    return;
                }

                error!(
                    message = "unexpected status from remote write endpoint",
                    status = %status,
                    attempt,
                    %body,
                );
            }
        }

        if attempt == MAX_SEND_ATTEMPTS {
            break;
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(backoff) => {}
        }
        backoff *= 2;
    }

    error!(attempts = MAX_SEND_ATTEMPTS, "giving up on remote write request");
}
