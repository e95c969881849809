//! The batching Loki shipper.

use std::time::Duration;

use http_body_util::{BodyExt, Collected, Full};
use hyper::{body::Bytes, Uri};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::events::EventEntry;
use crate::logproto::{format_stream_labels, EntryAdapter, PushRequest, StreamAdapter, Timestamp};

use super::ExporterFuture;

/// A batch never grows beyond this many entries before being flushed.
pub(crate) const MAX_BATCH_ENTRIES: usize = 10_000;

/// Per-request timeout for push requests.
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of the Loki shipper.
#[derive(Clone, Debug)]
pub struct LokiConfig {
    /// Where to POST.
    pub push_url: Uri,
    /// How long entries may sit before a batch is flushed.
    pub batch_wait: Duration,
    /// Stream labels attached to every pushed batch.
    pub extra_labels: Vec<(String, String)>,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

// Creates an ExporterFuture implementing the batching Loki shipper.
pub(crate) fn new_loki_push(
    config: LokiConfig,
    mut receiver: mpsc::Receiver<EventEntry>,
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

        let labels = format_stream_labels(&config.extra_labels);
        let mut ticker = tokio::time::interval(config.batch_wait);
        let mut batch: Vec<EventEntry> = Vec::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    // Drain whatever is already queued, then flush with a
                    // best-effort deadline.
                    while batch.len() < MAX_BATCH_ENTRIES {
                        match receiver.try_recv() {
                            Ok(entry) => batch.push(entry),
                            Err(_) => break,
                        }
                    }
                    flush(&client, &config, &labels, &mut batch).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    flush(&client, &config, &labels, &mut batch).await;
                }
                entry = receiver.recv() => match entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= MAX_BATCH_ENTRIES {
                            flush(&client, &config, &labels, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&client, &config, &labels, &mut batch).await;
                        return Ok(());
                    }
                },
            }
        }
    })
}

/// Builds a single-stream push request from a batch.
pub(crate) fn batch_request(labels: &str, batch: &[EventEntry]) -> PushRequest {
    let mut entries: Vec<&EventEntry> = batch.iter().collect();
    entries.sort_by_key(|entry| entry.timestamp_ms);

    PushRequest {
        streams: vec![StreamAdapter {
            labels: labels.to_string(),
            entries: entries
                .into_iter()
                .map(|entry| EntryAdapter {
                    timestamp: Some(Timestamp::from_millis(entry.timestamp_ms)),
                    line: entry.line.clone(),
                })
                .collect(),
        }],
    }
}

async fn flush<C>(
    client: &Client<C, Full<Bytes>>,
    config: &LokiConfig,
    labels: &str,
    batch: &mut Vec<EventEntry>,
) where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    if batch.is_empty() {
        return;
    }

    debug!(entries = batch.len(), "pushing event batch");
    let request = batch_request(labels, batch);
    // The batch is dropped whether or not delivery succeeds; a failed push
    // is logged, not re-queued.
    batch.clear();

    let http_request = match request.build_http_request(&config.push_url, &config.user_agent) {
        Ok(req) => req,
        Err(e) => {
            error!("failed to build push request: {}", e);
            return;
        }
    };

    match tokio::time::timeout(PUSH_TIMEOUT, client.request(http_request)).await {
        Err(_) => error!("push request timed out"),
        Ok(Err(e)) => error!("error sending request to push endpoint: {:?}", e),
        Ok(Ok(response)) => {
            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map(Collected::to_bytes)
                    .map_err(|_| ())
                    .and_then(|b| String::from_utf8(b[..].to_vec()).map_err(|_| ()))
                    .unwrap_or_else(|()| String::from("<failed to read response body>"));
                error!(
                    message = "unexpected status after pushing events",
                    status = %status,
                    %body,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::events::EventEntry;

    use super::batch_request;

    #[test]
    fn batches_become_a_single_ordered_stream() {
        let batch = vec![
            EventEntry { timestamp_ms: 2_000, line: "b".to_string() },
            EventEntry { timestamp_ms: 1_000, line: "a".to_string() },
        ];

        let request = batch_request("{job=\"sparkplug\"}", &batch);
        assert_eq!(request.streams.len(), 1);

        let stream = &request.streams[0];
        assert_eq!(stream.labels, "{job=\"sparkplug\"}");
        let lines: Vec<&str> = stream.entries.iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(stream.entries[0].timestamp.as_ref().unwrap().seconds, 1);
    }
}
