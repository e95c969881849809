//! The gateway's long-running tasks: the scrape listener, the remote-write
//! pusher, and the Loki shipper.

use std::future::Future;
use std::pin::Pin;

pub(crate) use http_listener::new_http_listener;
pub(crate) use loki_push::{new_loki_push, MAX_BATCH_ENTRIES};
pub(crate) use remote_write::new_remote_write;

pub use http_listener::HttpListeningError;
pub use loki_push::LokiConfig;
pub use remote_write::RemoteWriteConfig;

use crate::mqtt::ConnectError;

/// Error types possible from an exporter task.
#[derive(Debug)]
pub enum ExporterError {
    /// The scrape listener failed.
    HttpListener(HttpListeningError),
    /// The broker link failed before it ever came up, with retries
    /// disabled.
    Connect(ConnectError),
}

impl std::fmt::Display for ExporterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExporterError::HttpListener(error) => write!(f, "scrape listener failed: {error}"),
            ExporterError::Connect(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ExporterError {}

/// Convenience type for a future implementing an exporter task.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;

mod http_listener;
mod loki_push;
mod remote_write;
