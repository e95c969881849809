//! The pull-mode scrape endpoint.

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::common::BuildError;
use crate::registry::Registry;

use super::{ExporterError, ExporterFuture};

struct HttpListeningExporter {
    handle: Registry,
    telemetry_path: String,
    listener: TcpListener,
    shutdown: CancellationToken,
}

/// Error type for HTTP listening.
#[derive(Debug)]
pub enum HttpListeningError {
    /// The HTTP state machine failed.
    Hyper(hyper::Error),
    /// The socket failed.
    Io(std::io::Error),
}

impl std::fmt::Display for HttpListeningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpListeningError::Hyper(error) => write!(f, "{error}"),
            HttpListeningError::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for HttpListeningError {}

impl HttpListeningExporter {
    async fn serve(&self) -> Result<(), HttpListeningError> {
        loop {
            let stream = tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = ?e, "Error accepting connection. Ignoring request.");
                        continue;
                    }
                },
            };
            self.process_tcp_stream(stream);
        }
    }

    fn process_tcp_stream(&self, stream: TcpStream) {
        let handle = self.handle.clone();
        let telemetry_path = self.telemetry_path.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handle = handle.clone();
            let telemetry_path = telemetry_path.clone();
            async move {
                Ok::<_, hyper::Error>(Self::handle_http_request(&handle, &telemetry_path, &req))
            }
        });

        tokio::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!(error = ?err, "Error serving connection.");
            }
        });
    }

    fn handle_http_request(
        handle: &Registry,
        telemetry_path: &str,
        req: &Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        let path = req.uri().path();
        if path == telemetry_path {
            let mut response = Response::new(handle.render().into());
            response.headers_mut().append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            return response;
        }

        if path == "/health" {
            return Response::new("OK".into());
        }

        // UNWRAP: a bare status with an empty body cannot fail to build.
        Response::builder().status(StatusCode::NOT_FOUND).body(Full::<Bytes>::default()).unwrap()
    }
}

/// Creates an `ExporterFuture` implementing an HTTP listener that serves
/// the scrape endpoint on `telemetry_path`.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address.
pub(crate) fn new_http_listener(
    handle: Registry,
    listen_address: SocketAddr,
    telemetry_path: String,
    shutdown: CancellationToken,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;
    let listener = TcpListener::from_std(listener)
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter = HttpListeningExporter { handle, telemetry_path, listener, shutdown };

    Ok(Box::pin(async move { exporter.serve().await.map_err(ExporterError::HttpListener) }))
}
