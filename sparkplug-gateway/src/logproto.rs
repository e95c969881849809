//! Types and utilities for calling the Loki push API.

use http_body_util::Full;
use hyper::{body::Bytes, header, Method, Request, Uri};

use crate::formatting::escape_label_value;

/// Content type of a push request body.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// A push request.
///
/// .proto:
/// ```protobuf
/// message PushRequest {
///   repeated StreamAdapter streams = 1;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct PushRequest {
    /// The streams carried by this request.
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<StreamAdapter>,
}

impl PushRequest {
    /// Encode this push request as a protobuf message.
    pub fn encode_proto3(self) -> Vec<u8> {
        prost::Message::encode_to_vec(&self)
    }

    /// Encode this push request as a compressed protobuf message.
    /// NOTE: The API requires snappy block compression, not a raw protobuf
    /// message.
    pub fn encode_compressed(self) -> Result<Vec<u8>, snap::Error> {
        snap::raw::Encoder::new().compress_vec(&self.encode_proto3())
    }

    /// Build a fully prepared HTTP request that can be sent to a Loki push
    /// endpoint.
    pub fn build_http_request(
        self,
        endpoint: &Uri,
        user_agent: &str,
    ) -> Result<Request<Full<Bytes>>, Box<dyn std::error::Error + Send + Sync>> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(endpoint)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(header::USER_AGENT, user_agent)
            .body(Full::new(self.encode_compressed()?.into()))?;
        Ok(req)
    }
}

/// A log stream: one label set and its entries.
///
/// .proto:
/// ```protobuf
/// message StreamAdapter {
///   string labels                 = 1;
///   repeated EntryAdapter entries = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct StreamAdapter {
    /// The stream's label set, rendered as `{k="v", ...}`.
    #[prost(string, tag = "1")]
    pub labels: String,
    /// Entries, in ascending timestamp order.
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<EntryAdapter>,
}

/// A single log line.
///
/// .proto:
/// ```protobuf
/// message EntryAdapter {
///   Timestamp timestamp = 1;
///   string line         = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct EntryAdapter {
    /// When the line was produced.
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<Timestamp>,
    /// The log line.
    #[prost(string, tag = "2")]
    pub line: String,
}

/// Protobuf well-known timestamp.
#[derive(prost::Message, Clone, PartialEq)]
pub struct Timestamp {
    /// Seconds since the epoch.
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    /// Nanosecond remainder.
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// Converts milliseconds since the epoch.
    pub fn from_millis(millis: u64) -> Timestamp {
        Timestamp { seconds: (millis / 1000) as i64, nanos: ((millis % 1000) * 1_000_000) as i32 }
    }
}

/// Renders stream labels in Loki's `{k="v", ...}` syntax.
pub fn format_stream_labels(labels: &[(String, String)]) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for (name, value) in labels {
        if first {
            first = false;
        } else {
            out.push_str(", ");
        }
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_label_value(value));
        out.push('"');
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use super::{format_stream_labels, EntryAdapter, PushRequest, StreamAdapter, Timestamp};

    #[test]
    fn stream_label_rendering() {
        assert_eq!(format_stream_labels(&[]), "{}");
        assert_eq!(
            format_stream_labels(&[
                ("job".to_string(), "sparkplug".to_string()),
                ("env".to_string(), "prod".to_string()),
            ]),
            "{job=\"sparkplug\", env=\"prod\"}"
        );
    }

    #[test]
    fn timestamps_split_millis() {
        let ts = Timestamp::from_millis(1_693_000_123_456);
        assert_eq!(ts.seconds, 1_693_000_123);
        assert_eq!(ts.nanos, 456_000_000);
    }

    #[test]
    fn compressed_body_roundtrips_through_snappy() {
        let request = PushRequest {
            streams: vec![StreamAdapter {
                labels: "{job=\"sparkplug\"}".to_string(),
                entries: vec![EntryAdapter {
                    timestamp: Some(Timestamp::from_millis(1_000)),
                    line: "event_name=Temperature".to_string(),
                }],
            }],
        };
        let reference = request.clone().encode_proto3();

        let compressed = request.encode_compressed().unwrap();
        let decompressed = snap::raw::Decoder::new().decompress_vec(&compressed).unwrap();
        assert_eq!(decompressed, reference);
    }

    #[test]
    fn http_request_carries_the_content_type() {
        let endpoint: hyper::Uri = "http://localhost:3100/loki/api/v1/push".parse().unwrap();
        let http = PushRequest::default()
            .build_http_request(&endpoint, "sparkplug-gateway")
            .unwrap();
        assert_eq!(http.method(), hyper::Method::POST);
        assert_eq!(http.headers()["content-type"], "application/x-protobuf");

        let decoded = PushRequest::decode(&[][..]).unwrap();
        assert_eq!(decoded, PushRequest::default());
    }
}
