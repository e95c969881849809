//! Types and utilities for calling Prometheus remote write API endpoints.

use http_body_util::Full;
use hyper::{body::Bytes, header, Method, Request, Uri};

use crate::common::{GatheredSample, SampleValue};

/// Special label for the name of a metric.
pub const LABEL_NAME: &str = "__name__";
/// Content type of a remote-write request body.
pub const CONTENT_TYPE: &str = "application/x-protobuf";
/// Header naming the remote-write protocol version.
pub const HEADER_NAME_REMOTE_WRITE_VERSION: &str = "X-Prometheus-Remote-Write-Version";
/// The protocol version this encoder speaks.
pub const REMOTE_WRITE_VERSION_01: &str = "0.1.0";

/// A write request.
///
/// .proto:
/// ```protobuf
/// message WriteRequest {
///   repeated TimeSeries timeseries = 1;
///   reserved  2;
///   reserved  3;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct WriteRequest {
    /// The series carried by this request.
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

impl WriteRequest {
    /// Prepare the write request for sending.
    ///
    /// Ensures that the request conforms to the specification.
    /// See <https://prometheus.io/docs/concepts/remote_write_spec>.
    fn sort(&mut self) {
        for series in &mut self.timeseries {
            series.sort_labels_and_samples();
        }
    }

    fn sorted(mut self) -> Self {
        self.sort();
        self
    }

    /// Encode this write request as a protobuf message.
    pub fn encode_proto3(self) -> Vec<u8> {
        prost::Message::encode_to_vec(&self.sorted())
    }

    /// Encode this write request as a compressed protobuf message.
    /// NOTE: The API requires snappy block compression, not a raw protobuf
    /// message.
    pub fn encode_compressed(self) -> Result<Vec<u8>, snap::Error> {
        snap::raw::Encoder::new().compress_vec(&self.encode_proto3())
    }

    /// Builds a request from a registry snapshot.
    ///
    /// Composite families are expanded per the exposition conventions: a
    /// summary becomes `_sum`, `_count`, and one series per quantile; a
    /// histogram becomes `_sum`, `_count`, and one `_bucket` series per
    /// upper bound. Every series gets the rewritten labels, the reserved
    /// `__name__` label, and a single sample at `timestamp_ms`.
    pub fn from_samples(
        samples: Vec<GatheredSample>,
        timestamp_ms: i64,
        rewrite: &LabelRewrite,
    ) -> WriteRequest {
        let mut request = WriteRequest::default();

        for sample in samples {
            let labels = rewrite.apply(&sample.labels);
            match sample.value {
                SampleValue::Counter(value)
                | SampleValue::Gauge(value)
                | SampleValue::Untyped(value) => {
                    request.timeseries.push(build_series(
                        &sample.name,
                        labels,
                        value,
                        timestamp_ms,
                    ));
                }
                SampleValue::Summary { quantiles, sum, count } => {
                    for (quantile, value) in quantiles {
                        let mut labels = labels.clone();
                        labels.push(Label {
                            name: "quantile".to_string(),
                            value: quantile.to_string(),
                        });
                        request.timeseries.push(build_series(
                            &sample.name,
                            labels,
                            value,
                            timestamp_ms,
                        ));
                    }
                    request.timeseries.push(build_series(
                        &format!("{}_sum", sample.name),
                        labels.clone(),
                        sum,
                        timestamp_ms,
                    ));
                    request.timeseries.push(build_series(
                        &format!("{}_count", sample.name),
                        labels,
                        count as f64,
                        timestamp_ms,
                    ));
                }
                SampleValue::Histogram { buckets, sum, count } => {
                    for (le, bucket_count) in buckets {
                        let mut labels = labels.clone();
                        labels.push(Label { name: "le".to_string(), value: le.to_string() });
                        request.timeseries.push(build_series(
                            &format!("{}_bucket", sample.name),
                            labels,
                            bucket_count as f64,
                            timestamp_ms,
                        ));
                    }
                    request.timeseries.push(build_series(
                        &format!("{}_sum", sample.name),
                        labels.clone(),
                        sum,
                        timestamp_ms,
                    ));
                    request.timeseries.push(build_series(
                        &format!("{}_count", sample.name),
                        labels,
                        count as f64,
                        timestamp_ms,
                    ));
                }
            }
        }

        request
    }

    /// Build a fully prepared HTTP request that can be sent to a remote
    /// write endpoint.
    pub fn build_http_request(
        self,
        endpoint: &Uri,
        user_agent: &str,
    ) -> Result<Request<Full<Bytes>>, Box<dyn std::error::Error + Send + Sync>> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(endpoint)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(HEADER_NAME_REMOTE_WRITE_VERSION, REMOTE_WRITE_VERSION_01)
            .header(header::CONTENT_ENCODING, "snappy")
            .header(header::USER_AGENT, user_agent)
            .body(Full::new(self.encode_compressed()?.into()))?;
        Ok(req)
    }
}

fn build_series(name: &str, mut labels: Vec<Label>, value: f64, timestamp_ms: i64) -> TimeSeries {
    labels.push(Label { name: LABEL_NAME.to_string(), value: name.to_string() });
    TimeSeries { labels, samples: vec![Sample { value, timestamp: timestamp_ms }] }
}

/// A time series.
///
/// .proto:
/// ```protobuf
/// message TimeSeries {
///   repeated Label labels   = 1;
///   repeated Sample samples = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct TimeSeries {
    /// Identity labels, sorted by name before encoding.
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    /// Samples, sorted by timestamp before encoding.
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// Sort labels by name, and the samples by timestamp.
    ///
    /// Required by the specification.
    pub fn sort_labels_and_samples(&mut self) {
        self.labels.sort_by(|a, b| a.name.cmp(&b.name));
        self.samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }
}

/// A label.
///
/// .proto:
/// ```protobuf
/// message Label {
///   string name  = 1;
///   string value = 2;
/// }
/// ```
#[derive(prost::Message, Clone, Hash, PartialEq, Eq)]
pub struct Label {
    /// Label name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Label value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A sample.
///
/// .proto:
/// ```protobuf
/// message Sample {
///   double value    = 1;
///   int64 timestamp = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct Sample {
    /// Sample value.
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Sample timestamp, milliseconds since the epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

/// The label transformations applied to every outbound series.
#[derive(Clone, Debug, Default)]
pub struct LabelRewrite {
    /// Labels removed from every series.
    pub drop: Vec<String>,
    /// Renames applied after dropping; an empty target is a no-op.
    pub substitutions: Vec<(String, String)>,
    /// Labels appended to every series, subject to the same drop set.
    pub extra: Vec<(String, String)>,
}

impl LabelRewrite {
    fn dropped(&self, name: &str) -> bool {
        self.drop.iter().any(|d| d == name)
    }

    fn renamed<'a>(&'a self, name: &'a str) -> &'a str {
        self.substitutions
            .iter()
            .find(|(from, to)| from == name && !to.is_empty())
            .map_or(name, |(_, to)| to.as_str())
    }

    /// Applies drops, renames, and extras to one sample's labels.
    pub fn apply(&self, labels: &[(String, String)]) -> Vec<Label> {
        let mut out = Vec::with_capacity(labels.len() + self.extra.len());
        for (name, value) in labels {
            if self.dropped(name) {
                continue;
            }
            out.push(Label { name: self.renamed(name).to_string(), value: value.clone() });
        }
        for (name, value) in &self.extra {
            if self.dropped(name) {
                continue;
            }
            out.push(Label { name: name.clone(), value: value.clone() });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use crate::common::{GatheredSample, SampleValue};

    use super::{Label, LabelRewrite, WriteRequest, LABEL_NAME};

    fn site_sample() -> GatheredSample {
        GatheredSample {
            name: "voltage".to_string(),
            labels: vec![
                ("sp_namespace".to_string(), "spBv1.0".to_string()),
                ("sp_group_id".to_string(), "GroupA".to_string()),
                ("sp_edge_node_id".to_string(), "Node1".to_string()),
                ("sp_device_id".to_string(), "Bus".to_string()),
            ],
            value: SampleValue::Gauge(12.5),
        }
    }

    #[test]
    fn rewrite_drops_renames_and_extends() {
        let rewrite = LabelRewrite {
            drop: vec!["sp_device_id".to_string()],
            substitutions: vec![("sp_namespace".to_string(), "ns".to_string())],
            extra: vec![("env".to_string(), "prod".to_string())],
        };

        let request = WriteRequest::from_samples(vec![site_sample()], 1_000, &rewrite);
        let encoded = request.encode_proto3();
        let decoded = WriteRequest::decode(encoded.as_slice()).unwrap();

        assert_eq!(decoded.timeseries.len(), 1);
        let names: Vec<&str> =
            decoded.timeseries[0].labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec![LABEL_NAME, "env", "ns", "sp_edge_node_id", "sp_group_id"]);
        assert_eq!(decoded.timeseries[0].samples[0].value, 12.5);
        assert_eq!(decoded.timeseries[0].samples[0].timestamp, 1_000);
    }

    #[test]
    fn empty_substitution_targets_are_noops() {
        let rewrite = LabelRewrite {
            substitutions: vec![("sp_namespace".to_string(), String::new())],
            ..Default::default()
        };
        let labels = rewrite.apply(&[("sp_namespace".to_string(), "spBv1.0".to_string())]);
        assert_eq!(
            labels,
            vec![Label { name: "sp_namespace".to_string(), value: "spBv1.0".to_string() }]
        );
    }

    #[test]
    fn extras_are_subject_to_drops() {
        let rewrite = LabelRewrite {
            drop: vec!["env".to_string()],
            extra: vec![("env".to_string(), "prod".to_string())],
            ..Default::default()
        };
        assert!(rewrite.apply(&[]).is_empty());
    }

    #[test]
    fn labels_are_sorted_strictly_ascending() {
        let request = WriteRequest::from_samples(
            vec![site_sample()],
            1_000,
            &LabelRewrite::default(),
        );
        let encoded = request.encode_proto3();
        let decoded = WriteRequest::decode(encoded.as_slice()).unwrap();

        for series in &decoded.timeseries {
            for pair in series.labels.windows(2) {
                assert!(pair[0].name < pair[1].name, "{:?}", series.labels);
            }
        }
    }

    #[test]
    fn summaries_expand_into_quantiles_sum_and_count() {
        let sample = GatheredSample {
            name: "latency".to_string(),
            labels: vec![("job".to_string(), "gw".to_string())],
            value: SampleValue::Summary {
                quantiles: vec![(0.5, 1.0), (0.99, 5.0)],
                sum: 20.0,
                count: 9,
            },
        };

        let request = WriteRequest::from_samples(vec![sample], 0, &LabelRewrite::default());
        let names: Vec<String> = request
            .timeseries
            .iter()
            .map(|series| {
                series
                    .labels
                    .iter()
                    .find(|l| l.name == LABEL_NAME)
                    .map(|l| l.value.clone())
                    .unwrap()
            })
            .collect();
        assert_eq!(names, vec!["latency", "latency", "latency_sum", "latency_count"]);

        let quantile_series = &request.timeseries[0];
        assert!(quantile_series
            .labels
            .iter()
            .any(|l| l.name == "quantile" && l.value == "0.5"));
    }

    #[test]
    fn histograms_expand_into_buckets_sum_and_count() {
        let sample = GatheredSample {
            name: "latency".to_string(),
            labels: vec![],
            value: SampleValue::Histogram {
                buckets: vec![(0.1, 3), (1.0, 9)],
                sum: 4.5,
                count: 9,
            },
        };

        let request = WriteRequest::from_samples(vec![sample], 0, &LabelRewrite::default());
        let names: Vec<String> = request
            .timeseries
            .iter()
            .map(|series| {
                series
                    .labels
                    .iter()
                    .find(|l| l.name == LABEL_NAME)
                    .map(|l| l.value.clone())
                    .unwrap()
            })
            .collect();
        assert_eq!(
            names,
            vec!["latency_bucket", "latency_bucket", "latency_sum", "latency_count"]
        );
        assert!(request.timeseries[1].labels.iter().any(|l| l.name == "le" && l.value == "1"));
    }

    #[test]
    fn compressed_body_roundtrips_through_snappy() {
        let request =
            WriteRequest::from_samples(vec![site_sample()], 1_000, &LabelRewrite::default());
        let reference = request.clone().encode_proto3();

        let compressed = request.encode_compressed().unwrap();
        let decompressed = snap::raw::Decoder::new().decompress_vec(&compressed).unwrap();
        assert_eq!(decompressed, reference);
    }

    #[test]
    fn http_request_carries_the_protocol_headers() {
        let request = WriteRequest::from_samples(
            vec![site_sample()],
            1_000,
            &LabelRewrite::default(),
        );
        let endpoint: hyper::Uri = "http://localhost:9090/api/v1/write".parse().unwrap();
        let http = request.build_http_request(&endpoint, "sparkplug-gateway").unwrap();

        assert_eq!(http.method(), hyper::Method::POST);
        assert_eq!(http.headers()["content-type"], "application/x-protobuf");
        assert_eq!(http.headers()["content-encoding"], "snappy");
        assert_eq!(http.headers()["x-prometheus-remote-write-version"], "0.1.0");
        assert_eq!(http.headers()["user-agent"], "sparkplug-gateway");
    }
}
