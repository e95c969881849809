//! Hand-written [`prost`] message types for the Sparkplug-B payload schema.
//!
//! Only the parts of the schema the gateway consumes are modelled: the
//! payload envelope, metrics with their scalar value variants, and the
//! datatype table. Complex value types (datasets, templates, property
//! sets) are not decoded; metrics carrying them simply have no scalar
//! value and are skipped by the numeric path.
//!
//! Sparkplug encodes all integer values through unsigned wire fields, so
//! signed datatypes have to be reinterpreted through their declared width
//! before they can be used as samples. [`Metric::as_float`] performs that
//! correction.
#![deny(clippy::all)]
#![deny(missing_docs)]

/// A Sparkplug-B payload.
///
/// .proto:
/// ```protobuf
/// message Payload {
///   optional uint64 timestamp = 1;
///   repeated Metric metrics   = 2;
///   optional uint64 seq       = 3;
///   optional string uuid      = 4;
///   optional bytes  body      = 5;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct Payload {
    /// Timestamp at message sending time, in milliseconds since the epoch.
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    /// The metrics carried by this payload.
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
    /// Sequence number, wrapping at 256.
    #[prost(uint64, optional, tag = "3")]
    pub seq: Option<u64>,
    /// UUID qualifying the payload body, if any.
    #[prost(string, optional, tag = "4")]
    pub uuid: Option<String>,
    /// Opaque payload body.
    #[prost(bytes = "vec", optional, tag = "5")]
    pub body: Option<Vec<u8>>,
}

impl Payload {
    /// The name of the first metric, or the empty string when the payload
    /// carries none. Used as a routing attribute.
    pub fn first_metric_name(&self) -> &str {
        self.metrics.first().and_then(|m| m.name.as_deref()).unwrap_or("")
    }
}

/// A single metric within a [`Payload`].
///
/// .proto:
/// ```protobuf
/// message Metric {
///   optional string name          = 1;
///   optional uint64 alias         = 2;
///   optional uint64 timestamp     = 3;
///   optional uint32 datatype      = 4;
///   optional bool   is_historical = 5;
///   optional bool   is_transient  = 6;
///   optional bool   is_null       = 7;
///   oneof value {
///     uint32 int_value     = 10;
///     uint64 long_value    = 11;
///     float  float_value   = 12;
///     double double_value  = 13;
///     bool   boolean_value = 14;
///     string string_value  = 15;
///     bytes  bytes_value   = 16;
///   }
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct Metric {
    /// Metric name; may embed `/`-separated path segments.
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    /// Alias assigned at birth, usable in place of the name.
    #[prost(uint64, optional, tag = "2")]
    pub alias: Option<u64>,
    /// Per-metric timestamp in milliseconds since the epoch.
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    /// Datatype discriminant, see [`DataType`].
    #[prost(uint32, optional, tag = "4")]
    pub datatype: Option<u32>,
    /// Whether this is a historical (replayed) value.
    #[prost(bool, optional, tag = "5")]
    pub is_historical: Option<bool>,
    /// Whether this value should not be persisted.
    #[prost(bool, optional, tag = "6")]
    pub is_transient: Option<bool>,
    /// Whether the value is explicitly null.
    #[prost(bool, optional, tag = "7")]
    pub is_null: Option<bool>,
    /// The scalar value, when present.
    #[prost(oneof = "metric::Value", tags = "10, 11, 12, 13, 14, 15, 16")]
    pub value: Option<metric::Value>,
}

/// Nested types for [`Metric`].
pub mod metric {
    /// The scalar value variants of a metric.
    #[derive(prost::Oneof, Clone, PartialEq)]
    pub enum Value {
        /// Wire form of all 8/16/32-bit integer datatypes.
        #[prost(uint32, tag = "10")]
        IntValue(u32),
        /// Wire form of the 64-bit integer datatypes and DateTime.
        #[prost(uint64, tag = "11")]
        LongValue(u64),
        /// 32-bit float.
        #[prost(float, tag = "12")]
        FloatValue(f32),
        /// 64-bit float.
        #[prost(double, tag = "13")]
        DoubleValue(f64),
        /// Boolean.
        #[prost(bool, tag = "14")]
        BooleanValue(bool),
        /// String, Text, or UUID.
        #[prost(string, tag = "15")]
        StringValue(String),
        /// Bytes or File.
        #[prost(bytes, tag = "16")]
        BytesValue(Vec<u8>),
    }
}

impl Metric {
    /// Builds a named scalar metric, used for outbound command payloads.
    pub fn new(name: impl Into<String>, datatype: DataType, value: metric::Value) -> Self {
        Metric {
            name: Some(name.into()),
            datatype: Some(datatype as u32),
            value: Some(value),
            ..Default::default()
        }
    }

    fn int_value(&self) -> u32 {
        match self.value {
            Some(metric::Value::IntValue(v)) => v,
            _ => 0,
        }
    }

    fn long_value(&self) -> u64 {
        match self.value {
            Some(metric::Value::LongValue(v)) => v,
            _ => 0,
        }
    }

    /// Coerces a numeric metric to `f64`.
    ///
    /// Returns `None` for non-numeric datatypes. Signed datatypes are
    /// reinterpreted through their declared width: the wire carries them
    /// in unsigned fields, so e.g. `0xFF` at Int8 must come back as
    /// `-1.0`, not `255.0`.
    pub fn as_float(&self) -> Option<f64> {
        match DataType::from_u32(self.datatype())? {
            DataType::Int8 => Some(f64::from(self.int_value() as i8)),
            DataType::Int16 => Some(f64::from(self.int_value() as i16)),
            DataType::Int32 => Some(f64::from(self.int_value() as i32)),
            DataType::Int64 => Some(self.long_value() as i64 as f64),
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => {
                Some(f64::from(self.int_value()))
            }
            DataType::UInt64 => Some(self.long_value() as f64),
            DataType::Float => match self.value {
                Some(metric::Value::FloatValue(v)) => Some(f64::from(v)),
                _ => Some(0.0),
            },
            DataType::Double => match self.value {
                Some(metric::Value::DoubleValue(v)) => Some(v),
                _ => Some(0.0),
            },
            _ => None,
        }
    }

    /// Renders the value for human consumption, regardless of datatype.
    ///
    /// Numeric datatypes go through the same sign correction as
    /// [`as_float`](Self::as_float). Metrics without a usable value
    /// render as the empty string.
    pub fn display_value(&self) -> String {
        if let Some(v) = self.as_float() {
            return v.to_string();
        }
        match &self.value {
            Some(metric::Value::BooleanValue(v)) => v.to_string(),
            Some(metric::Value::StringValue(s)) => s.clone(),
            Some(metric::Value::IntValue(v)) => v.to_string(),
            Some(metric::Value::LongValue(v)) => v.to_string(),
            Some(metric::Value::FloatValue(v)) => v.to_string(),
            Some(metric::Value::DoubleValue(v)) => v.to_string(),
            Some(metric::Value::BytesValue(b)) => format!("{} bytes", b.len()),
            None => String::new(),
        }
    }
}

/// The Sparkplug-B datatype table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum DataType {
    Unknown = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
    DateTime = 13,
    Text = 14,
    Uuid = 15,
    DataSet = 16,
    Bytes = 17,
    File = 18,
    Template = 19,
    PropertySet = 20,
    PropertySetList = 21,
    Int8Array = 22,
    Int16Array = 23,
    Int32Array = 24,
    Int64Array = 25,
    UInt8Array = 26,
    UInt16Array = 27,
    UInt32Array = 28,
    UInt64Array = 29,
    FloatArray = 30,
    DoubleArray = 31,
    BooleanArray = 32,
    StringArray = 33,
    DateTimeArray = 34,
}

impl DataType {
    /// Maps a wire discriminant back to the table, `None` when out of range.
    pub fn from_u32(value: u32) -> Option<DataType> {
        use DataType::*;
        let dt = match value {
            0 => Unknown,
            1 => Int8,
            2 => Int16,
            3 => Int32,
            4 => Int64,
            5 => UInt8,
            6 => UInt16,
            7 => UInt32,
            8 => UInt64,
            9 => Float,
            10 => Double,
            11 => Boolean,
            12 => String,
            13 => DateTime,
            14 => Text,
            15 => Uuid,
            16 => DataSet,
            17 => Bytes,
            18 => File,
            19 => Template,
            20 => PropertySet,
            21 => PropertySetList,
            22 => Int8Array,
            23 => Int16Array,
            24 => Int32Array,
            25 => Int64Array,
            26 => UInt8Array,
            27 => UInt16Array,
            28 => UInt32Array,
            29 => UInt64Array,
            30 => FloatArray,
            31 => DoubleArray,
            32 => BooleanArray,
            33 => StringArray,
            34 => DateTimeArray,
            _ => return None,
        };
        Some(dt)
    }

    /// Whether samples of this datatype can be coerced to `f64`.
    pub fn is_numeric(self) -> bool {
        matches!(self as u32, 1..=10)
    }

    /// The datatype's name as it appears in the Sparkplug specification.
    pub fn name(self) -> &'static str {
        use DataType::*;
        match self {
            Unknown => "Unknown",
            Int8 => "Int8",
            Int16 => "Int16",
            Int32 => "Int32",
            Int64 => "Int64",
            UInt8 => "UInt8",
            UInt16 => "UInt16",
            UInt32 => "UInt32",
            UInt64 => "UInt64",
            Float => "Float",
            Double => "Double",
            Boolean => "Boolean",
            String => "String",
            DateTime => "DateTime",
            Text => "Text",
            Uuid => "UUID",
            DataSet => "DataSet",
            Bytes => "Bytes",
            File => "File",
            Template => "Template",
            PropertySet => "PropertySet",
            PropertySetList => "PropertySetList",
            Int8Array => "Int8Array",
            Int16Array => "Int16Array",
            Int32Array => "Int32Array",
            Int64Array => "Int64Array",
            UInt8Array => "UInt8Array",
            UInt16Array => "UInt16Array",
            UInt32Array => "UInt32Array",
            UInt64Array => "UInt64Array",
            FloatArray => "FloatArray",
            DoubleArray => "DoubleArray",
            BooleanArray => "BooleanArray",
            StringArray => "StringArray",
            DateTimeArray => "DateTimeArray",
        }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use super::metric::Value;
    use super::{DataType, Metric, Payload};

    fn metric_with(datatype: DataType, value: Value) -> Metric {
        Metric::new("test", datatype, value)
    }

    #[test]
    fn signed_types_sign_extend() {
        let cases = &[
            (DataType::Int8, Value::IntValue(0xFF), -1.0),
            (DataType::Int8, Value::IntValue(0x80), -128.0),
            (DataType::Int16, Value::IntValue(0xFFFF), -1.0),
            (DataType::Int16, Value::IntValue(0x8000), -32768.0),
            (DataType::Int32, Value::IntValue(0xFFFF_FFFF), -1.0),
            (DataType::Int64, Value::LongValue(u64::MAX), -1.0),
        ];

        for (datatype, value, expected) in cases {
            let m = metric_with(*datatype, value.clone());
            assert_eq!(m.as_float(), Some(*expected), "{datatype:?}");
        }
    }

    #[test]
    fn unsigned_types_pass_through() {
        let cases = &[
            (DataType::UInt8, Value::IntValue(0xFF), 255.0),
            (DataType::UInt16, Value::IntValue(0xFFFF), 65535.0),
            (DataType::UInt32, Value::IntValue(0xFFFF_FFFF), 4294967295.0),
            (DataType::UInt64, Value::LongValue(1 << 40), 1099511627776.0),
        ];

        for (datatype, value, expected) in cases {
            let m = metric_with(*datatype, value.clone());
            assert_eq!(m.as_float(), Some(*expected), "{datatype:?}");
        }
    }

    #[test]
    fn floats_and_doubles() {
        let m = metric_with(DataType::Float, Value::FloatValue(2.5));
        assert_eq!(m.as_float(), Some(2.5));

        let m = metric_with(DataType::Double, Value::DoubleValue(12.5));
        assert_eq!(m.as_float(), Some(12.5));
    }

    #[test]
    fn non_numeric_types_do_not_coerce() {
        let m = metric_with(DataType::Boolean, Value::BooleanValue(true));
        assert_eq!(m.as_float(), None);

        let m = metric_with(DataType::String, Value::StringValue("on".into()));
        assert_eq!(m.as_float(), None);

        let m = metric_with(DataType::DataSet, Value::BytesValue(vec![1, 2]));
        assert_eq!(m.as_float(), None);
    }

    #[test]
    fn display_values() {
        let m = metric_with(DataType::Int8, Value::IntValue(0xFF));
        assert_eq!(m.display_value(), "-1");

        let m = metric_with(DataType::Double, Value::DoubleValue(12.5));
        assert_eq!(m.display_value(), "12.5");

        let m = metric_with(DataType::Boolean, Value::BooleanValue(true));
        assert_eq!(m.display_value(), "true");

        let m = metric_with(DataType::String, Value::StringValue("running".into()));
        assert_eq!(m.display_value(), "running");

        let m = Metric::default();
        assert_eq!(m.display_value(), "");
    }

    #[test]
    fn first_metric_name_defaults_to_empty() {
        let payload = Payload::default();
        assert_eq!(payload.first_metric_name(), "");

        let payload = Payload {
            metrics: vec![metric_with(DataType::Double, Value::DoubleValue(1.0))],
            ..Default::default()
        };
        assert_eq!(payload.first_metric_name(), "test");
    }

    #[test]
    fn payload_roundtrip() {
        let payload = Payload {
            timestamp: Some(1_693_000_000_000),
            metrics: vec![
                metric_with(DataType::Double, Value::DoubleValue(12.5)),
                metric_with(DataType::Boolean, Value::BooleanValue(true)),
            ],
            seq: Some(7),
            ..Default::default()
        };

        let bytes = payload.encode_to_vec();
        let decoded = Payload::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn datatype_table_is_dense() {
        for raw in 0..=34 {
            let dt = DataType::from_u32(raw).unwrap();
            assert_eq!(dt as u32, raw);
        }
        assert_eq!(DataType::from_u32(35), None);
        assert!(DataType::Int8.is_numeric());
        assert!(DataType::Double.is_numeric());
        assert!(!DataType::Boolean.is_numeric());
        assert!(!DataType::Unknown.is_numeric());
    }
}
