//! Helpers for rendering metrics in the Prometheus exposition format.

/// Checks a metric name against the Prometheus [data model].
///
/// The registry rejects names that fail this check instead of rewriting
/// them: a malformed Sparkplug identifier must not mint a new timeseries.
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn valid_metric_name(name: &str) -> bool {
    // The first character must be [a-zA-Z_:], and all subsequent characters
    // must be [a-zA-Z0-9_:].
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if !invalid_metric_name_start_character(c) => {}
        _ => return false,
    }
    chars.all(|c| !invalid_metric_name_character(c))
}

/// Sanitizes a label key to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_label_key(key: &str) -> String {
    // The first character must be [a-zA-Z_], and all subsequent characters
    // must be [a-zA-Z0-9_].
    let mut out = String::with_capacity(key.len());
    let mut is_invalid: fn(char) -> bool = invalid_label_key_start_character;
    for c in key.chars() {
        if is_invalid(c) {
            out.push('_');
        } else {
            out.push(c);
        }
        is_invalid = invalid_label_key_character;
    }
    out
}

/// Escapes a label value for the exposition format.
///
/// All Unicode characters are valid, but backslashes, double quotes, and
/// line feeds must be escaped.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Renders a `key="value"` fragment with the value escaped.
pub fn format_label(key: &str, value: &str) -> String {
    format!("{}=\"{}\"", key, escape_label_value(value))
}

/// Writes a help (description) line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_help_line(buffer: &mut String, name: &str, desc: &str) {
    buffer.push_str("# HELP ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(desc);
    buffer.push('\n');
}

/// Writes a metric type line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: &str) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a metric in the Prometheus [exposition format].
///
/// `labels` entries are pre-rendered `key="value"` fragments.
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_metric_line<T: std::fmt::Display>(
    buffer: &mut String,
    name: &str,
    labels: &[String],
    value: T,
) {
    buffer.push_str(name);

    if !labels.is_empty() {
        buffer.push('{');
        let mut first = true;
        for label in labels {
            if first {
                first = false;
            } else {
                buffer.push(',');
            }
            buffer.push_str(label);
        }
        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(value.to_string().as_str());
    buffer.push('\n');
}

#[inline]
fn invalid_metric_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_:].
    !(c.is_ascii_alphabetic() || c == '_' || c == ':')
}

#[inline]
fn invalid_metric_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_:].
    !(c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[inline]
fn invalid_label_key_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_].
    !(c.is_ascii_alphabetic() || c == '_')
}

#[inline]
fn invalid_label_key_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    !(c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        escape_label_value, format_label, invalid_label_key_character,
        invalid_label_key_start_character, sanitize_label_key, valid_metric_name,
        write_metric_line,
    };

    #[test]
    fn test_valid_metric_name_known_cases() {
        let cases = &[
            ("voltage", true),
            ("foo_bar", true),
            ("foo1:bar2", true),
            ("_hidden", true),
            (":colon", true),
            ("", false),
            ("1foobar", false),
            ("Scan Rate ms", false),
            ("Device Control/Rebirth", false),
            ("Motor/RPM", false),
            ("RPM", true),
        ];

        for (input, expected) in cases {
            assert_eq!(valid_metric_name(input), *expected, "{input}");
        }
    }

    #[test]
    fn test_sanitize_label_key_known_cases() {
        let cases = &[
            ("*", "_"),
            ("\"", "_"),
            (":", "_"),
            ("foo_bar", "foo_bar"),
            ("1foobar", "_foobar"),
            ("foo1bar2", "foo1bar2"),
            ("123", "_23"),
        ];

        for (input, expected) in cases {
            assert_eq!(&sanitize_label_key(input), expected);
        }
    }

    #[test]
    fn test_escape_label_value_known_cases() {
        let cases = &[
            ("*", "*"),
            ("\"", "\\\""),
            ("\\", "\\\\"),
            ("\n", "\\n"),
            ("foo_bar", "foo_bar"),
        ];

        for (input, expected) in cases {
            assert_eq!(&escape_label_value(input), expected);
        }
    }

    #[test]
    fn test_write_metric_line() {
        let mut buffer = String::new();
        write_metric_line(&mut buffer, "voltage", &[], 12.5);
        assert_eq!(buffer, "voltage 12.5\n");

        let mut buffer = String::new();
        let labels = vec![format_label("sp_group_id", "GroupA"), format_label("unit", "V")];
        write_metric_line(&mut buffer, "voltage", &labels, 12.5);
        assert_eq!(buffer, "voltage{sp_group_id=\"GroupA\",unit=\"V\"} 12.5\n");
    }

    proptest! {
        #[test]
        fn test_sanitize_label_key_never_produces_invalid(input in ".*") {
            let result = sanitize_label_key(&input);
            let as_chars = result.chars().collect::<Vec<_>>();

            if let Some(c) = as_chars.first() {
                prop_assert!(!invalid_label_key_start_character(*c));
            }

            prop_assert!(!as_chars.iter().any(|c| invalid_label_key_character(*c)));
        }

        #[test]
        fn test_escape_label_value_never_leaves_raw_newlines(input in ".*") {
            prop_assert!(!escape_label_value(&input).contains('\n'));
        }
    }
}
