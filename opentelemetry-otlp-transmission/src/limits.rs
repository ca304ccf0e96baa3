//! Attribute and collection limits applied while writing records.

use std::env;

/// Maximum allowed attribute value length.
pub const OTEL_ATTRIBUTE_VALUE_LENGTH_LIMIT: &str = "OTEL_ATTRIBUTE_VALUE_LENGTH_LIMIT";
/// Maximum allowed attribute count.
pub const OTEL_ATTRIBUTE_COUNT_LIMIT: &str = "OTEL_ATTRIBUTE_COUNT_LIMIT";
/// Maximum allowed span attribute value length.
pub const OTEL_SPAN_ATTRIBUTE_VALUE_LENGTH_LIMIT: &str = "OTEL_SPAN_ATTRIBUTE_VALUE_LENGTH_LIMIT";
/// Maximum allowed span attribute count.
pub const OTEL_SPAN_ATTRIBUTE_COUNT_LIMIT: &str = "OTEL_SPAN_ATTRIBUTE_COUNT_LIMIT";
/// Maximum allowed span event count.
pub const OTEL_SPAN_EVENT_COUNT_LIMIT: &str = "OTEL_SPAN_EVENT_COUNT_LIMIT";
/// Maximum allowed span link count.
pub const OTEL_SPAN_LINK_COUNT_LIMIT: &str = "OTEL_SPAN_LINK_COUNT_LIMIT";
/// Maximum allowed attribute per span event count.
pub const OTEL_EVENT_ATTRIBUTE_COUNT_LIMIT: &str = "OTEL_EVENT_ATTRIBUTE_COUNT_LIMIT";
/// Maximum allowed attribute per span link count.
pub const OTEL_LINK_ATTRIBUTE_COUNT_LIMIT: &str = "OTEL_LINK_ATTRIBUTE_COUNT_LIMIT";
/// Maximum allowed log record attribute count.
pub const OTEL_LOGRECORD_ATTRIBUTE_COUNT_LIMIT: &str = "OTEL_LOGRECORD_ATTRIBUTE_COUNT_LIMIT";
/// Maximum allowed log record attribute value length.
pub const OTEL_LOGRECORD_ATTRIBUTE_VALUE_LENGTH_LIMIT: &str =
    "OTEL_LOGRECORD_ATTRIBUTE_VALUE_LENGTH_LIMIT";

const DEFAULT_COUNT_LIMIT: usize = 128;

/// Limits enforced by the protobuf writer.
///
/// A `None` length limit means values are never truncated. Signal specific
/// limits fall back to the generic attribute limits when unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdkLimitOptions {
    /// Maximum string attribute length, in characters.
    pub attribute_value_length_limit: Option<usize>,
    /// Maximum attributes per resource, scope or data point.
    pub attribute_count_limit: usize,
    /// Maximum string attribute length on spans, events and links.
    pub span_attribute_value_length_limit: Option<usize>,
    /// Maximum attributes per span.
    pub span_attribute_count_limit: usize,
    /// Maximum events per span.
    pub span_event_count_limit: usize,
    /// Maximum links per span.
    pub span_link_count_limit: usize,
    /// Maximum attributes per span event.
    pub span_event_attribute_count_limit: usize,
    /// Maximum attributes per span link.
    pub span_link_attribute_count_limit: usize,
    /// Maximum attributes per log record.
    pub log_record_attribute_count_limit: usize,
    /// Maximum string attribute length on log records.
    pub log_record_attribute_value_length_limit: Option<usize>,
}

impl Default for SdkLimitOptions {
    fn default() -> Self {
        SdkLimitOptions {
            attribute_value_length_limit: None,
            attribute_count_limit: DEFAULT_COUNT_LIMIT,
            span_attribute_value_length_limit: None,
            span_attribute_count_limit: DEFAULT_COUNT_LIMIT,
            span_event_count_limit: DEFAULT_COUNT_LIMIT,
            span_link_count_limit: DEFAULT_COUNT_LIMIT,
            span_event_attribute_count_limit: DEFAULT_COUNT_LIMIT,
            span_link_attribute_count_limit: DEFAULT_COUNT_LIMIT,
            log_record_attribute_count_limit: DEFAULT_COUNT_LIMIT,
            log_record_attribute_value_length_limit: None,
        }
    }
}

impl SdkLimitOptions {
    /// Build limits from the `OTEL_*_LIMIT` environment variables, using the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let attribute_value_length_limit = read_limit(OTEL_ATTRIBUTE_VALUE_LENGTH_LIMIT);
        let attribute_count_limit =
            read_limit(OTEL_ATTRIBUTE_COUNT_LIMIT).unwrap_or(DEFAULT_COUNT_LIMIT);
        let span_attribute_count_limit =
            read_limit(OTEL_SPAN_ATTRIBUTE_COUNT_LIMIT).unwrap_or(attribute_count_limit);

        SdkLimitOptions {
            attribute_value_length_limit,
            attribute_count_limit,
            span_attribute_value_length_limit: read_limit(OTEL_SPAN_ATTRIBUTE_VALUE_LENGTH_LIMIT)
                .or(attribute_value_length_limit),
            span_attribute_count_limit,
            span_event_count_limit: read_limit(OTEL_SPAN_EVENT_COUNT_LIMIT)
                .unwrap_or(DEFAULT_COUNT_LIMIT),
            span_link_count_limit: read_limit(OTEL_SPAN_LINK_COUNT_LIMIT)
                .unwrap_or(DEFAULT_COUNT_LIMIT),
            span_event_attribute_count_limit: read_limit(OTEL_EVENT_ATTRIBUTE_COUNT_LIMIT)
                .unwrap_or(span_attribute_count_limit),
            span_link_attribute_count_limit: read_limit(OTEL_LINK_ATTRIBUTE_COUNT_LIMIT)
                .unwrap_or(span_attribute_count_limit),
            log_record_attribute_count_limit: read_limit(OTEL_LOGRECORD_ATTRIBUTE_COUNT_LIMIT)
                .unwrap_or(attribute_count_limit),
            log_record_attribute_value_length_limit: read_limit(
                OTEL_LOGRECORD_ATTRIBUTE_VALUE_LENGTH_LIMIT,
            )
            .or(attribute_value_length_limit),
        }
    }

    /// Set the generic value length limit, and the span and log record ones
    /// along with it.
    pub fn with_attribute_value_length_limit(mut self, limit: usize) -> Self {
        self.attribute_value_length_limit = Some(limit);
        self.span_attribute_value_length_limit = Some(limit);
        self.log_record_attribute_value_length_limit = Some(limit);
        self
    }

    /// Set the generic attribute count limit, and every per-record attribute
    /// count limit along with it.
    pub fn with_attribute_count_limit(mut self, limit: usize) -> Self {
        self.attribute_count_limit = limit;
        self.span_attribute_count_limit = limit;
        self.span_event_attribute_count_limit = limit;
        self.span_link_attribute_count_limit = limit;
        self.log_record_attribute_count_limit = limit;
        self
    }
}

fn read_limit(var: &str) -> Option<usize> {
    env::var(var).ok().and_then(|value| value.trim().parse().ok())
}
