use std::borrow::Cow;
use std::time::SystemTime;

use opentelemetry::logs::Severity;
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};

use super::common::{AnyValue, InstrumentationScope, KeyValue};

/// Trace context a log record was emitted in.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceContext {
    /// Trace id
    pub trace_id: TraceId,
    /// Span id
    pub span_id: SpanId,
    /// Trace flags
    pub trace_flags: Option<TraceFlags>,
}

/// A log record as produced by the SDK.
#[derive(Clone, Debug, Default)]
pub struct LogRecord {
    /// Event name, when the record represents an event
    pub event_name: Option<Cow<'static, str>>,
    /// Time the event occurred
    pub timestamp: Option<SystemTime>,
    /// Time the record was observed by the SDK
    pub observed_timestamp: Option<SystemTime>,
    /// Severity number
    pub severity_number: Option<Severity>,
    /// Original severity text
    pub severity_text: Option<Cow<'static, str>>,
    /// Record body
    pub body: Option<AnyValue>,
    /// Record attributes
    pub attributes: Vec<KeyValue>,
    /// Trace context of the record
    pub trace_context: Option<TraceContext>,
    /// Scope that emitted the record
    pub instrumentation_scope: InstrumentationScope,
}
