use std::borrow::Cow;
use std::time::SystemTime;

use opentelemetry::trace::{SpanId, SpanKind, Status, TraceFlags, TraceId};

use super::common::{InstrumentationScope, KeyValue};

/// A finished span as produced by the SDK.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// Trace id of the span
    pub trace_id: TraceId,
    /// Span id
    pub span_id: SpanId,
    /// W3C trace state header value, if any
    pub trace_state: Option<String>,
    /// Trace flags of the span context
    pub trace_flags: TraceFlags,
    /// Span parent id, [`SpanId::INVALID`] for root spans
    pub parent_span_id: SpanId,
    /// Whether the parent span context came from a remote process
    pub parent_span_is_remote: bool,
    /// Span kind
    pub span_kind: SpanKind,
    /// Span name
    pub name: Cow<'static, str>,
    /// Span start time
    pub start_time: SystemTime,
    /// Span end time
    pub end_time: SystemTime,
    /// Span attributes
    pub attributes: Vec<KeyValue>,
    /// Number of attributes the SDK already dropped
    pub dropped_attributes_count: u32,
    /// Span events
    pub events: Vec<Event>,
    /// Number of events the SDK already dropped
    pub dropped_events_count: u32,
    /// Span links
    pub links: Vec<Link>,
    /// Number of links the SDK already dropped
    pub dropped_links_count: u32,
    /// Span status
    pub status: Status,
    /// Scope that created the span
    pub instrumentation_scope: InstrumentationScope,
}

impl SpanData {
    /// Create a span with the required identity fields; everything else is
    /// left empty.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        name: impl Into<Cow<'static, str>>,
        instrumentation_scope: InstrumentationScope,
    ) -> Self {
        let now = SystemTime::now();
        SpanData {
            trace_id,
            span_id,
            trace_state: None,
            trace_flags: TraceFlags::SAMPLED,
            parent_span_id: SpanId::INVALID,
            parent_span_is_remote: false,
            span_kind: SpanKind::Internal,
            name: name.into(),
            start_time: now,
            end_time: now,
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            events: Vec::new(),
            dropped_events_count: 0,
            links: Vec::new(),
            dropped_links_count: 0,
            status: Status::Unset,
            instrumentation_scope,
        }
    }
}

/// A timestamped annotation on a span.
#[derive(Clone, Debug)]
pub struct Event {
    /// Event name
    pub name: Cow<'static, str>,
    /// Event time
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Vec<KeyValue>,
    /// Number of attributes the SDK already dropped
    pub dropped_attributes_count: u32,
}

impl Event {
    /// Create an event.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) -> Self {
        Event {
            name: name.into(),
            timestamp,
            attributes,
            dropped_attributes_count: 0,
        }
    }
}

/// A pointer from a span to another span context.
#[derive(Clone, Debug)]
pub struct Link {
    /// Linked trace id
    pub trace_id: TraceId,
    /// Linked span id
    pub span_id: SpanId,
    /// Linked trace state
    pub trace_state: Option<String>,
    /// Linked trace flags
    pub trace_flags: TraceFlags,
    /// Whether the linked context is remote
    pub is_remote: bool,
    /// Link attributes
    pub attributes: Vec<KeyValue>,
    /// Number of attributes the SDK already dropped
    pub dropped_attributes_count: u32,
}

impl Link {
    /// Create a link to a sampled remote span context.
    pub fn new(trace_id: TraceId, span_id: SpanId, attributes: Vec<KeyValue>) -> Self {
        Link {
            trace_id,
            span_id,
            trace_state: None,
            trace_flags: TraceFlags::SAMPLED,
            is_remote: true,
            attributes,
            dropped_attributes_count: 0,
        }
    }
}
