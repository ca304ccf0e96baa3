use opentelemetry::trace::{SpanId, SpanKind, Status};

use super::common::{group_by_scope, to_nanos, write_attributes, write_scope, AttributeLimits};
use super::resource::{write_resource, write_schema_url};
use super::{write_growing, ProtobufWriter, SerializationError, Signal, WriteResult};
use crate::limits::SdkLimitOptions;
use crate::model::trace::{Event, Link, SpanData};
use crate::model::ExportBatch;

// opentelemetry.proto.collector.trace.v1.ExportTraceServiceRequest
const REQUEST_RESOURCE_SPANS: u32 = 1;

// opentelemetry.proto.trace.v1
const RESOURCE_SPANS_RESOURCE: u32 = 1;
const RESOURCE_SPANS_SCOPE_SPANS: u32 = 2;
const RESOURCE_SPANS_SCHEMA_URL: u32 = 3;

const SCOPE_SPANS_SCOPE: u32 = 1;
const SCOPE_SPANS_SPANS: u32 = 2;
const SCOPE_SPANS_SCHEMA_URL: u32 = 3;

const SPAN_TRACE_ID: u32 = 1;
const SPAN_SPAN_ID: u32 = 2;
const SPAN_TRACE_STATE: u32 = 3;
const SPAN_PARENT_SPAN_ID: u32 = 4;
const SPAN_NAME: u32 = 5;
const SPAN_KIND: u32 = 6;
const SPAN_START_TIME: u32 = 7;
const SPAN_END_TIME: u32 = 8;
const SPAN_ATTRIBUTES: u32 = 9;
const SPAN_DROPPED_ATTRIBUTES_COUNT: u32 = 10;
const SPAN_EVENTS: u32 = 11;
const SPAN_DROPPED_EVENTS_COUNT: u32 = 12;
const SPAN_LINKS: u32 = 13;
const SPAN_DROPPED_LINKS_COUNT: u32 = 14;
const SPAN_STATUS: u32 = 15;
const SPAN_FLAGS: u32 = 16;

const EVENT_TIME: u32 = 1;
const EVENT_NAME: u32 = 2;
const EVENT_ATTRIBUTES: u32 = 3;
const EVENT_DROPPED_ATTRIBUTES_COUNT: u32 = 4;

const LINK_TRACE_ID: u32 = 1;
const LINK_SPAN_ID: u32 = 2;
const LINK_TRACE_STATE: u32 = 3;
const LINK_ATTRIBUTES: u32 = 4;
const LINK_DROPPED_ATTRIBUTES_COUNT: u32 = 5;
const LINK_FLAGS: u32 = 6;

const STATUS_MESSAGE: u32 = 2;
const STATUS_CODE: u32 = 3;

const STATUS_CODE_OK: i32 = 1;
const STATUS_CODE_ERROR: i32 = 2;

const SPAN_FLAGS_CONTEXT_HAS_IS_REMOTE: u32 = 0x100;
const SPAN_FLAGS_CONTEXT_IS_REMOTE: u32 = 0x200;

/// Write `batch` as an `ExportTraceServiceRequest` into `buffer`, starting at
/// `offset`.
///
/// The buffer is grown as needed. Returns the position right after the
/// last byte written.
pub fn write_traces_data(
    buffer: &mut Vec<u8>,
    offset: usize,
    limits: &SdkLimitOptions,
    batch: ExportBatch<'_, SpanData>,
) -> Result<usize, SerializationError> {
    write_growing(buffer, offset, Signal::Traces, |writer| {
        write_resource_spans(writer, limits, &batch)
    })
}

fn write_resource_spans(
    writer: &mut ProtobufWriter<'_>,
    limits: &SdkLimitOptions,
    batch: &ExportBatch<'_, SpanData>,
) -> WriteResult {
    let slot = writer.begin_message(REQUEST_RESOURCE_SPANS)?;
    write_resource(writer, RESOURCE_SPANS_RESOURCE, batch.resource)?;

    let scope_limits =
        AttributeLimits::new(limits.attribute_count_limit, limits.attribute_value_length_limit);
    for (scope, spans) in group_by_scope(batch.records, |span| &span.instrumentation_scope) {
        let scope_slot = writer.begin_message(RESOURCE_SPANS_SCOPE_SPANS)?;
        write_scope(writer, SCOPE_SPANS_SCOPE, scope, scope_limits)?;
        for span in spans {
            write_span(writer, limits, span)?;
        }
        write_schema_url(writer, SCOPE_SPANS_SCHEMA_URL, scope.schema_url.as_deref())?;
        writer.end_message(scope_slot)?;
    }

    write_schema_url(
        writer,
        RESOURCE_SPANS_SCHEMA_URL,
        batch.resource.schema_url.as_deref(),
    )?;
    writer.end_message(slot)
}

fn span_kind(kind: &SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
        SpanKind::Producer => 4,
        SpanKind::Consumer => 5,
    }
}

fn write_span(
    writer: &mut ProtobufWriter<'_>,
    limits: &SdkLimitOptions,
    span: &SpanData,
) -> WriteResult {
    let slot = writer.begin_message(SCOPE_SPANS_SPANS)?;
    writer.write_bytes_with_tag(SPAN_TRACE_ID, &span.trace_id.to_bytes())?;
    writer.write_bytes_with_tag(SPAN_SPAN_ID, &span.span_id.to_bytes())?;
    if let Some(trace_state) = span.trace_state.as_deref().filter(|s| !s.is_empty()) {
        writer.write_string_with_tag(SPAN_TRACE_STATE, trace_state)?;
    }
    if span.parent_span_id != SpanId::INVALID {
        writer.write_bytes_with_tag(SPAN_PARENT_SPAN_ID, &span.parent_span_id.to_bytes())?;
    }
    writer.write_string_with_tag(SPAN_NAME, &span.name)?;
    writer.write_enum_with_tag(SPAN_KIND, span_kind(&span.span_kind))?;
    writer.write_fixed64_with_tag(SPAN_START_TIME, to_nanos(span.start_time))?;
    writer.write_fixed64_with_tag(SPAN_END_TIME, to_nanos(span.end_time))?;

    let value_length = limits.span_attribute_value_length_limit;
    let dropped = write_attributes(
        writer,
        SPAN_ATTRIBUTES,
        &span.attributes,
        AttributeLimits::new(limits.span_attribute_count_limit, value_length),
    )?
    .saturating_add(span.dropped_attributes_count);
    if dropped > 0 {
        writer.write_uint32_with_tag(SPAN_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }

    let event_limits = AttributeLimits::new(limits.span_event_attribute_count_limit, value_length);
    for event in span.events.iter().take(limits.span_event_count_limit) {
        write_event(writer, event, event_limits)?;
    }
    let dropped_events = saturating_u32(
        span.events
            .len()
            .saturating_sub(limits.span_event_count_limit),
    )
    .saturating_add(span.dropped_events_count);
    if dropped_events > 0 {
        writer.write_uint32_with_tag(SPAN_DROPPED_EVENTS_COUNT, dropped_events)?;
    }

    let link_limits = AttributeLimits::new(limits.span_link_attribute_count_limit, value_length);
    for link in span.links.iter().take(limits.span_link_count_limit) {
        write_link(writer, link, link_limits)?;
    }
    let dropped_links =
        saturating_u32(span.links.len().saturating_sub(limits.span_link_count_limit))
            .saturating_add(span.dropped_links_count);
    if dropped_links > 0 {
        writer.write_uint32_with_tag(SPAN_DROPPED_LINKS_COUNT, dropped_links)?;
    }

    write_status(writer, &span.status)?;

    let mut flags = u32::from(span.trace_flags.to_u8()) | SPAN_FLAGS_CONTEXT_HAS_IS_REMOTE;
    if span.parent_span_is_remote {
        flags |= SPAN_FLAGS_CONTEXT_IS_REMOTE;
    }
    writer.write_fixed32_with_tag(SPAN_FLAGS, flags)?;
    writer.end_message(slot)
}

fn write_event(
    writer: &mut ProtobufWriter<'_>,
    event: &Event,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(SPAN_EVENTS)?;
    writer.write_fixed64_with_tag(EVENT_TIME, to_nanos(event.timestamp))?;
    writer.write_string_with_tag(EVENT_NAME, &event.name)?;
    let dropped = write_attributes(writer, EVENT_ATTRIBUTES, &event.attributes, limits)?
        .saturating_add(event.dropped_attributes_count);
    if dropped > 0 {
        writer.write_uint32_with_tag(EVENT_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }
    writer.end_message(slot)
}

fn write_link(writer: &mut ProtobufWriter<'_>, link: &Link, limits: AttributeLimits) -> WriteResult {
    let slot = writer.begin_message(SPAN_LINKS)?;
    writer.write_bytes_with_tag(LINK_TRACE_ID, &link.trace_id.to_bytes())?;
    writer.write_bytes_with_tag(LINK_SPAN_ID, &link.span_id.to_bytes())?;
    if let Some(trace_state) = link.trace_state.as_deref().filter(|s| !s.is_empty()) {
        writer.write_string_with_tag(LINK_TRACE_STATE, trace_state)?;
    }
    let dropped = write_attributes(writer, LINK_ATTRIBUTES, &link.attributes, limits)?
        .saturating_add(link.dropped_attributes_count);
    if dropped > 0 {
        writer.write_uint32_with_tag(LINK_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }
    let mut flags = u32::from(link.trace_flags.to_u8()) | SPAN_FLAGS_CONTEXT_HAS_IS_REMOTE;
    if link.is_remote {
        flags |= SPAN_FLAGS_CONTEXT_IS_REMOTE;
    }
    writer.write_fixed32_with_tag(LINK_FLAGS, flags)?;
    writer.end_message(slot)
}

fn write_status(writer: &mut ProtobufWriter<'_>, status: &Status) -> WriteResult {
    let (code, message) = match status {
        Status::Unset => return Ok(()),
        Status::Ok => (STATUS_CODE_OK, None),
        Status::Error { description } => (STATUS_CODE_ERROR, Some(description.as_ref())),
    };
    let slot = writer.begin_message(SPAN_STATUS)?;
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        writer.write_string_with_tag(STATUS_MESSAGE, message)?;
    }
    writer.write_enum_with_tag(STATUS_CODE, code)?;
    writer.end_message(slot)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
