use super::common::{
    group_by_scope, to_nanos, write_any_value, write_attributes, write_scope, AttributeLimits,
};
use super::resource::{write_resource, write_schema_url};
use super::{write_growing, ProtobufWriter, SerializationError, Signal, WriteResult};
use crate::limits::SdkLimitOptions;
use crate::model::logs::LogRecord;
use crate::model::ExportBatch;

// opentelemetry.proto.collector.logs.v1.ExportLogsServiceRequest
const REQUEST_RESOURCE_LOGS: u32 = 1;

// opentelemetry.proto.logs.v1
const RESOURCE_LOGS_RESOURCE: u32 = 1;
const RESOURCE_LOGS_SCOPE_LOGS: u32 = 2;
const RESOURCE_LOGS_SCHEMA_URL: u32 = 3;

const SCOPE_LOGS_SCOPE: u32 = 1;
const SCOPE_LOGS_LOG_RECORDS: u32 = 2;
const SCOPE_LOGS_SCHEMA_URL: u32 = 3;

const LOG_RECORD_TIME: u32 = 1;
const LOG_RECORD_SEVERITY_NUMBER: u32 = 2;
const LOG_RECORD_SEVERITY_TEXT: u32 = 3;
const LOG_RECORD_BODY: u32 = 5;
const LOG_RECORD_ATTRIBUTES: u32 = 6;
const LOG_RECORD_DROPPED_ATTRIBUTES_COUNT: u32 = 7;
const LOG_RECORD_FLAGS: u32 = 8;
const LOG_RECORD_TRACE_ID: u32 = 9;
const LOG_RECORD_SPAN_ID: u32 = 10;
const LOG_RECORD_OBSERVED_TIME: u32 = 11;
const LOG_RECORD_EVENT_NAME: u32 = 12;

/// Write `batch` as an `ExportLogsServiceRequest` into `buffer`, starting at
/// `offset`.
pub fn write_logs_data(
    buffer: &mut Vec<u8>,
    offset: usize,
    limits: &SdkLimitOptions,
    batch: ExportBatch<'_, LogRecord>,
) -> Result<usize, SerializationError> {
    write_growing(buffer, offset, Signal::Logs, |writer| {
        write_resource_logs(writer, limits, &batch)
    })
}

fn write_resource_logs(
    writer: &mut ProtobufWriter<'_>,
    limits: &SdkLimitOptions,
    batch: &ExportBatch<'_, LogRecord>,
) -> WriteResult {
    let slot = writer.begin_message(REQUEST_RESOURCE_LOGS)?;
    write_resource(writer, RESOURCE_LOGS_RESOURCE, batch.resource)?;

    let scope_limits =
        AttributeLimits::new(limits.attribute_count_limit, limits.attribute_value_length_limit);
    let record_limits = AttributeLimits::new(
        limits.log_record_attribute_count_limit,
        limits.log_record_attribute_value_length_limit,
    );
    for (scope, records) in group_by_scope(batch.records, |record| &record.instrumentation_scope)
    {
        let scope_slot = writer.begin_message(RESOURCE_LOGS_SCOPE_LOGS)?;
        write_scope(writer, SCOPE_LOGS_SCOPE, scope, scope_limits)?;
        for record in records {
            write_log_record(writer, record, record_limits)?;
        }
        write_schema_url(writer, SCOPE_LOGS_SCHEMA_URL, scope.schema_url.as_deref())?;
        writer.end_message(scope_slot)?;
    }

    write_schema_url(
        writer,
        RESOURCE_LOGS_SCHEMA_URL,
        batch.resource.schema_url.as_deref(),
    )?;
    writer.end_message(slot)
}

fn write_log_record(
    writer: &mut ProtobufWriter<'_>,
    record: &LogRecord,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(SCOPE_LOGS_LOG_RECORDS)?;
    if let Some(timestamp) = record.timestamp {
        writer.write_fixed64_with_tag(LOG_RECORD_TIME, to_nanos(timestamp))?;
    }
    if let Some(severity) = record.severity_number {
        writer.write_enum_with_tag(LOG_RECORD_SEVERITY_NUMBER, severity as i32)?;
    }
    if let Some(text) = &record.severity_text {
        writer.write_string_with_tag(LOG_RECORD_SEVERITY_TEXT, text)?;
    }
    if let Some(body) = &record.body {
        write_any_value(writer, LOG_RECORD_BODY, body, limits.value_length)?;
    }
    let dropped = write_attributes(writer, LOG_RECORD_ATTRIBUTES, &record.attributes, limits)?;
    if dropped > 0 {
        writer.write_uint32_with_tag(LOG_RECORD_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }
    if let Some(context) = &record.trace_context {
        if let Some(flags) = context.trace_flags {
            writer.write_fixed32_with_tag(LOG_RECORD_FLAGS, u32::from(flags.to_u8()))?;
        }
        writer.write_bytes_with_tag(LOG_RECORD_TRACE_ID, &context.trace_id.to_bytes())?;
        writer.write_bytes_with_tag(LOG_RECORD_SPAN_ID, &context.span_id.to_bytes())?;
    }
    if let Some(observed) = record.observed_timestamp.or(record.timestamp) {
        writer.write_fixed64_with_tag(LOG_RECORD_OBSERVED_TIME, to_nanos(observed))?;
    }
    if let Some(event_name) = &record.event_name {
        writer.write_string_with_tag(LOG_RECORD_EVENT_NAME, event_name)?;
    }
    writer.end_message(slot)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use opentelemetry::logs::Severity;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId};
    use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
    use opentelemetry_proto::tonic::common::v1::any_value;
    use prost::Message;

    use super::*;
    use crate::model::logs::TraceContext;
    use crate::model::{AnyValue, InstrumentationScope, KeyValue, Resource};

    fn serialize(
        resource: &Resource,
        records: &[LogRecord],
        limits: &SdkLimitOptions,
    ) -> ExportLogsServiceRequest {
        let mut buffer = Vec::new();
        let end = write_logs_data(&mut buffer, 0, limits, ExportBatch::new(resource, records))
            .expect("serialized");
        ExportLogsServiceRequest::decode(&buffer[..end]).expect("valid request")
    }

    #[test]
    fn log_record_fields_are_written() {
        let resource = Resource::new(vec![KeyValue::new("service.name", "billing")]);
        let record = LogRecord {
            event_name: Some("payment.failed".into()),
            timestamp: Some(UNIX_EPOCH + Duration::from_nanos(10)),
            observed_timestamp: Some(UNIX_EPOCH + Duration::from_nanos(20)),
            severity_number: Some(Severity::Error),
            severity_text: Some("ERROR".into()),
            body: Some(AnyValue::from("card declined")),
            attributes: vec![KeyValue::new("amount", 42)],
            trace_context: Some(TraceContext {
                trace_id: TraceId::from_bytes(99_u128.to_be_bytes()),
                span_id: SpanId::from_bytes(7_u64.to_be_bytes()),
                trace_flags: Some(TraceFlags::SAMPLED),
            }),
            instrumentation_scope: InstrumentationScope::new("payments"),
        };

        let request = serialize(&resource, &[record], &SdkLimitOptions::default());
        let scope_logs = &request.resource_logs[0].scope_logs[0];
        assert_eq!(scope_logs.scope.as_ref().map(|s| s.name.as_str()), Some("payments"));

        let record = &scope_logs.log_records[0];
        assert_eq!(record.time_unix_nano, 10);
        assert_eq!(record.observed_time_unix_nano, 20);
        assert_eq!(record.severity_number, Severity::Error as i32);
        assert_eq!(record.severity_text, "ERROR");
        assert_eq!(
            record.body.as_ref().and_then(|b| b.value.clone()),
            Some(any_value::Value::StringValue("card declined".into()))
        );
        assert_eq!(record.attributes[0].key, "amount");
        assert_eq!(record.flags, 1);
        assert_eq!(record.trace_id, 99_u128.to_be_bytes());
        assert_eq!(record.span_id, 7_u64.to_be_bytes());
        assert_eq!(record.event_name, "payment.failed");
    }

    #[test]
    fn observed_time_falls_back_to_timestamp() {
        let record = LogRecord {
            timestamp: Some(UNIX_EPOCH + Duration::from_nanos(1_234)),
            instrumentation_scope: InstrumentationScope::new("lib"),
            ..Default::default()
        };

        let request = serialize(&Resource::default(), &[record], &SdkLimitOptions::default());
        let record = &request.resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.observed_time_unix_nano, 1_234);
        assert!(record.trace_id.is_empty());
        assert!(record.body.is_none());
    }

    #[test]
    fn log_record_limits_are_applied() {
        let record = LogRecord {
            body: Some(AnyValue::from("a body is truncated too")),
            attributes: vec![
                KeyValue::new("message", "I'm an attribute"),
                KeyValue::new("extra", 1),
                KeyValue::new("more", 2),
            ],
            instrumentation_scope: InstrumentationScope::new("lib"),
            ..Default::default()
        };
        let limits = SdkLimitOptions {
            log_record_attribute_count_limit: 1,
            log_record_attribute_value_length_limit: Some(8),
            ..SdkLimitOptions::default()
        };

        let request = serialize(&Resource::default(), &[record], &limits);
        let record = &request.resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(
            record.attributes[0].value.as_ref().and_then(|v| v.value.clone()),
            Some(any_value::Value::StringValue("I'm an a".into()))
        );
        assert_eq!(record.dropped_attributes_count, 2);
        assert_eq!(
            record.body.as_ref().and_then(|b| b.value.clone()),
            Some(any_value::Value::StringValue("a body i".into()))
        );
    }

    #[test]
    fn records_from_different_scopes_are_grouped() {
        let record = |scope: &'static str| LogRecord {
            instrumentation_scope: InstrumentationScope::new(scope),
            ..Default::default()
        };
        let records = [record("a"), record("b"), record("a")];

        let request = serialize(&Resource::default(), &records, &SdkLimitOptions::default());
        let counts: Vec<_> = request.resource_logs[0]
            .scope_logs
            .iter()
            .map(|s| s.log_records.len())
            .collect();
        assert_eq!(counts, vec![2, 1]);
    }
}
