use std::fmt::{self, Write as _};
use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::otel_debug;

use super::{ProtobufWriter, WriteResult};
use crate::model::{AnyValue, Array, InstrumentationScope, KeyValue};

// opentelemetry.proto.common.v1
const ANY_VALUE_STRING: u32 = 1;
const ANY_VALUE_BOOL: u32 = 2;
const ANY_VALUE_INT: u32 = 3;
const ANY_VALUE_DOUBLE: u32 = 4;
const ANY_VALUE_ARRAY: u32 = 5;
const ANY_VALUE_KVLIST: u32 = 6;
const ANY_VALUE_BYTES: u32 = 7;
const ARRAY_VALUE_VALUES: u32 = 1;
const KEY_VALUE_LIST_VALUES: u32 = 1;
const KEY_VALUE_KEY: u32 = 1;
const KEY_VALUE_VALUE: u32 = 2;
const SCOPE_NAME: u32 = 1;
const SCOPE_VERSION: u32 = 2;
const SCOPE_ATTRIBUTES: u32 = 3;
const SCOPE_DROPPED_ATTRIBUTES_COUNT: u32 = 4;

pub(crate) fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Limits applied to one attribute collection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AttributeLimits {
    pub(crate) count: usize,
    pub(crate) value_length: Option<usize>,
}

impl AttributeLimits {
    pub(crate) const UNLIMITED: AttributeLimits = AttributeLimits {
        count: usize::MAX,
        value_length: None,
    };

    pub(crate) fn new(count: usize, value_length: Option<usize>) -> Self {
        AttributeLimits {
            count,
            value_length,
        }
    }
}

/// Cut `value` down to at most `limit` characters.
pub(crate) fn truncate(value: &str, limit: Option<usize>) -> &str {
    match limit.and_then(|limit| value.char_indices().nth(limit)) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// `None` when `fmt` reports an error. A panic in `fmt` is not caught and
/// unwinds through the writer.
fn render_object(object: &dyn fmt::Display) -> Option<String> {
    let mut rendered = String::new();
    write!(rendered, "{}", object).ok()?;
    Some(rendered)
}

/// Write `attributes` as repeated `KeyValue` messages in `field`.
///
/// Returns how many attributes were left out, either because the count
/// limit was reached or because their value could not be rendered.
pub(crate) fn write_attributes(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    attributes: &[KeyValue],
    limits: AttributeLimits,
) -> WriteResult<u32> {
    let mut written = 0usize;
    let mut dropped = 0u32;
    for attribute in attributes {
        if written < limits.count && write_key_value(writer, field, attribute, limits.value_length)?
        {
            written += 1;
        } else {
            dropped = dropped.saturating_add(1);
        }
    }
    Ok(dropped)
}

/// Write one `KeyValue` message. Nothing is written, and `false` returned,
/// when the value is an object whose string conversion failed.
pub(crate) fn write_key_value(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    attribute: &KeyValue,
    value_length: Option<usize>,
) -> WriteResult<bool> {
    let start = writer.position();
    let slot = writer.begin_message(field)?;
    writer.write_string_with_tag(KEY_VALUE_KEY, &attribute.key)?;
    if !write_any_value(writer, KEY_VALUE_VALUE, &attribute.value, value_length)? {
        writer.rewind(start);
        otel_debug!(
            name: "ProtobufWriter.AttributeDropped",
            key = attribute.key.to_string(),
            reason = "string conversion of the attribute value failed"
        );
        return Ok(false);
    }
    writer.end_message(slot)?;
    Ok(true)
}

/// Write `value` as an `AnyValue` message in `field`.
///
/// String values, string array elements and rendered objects are truncated
/// to `value_length` characters.
pub(crate) fn write_any_value(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    value: &AnyValue,
    value_length: Option<usize>,
) -> WriteResult<bool> {
    let start = writer.position();
    let slot = writer.begin_message(field)?;
    match value {
        AnyValue::Bool(v) => writer.write_bool_with_tag(ANY_VALUE_BOOL, *v)?,
        AnyValue::Int(v) => writer.write_int64_with_tag(ANY_VALUE_INT, *v)?,
        AnyValue::Double(v) => writer.write_double_with_tag(ANY_VALUE_DOUBLE, *v)?,
        AnyValue::String(v) => {
            writer.write_string_with_tag(ANY_VALUE_STRING, truncate(v, value_length))?
        }
        AnyValue::Bytes(v) => writer.write_bytes_with_tag(ANY_VALUE_BYTES, v)?,
        AnyValue::Array(array) => write_array(writer, array, value_length)?,
        AnyValue::List(values) => {
            let list = writer.begin_message(ANY_VALUE_ARRAY)?;
            for value in values {
                write_any_value(writer, ARRAY_VALUE_VALUES, value, value_length)?;
            }
            writer.end_message(list)?;
        }
        AnyValue::Map(entries) => {
            let list = writer.begin_message(ANY_VALUE_KVLIST)?;
            for entry in entries {
                write_key_value(writer, KEY_VALUE_LIST_VALUES, entry, value_length)?;
            }
            writer.end_message(list)?;
        }
        AnyValue::Object(object) => match render_object(object.as_ref()) {
            Some(rendered) => {
                writer.write_string_with_tag(ANY_VALUE_STRING, truncate(&rendered, value_length))?
            }
            None => {
                writer.rewind(start);
                return Ok(false);
            }
        },
    }
    writer.end_message(slot)?;
    Ok(true)
}

fn write_array(
    writer: &mut ProtobufWriter<'_>,
    array: &Array,
    value_length: Option<usize>,
) -> WriteResult {
    let slot = writer.begin_message(ANY_VALUE_ARRAY)?;
    match array {
        Array::Bool(values) => {
            for v in values {
                let element = writer.begin_message(ARRAY_VALUE_VALUES)?;
                writer.write_bool_with_tag(ANY_VALUE_BOOL, *v)?;
                writer.end_message(element)?;
            }
        }
        Array::I64(values) => {
            for v in values {
                let element = writer.begin_message(ARRAY_VALUE_VALUES)?;
                writer.write_int64_with_tag(ANY_VALUE_INT, *v)?;
                writer.end_message(element)?;
            }
        }
        Array::F64(values) => {
            for v in values {
                let element = writer.begin_message(ARRAY_VALUE_VALUES)?;
                writer.write_double_with_tag(ANY_VALUE_DOUBLE, *v)?;
                writer.end_message(element)?;
            }
        }
        Array::String(values) => {
            for v in values {
                let element = writer.begin_message(ARRAY_VALUE_VALUES)?;
                writer.write_string_with_tag(ANY_VALUE_STRING, truncate(v, value_length))?;
                writer.end_message(element)?;
            }
        }
    }
    writer.end_message(slot)
}

/// Write an `InstrumentationScope` message in `field`.
pub(crate) fn write_scope(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    scope: &InstrumentationScope,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(field)?;
    writer.write_string_with_tag(SCOPE_NAME, &scope.name)?;
    if let Some(version) = &scope.version {
        writer.write_string_with_tag(SCOPE_VERSION, version)?;
    }
    let dropped = write_attributes(writer, SCOPE_ATTRIBUTES, &scope.attributes, limits)?;
    if dropped > 0 {
        writer.write_uint32_with_tag(SCOPE_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }
    writer.end_message(slot)
}

fn same_scope(a: &InstrumentationScope, b: &InstrumentationScope) -> bool {
    a.name == b.name && a.version == b.version && a.schema_url == b.schema_url
}

/// Group records by instrumentation scope, keeping the order in which each
/// scope was first seen and the order of records within a scope.
pub(crate) fn group_by_scope<'a, T, F>(
    records: &'a [T],
    scope_of: F,
) -> Vec<(&'a InstrumentationScope, Vec<&'a T>)>
where
    F: Fn(&'a T) -> &'a InstrumentationScope,
{
    let mut groups: Vec<(&'a InstrumentationScope, Vec<&'a T>)> = Vec::new();
    for record in records {
        let scope = scope_of(record);
        match groups
            .iter_mut()
            .find(|(existing, _)| same_scope(existing, scope))
        {
            Some((_, members)) => members.push(record),
            None => groups.push((scope, vec![record])),
        }
    }
    groups
}
