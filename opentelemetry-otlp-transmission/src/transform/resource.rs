use super::common::{write_attributes, AttributeLimits};
use super::{ProtobufWriter, WriteResult};
use crate::model::Resource;

const RESOURCE_ATTRIBUTES: u32 = 1;
const RESOURCE_DROPPED_ATTRIBUTES_COUNT: u32 = 2;

/// Write a `Resource` message in `field`.
///
/// Resource attributes are not subject to any limit, so the only dropped
/// attributes reported are the ones dropped before the resource got here,
/// plus any whose value could not be rendered.
pub(crate) fn write_resource(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    resource: &Resource,
) -> WriteResult {
    let slot = writer.begin_message(field)?;
    let dropped = write_attributes(
        writer,
        RESOURCE_ATTRIBUTES,
        &resource.attributes,
        AttributeLimits::UNLIMITED,
    )?;
    let dropped = dropped.saturating_add(resource.dropped_attributes_count);
    if dropped > 0 {
        writer.write_uint32_with_tag(RESOURCE_DROPPED_ATTRIBUTES_COUNT, dropped)?;
    }
    writer.end_message(slot)
}

/// Write the optional schema url carried by a resource or scope.
pub(crate) fn write_schema_url(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    schema_url: Option<&str>,
) -> WriteResult {
    match schema_url {
        Some(url) if !url.is_empty() => writer.write_string_with_tag(field, url),
        _ => Ok(()),
    }
}
