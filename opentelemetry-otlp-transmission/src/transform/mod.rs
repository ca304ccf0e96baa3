//! Writes telemetry batches as OTLP protobuf messages.
//!
//! Records are encoded straight into a caller owned `Vec<u8>` without
//! building intermediate message structs. Nested messages reserve a fixed
//! four byte slot for their length which is patched once the nested content
//! is written. When a write does not fit, the whole batch is written again
//! from its entry offset into a buffer of twice the size, so the caller never
//! observes partial output.

use std::fmt;

use opentelemetry::{otel_debug, otel_warn};
use thiserror::Error;

pub(crate) mod common;
pub(crate) mod logs;
pub(crate) mod metrics;
pub(crate) mod resource;
pub(crate) mod traces;

pub use logs::write_logs_data;
pub use metrics::write_metrics_data;
pub use traces::write_traces_data;

/// Size a serialization buffer is allocated with on first use.
pub const INITIAL_BUFFER_SIZE: usize = 750_000;

/// A buffer is never grown past this size.
pub const MAX_BUFFER_SIZE: usize = 100 * 1024 * 1024;

const RESERVED_LENGTH_SIZE: usize = 4;

/// The kind of telemetry carried by a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Spans
    Traces,
    /// Metric data points
    Metrics,
    /// Log records
    Logs,
}

impl Signal {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while writing a batch.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SerializationError {
    /// The encoded batch does not fit in the largest buffer allowed.
    #[error("{signal} payload does not fit in {max_size} bytes")]
    BufferExceedsMaxSize {
        /// The signal being written.
        signal: Signal,
        /// The largest buffer size allowed.
        max_size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WireType {
    Varint = 0,
    I64 = 1,
    Len = 2,
    I32 = 5,
}

/// Marker returned by [`ProtobufWriter`] when the remaining capacity is too
/// small for a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BufferFull;

pub(crate) type WriteResult<T = ()> = Result<T, BufferFull>;

/// Cursor over a fixed size byte slice encoding protobuf primitives.
pub(crate) struct ProtobufWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> ProtobufWriter<'a> {
    pub(crate) fn new(buffer: &'a mut [u8], position: usize) -> Self {
        ProtobufWriter { buffer, position }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor back to `position`, discarding what was written after
    /// it.
    pub(crate) fn rewind(&mut self, position: usize) {
        debug_assert!(position <= self.position);
        self.position = position;
    }

    fn reserve(&mut self, len: usize) -> WriteResult<&mut [u8]> {
        let start = self.position;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(BufferFull)?;
        self.position = end;
        Ok(&mut self.buffer[start..end])
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> WriteResult {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_varint(&mut self, mut value: u64) -> WriteResult {
        while value >= 0x80 {
            self.write_raw(&[(value as u8 & 0x7f) | 0x80])?;
            value >>= 7;
        }
        self.write_raw(&[value as u8])
    }

    pub(crate) fn write_tag(&mut self, field: u32, wire_type: WireType) -> WriteResult {
        self.write_varint(u64::from((field << 3) | wire_type as u32))
    }

    pub(crate) fn write_fixed32(&mut self, value: u32) -> WriteResult {
        self.write_raw(&value.to_le_bytes())
    }

    pub(crate) fn write_fixed64(&mut self, value: u64) -> WriteResult {
        self.write_raw(&value.to_le_bytes())
    }

    pub(crate) fn write_double(&mut self, value: f64) -> WriteResult {
        self.write_fixed64(value.to_bits())
    }

    pub(crate) fn write_bool_with_tag(&mut self, field: u32, value: bool) -> WriteResult {
        self.write_tag(field, WireType::Varint)?;
        self.write_varint(u64::from(value))
    }

    pub(crate) fn write_uint32_with_tag(&mut self, field: u32, value: u32) -> WriteResult {
        self.write_tag(field, WireType::Varint)?;
        self.write_varint(u64::from(value))
    }

    /// Enums and `int64` share the sign extended varint encoding.
    pub(crate) fn write_int64_with_tag(&mut self, field: u32, value: i64) -> WriteResult {
        self.write_tag(field, WireType::Varint)?;
        self.write_varint(value as u64)
    }

    pub(crate) fn write_enum_with_tag(&mut self, field: u32, value: i32) -> WriteResult {
        self.write_int64_with_tag(field, i64::from(value))
    }

    pub(crate) fn write_sint32_with_tag(&mut self, field: u32, value: i32) -> WriteResult {
        self.write_tag(field, WireType::Varint)?;
        self.write_varint(u64::from(((value << 1) ^ (value >> 31)) as u32))
    }

    pub(crate) fn write_fixed32_with_tag(&mut self, field: u32, value: u32) -> WriteResult {
        self.write_tag(field, WireType::I32)?;
        self.write_fixed32(value)
    }

    pub(crate) fn write_fixed64_with_tag(&mut self, field: u32, value: u64) -> WriteResult {
        self.write_tag(field, WireType::I64)?;
        self.write_fixed64(value)
    }

    pub(crate) fn write_sfixed64_with_tag(&mut self, field: u32, value: i64) -> WriteResult {
        self.write_tag(field, WireType::I64)?;
        self.write_raw(&value.to_le_bytes())
    }

    pub(crate) fn write_double_with_tag(&mut self, field: u32, value: f64) -> WriteResult {
        self.write_tag(field, WireType::I64)?;
        self.write_double(value)
    }

    pub(crate) fn write_bytes_with_tag(&mut self, field: u32, value: &[u8]) -> WriteResult {
        self.write_tag(field, WireType::Len)?;
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    pub(crate) fn write_string_with_tag(&mut self, field: u32, value: &str) -> WriteResult {
        self.write_bytes_with_tag(field, value.as_bytes())
    }

    /// Start a length delimited field whose length is not known yet.
    ///
    /// Returns the position of the reserved length slot, to be handed to
    /// [`ProtobufWriter::end_message`] once the content is written.
    pub(crate) fn begin_message(&mut self, field: u32) -> WriteResult<usize> {
        self.write_tag(field, WireType::Len)?;
        let slot = self.position;
        self.reserve(RESERVED_LENGTH_SIZE)?;
        Ok(slot)
    }

    /// Patch the length slot reserved by [`ProtobufWriter::begin_message`].
    ///
    /// The length is written as a four byte varint padded with continuation
    /// bits, which holds anything below 2^28 and so any buffer up to
    /// [`MAX_BUFFER_SIZE`].
    pub(crate) fn end_message(&mut self, slot: usize) -> WriteResult {
        let length = self.position - (slot + RESERVED_LENGTH_SIZE);
        let padded = [
            (length & 0x7f) as u8 | 0x80,
            ((length >> 7) & 0x7f) as u8 | 0x80,
            ((length >> 14) & 0x7f) as u8 | 0x80,
            ((length >> 21) & 0x7f) as u8,
        ];
        self.buffer[slot..slot + RESERVED_LENGTH_SIZE].copy_from_slice(&padded);
        Ok(())
    }
}

/// Run `write` against `buffer` starting at `offset`, doubling the buffer
/// and starting over each time it runs out of room.
///
/// Returns the position right after the last byte written.
pub(crate) fn write_growing<F>(
    buffer: &mut Vec<u8>,
    offset: usize,
    signal: Signal,
    mut write: F,
) -> Result<usize, SerializationError>
where
    F: FnMut(&mut ProtobufWriter<'_>) -> WriteResult,
{
    loop {
        let mut writer = ProtobufWriter::new(buffer.as_mut_slice(), offset);
        match write(&mut writer) {
            Ok(()) => return Ok(writer.position()),
            Err(BufferFull) => grow_buffer(buffer, signal)?,
        }
    }
}

fn grow_buffer(buffer: &mut Vec<u8>, signal: Signal) -> Result<(), SerializationError> {
    let current_size = buffer.len();
    if current_size >= MAX_BUFFER_SIZE {
        otel_warn!(
            name: "ProtobufWriter.BufferExceedsMaxSize",
            signal = signal.as_str(),
            max_size = MAX_BUFFER_SIZE
        );
        return Err(SerializationError::BufferExceedsMaxSize {
            signal,
            max_size: MAX_BUFFER_SIZE,
        });
    }

    let new_size = if current_size == 0 {
        INITIAL_BUFFER_SIZE
    } else {
        current_size.saturating_mul(2)
    }
    .min(MAX_BUFFER_SIZE);

    buffer.resize(new_size, 0);
    otel_debug!(
        name: "ProtobufWriter.BufferGrown",
        signal = signal.as_str(),
        previous_size = current_size,
        new_size = new_size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut ProtobufWriter<'_>) -> WriteResult) -> Vec<u8> {
        let mut buffer = vec![0u8; 64];
        let mut writer = ProtobufWriter::new(&mut buffer, 0);
        f(&mut writer).expect("buffer large enough");
        let end = writer.position();
        buffer.truncate(end);
        buffer
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(written(|w| w.write_varint(1)), vec![0x01]);
        assert_eq!(written(|w| w.write_varint(300)), vec![0xac, 0x02]);
        assert_eq!(
            written(|w| w.write_varint(u64::MAX)),
            vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
        );
    }

    #[test]
    fn negative_int64_uses_ten_bytes() {
        let bytes = written(|w| w.write_int64_with_tag(3, -1));
        assert_eq!(bytes[0], 3 << 3);
        assert_eq!(bytes.len(), 11);
    }

    #[test]
    fn sint32_is_zigzag_encoded() {
        assert_eq!(written(|w| w.write_sint32_with_tag(1, -1)), vec![0x08, 0x01]);
        assert_eq!(written(|w| w.write_sint32_with_tag(1, 1)), vec![0x08, 0x02]);
        assert_eq!(written(|w| w.write_sint32_with_tag(1, -3)), vec![0x08, 0x05]);
    }

    #[test]
    fn reserved_length_is_padded_varint() {
        let bytes = written(|w| {
            let slot = w.begin_message(1)?;
            w.write_string_with_tag(1, "abc")?;
            w.end_message(slot)
        });
        assert_eq!(
            bytes,
            vec![0x0a, 0x85, 0x80, 0x80, 0x00, 0x0a, 0x03, b'a', b'b', b'c']
        );
    }

    #[test]
    fn overflowing_write_reports_buffer_full() {
        let mut buffer = vec![0u8; 3];
        let mut writer = ProtobufWriter::new(&mut buffer, 0);
        assert_eq!(writer.write_fixed32(7), Err(BufferFull));
    }

    #[test]
    fn growing_write_restarts_from_offset() {
        let mut buffer = vec![0xffu8; 8];
        let mut attempts = 0;
        let end = write_growing(&mut buffer, 2, Signal::Traces, |w| {
            attempts += 1;
            w.write_raw(&[1u8; 30])
        })
        .expect("fits after growing");

        assert_eq!(attempts, 3);
        assert_eq!(buffer.len(), 32);
        assert_eq!(end, 32);
        assert_eq!(&buffer[..2], &[0xff, 0xff]);
        assert!(buffer[2..32].iter().all(|b| *b == 1));
    }

    #[test]
    fn empty_buffer_is_allocated_on_first_write() {
        let mut buffer = Vec::new();
        let end = write_growing(&mut buffer, 0, Signal::Logs, |w| w.write_raw(b"otlp"))
            .expect("fits");
        assert_eq!(end, 4);
        assert_eq!(buffer.len(), INITIAL_BUFFER_SIZE);
    }

    #[test]
    fn growth_stops_at_max_size() {
        let mut buffer = vec![0u8; MAX_BUFFER_SIZE];
        let result = write_growing(&mut buffer, 0, Signal::Metrics, |w| {
            w.write_raw(&[0u8; 16])?;
            Err(BufferFull)
        });
        assert_eq!(
            result,
            Err(SerializationError::BufferExceedsMaxSize {
                signal: Signal::Metrics,
                max_size: MAX_BUFFER_SIZE,
            })
        );
    }
}
