//! Telemetry records accepted by the exporters.
//!
//! These types are the hand-off point between the SDK, which collects and
//! aggregates telemetry, and this crate, which writes it to the wire.

pub mod common;
pub mod logs;
pub mod metrics;
mod sdk;
pub mod trace;

pub use common::{AnyValue, Array, ExportBatch, InstrumentationScope, Key, KeyValue, Resource};
