use std::borrow::Cow;
use std::time::SystemTime;

use opentelemetry::trace::{SpanId, TraceId};

use super::common::{InstrumentationScope, KeyValue};

/// Defines the window that an aggregation was calculated over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    #[default]
    Cumulative,
    /// A measurement interval that resets each cycle.
    Delta,
}

/// A collection of metrics produced by one instrumentation scope.
#[derive(Clone, Debug, Default)]
pub struct ScopeMetrics {
    /// The scope the metrics were recorded by.
    pub scope: InstrumentationScope,
    /// Metrics recorded by the scope.
    pub metrics: Vec<Metric>,
}

/// A collection of one or more aggregated time series from an instrument.
#[derive(Clone, Debug)]
pub struct Metric {
    /// The name of the instrument that created this data.
    pub name: Cow<'static, str>,
    /// The description of the instrument.
    pub description: Cow<'static, str>,
    /// The unit in which the instrument reports.
    pub unit: Cow<'static, str>,
    /// The aggregated data.
    pub data: MetricData,
}

/// Aggregated data of a single instrument.
#[derive(Clone, Debug)]
pub enum MetricData {
    /// Last value of each time series.
    Gauge(Gauge),
    /// Sum of measurements of each time series.
    Sum(Sum),
    /// Bucketed distribution of each time series.
    Histogram(Histogram),
    /// Base-2 exponential distribution of each time series.
    ExponentialHistogram(ExponentialHistogram),
    /// Quantile summary of each time series.
    Summary(Summary),
}

/// Numeric measurement value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumberValue {
    /// Integer value, written as `as_int`
    I64(i64),
    /// Floating point value, written as `as_double`
    F64(f64),
}

/// A measurement sampled from a time series providing a typical example.
#[derive(Clone, Debug)]
pub struct Exemplar {
    /// Attributes recorded with the measurement but filtered out of the
    /// time series' aggregated data.
    pub filtered_attributes: Vec<KeyValue>,
    /// The time when the measurement was recorded.
    pub time: SystemTime,
    /// The measured value.
    pub value: NumberValue,
    /// Span id active when the measurement was recorded.
    pub span_id: SpanId,
    /// Trace id active when the measurement was recorded.
    pub trace_id: TraceId,
}

/// A single data point of a gauge or sum.
#[derive(Clone, Debug)]
pub struct NumberDataPoint {
    /// Attributes identifying the time series.
    pub attributes: Vec<KeyValue>,
    /// Start of the aggregation window.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
    /// The value of this data point.
    pub value: NumberValue,
    /// Sampled measurements.
    pub exemplars: Vec<Exemplar>,
}

/// A measurement of the current value of an instrument.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    /// Represents individual aggregated measurements with unique attributes.
    pub data_points: Vec<NumberDataPoint>,
}

/// Represents the sum of all measurements of values from an instrument.
#[derive(Clone, Debug, Default)]
pub struct Sum {
    /// Represents individual aggregated measurements with unique attributes.
    pub data_points: Vec<NumberDataPoint>,
    /// Describes if the aggregation is reported as the change from the last
    /// report time, or the cumulative changes since a fixed start time.
    pub temporality: Temporality,
    /// Whether this aggregation only increases or decreases.
    pub is_monotonic: bool,
}

/// A single histogram data point in a time series.
#[derive(Clone, Debug)]
pub struct HistogramDataPoint {
    /// Attributes identifying the time series.
    pub attributes: Vec<KeyValue>,
    /// Start of the aggregation window.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The upper bounds of the buckets of the histogram.
    pub bounds: Vec<f64>,
    /// The count of each of the buckets.
    pub bucket_counts: Vec<u64>,
    /// The minimum value recorded.
    pub min: Option<f64>,
    /// The maximum value recorded.
    pub max: Option<f64>,
    /// The sum of the values recorded.
    pub sum: Option<f64>,
    /// Sampled measurements.
    pub exemplars: Vec<Exemplar>,
}

/// Represents the histogram of all measurements of values from an instrument.
#[derive(Clone, Debug, Default)]
pub struct Histogram {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<HistogramDataPoint>,
    /// Describes if the aggregation is reported as the change from the last
    /// report time, or the cumulative changes since a fixed start time.
    pub temporality: Temporality,
}

/// A set of bucket counts, encoded in a contiguous array of counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExponentialBucket {
    /// The bucket index of the first entry in the `counts` vec.
    pub offset: i32,
    /// A vec where `counts[i]` carries the count of the bucket at index
    /// `offset + i`.
    pub counts: Vec<u64>,
}

/// A single exponential histogram data point in a time series.
#[derive(Clone, Debug)]
pub struct ExponentialHistogramDataPoint {
    /// Attributes identifying the time series.
    pub attributes: Vec<KeyValue>,
    /// Start of the aggregation window.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The minimum value recorded.
    pub min: Option<f64>,
    /// The maximum value recorded.
    pub max: Option<f64>,
    /// The sum of the values recorded.
    pub sum: Option<f64>,
    /// Describes the resolution of the histogram.
    pub scale: i8,
    /// The number of values whose absolute value is less than or equal to
    /// `zero_threshold`.
    pub zero_count: u64,
    /// The range of positive value bucket counts.
    pub positive_bucket: ExponentialBucket,
    /// The range of negative value bucket counts.
    pub negative_bucket: ExponentialBucket,
    /// The width of the zero region.
    pub zero_threshold: f64,
    /// Sampled measurements.
    pub exemplars: Vec<Exemplar>,
}

/// The histogram of all measurements of values from an instrument, using
/// exponentially sized buckets.
#[derive(Clone, Debug, Default)]
pub struct ExponentialHistogram {
    /// The individual aggregated measurements with unique attributes.
    pub data_points: Vec<ExponentialHistogramDataPoint>,
    /// Describes if the aggregation is reported as the change from the last
    /// report time, or the cumulative changes since a fixed start time.
    pub temporality: Temporality,
}

/// The value of a time series at a given quantile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueAtQuantile {
    /// The quantile, in `[0.0, 1.0]`.
    pub quantile: f64,
    /// The value at the quantile.
    pub value: f64,
}

/// A single summary data point in a time series.
#[derive(Clone, Debug)]
pub struct SummaryDataPoint {
    /// Attributes identifying the time series.
    pub attributes: Vec<KeyValue>,
    /// Start of the aggregation window.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
    /// The number of values in the population.
    pub count: u64,
    /// The sum of the values in the population.
    pub sum: f64,
    /// Values at given quantiles.
    pub quantile_values: Vec<ValueAtQuantile>,
}

/// Quantile summaries of an instrument.
#[derive(Clone, Debug, Default)]
pub struct Summary {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<SummaryDataPoint>,
}
