use std::time::SystemTime;

use super::common::{to_nanos, write_attributes, write_scope, AttributeLimits};
use super::resource::{write_resource, write_schema_url};
use super::{write_growing, ProtobufWriter, SerializationError, Signal, WriteResult};
use crate::limits::SdkLimitOptions;
use crate::model::metrics::{
    Exemplar, ExponentialBucket, ExponentialHistogramDataPoint, HistogramDataPoint, Metric,
    MetricData, NumberDataPoint, NumberValue, ScopeMetrics, SummaryDataPoint, Temporality,
};
use crate::model::ExportBatch;

// opentelemetry.proto.collector.metrics.v1.ExportMetricsServiceRequest
const REQUEST_RESOURCE_METRICS: u32 = 1;

// opentelemetry.proto.metrics.v1
const RESOURCE_METRICS_RESOURCE: u32 = 1;
const RESOURCE_METRICS_SCOPE_METRICS: u32 = 2;
const RESOURCE_METRICS_SCHEMA_URL: u32 = 3;

const SCOPE_METRICS_SCOPE: u32 = 1;
const SCOPE_METRICS_METRICS: u32 = 2;
const SCOPE_METRICS_SCHEMA_URL: u32 = 3;

const METRIC_NAME: u32 = 1;
const METRIC_DESCRIPTION: u32 = 2;
const METRIC_UNIT: u32 = 3;
const METRIC_GAUGE: u32 = 5;
const METRIC_SUM: u32 = 7;
const METRIC_HISTOGRAM: u32 = 9;
const METRIC_EXPONENTIAL_HISTOGRAM: u32 = 10;
const METRIC_SUMMARY: u32 = 11;

// Shared by gauge, sum, histogram, exponential histogram and summary.
const DATA_POINTS: u32 = 1;
const AGGREGATION_TEMPORALITY: u32 = 2;
const SUM_IS_MONOTONIC: u32 = 3;

const NUMBER_START_TIME: u32 = 2;
const NUMBER_TIME: u32 = 3;
const NUMBER_AS_DOUBLE: u32 = 4;
const NUMBER_EXEMPLARS: u32 = 5;
const NUMBER_AS_INT: u32 = 6;
const NUMBER_ATTRIBUTES: u32 = 7;

const HISTOGRAM_START_TIME: u32 = 2;
const HISTOGRAM_TIME: u32 = 3;
const HISTOGRAM_COUNT: u32 = 4;
const HISTOGRAM_SUM: u32 = 5;
const HISTOGRAM_BUCKET_COUNTS: u32 = 6;
const HISTOGRAM_EXPLICIT_BOUNDS: u32 = 7;
const HISTOGRAM_EXEMPLARS: u32 = 8;
const HISTOGRAM_ATTRIBUTES: u32 = 9;
const HISTOGRAM_MIN: u32 = 11;
const HISTOGRAM_MAX: u32 = 12;

const EXPONENTIAL_ATTRIBUTES: u32 = 1;
const EXPONENTIAL_START_TIME: u32 = 2;
const EXPONENTIAL_TIME: u32 = 3;
const EXPONENTIAL_COUNT: u32 = 4;
const EXPONENTIAL_SUM: u32 = 5;
const EXPONENTIAL_SCALE: u32 = 6;
const EXPONENTIAL_ZERO_COUNT: u32 = 7;
const EXPONENTIAL_POSITIVE: u32 = 8;
const EXPONENTIAL_NEGATIVE: u32 = 9;
const EXPONENTIAL_EXEMPLARS: u32 = 11;
const EXPONENTIAL_MIN: u32 = 12;
const EXPONENTIAL_MAX: u32 = 13;
const EXPONENTIAL_ZERO_THRESHOLD: u32 = 14;

const BUCKETS_OFFSET: u32 = 1;
const BUCKETS_COUNTS: u32 = 2;

const SUMMARY_START_TIME: u32 = 2;
const SUMMARY_TIME: u32 = 3;
const SUMMARY_COUNT: u32 = 4;
const SUMMARY_SUM: u32 = 5;
const SUMMARY_QUANTILE_VALUES: u32 = 6;
const SUMMARY_ATTRIBUTES: u32 = 7;

const QUANTILE: u32 = 1;
const QUANTILE_VALUE: u32 = 2;

const EXEMPLAR_TIME: u32 = 2;
const EXEMPLAR_AS_DOUBLE: u32 = 3;
const EXEMPLAR_SPAN_ID: u32 = 4;
const EXEMPLAR_TRACE_ID: u32 = 5;
const EXEMPLAR_AS_INT: u32 = 6;
const EXEMPLAR_FILTERED_ATTRIBUTES: u32 = 7;

/// Write `batch` as an `ExportMetricsServiceRequest` into `buffer`, starting
/// at `offset`.
///
/// Metrics arrive already grouped per instrumentation scope, so each
/// [`ScopeMetrics`] becomes one `ScopeMetrics` message.
pub fn write_metrics_data(
    buffer: &mut Vec<u8>,
    offset: usize,
    limits: &SdkLimitOptions,
    batch: ExportBatch<'_, ScopeMetrics>,
) -> Result<usize, SerializationError> {
    let limits =
        AttributeLimits::new(limits.attribute_count_limit, limits.attribute_value_length_limit);
    write_growing(buffer, offset, Signal::Metrics, |writer| {
        write_resource_metrics(writer, limits, &batch)
    })
}

fn write_resource_metrics(
    writer: &mut ProtobufWriter<'_>,
    limits: AttributeLimits,
    batch: &ExportBatch<'_, ScopeMetrics>,
) -> WriteResult {
    let slot = writer.begin_message(REQUEST_RESOURCE_METRICS)?;
    write_resource(writer, RESOURCE_METRICS_RESOURCE, batch.resource)?;
    for scope_metrics in batch.records {
        let scope_slot = writer.begin_message(RESOURCE_METRICS_SCOPE_METRICS)?;
        write_scope(writer, SCOPE_METRICS_SCOPE, &scope_metrics.scope, limits)?;
        for metric in &scope_metrics.metrics {
            write_metric(writer, metric, limits)?;
        }
        write_schema_url(
            writer,
            SCOPE_METRICS_SCHEMA_URL,
            scope_metrics.scope.schema_url.as_deref(),
        )?;
        writer.end_message(scope_slot)?;
    }
    write_schema_url(
        writer,
        RESOURCE_METRICS_SCHEMA_URL,
        batch.resource.schema_url.as_deref(),
    )?;
    writer.end_message(slot)
}

fn temporality(temporality: Temporality) -> i32 {
    match temporality {
        Temporality::Delta => 1,
        Temporality::Cumulative => 2,
    }
}

fn write_metric(
    writer: &mut ProtobufWriter<'_>,
    metric: &Metric,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(SCOPE_METRICS_METRICS)?;
    writer.write_string_with_tag(METRIC_NAME, &metric.name)?;
    if !metric.description.is_empty() {
        writer.write_string_with_tag(METRIC_DESCRIPTION, &metric.description)?;
    }
    if !metric.unit.is_empty() {
        writer.write_string_with_tag(METRIC_UNIT, &metric.unit)?;
    }

    match &metric.data {
        MetricData::Gauge(gauge) => {
            let data = writer.begin_message(METRIC_GAUGE)?;
            for point in &gauge.data_points {
                write_number_data_point(writer, point, limits)?;
            }
            writer.end_message(data)?;
        }
        MetricData::Sum(sum) => {
            let data = writer.begin_message(METRIC_SUM)?;
            for point in &sum.data_points {
                write_number_data_point(writer, point, limits)?;
            }
            writer.write_enum_with_tag(AGGREGATION_TEMPORALITY, temporality(sum.temporality))?;
            if sum.is_monotonic {
                writer.write_bool_with_tag(SUM_IS_MONOTONIC, true)?;
            }
            writer.end_message(data)?;
        }
        MetricData::Histogram(histogram) => {
            let data = writer.begin_message(METRIC_HISTOGRAM)?;
            for point in &histogram.data_points {
                write_histogram_data_point(writer, point, limits)?;
            }
            writer.write_enum_with_tag(
                AGGREGATION_TEMPORALITY,
                temporality(histogram.temporality),
            )?;
            writer.end_message(data)?;
        }
        MetricData::ExponentialHistogram(histogram) => {
            let data = writer.begin_message(METRIC_EXPONENTIAL_HISTOGRAM)?;
            for point in &histogram.data_points {
                write_exponential_data_point(writer, point, limits)?;
            }
            writer.write_enum_with_tag(
                AGGREGATION_TEMPORALITY,
                temporality(histogram.temporality),
            )?;
            writer.end_message(data)?;
        }
        MetricData::Summary(summary) => {
            let data = writer.begin_message(METRIC_SUMMARY)?;
            for point in &summary.data_points {
                write_summary_data_point(writer, point, limits)?;
            }
            writer.end_message(data)?;
        }
    }
    writer.end_message(slot)
}

fn write_times(
    writer: &mut ProtobufWriter<'_>,
    start_field: u32,
    start_time: Option<SystemTime>,
    time_field: u32,
    time: SystemTime,
) -> WriteResult {
    if let Some(start_time) = start_time {
        writer.write_fixed64_with_tag(start_field, to_nanos(start_time))?;
    }
    writer.write_fixed64_with_tag(time_field, to_nanos(time))
}

fn write_number_data_point(
    writer: &mut ProtobufWriter<'_>,
    point: &NumberDataPoint,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(DATA_POINTS)?;
    write_attributes(writer, NUMBER_ATTRIBUTES, &point.attributes, limits)?;
    write_times(
        writer,
        NUMBER_START_TIME,
        point.start_time,
        NUMBER_TIME,
        point.time,
    )?;
    match point.value {
        NumberValue::F64(v) => writer.write_double_with_tag(NUMBER_AS_DOUBLE, v)?,
        NumberValue::I64(v) => writer.write_sfixed64_with_tag(NUMBER_AS_INT, v)?,
    }
    for exemplar in &point.exemplars {
        write_exemplar(writer, NUMBER_EXEMPLARS, exemplar, limits)?;
    }
    writer.end_message(slot)
}

fn write_histogram_data_point(
    writer: &mut ProtobufWriter<'_>,
    point: &HistogramDataPoint,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(DATA_POINTS)?;
    write_attributes(writer, HISTOGRAM_ATTRIBUTES, &point.attributes, limits)?;
    write_times(
        writer,
        HISTOGRAM_START_TIME,
        point.start_time,
        HISTOGRAM_TIME,
        point.time,
    )?;
    writer.write_fixed64_with_tag(HISTOGRAM_COUNT, point.count)?;
    if let Some(sum) = point.sum {
        writer.write_double_with_tag(HISTOGRAM_SUM, sum)?;
    }
    if !point.bucket_counts.is_empty() {
        let packed = writer.begin_message(HISTOGRAM_BUCKET_COUNTS)?;
        for count in &point.bucket_counts {
            writer.write_fixed64(*count)?;
        }
        writer.end_message(packed)?;
    }
    if !point.bounds.is_empty() {
        let packed = writer.begin_message(HISTOGRAM_EXPLICIT_BOUNDS)?;
        for bound in &point.bounds {
            writer.write_double(*bound)?;
        }
        writer.end_message(packed)?;
    }
    for exemplar in &point.exemplars {
        write_exemplar(writer, HISTOGRAM_EXEMPLARS, exemplar, limits)?;
    }
    if let Some(min) = point.min {
        writer.write_double_with_tag(HISTOGRAM_MIN, min)?;
    }
    if let Some(max) = point.max {
        writer.write_double_with_tag(HISTOGRAM_MAX, max)?;
    }
    writer.end_message(slot)
}

fn write_exponential_data_point(
    writer: &mut ProtobufWriter<'_>,
    point: &ExponentialHistogramDataPoint,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(DATA_POINTS)?;
    write_attributes(writer, EXPONENTIAL_ATTRIBUTES, &point.attributes, limits)?;
    write_times(
        writer,
        EXPONENTIAL_START_TIME,
        point.start_time,
        EXPONENTIAL_TIME,
        point.time,
    )?;
    writer.write_fixed64_with_tag(EXPONENTIAL_COUNT, point.count)?;
    if let Some(sum) = point.sum {
        writer.write_double_with_tag(EXPONENTIAL_SUM, sum)?;
    }
    writer.write_sint32_with_tag(EXPONENTIAL_SCALE, i32::from(point.scale))?;
    writer.write_fixed64_with_tag(EXPONENTIAL_ZERO_COUNT, point.zero_count)?;
    write_buckets(writer, EXPONENTIAL_POSITIVE, &point.positive_bucket)?;
    write_buckets(writer, EXPONENTIAL_NEGATIVE, &point.negative_bucket)?;
    for exemplar in &point.exemplars {
        write_exemplar(writer, EXPONENTIAL_EXEMPLARS, exemplar, limits)?;
    }
    if let Some(min) = point.min {
        writer.write_double_with_tag(EXPONENTIAL_MIN, min)?;
    }
    if let Some(max) = point.max {
        writer.write_double_with_tag(EXPONENTIAL_MAX, max)?;
    }
    writer.write_double_with_tag(EXPONENTIAL_ZERO_THRESHOLD, point.zero_threshold)?;
    writer.end_message(slot)
}

fn write_buckets(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    buckets: &ExponentialBucket,
) -> WriteResult {
    let slot = writer.begin_message(field)?;
    writer.write_sint32_with_tag(BUCKETS_OFFSET, buckets.offset)?;
    if !buckets.counts.is_empty() {
        let packed = writer.begin_message(BUCKETS_COUNTS)?;
        for count in &buckets.counts {
            writer.write_varint(*count)?;
        }
        writer.end_message(packed)?;
    }
    writer.end_message(slot)
}

fn write_summary_data_point(
    writer: &mut ProtobufWriter<'_>,
    point: &SummaryDataPoint,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(DATA_POINTS)?;
    write_attributes(writer, SUMMARY_ATTRIBUTES, &point.attributes, limits)?;
    write_times(
        writer,
        SUMMARY_START_TIME,
        point.start_time,
        SUMMARY_TIME,
        point.time,
    )?;
    writer.write_fixed64_with_tag(SUMMARY_COUNT, point.count)?;
    writer.write_double_with_tag(SUMMARY_SUM, point.sum)?;
    for quantile in &point.quantile_values {
        let entry = writer.begin_message(SUMMARY_QUANTILE_VALUES)?;
        writer.write_double_with_tag(QUANTILE, quantile.quantile)?;
        writer.write_double_with_tag(QUANTILE_VALUE, quantile.value)?;
        writer.end_message(entry)?;
    }
    writer.end_message(slot)
}

fn write_exemplar(
    writer: &mut ProtobufWriter<'_>,
    field: u32,
    exemplar: &Exemplar,
    limits: AttributeLimits,
) -> WriteResult {
    let slot = writer.begin_message(field)?;
    write_attributes(
        writer,
        EXEMPLAR_FILTERED_ATTRIBUTES,
        &exemplar.filtered_attributes,
        limits,
    )?;
    writer.write_fixed64_with_tag(EXEMPLAR_TIME, to_nanos(exemplar.time))?;
    match exemplar.value {
        NumberValue::F64(v) => writer.write_double_with_tag(EXEMPLAR_AS_DOUBLE, v)?,
        NumberValue::I64(v) => writer.write_sfixed64_with_tag(EXEMPLAR_AS_INT, v)?,
    }
    writer.write_bytes_with_tag(EXEMPLAR_SPAN_ID, &exemplar.span_id.to_bytes())?;
    writer.write_bytes_with_tag(EXEMPLAR_TRACE_ID, &exemplar.trace_id.to_bytes())?;
    writer.end_message(slot)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use opentelemetry::trace::{SpanId, TraceId};
    use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
    use opentelemetry_proto::tonic::metrics::v1::{
        exemplar, metric::Data, number_data_point, AggregationTemporality,
    };
    use prost::Message;

    use super::*;
    use crate::model::metrics::{
        ExponentialHistogram, Gauge, Histogram, Sum, Summary, ValueAtQuantile,
    };
    use crate::model::{InstrumentationScope, KeyValue, Resource};

    fn at(nanos: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    fn metric(name: &'static str, data: MetricData) -> Metric {
        Metric {
            name: name.into(),
            description: "".into(),
            unit: "".into(),
            data,
        }
    }

    fn serialize(metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
        let resource = Resource::new(vec![KeyValue::new("service.name", "meter")]);
        let scope_metrics = [ScopeMetrics {
            scope: InstrumentationScope::new("meter-lib").with_version("0.1"),
            metrics,
        }];
        let mut buffer = vec![0u8; 32];
        let end = write_metrics_data(
            &mut buffer,
            0,
            &SdkLimitOptions::default(),
            ExportBatch::new(&resource, &scope_metrics),
        )
        .expect("serialized");
        ExportMetricsServiceRequest::decode(&buffer[..end]).expect("valid request")
    }

    fn data(request: &ExportMetricsServiceRequest, index: usize) -> Data {
        request.resource_metrics[0].scope_metrics[0].metrics[index]
            .data
            .clone()
            .expect("metric data")
    }

    #[test]
    fn gauge_and_sum_data_points() {
        let exemplar = Exemplar {
            filtered_attributes: vec![KeyValue::new("user", "alice")],
            time: at(15),
            value: NumberValue::F64(0.25),
            span_id: SpanId::from_bytes(3_u64.to_be_bytes()),
            trace_id: TraceId::from_bytes(4_u128.to_be_bytes()),
        };
        let request = serialize(vec![
            metric(
                "queue.depth",
                MetricData::Gauge(Gauge {
                    data_points: vec![NumberDataPoint {
                        attributes: vec![KeyValue::new("queue", "inbox")],
                        start_time: None,
                        time: at(20),
                        value: NumberValue::I64(-12),
                        exemplars: vec![],
                    }],
                }),
            ),
            metric(
                "requests.duration",
                MetricData::Sum(Sum {
                    data_points: vec![NumberDataPoint {
                        attributes: vec![],
                        start_time: Some(at(10)),
                        time: at(20),
                        value: NumberValue::F64(1.5),
                        exemplars: vec![exemplar],
                    }],
                    temporality: Temporality::Delta,
                    is_monotonic: true,
                }),
            ),
        ]);

        let scope_metrics = &request.resource_metrics[0].scope_metrics[0];
        assert_eq!(scope_metrics.metrics[0].name, "queue.depth");
        match data(&request, 0) {
            Data::Gauge(gauge) => {
                let point = &gauge.data_points[0];
                assert_eq!(point.attributes[0].key, "queue");
                assert_eq!(point.start_time_unix_nano, 0);
                assert_eq!(point.time_unix_nano, 20);
                assert_eq!(point.value, Some(number_data_point::Value::AsInt(-12)));
            }
            other => panic!("unexpected data {other:?}"),
        }
        match data(&request, 1) {
            Data::Sum(sum) => {
                assert_eq!(sum.aggregation_temporality, AggregationTemporality::Delta as i32);
                assert!(sum.is_monotonic);
                let point = &sum.data_points[0];
                assert_eq!(point.start_time_unix_nano, 10);
                assert_eq!(point.value, Some(number_data_point::Value::AsDouble(1.5)));
                let exemplar = &point.exemplars[0];
                assert_eq!(exemplar.filtered_attributes[0].key, "user");
                assert_eq!(exemplar.time_unix_nano, 15);
                assert_eq!(exemplar.value, Some(exemplar::Value::AsDouble(0.25)));
                assert_eq!(exemplar.span_id, 3_u64.to_be_bytes());
                assert_eq!(exemplar.trace_id, 4_u128.to_be_bytes());
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn histogram_data_points() {
        let request = serialize(vec![metric(
            "latency",
            MetricData::Histogram(Histogram {
                data_points: vec![HistogramDataPoint {
                    attributes: vec![KeyValue::new("route", "/")],
                    start_time: Some(at(1)),
                    time: at(2),
                    count: 6,
                    bounds: vec![0.0, 5.0, 10.0],
                    bucket_counts: vec![1, 2, 0, 3],
                    min: Some(-1.0),
                    max: Some(42.0),
                    sum: Some(60.5),
                    exemplars: vec![],
                }],
                temporality: Temporality::Cumulative,
            }),
        )]);

        match data(&request, 0) {
            Data::Histogram(histogram) => {
                assert_eq!(
                    histogram.aggregation_temporality,
                    AggregationTemporality::Cumulative as i32
                );
                let point = &histogram.data_points[0];
                assert_eq!(point.count, 6);
                assert_eq!(point.sum, Some(60.5));
                assert_eq!(point.bucket_counts, vec![1, 2, 0, 3]);
                assert_eq!(point.explicit_bounds, vec![0.0, 5.0, 10.0]);
                assert_eq!(point.min, Some(-1.0));
                assert_eq!(point.max, Some(42.0));
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn exponential_histogram_data_points() {
        let request = serialize(vec![metric(
            "sizes",
            MetricData::ExponentialHistogram(ExponentialHistogram {
                data_points: vec![ExponentialHistogramDataPoint {
                    attributes: vec![],
                    start_time: Some(at(1)),
                    time: at(2),
                    count: 9,
                    min: None,
                    max: Some(300.0),
                    sum: Some(512.0),
                    scale: -2,
                    zero_count: 1,
                    positive_bucket: ExponentialBucket {
                        offset: -3,
                        counts: vec![1, 300, 2],
                    },
                    negative_bucket: ExponentialBucket::default(),
                    zero_threshold: 0.001,
                    exemplars: vec![],
                }],
                temporality: Temporality::Delta,
            }),
        )]);

        match data(&request, 0) {
            Data::ExponentialHistogram(histogram) => {
                let point = &histogram.data_points[0];
                assert_eq!(point.count, 9);
                assert_eq!(point.scale, -2);
                assert_eq!(point.zero_count, 1);
                assert_eq!(point.min, None);
                assert_eq!(point.max, Some(300.0));
                assert_eq!(point.zero_threshold, 0.001);
                let positive = point.positive.as_ref().expect("positive buckets");
                assert_eq!(positive.offset, -3);
                assert_eq!(positive.bucket_counts, vec![1, 300, 2]);
                let negative = point.negative.as_ref().expect("negative buckets");
                assert!(negative.bucket_counts.is_empty());
            }
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn summary_data_points() {
        let request = serialize(vec![Metric {
            name: "gc.pause".into(),
            description: "Pause durations".into(),
            unit: "ms".into(),
            data: MetricData::Summary(Summary {
                data_points: vec![SummaryDataPoint {
                    attributes: vec![],
                    start_time: None,
                    time: at(5),
                    count: 3,
                    sum: 12.0,
                    quantile_values: vec![
                        ValueAtQuantile {
                            quantile: 0.5,
                            value: 3.0,
                        },
                        ValueAtQuantile {
                            quantile: 1.0,
                            value: 7.0,
                        },
                    ],
                }],
            }),
        }]);

        let metric = &request.resource_metrics[0].scope_metrics[0].metrics[0];
        assert_eq!(metric.description, "Pause durations");
        assert_eq!(metric.unit, "ms");
        match data(&request, 0) {
            Data::Summary(summary) => {
                let point = &summary.data_points[0];
                assert_eq!(point.count, 3);
                assert_eq!(point.sum, 12.0);
                let quantiles: Vec<_> = point
                    .quantile_values
                    .iter()
                    .map(|q| (q.quantile, q.value))
                    .collect();
                assert_eq!(quantiles, vec![(0.5, 3.0), (1.0, 7.0)]);
            }
            other => panic!("unexpected data {other:?}"),
        }
    }
}
