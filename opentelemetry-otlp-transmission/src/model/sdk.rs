//! Conversions from the records collected by `opentelemetry_sdk`.
//!
//! The exporters implement the SDK exporter traits by turning each batch into
//! the types of this module before writing it.

use std::borrow::Cow;

use opentelemetry::logs::AnyValue as LogsAnyValue;
use opentelemetry::trace::{SpanContext, SpanId, TraceId};
use opentelemetry::Value;
use opentelemetry_sdk::logs::SdkLogRecord;
use opentelemetry_sdk::metrics::data as sdk;
use opentelemetry_sdk::metrics::Temporality as SdkTemporality;

use super::common::{AnyValue, Array, InstrumentationScope, KeyValue, Resource};
use super::logs::{LogRecord, TraceContext};
use super::metrics::{
    Exemplar, ExponentialBucket, ExponentialHistogram, ExponentialHistogramDataPoint, Gauge,
    Histogram, HistogramDataPoint, Metric, MetricData, NumberDataPoint, NumberValue, ScopeMetrics,
    Sum, Temporality,
};
use super::trace::{Event, Link, SpanData};

fn owned(value: &str) -> Cow<'static, str> {
    Cow::Owned(value.to_owned())
}

fn attributes<'a>(attributes: impl Iterator<Item = &'a opentelemetry::KeyValue>) -> Vec<KeyValue> {
    attributes.map(KeyValue::from).collect()
}

fn trace_state(context: &SpanContext) -> Option<String> {
    let header = context.trace_state().header();
    (!header.is_empty()).then_some(header)
}

impl From<Value> for AnyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(v) => AnyValue::Bool(v),
            Value::I64(v) => AnyValue::Int(v),
            Value::F64(v) => AnyValue::Double(v),
            Value::String(v) => AnyValue::String(Cow::Owned(v.into())),
            Value::Array(opentelemetry::Array::Bool(v)) => AnyValue::Array(Array::Bool(v)),
            Value::Array(opentelemetry::Array::I64(v)) => AnyValue::Array(Array::I64(v)),
            Value::Array(opentelemetry::Array::F64(v)) => AnyValue::Array(Array::F64(v)),
            Value::Array(opentelemetry::Array::String(v)) => AnyValue::Array(Array::String(
                v.into_iter().map(|s| Cow::Owned(s.into())).collect(),
            )),
            other => AnyValue::String(Cow::Owned(other.to_string())),
        }
    }
}

impl From<&Value> for AnyValue {
    fn from(value: &Value) -> Self {
        value.clone().into()
    }
}

impl From<opentelemetry::KeyValue> for KeyValue {
    fn from(kv: opentelemetry::KeyValue) -> Self {
        KeyValue {
            key: Cow::Owned(kv.key.into()),
            value: kv.value.into(),
        }
    }
}

impl From<&opentelemetry::KeyValue> for KeyValue {
    fn from(kv: &opentelemetry::KeyValue) -> Self {
        KeyValue {
            key: owned(kv.key.as_str()),
            value: (&kv.value).into(),
        }
    }
}

impl From<&LogsAnyValue> for AnyValue {
    fn from(value: &LogsAnyValue) -> Self {
        match value {
            LogsAnyValue::Int(v) => AnyValue::Int(*v),
            LogsAnyValue::Double(v) => AnyValue::Double(*v),
            LogsAnyValue::String(v) => AnyValue::String(owned(v.as_str())),
            LogsAnyValue::Boolean(v) => AnyValue::Bool(*v),
            LogsAnyValue::Bytes(v) => AnyValue::Bytes(v.to_vec()),
            LogsAnyValue::ListAny(values) => {
                AnyValue::List(values.iter().map(AnyValue::from).collect())
            }
            LogsAnyValue::Map(entries) => AnyValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| KeyValue {
                        key: owned(key.as_str()),
                        value: value.into(),
                    })
                    .collect(),
            ),
            other => AnyValue::String(Cow::Owned(format!("{other:?}"))),
        }
    }
}

impl From<&opentelemetry::InstrumentationScope> for InstrumentationScope {
    fn from(scope: &opentelemetry::InstrumentationScope) -> Self {
        InstrumentationScope {
            name: owned(scope.name()),
            version: scope.version().map(owned),
            schema_url: scope.schema_url().map(owned),
            attributes: attributes(scope.attributes()),
        }
    }
}

impl From<&opentelemetry_sdk::Resource> for Resource {
    fn from(resource: &opentelemetry_sdk::Resource) -> Self {
        Resource {
            attributes: resource
                .iter()
                .map(|(key, value)| KeyValue {
                    key: owned(key.as_str()),
                    value: value.into(),
                })
                .collect(),
            dropped_attributes_count: 0,
            schema_url: resource.schema_url().map(owned),
        }
    }
}

impl From<opentelemetry::trace::Event> for Event {
    fn from(event: opentelemetry::trace::Event) -> Self {
        Event {
            name: event.name,
            timestamp: event.timestamp,
            attributes: event.attributes.into_iter().map(KeyValue::from).collect(),
            dropped_attributes_count: event.dropped_attributes_count,
        }
    }
}

impl From<opentelemetry::trace::Link> for Link {
    fn from(link: opentelemetry::trace::Link) -> Self {
        Link {
            trace_id: link.span_context.trace_id(),
            span_id: link.span_context.span_id(),
            trace_state: trace_state(&link.span_context),
            trace_flags: link.span_context.trace_flags(),
            is_remote: link.span_context.is_remote(),
            attributes: link.attributes.into_iter().map(KeyValue::from).collect(),
            dropped_attributes_count: link.dropped_attributes_count,
        }
    }
}

impl From<opentelemetry_sdk::trace::SpanData> for SpanData {
    fn from(span: opentelemetry_sdk::trace::SpanData) -> Self {
        SpanData {
            trace_id: span.span_context.trace_id(),
            span_id: span.span_context.span_id(),
            trace_state: trace_state(&span.span_context),
            trace_flags: span.span_context.trace_flags(),
            parent_span_id: span.parent_span_id,
            parent_span_is_remote: span.parent_span_is_remote,
            span_kind: span.span_kind,
            name: span.name,
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: span.attributes.into_iter().map(KeyValue::from).collect(),
            dropped_attributes_count: span.dropped_attributes_count,
            events: span.events.events.into_iter().map(Event::from).collect(),
            dropped_events_count: span.events.dropped_count,
            links: span.links.links.into_iter().map(Link::from).collect(),
            dropped_links_count: span.links.dropped_count,
            status: span.status,
            instrumentation_scope: (&span.instrumentation_scope).into(),
        }
    }
}

impl From<(&SdkLogRecord, &opentelemetry::InstrumentationScope)> for LogRecord {
    fn from((record, scope): (&SdkLogRecord, &opentelemetry::InstrumentationScope)) -> Self {
        // A record target names the scope on its own.
        let instrumentation_scope = match record.target() {
            Some(target) => InstrumentationScope::new(target.clone()),
            None => scope.into(),
        };
        LogRecord {
            event_name: record.event_name().map(Cow::Borrowed),
            timestamp: record.timestamp(),
            observed_timestamp: record.observed_timestamp(),
            severity_number: record.severity_number(),
            severity_text: record.severity_text().map(Cow::Borrowed),
            body: record.body().map(AnyValue::from),
            attributes: record
                .attributes_iter()
                .map(|(key, value)| KeyValue {
                    key: owned(key.as_str()),
                    value: value.into(),
                })
                .collect(),
            trace_context: record.trace_context().map(|context| TraceContext {
                trace_id: context.trace_id,
                span_id: context.span_id,
                trace_flags: context.trace_flags,
            }),
            instrumentation_scope,
        }
    }
}

impl From<SdkTemporality> for Temporality {
    fn from(temporality: SdkTemporality) -> Self {
        match temporality {
            SdkTemporality::Delta => Temporality::Delta,
            _ => Temporality::Cumulative,
        }
    }
}

impl From<Temporality> for SdkTemporality {
    fn from(temporality: Temporality) -> Self {
        match temporality {
            Temporality::Cumulative => SdkTemporality::Cumulative,
            Temporality::Delta => SdkTemporality::Delta,
        }
    }
}

trait Numeric: Copy {
    fn number(self) -> NumberValue;
    // lossy at large values, histograms only carry floats
    fn into_f64(self) -> f64;
}

impl Numeric for u64 {
    fn number(self) -> NumberValue {
        NumberValue::I64(i64::try_from(self).unwrap_or(i64::MAX))
    }

    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Numeric for i64 {
    fn number(self) -> NumberValue {
        NumberValue::I64(self)
    }

    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Numeric for f64 {
    fn number(self) -> NumberValue {
        NumberValue::F64(self)
    }

    fn into_f64(self) -> f64 {
        self
    }
}

fn exemplars<'a, T: Numeric + 'a>(
    exemplars: impl Iterator<Item = &'a sdk::Exemplar<T>>,
) -> Vec<Exemplar> {
    exemplars
        .map(|exemplar| Exemplar {
            filtered_attributes: attributes(exemplar.filtered_attributes()),
            time: exemplar.time(),
            value: exemplar.value.number(),
            span_id: SpanId::from_bytes(*exemplar.span_id()),
            trace_id: TraceId::from_bytes(*exemplar.trace_id()),
        })
        .collect()
}

fn bucket(bucket: &sdk::ExponentialBucket) -> ExponentialBucket {
    ExponentialBucket {
        offset: bucket.offset(),
        counts: bucket.counts().collect(),
    }
}

fn metric_data<T: Numeric>(data: &sdk::MetricData<T>) -> MetricData {
    match data {
        sdk::MetricData::Gauge(gauge) => MetricData::Gauge(Gauge {
            data_points: gauge
                .data_points()
                .map(|point| NumberDataPoint {
                    attributes: attributes(point.attributes()),
                    start_time: gauge.start_time(),
                    time: gauge.time(),
                    value: point.value().number(),
                    exemplars: exemplars(point.exemplars()),
                })
                .collect(),
        }),
        sdk::MetricData::Sum(sum) => MetricData::Sum(Sum {
            data_points: sum
                .data_points()
                .map(|point| NumberDataPoint {
                    attributes: attributes(point.attributes()),
                    start_time: Some(sum.start_time()),
                    time: sum.time(),
                    value: point.value().number(),
                    exemplars: exemplars(point.exemplars()),
                })
                .collect(),
            temporality: sum.temporality().into(),
            is_monotonic: sum.is_monotonic(),
        }),
        sdk::MetricData::Histogram(histogram) => MetricData::Histogram(Histogram {
            data_points: histogram
                .data_points()
                .map(|point| HistogramDataPoint {
                    attributes: attributes(point.attributes()),
                    start_time: Some(histogram.start_time()),
                    time: histogram.time(),
                    count: point.count(),
                    bounds: point.bounds().collect(),
                    bucket_counts: point.bucket_counts().collect(),
                    min: point.min().map(Numeric::into_f64),
                    max: point.max().map(Numeric::into_f64),
                    sum: Some(point.sum().into_f64()),
                    exemplars: exemplars(point.exemplars()),
                })
                .collect(),
            temporality: histogram.temporality().into(),
        }),
        sdk::MetricData::ExponentialHistogram(histogram) => {
            MetricData::ExponentialHistogram(ExponentialHistogram {
                data_points: histogram
                    .data_points()
                    .map(|point| ExponentialHistogramDataPoint {
                        attributes: attributes(point.attributes()),
                        start_time: Some(histogram.start_time()),
                        time: histogram.time(),
                        count: u64::try_from(point.count()).unwrap_or(u64::MAX),
                        min: point.min().map(Numeric::into_f64),
                        max: point.max().map(Numeric::into_f64),
                        sum: Some(point.sum().into_f64()),
                        scale: point.scale(),
                        zero_count: point.zero_count(),
                        positive_bucket: bucket(point.positive_bucket()),
                        negative_bucket: bucket(point.negative_bucket()),
                        zero_threshold: point.zero_threshold(),
                        exemplars: exemplars(point.exemplars()),
                    })
                    .collect(),
                temporality: histogram.temporality().into(),
            })
        }
    }
}

impl From<&sdk::Metric> for Metric {
    fn from(metric: &sdk::Metric) -> Self {
        let data = match metric.data() {
            sdk::AggregatedMetrics::F64(data) => metric_data(data),
            sdk::AggregatedMetrics::U64(data) => metric_data(data),
            sdk::AggregatedMetrics::I64(data) => metric_data(data),
        };
        Metric {
            name: owned(metric.name()),
            description: owned(metric.description()),
            unit: owned(metric.unit()),
            data,
        }
    }
}

impl From<&sdk::ScopeMetrics> for ScopeMetrics {
    fn from(scope_metrics: &sdk::ScopeMetrics) -> Self {
        ScopeMetrics {
            scope: scope_metrics.scope().into(),
            metrics: scope_metrics.metrics().map(Metric::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::SystemTime;

    use opentelemetry::trace::{SpanKind, Status, TraceFlags, TraceState};
    use opentelemetry_sdk::trace::{SpanEvents, SpanLinks};

    use super::*;

    fn context(trace: u128, span: u64, trace_state: TraceState) -> SpanContext {
        SpanContext::new(
            TraceId::from_bytes(trace.to_be_bytes()),
            SpanId::from_bytes(span.to_be_bytes()),
            TraceFlags::SAMPLED,
            true,
            trace_state,
        )
    }

    #[test]
    fn attribute_values_keep_their_types() {
        let kv = KeyValue::from(opentelemetry::KeyValue::new(
            "hosts",
            Value::Array(opentelemetry::Array::String(vec!["a".into(), "b".into()])),
        ));
        assert_eq!(kv.key, "hosts");
        match kv.value {
            AnyValue::Array(Array::String(hosts)) => assert_eq!(hosts, ["a", "b"]),
            other => panic!("unexpected value {other:?}"),
        }

        assert!(matches!(AnyValue::from(Value::I64(-4)), AnyValue::Int(-4)));
        assert!(matches!(AnyValue::from(&Value::Bool(true)), AnyValue::Bool(true)));
    }

    #[test]
    fn log_bodies_keep_nesting() {
        let mut map = HashMap::new();
        map.insert(opentelemetry::Key::from("user"), LogsAnyValue::from("ada"));
        let body = LogsAnyValue::ListAny(Box::new(vec![
            LogsAnyValue::Int(3),
            LogsAnyValue::Map(Box::new(map)),
            LogsAnyValue::Bytes(Box::new(vec![1, 2])),
        ]));

        match AnyValue::from(&body) {
            AnyValue::List(values) => {
                assert_eq!(values.len(), 3);
                assert!(matches!(values[0], AnyValue::Int(3)));
                match &values[1] {
                    AnyValue::Map(entries) => {
                        assert_eq!(entries[0].key, "user");
                        assert!(matches!(&entries[0].value, AnyValue::String(s) if s == "ada"));
                    }
                    other => panic!("unexpected value {other:?}"),
                }
                assert!(matches!(&values[2], AnyValue::Bytes(b) if b == &[1, 2]));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn resource_keeps_schema_url() {
        let resource = opentelemetry_sdk::Resource::builder_empty()
            .with_schema_url(
                [opentelemetry::KeyValue::new("service.name", "shop")],
                "https://opentelemetry.io/schemas/1.21.0",
            )
            .build();

        let resource = Resource::from(&resource);
        assert_eq!(resource.attributes.len(), 1);
        assert_eq!(resource.attributes[0].key, "service.name");
        assert_eq!(
            resource.schema_url.as_deref(),
            Some("https://opentelemetry.io/schemas/1.21.0")
        );
    }

    #[test]
    fn spans_keep_identity_and_dropped_counts() {
        let trace_state = TraceState::from_key_value([("vendor", "blue")]).unwrap();
        let mut events = SpanEvents::default();
        events.events.push(opentelemetry::trace::Event::new(
            "retry",
            SystemTime::UNIX_EPOCH,
            vec![opentelemetry::KeyValue::new("attempt", 2_i64)],
            1,
        ));
        events.dropped_count = 3;
        let mut links = SpanLinks::default();
        links.links.push(opentelemetry::trace::Link::new(
            context(9, 10, TraceState::default()),
            vec![],
            0,
        ));
        links.dropped_count = 5;

        let span = opentelemetry_sdk::trace::SpanData {
            span_context: context(7, 11, trace_state),
            parent_span_id: SpanId::from_bytes(12_u64.to_be_bytes()),
            parent_span_is_remote: true,
            span_kind: SpanKind::Server,
            name: "GET /cart".into(),
            start_time: SystemTime::UNIX_EPOCH,
            end_time: SystemTime::UNIX_EPOCH,
            attributes: vec![opentelemetry::KeyValue::new("http.method", "GET")],
            dropped_attributes_count: 2,
            events,
            links,
            status: Status::Ok,
            instrumentation_scope: opentelemetry::InstrumentationScope::builder("checkout")
                .with_version("1.2")
                .build(),
        };

        let span = SpanData::from(span);
        assert_eq!(span.trace_id, TraceId::from_bytes(7_u128.to_be_bytes()));
        assert_eq!(span.span_id, SpanId::from_bytes(11_u64.to_be_bytes()));
        assert_eq!(span.trace_state.as_deref(), Some("vendor=blue"));
        assert!(span.parent_span_is_remote);
        assert_eq!(span.dropped_attributes_count, 2);
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].dropped_attributes_count, 1);
        assert_eq!(span.dropped_events_count, 3);
        assert_eq!(span.links.len(), 1);
        assert_eq!(span.links[0].trace_state, None);
        assert_eq!(span.dropped_links_count, 5);
        assert_eq!(span.instrumentation_scope.name, "checkout");
        assert_eq!(span.instrumentation_scope.version.as_deref(), Some("1.2"));
    }

    #[test]
    fn temporality_maps_both_ways() {
        assert_eq!(Temporality::from(SdkTemporality::Delta), Temporality::Delta);
        assert_eq!(
            Temporality::from(SdkTemporality::LowMemory),
            Temporality::Cumulative
        );
        assert_eq!(SdkTemporality::from(Temporality::Delta), SdkTemporality::Delta);
    }

    #[test]
    fn large_unsigned_values_saturate() {
        assert_eq!(u64::MAX.number(), NumberValue::I64(i64::MAX));
        assert_eq!(42_u64.number(), NumberValue::I64(42));
    }
}
