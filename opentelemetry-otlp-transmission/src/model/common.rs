use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Key used for attributes, resources and scopes.
pub type Key = Cow<'static, str>;

/// A homogeneous array of attribute values.
#[derive(Clone, Debug, PartialEq)]
pub enum Array {
    /// Array of bools
    Bool(Vec<bool>),
    /// Array of integers
    I64(Vec<i64>),
    /// Array of floats
    F64(Vec<f64>),
    /// Array of strings
    String(Vec<Cow<'static, str>>),
}

macro_rules! into_array {
    ($(($t:ty, $variant:path),)+) => {
        $(
            impl From<$t> for Array {
                fn from(values: $t) -> Self {
                    $variant(values)
                }
            }
        )+
    };
}

into_array!(
    (Vec<bool>, Array::Bool),
    (Vec<i64>, Array::I64),
    (Vec<f64>, Array::F64),
    (Vec<Cow<'static, str>>, Array::String),
);

impl From<Vec<&'static str>> for Array {
    fn from(values: Vec<&'static str>) -> Self {
        Array::String(values.into_iter().map(Cow::Borrowed).collect())
    }
}

impl From<Vec<String>> for Array {
    fn from(values: Vec<String>) -> Self {
        Array::String(values.into_iter().map(Cow::Owned).collect())
    }
}

/// A value which is rendered through its [`fmt::Display`] implementation when
/// written to the wire.
///
/// The conversion happens lazily, during serialization. If the `Display`
/// implementation returns an error the attribute carrying this value is
/// skipped and the rest of the record is still written. A panicking
/// implementation is not caught and unwinds out of the export call.
pub type DisplayObject = Arc<dyn fmt::Display + Send + Sync>;

/// The value part of an attribute, matching the OTLP `AnyValue` oneof.
#[derive(Clone)]
pub enum AnyValue {
    /// bool values
    Bool(bool),
    /// i64 values
    Int(i64),
    /// f64 values
    Double(f64),
    /// String values
    String(Cow<'static, str>),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Homogeneous array values
    Array(Array),
    /// Array of values of any type
    List(Vec<AnyValue>),
    /// Nested key-value list
    Map(Vec<KeyValue>),
    /// Any other value, encoded as its string representation
    Object(DisplayObject),
}

impl AnyValue {
    /// Wrap an arbitrary displayable value.
    pub fn object<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        AnyValue::Object(Arc::new(value))
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            AnyValue::Int(v) => f.debug_tuple("Int").field(v).finish(),
            AnyValue::Double(v) => f.debug_tuple("Double").field(v).finish(),
            AnyValue::String(v) => f.debug_tuple("String").field(v).finish(),
            AnyValue::Bytes(v) => f.debug_tuple("Bytes").field(v).finish(),
            AnyValue::Array(v) => f.debug_tuple("Array").field(v).finish(),
            AnyValue::List(v) => f.debug_tuple("List").field(v).finish(),
            AnyValue::Map(v) => f.debug_tuple("Map").field(v).finish(),
            AnyValue::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<bool> for AnyValue {
    fn from(value: bool) -> Self {
        AnyValue::Bool(value)
    }
}

impl From<i64> for AnyValue {
    fn from(value: i64) -> Self {
        AnyValue::Int(value)
    }
}

impl From<i32> for AnyValue {
    fn from(value: i32) -> Self {
        AnyValue::Int(value.into())
    }
}

impl From<f64> for AnyValue {
    fn from(value: f64) -> Self {
        AnyValue::Double(value)
    }
}

impl From<&'static str> for AnyValue {
    fn from(value: &'static str) -> Self {
        AnyValue::String(Cow::Borrowed(value))
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        AnyValue::String(Cow::Owned(value))
    }
}

impl From<Array> for AnyValue {
    fn from(value: Array) -> Self {
        AnyValue::Array(value)
    }
}

/// A key-value pair describing an attribute.
#[derive(Clone, Debug)]
pub struct KeyValue {
    /// The attribute name
    pub key: Key,
    /// The attribute value
    pub value: AnyValue,
}

impl KeyValue {
    /// Create a new `KeyValue` pair.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Key>,
        V: Into<AnyValue>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The entity producing telemetry.
#[derive(Clone, Debug, Default)]
pub struct Resource {
    /// Resource attributes.
    pub attributes: Vec<KeyValue>,
    /// Attributes already dropped before the resource reached the exporter.
    pub dropped_attributes_count: u32,
    /// Schema url of the resource.
    pub schema_url: Option<Cow<'static, str>>,
}

impl Resource {
    /// Create a resource from its attributes.
    pub fn new<T: IntoIterator<Item = KeyValue>>(attributes: T) -> Self {
        Resource {
            attributes: attributes.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Attach a schema url.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }
}

/// Information about the library that produced a set of records.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationScope {
    /// Scope name, usually the instrumentation library's crate name.
    pub name: Cow<'static, str>,
    /// Scope version.
    pub version: Option<Cow<'static, str>>,
    /// Schema url of the scope.
    pub schema_url: Option<Cow<'static, str>>,
    /// Scope attributes.
    pub attributes: Vec<KeyValue>,
}

impl InstrumentationScope {
    /// Create a scope with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        InstrumentationScope {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the scope version.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the scope schema url.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }

    /// Set the scope attributes.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, attributes: T) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }
}

/// A batch of records handed to the exporter in one export call, together
/// with the resource describing their producer.
#[derive(Clone, Copy, Debug)]
pub struct ExportBatch<'a, T> {
    /// Resource shared by all records.
    pub resource: &'a Resource,
    /// Records in the order they are to be written.
    pub records: &'a [T],
}

impl<'a, T> ExportBatch<'a, T> {
    /// Create a new batch.
    pub fn new(resource: &'a Resource, records: &'a [T]) -> Self {
        ExportBatch { resource, records }
    }
}
