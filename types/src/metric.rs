use crate::config::Config;
use crate::namespace::Namespace;
use crate::time::{from_wire_time, to_wire_time};
use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use std::collections::HashMap;
use std::time::SystemTime;

/// A metric measurement: exactly one scalar kind is active at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    String(String),
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
}

impl MetricValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetricValue::String(_) => "string",
            MetricValue::Float32(_) => "float32",
            MetricValue::Float64(_) => "float64",
            MetricValue::Int32(_) => "int32",
            MetricValue::Int64(_) => "int64",
            MetricValue::Uint32(_) => "uint32",
            MetricValue::Uint64(_) => "uint64",
        }
    }
}

macro_rules! metric_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MetricValue {
                fn from(v: $ty) -> Self {
                    MetricValue::$variant(v.into())
                }
            }
        )*
    };
}

metric_value_from! {
    String => String,
    &str => String,
    f32 => Float32,
    f64 => Float64,
    i32 => Int32,
    i64 => Int64,
    u32 => Uint32,
    u64 => Uint64,
}

impl From<&MetricValue> for v1::metric::Value {
    fn from(value: &MetricValue) -> Self {
        use v1::metric::Value;

        match value {
            MetricValue::String(v) => Value::StringData(v.clone()),
            MetricValue::Float32(v) => Value::Float32Data(*v),
            MetricValue::Float64(v) => Value::Float64Data(*v),
            MetricValue::Int32(v) => Value::Int32Data(*v),
            MetricValue::Int64(v) => Value::Int64Data(*v),
            MetricValue::Uint32(v) => Value::Uint32Data(*v),
            MetricValue::Uint64(v) => Value::Uint64Data(*v),
        }
    }
}

impl From<v1::metric::Value> for MetricValue {
    fn from(value: v1::metric::Value) -> Self {
        use v1::metric::Value;

        match value {
            Value::StringData(v) => MetricValue::String(v),
            Value::Float32Data(v) => MetricValue::Float32(v),
            Value::Float64Data(v) => MetricValue::Float64(v),
            Value::Int32Data(v) => MetricValue::Int32(v),
            Value::Int64Data(v) => MetricValue::Int64(v),
            Value::Uint32Data(v) => MetricValue::Uint32(v),
            Value::Uint64Data(v) => MetricValue::Uint64(v),
        }
    }
}

/// A typed, timestamped measurement keyed by a [`Namespace`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metric {
    namespace: Namespace,
    unit: String,
    description: String,
    tags: HashMap<String, String>,
    timestamp: Option<SystemTime>,
    last_advertised_time: Option<SystemTime>,
    version: i64,
    value: Option<MetricValue>,
    config: Option<Config>,
}

macro_rules! metric_value_getter {
    ($(#[$meta:meta])* $fn_name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        $(#[$meta])*
        pub fn $fn_name(&self) -> Result<$ty> {
            match &self.value {
                Some(MetricValue::$variant(v)) => Ok(*v),
                other => Err(Self::wrong_kind($expected, other.as_ref())),
            }
        }
    };
}

impl Metric {
    pub fn new(
        namespace: Namespace,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            unit: unit.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Decodes a metric kind, e.g. one requested by the host for collection.
    ///
    /// Unlike `TryFrom<v1::Metric>`, the value may be absent.
    pub fn from_wire_kind(metric: v1::Metric) -> Result<Self> {
        if metric.namespace.is_empty() {
            return Err(PluginError::MalformedMetric(
                "metric namespace has no elements".to_string(),
            ));
        }

        let namespace = Namespace::try_from(metric.namespace)
            .map_err(|e| PluginError::MalformedMetric(e.to_string()))?;

        Ok(Self {
            namespace,
            unit: metric.unit,
            description: metric.description,
            tags: metric.tags,
            timestamp: metric.timestamp.as_ref().map(from_wire_time).transpose()?,
            last_advertised_time: metric
                .last_advertised_time
                .as_ref()
                .map(from_wire_time)
                .transpose()?,
            version: metric.version,
            value: metric.value.map(MetricValue::from),
            config: metric.config.map(Config::from),
        })
    }

    /// Encodes the metric; a metric without namespace elements cannot be published.
    pub fn to_wire(&self) -> Result<v1::Metric> {
        if self.namespace.is_empty() {
            return Err(PluginError::MalformedMetric(
                "metric namespace has no elements".to_string(),
            ));
        }

        Ok(v1::Metric {
            namespace: (&self.namespace).into(),
            unit: self.unit.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            timestamp: self.timestamp.map(to_wire_time),
            last_advertised_time: self.last_advertised_time.map(to_wire_time),
            config: self.config.as_ref().map(v1::ConfigMap::from),
            version: self.version,
            value: self.value.as_ref().map(v1::metric::Value::from),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn set_namespace(&mut self, namespace: Namespace) -> &mut Self {
        self.namespace = namespace;
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) -> &mut Self {
        self.unit = unit.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Adds a tag, overwriting any previous value for the key.
    ///
    /// Returns the replaced value, if there was one.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.tags.insert(key.into(), value.into())
    }

    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: SystemTime) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn last_advertised_time(&self) -> Option<SystemTime> {
        self.last_advertised_time
    }

    pub fn set_last_advertised_time(&mut self, time: SystemTime) -> &mut Self {
        self.last_advertised_time = Some(time);
        self
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn set_version(&mut self, version: i64) -> &mut Self {
        self.version = version;
        self
    }

    /// Stores `value` as the active measurement, replacing any previous kind.
    pub fn set_data(&mut self, value: impl Into<MetricValue>) -> &mut Self {
        self.value = Some(value.into());
        self
    }

    pub fn data(&self) -> Option<&MetricValue> {
        self.value.as_ref()
    }

    pub fn value_kind(&self) -> Option<&'static str> {
        self.value.as_ref().map(MetricValue::kind_name)
    }

    fn wrong_kind(expected: &'static str, actual: Option<&MetricValue>) -> PluginError {
        PluginError::WrongValueKind {
            expected,
            actual: actual.map(MetricValue::kind_name).unwrap_or("none"),
        }
    }

    pub fn get_string_data(&self) -> Result<&str> {
        match &self.value {
            Some(MetricValue::String(v)) => Ok(v),
            other => Err(Self::wrong_kind("string", other.as_ref())),
        }
    }

    metric_value_getter!(get_float32_data, Float32, f32, "float32");
    metric_value_getter!(get_float64_data, Float64, f64, "float64");
    metric_value_getter!(get_int32_data, Int32, i32, "int32");
    metric_value_getter!(get_int64_data, Int64, i64, "int64");
    metric_value_getter!(get_uint32_data, Uint32, u32, "uint32");
    metric_value_getter!(get_uint64_data, Uint64, u64, "uint64");

    /// Attaches a per-metric diagnostic config.
    pub fn set_diagnostic_config(&mut self, config: Config) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// The attached config; `None` when no config was attached, which is
    /// distinct from an attached config without keys.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn take_config(&mut self) -> Option<Config> {
        self.config.take()
    }
}

impl TryFrom<v1::Metric> for Metric {
    type Error = PluginError;

    /// Decodes a published metric, which must carry a value.
    fn try_from(metric: v1::Metric) -> Result<Self> {
        if metric.value.is_none() {
            return Err(PluginError::MalformedMetric(format!(
                "metric {} carries no value",
                metric
                    .namespace
                    .iter()
                    .map(|e| format!("/{}", e.value))
                    .collect::<String>()
            )));
        }
        Self::from_wire_kind(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Utc};

    fn fake_metric() -> Metric {
        let mut metric = Metric::new(
            Namespace::from_static(["foo", "bar"]).unwrap(),
            "atoms",
            "critical metric",
        );
        metric.add_tag("host", "baz");
        metric.add_tag("node", "bonk");
        metric
    }

    #[test]
    fn test_namespace_unit_description() {
        let metric = fake_metric();
        let wire = metric.to_wire().unwrap();

        assert_eq!(metric.namespace().to_string(), "/foo/bar");
        assert_eq!(wire.unit, "atoms");
        assert_eq!(wire.description, "critical metric");
        assert_eq!(wire.tags.get("host").map(String::as_str), Some("baz"));
        assert_eq!(wire.tags.get("node").map(String::as_str), Some("bonk"));
    }

    #[test]
    fn test_set_namespace() {
        let mut metric = Metric::default();
        metric.set_namespace(Namespace::from_static(["foo", "cluster", "node_count"]).unwrap());
        assert_eq!(metric.namespace().to_string(), "/foo/cluster/node_count");
    }

    #[test]
    fn test_tags_overwrite() {
        let mut metric = Metric::default();
        assert_eq!(metric.add_tag("host", "zero"), None);
        metric.add_tag("period", "1hr");
        assert_eq!(metric.add_tag("host", "one"), Some("zero".to_string()));

        assert_eq!(metric.tags().len(), 2);
        assert_eq!(metric.tags()["host"], "one");
        assert_eq!(metric.tags()["period"], "1hr");
    }

    #[test]
    fn test_set_data_each_kind() {
        let mut metric = Metric::default();

        metric.set_data("hop");
        assert_eq!(metric.get_string_data().unwrap(), "hop");

        metric.set_data(3.14159f32);
        assert_eq!(metric.get_float32_data().unwrap(), 3.14159f32);

        metric.set_data(1.73205f64);
        assert_eq!(metric.get_float64_data().unwrap(), 1.73205f64);

        metric.set_data(40990i32);
        assert_eq!(metric.get_int32_data().unwrap(), 40990);

        metric.set_data(40991i64);
        assert_eq!(metric.get_int64_data().unwrap(), 40991);

        metric.set_data(40992u32);
        assert_eq!(metric.get_uint32_data().unwrap(), 40992);

        metric.set_data(40993u64);
        assert_eq!(metric.get_uint64_data().unwrap(), 40993);
    }

    #[test]
    fn test_wrong_value_kind() {
        let mut metric = Metric::default();
        assert!(matches!(
            metric.get_int64_data(),
            Err(PluginError::WrongValueKind { expected: "int64", actual: "none" })
        ));

        metric.set_data(7u32);
        assert!(matches!(
            metric.get_int64_data(),
            Err(PluginError::WrongValueKind { expected: "int64", actual: "uint32" })
        ));
        assert!(metric.get_string_data().is_err());
        assert!(metric.get_float64_data().is_err());

        // the previous kind is cleared
        metric.set_data(1.5f64);
        assert!(metric.get_uint32_data().is_err());
        assert_eq!(metric.value_kind(), Some("float64"));
    }

    #[test]
    fn test_timestamp_calendar_round_trip() {
        let collected = Utc.with_ymd_and_hms(1992, 6, 2, 8, 10, 56).unwrap();
        let mut metric = fake_metric();
        metric.set_timestamp(collected.into());
        metric.set_data(1i32);

        let decoded = Metric::try_from(metric.to_wire().unwrap()).unwrap();
        let timestamp: chrono::DateTime<Utc> = decoded.timestamp().unwrap().into();

        assert_eq!(timestamp.year(), 1992);
        assert_eq!(timestamp.month(), 6);
        assert_eq!(timestamp.day(), 2);
        assert_eq!(timestamp.hour(), 8);
        assert_eq!(timestamp.minute(), 10);
        assert_eq!(timestamp.second(), 56);
    }

    #[test]
    fn test_last_advertised_time_on_wire() {
        let advertised = Utc.with_ymd_and_hms(2008, 9, 29, 15, 55, 13).unwrap()
            + chrono::Duration::nanoseconds(987_654_321);
        let mut metric = fake_metric();
        metric.set_last_advertised_time(advertised.into());

        let wire = metric.to_wire().unwrap();
        let time = wire.last_advertised_time.unwrap();
        assert_eq!(time.seconds, advertised.timestamp());
        assert_eq!(time.nanos, 987_654_321);

        let decoded = Metric::from_wire_kind(wire).unwrap();
        let back: chrono::DateTime<Utc> = decoded.last_advertised_time().unwrap().into();
        assert_eq!(back, advertised);
    }

    #[test]
    fn test_from_wire() {
        let mut base = fake_metric();
        base.set_data(12i64).set_version(2);

        let metric = Metric::try_from(base.to_wire().unwrap()).unwrap();
        assert_eq!(metric, base);
        assert_eq!(metric.namespace().to_string(), "/foo/bar");
        assert_eq!(metric.unit(), "atoms");
        assert_eq!(metric.description(), "critical metric");
        assert_eq!(metric.tags()["host"], "baz");
        assert_eq!(metric.version(), 2);
    }

    #[test]
    fn test_from_wire_requires_value() {
        let wire = fake_metric().to_wire().unwrap();
        assert!(matches!(
            Metric::try_from(wire.clone()),
            Err(PluginError::MalformedMetric(_))
        ));
        assert!(Metric::from_wire_kind(wire).is_ok());

        let empty = v1::Metric {
            value: Some(v1::metric::Value::Int32Data(1)),
            ..Default::default()
        };
        assert!(matches!(
            Metric::try_from(empty),
            Err(PluginError::MalformedMetric(_))
        ));
    }

    #[test]
    fn test_to_wire_requires_namespace() {
        let mut metric = Metric::default();
        metric.set_data(1u64);
        assert!(matches!(
            metric.to_wire(),
            Err(PluginError::MalformedMetric(_))
        ));
    }

    #[test]
    fn test_diagnostic_config() {
        let mut metric = fake_metric();
        assert!(metric.config().is_none());

        metric.set_diagnostic_config(Config::new());
        assert!(metric.config().is_some_and(Config::is_empty));

        let mut config = Config::new();
        config.set_string("key", "value");
        metric.set_diagnostic_config(config.clone());
        assert_eq!(
            metric.config().unwrap().get_string("key").unwrap(),
            config.get_string("key").unwrap()
        );

        let wire = metric.to_wire().unwrap();
        let decoded = Metric::from_wire_kind(wire).unwrap();
        assert_eq!(decoded.config(), Some(&config));

        let without = Metric::from_wire_kind(fake_metric().to_wire().unwrap()).unwrap();
        assert!(without.config().is_none());
    }
}
