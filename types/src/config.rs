use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;

/// The value kinds a config key can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    String,
    Int,
    Float,
    Bool,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::String => "string",
            ConfigKind::Int => "int",
            ConfigKind::Float => "float",
            ConfigKind::Bool => "bool",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ConfigKind::Int | ConfigKind::Float)
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConfigKind> for v1::ConfigKind {
    fn from(kind: ConfigKind) -> Self {
        match kind {
            ConfigKind::String => v1::ConfigKind::String,
            ConfigKind::Int => v1::ConfigKind::Int,
            ConfigKind::Float => v1::ConfigKind::Float,
            ConfigKind::Bool => v1::ConfigKind::Bool,
        }
    }
}

impl From<v1::ConfigKind> for ConfigKind {
    fn from(kind: v1::ConfigKind) -> Self {
        match kind {
            v1::ConfigKind::String => ConfigKind::String,
            v1::ConfigKind::Int => ConfigKind::Int,
            v1::ConfigKind::Float => ConfigKind::Float,
            v1::ConfigKind::Bool => ConfigKind::Bool,
        }
    }
}

/// A single typed config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ConfigValue {
    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigValue::String(_) => ConfigKind::String,
            ConfigValue::Int(_) => ConfigKind::Int,
            ConfigValue::Float(_) => ConfigKind::Float,
            ConfigValue::Bool(_) => ConfigKind::Bool,
        }
    }

    /// Numeric view used for range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(v) => Some(*v as f64),
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::String(_) | ConfigValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(v) => write!(f, "{v:?}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&ConfigValue> for v1::ConfigValue {
    fn from(value: &ConfigValue) -> Self {
        use v1::config_value::Value;

        let value = match value {
            ConfigValue::String(v) => Value::StringValue(v.clone()),
            ConfigValue::Int(v) => Value::IntValue(*v),
            ConfigValue::Float(v) => Value::FloatValue(*v),
            ConfigValue::Bool(v) => Value::BoolValue(*v),
        };
        v1::ConfigValue { value: Some(value) }
    }
}

impl From<v1::config_value::Value> for ConfigValue {
    fn from(value: v1::config_value::Value) -> Self {
        use v1::config_value::Value;

        match value {
            Value::StringValue(v) => ConfigValue::String(v),
            Value::IntValue(v) => ConfigValue::Int(v),
            Value::FloatValue(v) => ConfigValue::Float(v),
            Value::BoolValue(v) => ConfigValue::Bool(v),
        }
    }
}

/// Typed key-value configuration.
///
/// Each key holds exactly one value kind. Setting a key again with another kind
/// replaces it; reads must use the accessor of the stored kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    values: HashMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set(key, ConfigValue::String(value.into()))
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.set(key, ConfigValue::Int(value))
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.set(key, ConfigValue::Float(value))
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.set(key, ConfigValue::Bool(value))
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    fn mismatch(&self, key: &str, expected: ConfigKind) -> PluginError {
        match self.values.get(key) {
            Some(value) => PluginError::TypeMismatch {
                key: key.to_string(),
                expected: expected.as_str(),
                actual: value.kind().as_str(),
            },
            None => PluginError::KeyNotFound(key.to_string()),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.values.get(key) {
            Some(ConfigValue::String(v)) => Ok(v),
            _ => Err(self.mismatch(key, ConfigKind::String)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Int(v)) => Ok(*v),
            _ => Err(self.mismatch(key, ConfigKind::Int)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.values.get(key) {
            Some(ConfigValue::Float(v)) => Ok(*v),
            _ => Err(self.mismatch(key, ConfigKind::Float)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.values.get(key) {
            Some(ConfigValue::Bool(v)) => Ok(*v),
            _ => Err(self.mismatch(key, ConfigKind::Bool)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, ConfigValue> {
        self.values.iter()
    }

    /// Copies every entry of `other` into `self`, replacing existing keys.
    pub fn merge(&mut self, other: &Config) -> &mut Self {
        for (key, value) in other.iter() {
            self.values.insert(key.clone(), value.clone());
        }
        self
    }
}

impl<'a> IntoIterator for &'a Config {
    type Item = (&'a String, &'a ConfigValue);
    type IntoIter = hash_map::Iter<'a, String, ConfigValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for Config {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut config = Config::new();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}

impl From<&Config> for v1::ConfigMap {
    fn from(config: &Config) -> Self {
        let mut map = v1::ConfigMap::default();
        for (key, value) in config.iter() {
            match value {
                ConfigValue::String(v) => {
                    map.string_map.insert(key.clone(), v.clone());
                }
                ConfigValue::Int(v) => {
                    map.int_map.insert(key.clone(), *v);
                }
                ConfigValue::Float(v) => {
                    map.float_map.insert(key.clone(), *v);
                }
                ConfigValue::Bool(v) => {
                    map.bool_map.insert(key.clone(), *v);
                }
            }
        }
        map
    }
}

// Maps are applied in string, int, float, bool order; a key present in more
// than one map keeps the value of the last one.
impl From<v1::ConfigMap> for Config {
    fn from(map: v1::ConfigMap) -> Self {
        let mut config = Config::new();
        for (key, value) in map.string_map {
            config.set_string(key, value);
        }
        for (key, value) in map.int_map {
            config.set_int(key, value);
        }
        for (key, value) in map.float_map {
            config.set_float(key, value);
        }
        for (key, value) in map.bool_map {
            config.set_bool(key, value);
        }
        config
    }
}
