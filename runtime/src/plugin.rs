use crate::options::CustomFlag;
use async_trait::async_trait;
use serde::Serialize;
use snap_plugin_error::Result;
use snap_plugin_types::{Config, ConfigPolicy, Metric};
use std::fmt;
use std::sync::Arc;

/// Kind of plugin announced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum PluginType {
    Collector = 0,
    Processor = 1,
    Publisher = 2,
}

impl From<PluginType> for u8 {
    fn from(plugin_type: PluginType) -> Self {
        plugin_type as u8
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginType::Collector => f.write_str("collector"),
            PluginType::Processor => f.write_str("processor"),
            PluginType::Publisher => f.write_str("publisher"),
        }
    }
}

/// Identity of a plugin, written into the handshake preamble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginMeta {
    pub name: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
}

impl PluginMeta {
    pub fn new(name: impl Into<String>, version: u32, plugin_type: PluginType) -> Self {
        Self {
            name: name.into(),
            version,
            plugin_type,
        }
    }
}

/// Operations every plugin answers, whatever its capability.
pub trait Plugin: Send + Sync + 'static {
    /// The config rules this plugin accepts. Called once at startup.
    fn config_policy(&self) -> Result<ConfigPolicy>;

    /// Extra options accepted on the command line and in the options file.
    fn custom_flags(&self) -> Vec<CustomFlag> {
        Vec::new()
    }

    /// Receives the values given for [`Plugin::custom_flags`] before serving starts.
    /// Flags that were not given are absent from `flags`.
    fn apply_flags(&mut self, _flags: &Config) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Collector: Plugin {
    /// Metric kinds this collector can produce under `config`.
    async fn get_metric_types(&self, config: Config) -> Result<Vec<Metric>>;

    /// Collects values for the requested metric kinds.
    ///
    /// Each requested metric carries its resolved config.
    async fn collect_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>>;
}

#[async_trait]
pub trait Processor: Plugin {
    async fn process(&self, metrics: Vec<Metric>, config: Config) -> Result<Vec<Metric>>;
}

#[async_trait]
pub trait Publisher: Plugin {
    async fn publish(&self, metrics: Vec<Metric>, config: Config) -> Result<()>;
}

/// The capability a plugin is started with; it selects the gRPC service to serve.
#[derive(Clone)]
pub enum Capability {
    Collector(Arc<dyn Collector>),
    Processor(Arc<dyn Processor>),
    Publisher(Arc<dyn Publisher>),
}

impl Capability {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Capability::Collector(_) => PluginType::Collector,
            Capability::Processor(_) => PluginType::Processor,
            Capability::Publisher(_) => PluginType::Publisher,
        }
    }

    pub fn config_policy(&self) -> Result<ConfigPolicy> {
        match self {
            Capability::Collector(plugin) => plugin.config_policy(),
            Capability::Processor(plugin) => plugin.config_policy(),
            Capability::Publisher(plugin) => plugin.config_policy(),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Capability")
            .field(&self.plugin_type())
            .finish()
    }
}
