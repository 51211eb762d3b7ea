//! Snap Plugin Runtime
//!
//! This crate serves a snap plugin to its host over gRPC. A plugin implements
//! one capability trait ([`Collector`], [`Processor`] or [`Publisher`]); the
//! runtime takes care of option parsing, the handshake preamble, the
//! lifecycle RPCs (`Ping`, `Kill`, `GetConfigPolicy`), config validation and
//! the heartbeat watchdog that stops the plugin once the host goes away.
//!
//! # Example
//!
//! ```no_run
//! use snap_plugin_runtime::{async_trait, Collector, Plugin, PluginMeta, PluginType, start_collector};
//! use snap_plugin_runtime::types::{Config, ConfigPolicy, Metric, Namespace};
//! use snap_plugin_runtime::error::Result;
//!
//! struct Uptime;
//!
//! impl Plugin for Uptime {
//!     fn config_policy(&self) -> Result<ConfigPolicy> {
//!         Ok(ConfigPolicy::new())
//!     }
//! }
//!
//! #[async_trait]
//! impl Collector for Uptime {
//!     async fn get_metric_types(&self, _config: Config) -> Result<Vec<Metric>> {
//!         let ns = Namespace::from_static(["host", "uptime"])?;
//!         Ok(vec![Metric::new(ns, "s", "seconds since boot")])
//!     }
//!
//!     async fn collect_metrics(&self, mut metrics: Vec<Metric>) -> Result<Vec<Metric>> {
//!         for metric in &mut metrics {
//!             metric.set_data(42u64).set_timestamp(std::time::SystemTime::now());
//!         }
//!         Ok(metrics)
//!     }
//! }
//!
//! fn main() {
//!     let meta = PluginMeta::new("uptime", 1, PluginType::Collector);
//!     std::process::exit(start_collector(meta, Uptime));
//! }
//! ```

mod heartbeat;
mod lifecycle;
mod options;
mod plugin;
mod runtime;
mod service;
mod shutdown;
pub mod tracing_config;

pub use heartbeat::{Heartbeat, LifecycleState, Watchdog};
pub use lifecycle::LifecycleService;
pub use options::{
    CustomFlag, DEFAULT_LOG_LEVEL, DEFAULT_OPTIONS_FILE, DEFAULT_PING_MISS_LIMIT,
    DEFAULT_PING_TIMEOUT, DEFAULT_STAND_ALONE_PORT, FlagKind, OptionsFile, PluginArgs,
    PluginOptions, TlsOptions, plugin_command,
};
pub use plugin::{Capability, Collector, Plugin, PluginMeta, PluginType, Processor, Publisher};
pub use runtime::{
    PluginRuntime, Preamble, run_stand_alone, start_collector, start_processor, start_publisher,
};
pub use service::{CollectorService, ProcessorService, PublisherService};
pub use shutdown::{Shutdown, ShutdownReason};

pub use async_trait::async_trait;

// Re-export the crates plugin authors need alongside the runtime
pub use snap_plugin_error as error;
pub use snap_plugin_proto::v1 as proto;
pub use snap_plugin_types as types;
