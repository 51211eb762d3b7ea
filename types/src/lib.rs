//! Data model shared by snap plugins and their host: namespaces, metrics,
//! typed configuration and the config policy a plugin declares.

mod config;
mod metric;
mod namespace;
mod policy;
mod time;

pub use config::{Config, ConfigKind, ConfigValue};
pub use metric::{Metric, MetricValue};
pub use namespace::{DYNAMIC_WILDCARD, Namespace, NamespaceElement};
pub use policy::{ConfigPolicy, ConfigRule};
pub use time::{from_wire_time, to_wire_time};
