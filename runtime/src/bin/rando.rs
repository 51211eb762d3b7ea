//! Demo collector producing random values.

use rand::Rng;
use snap_plugin_runtime::error::{PluginError, Result};
use snap_plugin_runtime::types::{
    Config, ConfigKind, ConfigPolicy, ConfigRule, Metric, Namespace,
};
use snap_plugin_runtime::{
    Collector, CustomFlag, Plugin, PluginMeta, PluginType, async_trait, start_collector,
};
use std::time::SystemTime;
use tracing::debug;

const VENDOR: &str = "random";

#[derive(Debug, Default)]
struct Rando {
    hostname: Option<String>,
}

impl Rando {
    fn hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| String::from("localhost"))
    }
}

impl Plugin for Rando {
    fn config_policy(&self) -> Result<ConfigPolicy> {
        let mut policy = ConfigPolicy::new();
        let prefix = Namespace::from_static([VENDOR])?;

        policy
            .add_rule(
                &prefix,
                ConfigRule::new("min", ConfigKind::Int).with_default(0i64),
            )?
            .add_rule(
                &prefix,
                ConfigRule::new("max", ConfigKind::Int)
                    .with_default(100i64)
                    .with_maximum(1_000_000.0),
            )?
            .add_rule(
                &prefix,
                ConfigRule::new("scale", ConfigKind::Float)
                    .with_default(1.0)
                    .with_minimum(0.0),
            )?;

        Ok(policy)
    }

    fn custom_flags(&self) -> Vec<CustomFlag> {
        vec![CustomFlag::string(
            "hostname",
            "Host reported by the load metric (defaults to $HOSTNAME)",
        )]
    }

    fn apply_flags(&mut self, flags: &Config) -> Result<()> {
        if flags.contains_key("hostname") {
            self.hostname = Some(flags.get_string("hostname")?.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for Rando {
    async fn get_metric_types(&self, _config: Config) -> Result<Vec<Metric>> {
        let integer = Namespace::from_static([VENDOR, "integer"])?;
        let float = Namespace::from_static([VENDOR, "float"])?;
        let mut load = Namespace::from_static([VENDOR])?;
        load.append_dynamic_with_description("hostname", "name of the host")?
            .append_static("load")?;

        Ok(vec![
            Metric::new(integer, "", "random integer"),
            Metric::new(float, "", "random float"),
            Metric::new(load, "%", "random load per host"),
        ])
    }

    async fn collect_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        let mut rng = rand::rng();
        let now = SystemTime::now();
        let mut collected = Vec::with_capacity(metrics.len());

        for mut metric in metrics {
            let config = metric.config().cloned().unwrap_or_default();
            let min = config.get_int("min").unwrap_or(0);
            let max = config.get_int("max").unwrap_or(100);
            let scale = config.get_float("scale").unwrap_or(1.0);
            if min >= max {
                return Err(PluginError::OutOfRange {
                    key: "min".to_string(),
                    value: min as f64,
                    minimum: None,
                    maximum: Some(max as f64),
                });
            }

            let path: Vec<&str> = metric
                .namespace()
                .elements()
                .iter()
                .map(|e| e.value())
                .collect();

            match path.as_slice() {
                [VENDOR, "integer"] => {
                    metric.set_data(rng.random_range(min..max));
                }
                [VENDOR, "float"] => {
                    metric.set_data(rng.random_range(min as f64..max as f64) * scale);
                }
                [VENDOR, _, "load"] => {
                    let mut ns = metric.namespace().clone();
                    ns.set_dynamic_value(1, self.hostname())?;
                    metric
                        .set_namespace(ns)
                        .set_data(rng.random_range(0.0..100.0f64));
                }
                _ => {
                    debug!(namespace = %metric.namespace(), "unknown metric requested");
                    continue;
                }
            }

            metric.take_config();
            metric.set_timestamp(now);
            collected.push(metric);
        }

        Ok(collected)
    }
}

fn main() {
    let meta = PluginMeta::new("rando", 1, PluginType::Collector);
    std::process::exit(start_collector(meta, Rando::default()));
}
