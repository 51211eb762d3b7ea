#![allow(dead_code)]

use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use snap_plugin_runtime::error::Result;
use snap_plugin_runtime::types::{
    Config, ConfigKind, ConfigPolicy, ConfigRule, Metric, MetricValue, Namespace,
};
use snap_plugin_runtime::{Collector, Plugin, Processor, Publisher, async_trait};
use std::sync::Arc;
use std::time::SystemTime;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Serves `router` over an in-memory pipe and returns a channel connected to it.
pub async fn connect(router: Router) -> Channel {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        router
            .serve_with_incoming(tokio_stream::once(Ok::<_, std::io::Error>(server_io)))
            .await
            .unwrap();
    });

    let mut client_io = Some(client_io);
    Endpoint::try_from("http://dummy")
        .unwrap()
        .connect_with_connector(service_fn(move |_: Uri| {
            let client = client_io.take();
            async move {
                client
                    .map(TokioIo::new)
                    .ok_or_else(|| std::io::Error::other("client already taken"))
            }
        }))
        .await
        .unwrap()
}

pub fn ns(values: &[&str]) -> Namespace {
    Namespace::from_static(values.iter().copied()).unwrap()
}

/// Accepts an `interval` everywhere and requires a `password` under /test/secure.
pub fn test_policy() -> ConfigPolicy {
    let mut policy = ConfigPolicy::new();
    policy
        .add_rule(
            &Namespace::new(),
            ConfigRule::new("interval", ConfigKind::Int)
                .with_default(10i64)
                .with_minimum(1.0),
        )
        .unwrap()
        .add_rule(
            &ns(&["test", "secure"]),
            ConfigRule::new("password", ConfigKind::String).required(true),
        )
        .unwrap();
    policy
}

/// Reports the resolved `interval` as the value of every metric.
#[derive(Debug, Default)]
pub struct TestCollector;

impl Plugin for TestCollector {
    fn config_policy(&self) -> Result<ConfigPolicy> {
        Ok(test_policy())
    }
}

#[async_trait]
impl Collector for TestCollector {
    async fn get_metric_types(&self, config: Config) -> Result<Vec<Metric>> {
        let mut plain = Metric::new(ns(&["test", "plain"]), "ms", "plain metric");
        plain.set_version(config.get_int("interval")?);

        let mut advertised = Metric::new(ns(&["test", "secure"]), "", "secure metric");
        advertised.set_last_advertised_time(SystemTime::UNIX_EPOCH);

        Ok(vec![plain, advertised])
    }

    async fn collect_metrics(&self, mut metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        for metric in &mut metrics {
            let interval = match metric.config() {
                Some(config) => config.get_int("interval")?,
                None => 0,
            };
            metric.set_data(interval).set_timestamp(SystemTime::now());
        }
        Ok(metrics)
    }
}

/// Multiplies integer values by the `factor` config key.
#[derive(Debug, Default)]
pub struct TestProcessor;

impl Plugin for TestProcessor {
    fn config_policy(&self) -> Result<ConfigPolicy> {
        let mut policy = ConfigPolicy::new();
        policy.add_rule(
            &Namespace::new(),
            ConfigRule::new("factor", ConfigKind::Int).with_default(2i64),
        )?;
        Ok(policy)
    }
}

#[async_trait]
impl Processor for TestProcessor {
    async fn process(&self, mut metrics: Vec<Metric>, config: Config) -> Result<Vec<Metric>> {
        let factor = config.get_int("factor")?;
        for metric in &mut metrics {
            if let Some(MetricValue::Int64(v)) = metric.data().cloned() {
                metric.set_data(v * factor);
            }
        }
        Ok(metrics)
    }
}

/// Keeps every published metric.
#[derive(Debug, Default, Clone)]
pub struct TestPublisher {
    pub published: Arc<Mutex<Vec<(Metric, Config)>>>,
}

impl Plugin for TestPublisher {
    fn config_policy(&self) -> Result<ConfigPolicy> {
        let mut policy = ConfigPolicy::new();
        policy.add_rule(
            &Namespace::new(),
            ConfigRule::new("file", ConfigKind::String).required(true),
        )?;
        Ok(policy)
    }
}

#[async_trait]
impl Publisher for TestPublisher {
    async fn publish(&self, metrics: Vec<Metric>, config: Config) -> Result<()> {
        let mut published = self.published.lock();
        for metric in metrics {
            published.push((metric, config.clone()));
        }
        Ok(())
    }
}
