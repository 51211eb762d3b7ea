mod common;

use common::{TestCollector, connect, ns, test_policy};
use snap_plugin_runtime::error::Result;
use snap_plugin_runtime::proto::{
    self as v1, Empty, GetMetricTypesArg, KillArg, MetricsArg, collector_client::CollectorClient,
};
use snap_plugin_runtime::types::{Config, ConfigPolicy, Metric, Namespace};
use snap_plugin_runtime::{
    Collector, CollectorService, Heartbeat, LifecycleService, LifecycleState, Plugin, Shutdown,
    ShutdownReason, async_trait,
};
use std::sync::Arc;
use tonic::Code;
use tonic::transport::{Channel, Server};

async fn client(lifecycle: Arc<LifecycleService>) -> CollectorClient<Channel> {
    let service = CollectorService::new(lifecycle, Arc::new(TestCollector));
    let router = Server::builder().add_service(service.into_server());
    CollectorClient::new(connect(router).await)
}

fn lifecycle() -> Arc<LifecycleService> {
    let lifecycle = Arc::new(LifecycleService::new(Heartbeat::new(), Shutdown::new()));
    lifecycle.register_policy(test_policy());
    lifecycle
}

fn requested(path: &[&str], config: Option<Config>) -> v1::Metric {
    let mut metric = Metric::new(ns(path), "", "");
    if let Some(config) = config {
        metric.set_diagnostic_config(config);
    }
    metric.to_wire().unwrap()
}

#[tokio::test]
async fn test_ping_and_kill() {
    let lifecycle = lifecycle();
    let mut client = client(lifecycle.clone()).await;

    assert_eq!(lifecycle.state(), LifecycleState::Starting);
    client.ping(Empty {}).await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Alive);

    client
        .kill(KillArg {
            reason: "host is exiting".to_string(),
        })
        .await
        .unwrap();
    client
        .kill(KillArg {
            reason: "second kill".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        lifecycle.shutdown().reason(),
        Some(ShutdownReason::Killed {
            reason: "host is exiting".to_string()
        })
    );
}

#[tokio::test]
async fn test_get_config_policy() {
    let mut client = client(lifecycle()).await;

    let reply = client.get_config_policy(Empty {}).await.unwrap().into_inner();
    let rules: Vec<(&str, &str, bool)> = reply
        .rules
        .iter()
        .map(|r| (r.namespace_prefix.as_str(), r.key.as_str(), r.required))
        .collect();
    assert_eq!(
        rules,
        vec![("", "interval", false), ("/test/secure", "password", true)]
    );
    assert_eq!(reply.rules[0].kind(), v1::ConfigKind::Int);
    assert_eq!(reply.rules[0].minimum, Some(1.0));
}

#[tokio::test]
async fn test_get_config_policy_before_registration() {
    let lifecycle = Arc::new(LifecycleService::new(Heartbeat::new(), Shutdown::new()));
    let mut client = client(lifecycle).await;

    let status = client.get_config_policy(Empty {}).await.unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn test_get_metric_types() {
    let mut client = client(lifecycle()).await;

    let reply = client
        .get_metric_types(GetMetricTypesArg { config: None })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.metrics.len(), 2);

    let plain = Metric::try_from(reply.metrics[0].clone()).unwrap_err();
    assert!(plain.to_string().contains("no value"));

    let plain = Metric::from_wire_kind(reply.metrics[0].clone()).unwrap();
    assert_eq!(plain.namespace().to_string(), "/test/plain");
    assert_eq!(plain.unit(), "ms");
    // the default interval reached the collector
    assert_eq!(plain.version(), 10);
    assert!(plain.last_advertised_time().is_some());

    // an existing advertised time is kept
    let secure = Metric::from_wire_kind(reply.metrics[1].clone()).unwrap();
    assert_eq!(
        secure.last_advertised_time(),
        Some(std::time::SystemTime::UNIX_EPOCH)
    );
}

#[tokio::test]
async fn test_get_metric_types_rejects_invalid_config() {
    let mut client = client(lifecycle()).await;

    let mut config = Config::new();
    config.set_string("interval", "often");
    let status = client
        .get_metric_types(GetMetricTypesArg {
            config: Some((&config).into()),
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("interval"));
}

#[tokio::test]
async fn test_collect_metrics() {
    let mut client = client(lifecycle()).await;

    let mut fast = Config::new();
    fast.set_int("interval", 5);
    let mut secure = Config::new();
    secure.set_string("password", "hunter2");

    let reply = client
        .collect_metrics(MetricsArg {
            metrics: vec![
                requested(&["test", "plain"], None),
                requested(&["test", "plain"], Some(fast)),
                requested(&["test", "secure"], Some(secure)),
            ],
        })
        .await
        .unwrap()
        .into_inner();

    let values: Vec<i64> = reply
        .metrics
        .into_iter()
        .map(|m| Metric::try_from(m).unwrap().get_int64_data().unwrap())
        .collect();
    assert_eq!(values, vec![10, 5, 10]);
}

#[tokio::test]
async fn test_collect_metrics_reports_every_violation() {
    let mut client = client(lifecycle()).await;

    let mut zero = Config::new();
    zero.set_int("interval", 0);

    let status = client
        .collect_metrics(MetricsArg {
            metrics: vec![
                requested(&["test", "plain"], Some(zero)),
                requested(&["test", "secure"], None),
            ],
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("interval"));
    assert!(status.message().contains("password"));
}

#[tokio::test]
async fn test_collect_metrics_rejects_malformed_metric() {
    let mut client = client(lifecycle()).await;

    let status = client
        .collect_metrics(MetricsArg {
            metrics: vec![v1::Metric::default()],
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
}

/// Advertises and collects a metric without a namespace.
struct UnnamedCollector;

impl Plugin for UnnamedCollector {
    fn config_policy(&self) -> Result<ConfigPolicy> {
        Ok(ConfigPolicy::new())
    }
}

#[async_trait]
impl Collector for UnnamedCollector {
    async fn get_metric_types(&self, _config: Config) -> Result<Vec<Metric>> {
        Ok(vec![Metric::new(Namespace::new(), "", "")])
    }

    async fn collect_metrics(&self, _metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        let mut metric = Metric::new(Namespace::new(), "", "");
        metric.set_data(1i64);
        Ok(vec![metric])
    }
}

#[tokio::test]
async fn test_unencodable_plugin_output_is_internal() {
    let lifecycle = Arc::new(LifecycleService::new(Heartbeat::new(), Shutdown::new()));
    lifecycle.register_policy(ConfigPolicy::new());
    let service = CollectorService::new(lifecycle, Arc::new(UnnamedCollector));
    let mut client =
        CollectorClient::new(connect(Server::builder().add_service(service.into_server())).await);

    let status = client
        .get_metric_types(GetMetricTypesArg { config: None })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);

    let status = client
        .collect_metrics(MetricsArg {
            metrics: vec![requested(&["test", "plain"], None)],
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}
