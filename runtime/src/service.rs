use crate::lifecycle::LifecycleService;
use crate::plugin;
use snap_plugin_error::PluginError;
use snap_plugin_proto::v1::{
    self, Ack, Empty, GetConfigPolicyReply, GetMetricTypesArg, KillArg, MetricsArg, MetricsReply,
    PubProcArg,
    collector_server::{Collector, CollectorServer},
    processor_server::{Processor, ProcessorServer},
    publisher_server::{Publisher, PublisherServer},
};
use snap_plugin_types::{Config, Metric, Namespace};
use std::sync::Arc;
use std::time::SystemTime;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

type RpcResult<T> = std::result::Result<Response<T>, Status>;

impl LifecycleService {
    fn ping_rpc(&self) -> RpcResult<Ack> {
        self.ping();
        Ok(Response::new(Ack {}))
    }

    fn kill_rpc(&self, request: Request<KillArg>) -> RpcResult<Ack> {
        self.kill(request.into_inner().reason);
        Ok(Response::new(Ack {}))
    }

    fn get_config_policy_rpc(&self) -> RpcResult<GetConfigPolicyReply> {
        Ok(Response::new(self.get_config_policy()?))
    }

    /// Validates a config shared by a whole request against the global rules.
    fn resolve_request_config(&self, config: Option<v1::ConfigMap>) -> Result<Config, Status> {
        let config = config.map(Config::from).unwrap_or_default();
        let resolved = self.policy()?.resolve(&Namespace::new(), &config)?;
        Ok(resolved)
    }
}

fn plugin_failure(operation: &'static str, err: PluginError) -> Status {
    error!(operation, error = %err, "plugin call failed");
    err.into()
}

/// Encodes plugin output. A metric the plugin built wrong is reported as INTERNAL.
fn encode_metrics(operation: &'static str, metrics: &[Metric]) -> Result<Vec<v1::Metric>, Status> {
    metrics
        .iter()
        .map(Metric::to_wire)
        .collect::<snap_plugin_error::Result<Vec<_>>>()
        .map_err(|e| {
            error!(operation, error = %e, "plugin returned a metric that cannot be encoded");
            Status::internal(e.to_string())
        })
}

fn decode_metrics(metrics: Vec<v1::Metric>) -> Result<Vec<Metric>, Status> {
    let metrics = metrics
        .into_iter()
        .map(Metric::try_from)
        .collect::<snap_plugin_error::Result<Vec<_>>>()?;
    Ok(metrics)
}

/// gRPC surface of a collector plugin.
pub struct CollectorService {
    lifecycle: Arc<LifecycleService>,
    collector: Arc<dyn plugin::Collector>,
}

impl CollectorService {
    pub fn new(lifecycle: Arc<LifecycleService>, collector: Arc<dyn plugin::Collector>) -> Self {
        Self {
            lifecycle,
            collector,
        }
    }

    pub fn into_server(self) -> CollectorServer<Self> {
        CollectorServer::new(self)
    }
}

#[tonic::async_trait]
impl Collector for CollectorService {
    async fn collect_metrics(&self, request: Request<MetricsArg>) -> RpcResult<MetricsReply> {
        let requested = request.into_inner().metrics;
        debug!(count = requested.len(), "collect metrics");

        let policy = self.lifecycle.policy()?;

        // Every metric is checked so that the host sees all violations at once.
        let mut metrics = Vec::with_capacity(requested.len());
        let mut violations = Vec::new();
        for wire in requested {
            let mut metric = match Metric::from_wire_kind(wire) {
                Ok(metric) => metric,
                Err(e) => {
                    violations.push(e);
                    continue;
                }
            };

            let config = metric.take_config().unwrap_or_default();
            match policy.resolve(metric.namespace(), &config) {
                Ok(resolved) => {
                    metric.set_diagnostic_config(resolved);
                    metrics.push(metric);
                }
                Err(e) => violations.push(e),
            }
        }

        if !violations.is_empty() {
            return Err(PluginError::Validation(violations).into());
        }

        let collected = self
            .collector
            .collect_metrics(metrics)
            .await
            .map_err(|e| plugin_failure("collect_metrics", e))?;

        Ok(Response::new(MetricsReply {
            metrics: encode_metrics("collect_metrics", &collected)?,
        }))
    }

    async fn get_metric_types(&self, request: Request<GetMetricTypesArg>) -> RpcResult<MetricsReply> {
        let config = self
            .lifecycle
            .resolve_request_config(request.into_inner().config)?;

        let mut metrics = self
            .collector
            .get_metric_types(config)
            .await
            .map_err(|e| plugin_failure("get_metric_types", e))?;
        debug!(count = metrics.len(), "advertising metric types");

        let now = SystemTime::now();
        for metric in &mut metrics {
            if metric.last_advertised_time().is_none() {
                metric.set_last_advertised_time(now);
            }
        }

        Ok(Response::new(MetricsReply {
            metrics: encode_metrics("get_metric_types", &metrics)?,
        }))
    }

    async fn ping(&self, _request: Request<Empty>) -> RpcResult<Ack> {
        self.lifecycle.ping_rpc()
    }

    async fn kill(&self, request: Request<KillArg>) -> RpcResult<Ack> {
        self.lifecycle.kill_rpc(request)
    }

    async fn get_config_policy(&self, _request: Request<Empty>) -> RpcResult<GetConfigPolicyReply> {
        self.lifecycle.get_config_policy_rpc()
    }
}

/// gRPC surface of a processor plugin.
pub struct ProcessorService {
    lifecycle: Arc<LifecycleService>,
    processor: Arc<dyn plugin::Processor>,
}

impl ProcessorService {
    pub fn new(lifecycle: Arc<LifecycleService>, processor: Arc<dyn plugin::Processor>) -> Self {
        Self {
            lifecycle,
            processor,
        }
    }

    pub fn into_server(self) -> ProcessorServer<Self> {
        ProcessorServer::new(self)
    }
}

#[tonic::async_trait]
impl Processor for ProcessorService {
    async fn process(&self, request: Request<PubProcArg>) -> RpcResult<MetricsReply> {
        let PubProcArg { metrics, config } = request.into_inner();
        let config = self.lifecycle.resolve_request_config(config)?;
        let metrics = decode_metrics(metrics)?;
        debug!(count = metrics.len(), "process metrics");

        let processed = self
            .processor
            .process(metrics, config)
            .await
            .map_err(|e| plugin_failure("process", e))?;

        Ok(Response::new(MetricsReply {
            metrics: encode_metrics("process", &processed)?,
        }))
    }

    async fn ping(&self, _request: Request<Empty>) -> RpcResult<Ack> {
        self.lifecycle.ping_rpc()
    }

    async fn kill(&self, request: Request<KillArg>) -> RpcResult<Ack> {
        self.lifecycle.kill_rpc(request)
    }

    async fn get_config_policy(&self, _request: Request<Empty>) -> RpcResult<GetConfigPolicyReply> {
        self.lifecycle.get_config_policy_rpc()
    }
}

/// gRPC surface of a publisher plugin.
pub struct PublisherService {
    lifecycle: Arc<LifecycleService>,
    publisher: Arc<dyn plugin::Publisher>,
}

impl PublisherService {
    pub fn new(lifecycle: Arc<LifecycleService>, publisher: Arc<dyn plugin::Publisher>) -> Self {
        Self {
            lifecycle,
            publisher,
        }
    }

    pub fn into_server(self) -> PublisherServer<Self> {
        PublisherServer::new(self)
    }
}

#[tonic::async_trait]
impl Publisher for PublisherService {
    async fn publish(&self, request: Request<PubProcArg>) -> RpcResult<Ack> {
        let PubProcArg { metrics, config } = request.into_inner();
        let config = self.lifecycle.resolve_request_config(config)?;
        let metrics = decode_metrics(metrics)?;
        debug!(count = metrics.len(), "publish metrics");

        self.publisher
            .publish(metrics, config)
            .await
            .map_err(|e| plugin_failure("publish", e))?;

        Ok(Response::new(Ack {}))
    }

    async fn ping(&self, _request: Request<Empty>) -> RpcResult<Ack> {
        self.lifecycle.ping_rpc()
    }

    async fn kill(&self, request: Request<KillArg>) -> RpcResult<Ack> {
        self.lifecycle.kill_rpc(request)
    }

    async fn get_config_policy(&self, _request: Request<Empty>) -> RpcResult<GetConfigPolicyReply> {
        self.lifecycle.get_config_policy_rpc()
    }
}
