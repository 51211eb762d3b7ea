use crate::heartbeat::Heartbeat;
use crate::lifecycle::LifecycleService;
use crate::options::{PluginOptions, TlsOptions, plugin_command};
use crate::plugin::{Capability, Collector, Plugin, PluginMeta, PluginType, Processor, Publisher};
use crate::service::{CollectorService, ProcessorService, PublisherService};
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::tracing_config::{TracingConfig, initialize_tracing};
use serde::Serialize;
use snap_plugin_error::{PluginError, Result};
use snap_plugin_types::{Config, Metric, Namespace};
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::{error, info, warn};

/// First line a plugin writes to stdout, telling the host where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preamble {
    pub meta: PluginMeta,
    pub listen_address: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub state: u8,
    pub error_message: String,
    pub ping_timeout_duration_ms: u64,
    pub tls: bool,
}

/// Serves one plugin capability until the host kills it or stops pinging.
pub struct PluginRuntime {
    meta: PluginMeta,
    capability: Capability,
    options: PluginOptions,
}

impl PluginRuntime {
    pub fn new(mut meta: PluginMeta, capability: Capability, options: PluginOptions) -> Self {
        meta.plugin_type = capability.plugin_type();

        Self {
            meta,
            capability,
            options,
        }
    }

    pub fn preamble(&self, listen_address: SocketAddr) -> Preamble {
        Preamble {
            meta: self.meta.clone(),
            listen_address: listen_address.to_string(),
            plugin_type: self.meta.plugin_type,
            state: 0,
            error_message: String::new(),
            ping_timeout_duration_ms: self.options.ping_timeout.as_millis() as u64,
            tls: self.options.tls.is_some(),
        }
    }

    /// Binds the configured address, announces it on stdout and serves.
    pub async fn run(self) -> Result<ShutdownReason> {
        let listener = TcpListener::bind(self.options.listen_addr()).await?;
        self.run_with_listener(listener, io::stdout()).await
    }

    /// Serves on an already bound listener, writing the preamble to `out`.
    pub async fn run_with_listener<W: Write>(
        self,
        listener: TcpListener,
        out: W,
    ) -> Result<ShutdownReason> {
        self.serve_until_shutdown(listener, out, true).await
    }

    /// Serves on the stand-alone port with no host attached: no preamble is
    /// written and missed pings are ignored. Stops on Kill or Ctrl-C.
    pub async fn serve_stand_alone(self) -> Result<ShutdownReason> {
        let listener = TcpListener::bind(self.options.stand_alone_addr()).await?;
        self.serve_stand_alone_with_listener(listener).await
    }

    pub async fn serve_stand_alone_with_listener(
        self,
        listener: TcpListener,
    ) -> Result<ShutdownReason> {
        self.serve_until_shutdown(listener, io::sink(), false).await
    }

    async fn serve_until_shutdown<W: Write>(
        self,
        listener: TcpListener,
        mut out: W,
        supervised: bool,
    ) -> Result<ShutdownReason> {
        let lifecycle = Arc::new(LifecycleService::new(Heartbeat::new(), Shutdown::new()));
        lifecycle.register_policy(self.capability.config_policy()?);

        let local_addr = listener.local_addr()?;
        let preamble = serde_json::to_string(&self.preamble(local_addr)).map_err(io::Error::from)?;
        writeln!(out, "{preamble}")?;
        out.flush()?;
        drop(out);

        info!(
            plugin = %self.meta.name,
            version = self.meta.version,
            plugin_type = %self.meta.plugin_type,
            address = %local_addr,
            tls = self.options.tls.is_some(),
            supervised,
            "plugin listening"
        );

        let interrupt = lifecycle.shutdown().clone();
        let signals = tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.triggered() => {}
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        info!("received Ctrl-C, shutting down");
                        interrupt.trigger(ShutdownReason::Killed {
                            reason: "interrupted".to_string(),
                        });
                    }
                    Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
                },
            }
        });

        let watchdog = supervised.then(|| {
            tokio::spawn(
                lifecycle
                    .watchdog(self.options.ping_timeout, self.options.ping_miss_limit)
                    .run(),
            )
        });

        let served = self.serve(listener, lifecycle.clone()).await;

        // A failed server never triggers the shutdown on its own.
        lifecycle.shutdown().trigger(ShutdownReason::Killed {
            reason: "server stopped".to_string(),
        });
        if let Some(watchdog) = watchdog {
            if let Err(e) = watchdog.await {
                error!("watchdog task failed: {e}");
            }
        }
        signals.abort();

        served?;
        let reason = lifecycle
            .shutdown()
            .reason()
            .ok_or(PluginError::NotInitialized("shutdown reason"))?;
        info!(%reason, "plugin stopped");
        Ok(reason)
    }

    async fn serve(&self, listener: TcpListener, lifecycle: Arc<LifecycleService>) -> Result<()> {
        let mut builder = Server::builder();
        if let Some(tls) = &self.options.tls {
            builder = builder.tls_config(tls_config(tls)?)?;
        }

        let incoming = TcpListenerStream::new(listener);
        let token = lifecycle.shutdown().token();
        let signal = async move { token.cancelled().await };

        match &self.capability {
            Capability::Collector(collector) => {
                let service = CollectorService::new(lifecycle.clone(), collector.clone());
                builder
                    .add_service(service.into_server())
                    .serve_with_incoming_shutdown(incoming, signal)
                    .await?
            }
            Capability::Processor(processor) => {
                let service = ProcessorService::new(lifecycle.clone(), processor.clone());
                builder
                    .add_service(service.into_server())
                    .serve_with_incoming_shutdown(incoming, signal)
                    .await?
            }
            Capability::Publisher(publisher) => {
                let service = PublisherService::new(lifecycle.clone(), publisher.clone());
                builder
                    .add_service(service.into_server())
                    .serve_with_incoming_shutdown(incoming, signal)
                    .await?
            }
        }

        Ok(())
    }
}

/// Builds the server TLS config; root certificates, if any, are concatenated
/// and used to authenticate clients.
fn tls_config(tls: &TlsOptions) -> Result<ServerTlsConfig> {
    let cert = fs::read(&tls.cert_path)?;
    let key = fs::read(&tls.key_path)?;
    let mut config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

    if !tls.root_cert_paths.is_empty() {
        let mut roots = Vec::new();
        for path in &tls.root_cert_paths {
            roots.extend(fs::read(path)?);
            roots.push(b'\n');
        }
        config = config.client_ca_root(Certificate::from_pem(roots));
    }

    Ok(config)
}

/// Collects every advertised metric once and prints the result as JSON.
pub async fn run_stand_alone<W: Write>(
    collector: &dyn Collector,
    config: &Config,
    mut out: W,
) -> Result<()> {
    let policy = collector.config_policy()?;
    let config = policy.resolve(&Namespace::new(), config)?;

    let mut requested = Vec::new();
    for mut metric in collector.get_metric_types(config.clone()).await? {
        let resolved = policy.resolve(metric.namespace(), &config)?;
        metric.set_diagnostic_config(resolved);
        requested.push(metric);
    }

    let collected = collector.collect_metrics(requested).await?;
    let metrics = collected
        .iter()
        .map(Metric::to_wire)
        .collect::<Result<Vec<_>>>()?;

    serde_json::to_writer_pretty(&mut out, &metrics).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

pub fn start_collector(meta: PluginMeta, collector: impl Collector) -> i32 {
    start(meta, collector, |plugin| Capability::Collector(plugin))
}

pub fn start_processor(meta: PluginMeta, processor: impl Processor) -> i32 {
    start(meta, processor, |plugin| Capability::Processor(plugin))
}

pub fn start_publisher(meta: PluginMeta, publisher: impl Publisher) -> i32 {
    start(meta, publisher, |plugin| Capability::Publisher(plugin))
}

/// Parses options, sets up tracing and runs the plugin to completion.
///
/// Returns the process exit code.
fn start<P: Plugin>(
    meta: PluginMeta,
    mut plugin: P,
    capability: impl FnOnce(Arc<P>) -> Capability,
) -> i32 {
    let flags = plugin.custom_flags();
    let command = match plugin_command(&meta, &flags) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    // --help and --version end here too, with exit code 0
    let matches = match command.try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return e.exit_code();
        }
    };

    let options = match PluginOptions::from_matches(&matches, &flags) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    initialize_tracing(TracingConfig::new(options.log_level));

    if let Err(e) = plugin.apply_flags(&options.flags) {
        error!("invalid plugin flags: {e}");
        return 1;
    }
    let capability = capability(Arc::new(plugin));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start tokio runtime: {e}");
            return 1;
        }
    };

    runtime.block_on(async move {
        if !options.stand_alone {
            return exit_code(PluginRuntime::new(meta, capability, options).run().await);
        }

        if let Capability::Collector(collector) = &capability {
            if let Err(e) = run_stand_alone(collector.as_ref(), &options.config, io::stdout()).await
            {
                error!("stand-alone collection failed: {e}");
                return 1;
            }
        }
        exit_code(
            PluginRuntime::new(meta, capability, options)
                .serve_stand_alone()
                .await,
        )
    })
}

fn exit_code(result: Result<ShutdownReason>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            error!("plugin failed: {e}");
            1
        }
    }
}
