//! Tracing setup for plugin processes.
//!
//! Logs always go to stderr: stdout carries the handshake preamble read by the
//! host. `RUST_LOG` overrides the level derived from `--log-level`.

use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Host log level, 0:Panic 1:Fatal 2:Error 3:Warn 4:Info 5:Debug
    pub log_level: u8,

    /// Emit ANSI colours
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: crate::options::DEFAULT_LOG_LEVEL,
            ansi: false,
        }
    }
}

impl TracingConfig {
    pub fn new(log_level: u8) -> Self {
        Self {
            log_level,
            ..Default::default()
        }
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Maps a host log level to a tracing filter directive.
pub fn level_directive(log_level: u8) -> &'static str {
    match log_level {
        0..=2 => "error",
        3 => "warn",
        4 => "info",
        5 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. Does nothing if one is already installed.
pub fn initialize_tracing(config: TracingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(config.log_level)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(config.ansi);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            log_level = config.log_level,
            "tracing initialized, adjust with RUST_LOG"
        );
    }
}
