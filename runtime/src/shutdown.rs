use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why the plugin stopped serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The host asked the plugin to stop.
    Killed { reason: String },
    /// The host stopped pinging for `misses` consecutive watchdog ticks.
    HeartbeatExpired { misses: u32 },
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Killed { reason } => write!(f, "killed by host: {reason}"),
            ShutdownReason::HeartbeatExpired { misses } => {
                write!(f, "heartbeat expired after {misses} missed pings")
            }
        }
    }
}

/// One-shot shutdown signal shared by the RPC handlers, the watchdog and the server.
///
/// Only the first trigger records its reason and cancels the token.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call initiated the shutdown.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        match self.reason.set(reason) {
            Ok(()) => {
                if let Some(reason) = self.reason.get() {
                    info!(%reason, "shutting down");
                }
                self.token.cancel();
                true
            }
            Err(ignored) => {
                debug!(reason = %ignored, "shutdown already in progress");
                false
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Completes once the shutdown has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert_eq!(shutdown.reason(), None);

        assert!(shutdown.trigger(ShutdownReason::Killed {
            reason: "host exiting".to_string()
        }));
        assert!(!shutdown.trigger(ShutdownReason::HeartbeatExpired { misses: 3 }));
        assert!(!shutdown.trigger(ShutdownReason::Killed {
            reason: "again".to_string()
        }));

        assert!(shutdown.is_triggered());
        assert_eq!(
            shutdown.reason(),
            Some(ShutdownReason::Killed {
                reason: "host exiting".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_racing_triggers() {
        let shutdown = Shutdown::new();

        let mut tasks = tokio::task::JoinSet::new();
        for misses in 0..16 {
            let shutdown = shutdown.clone();
            tasks.spawn(async move { shutdown.trigger(ShutdownReason::HeartbeatExpired { misses }) });
        }

        let mut winners = 0;
        while let Some(won) = tasks.join_next().await {
            if won.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        shutdown.triggered().await;
    }
}
