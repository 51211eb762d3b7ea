use crate::heartbeat::{Heartbeat, LifecycleState, Watchdog};
use crate::shutdown::{Shutdown, ShutdownReason};
use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use snap_plugin_types::ConfigPolicy;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Liveness, termination and policy queries shared by every capability service.
#[derive(Debug)]
pub struct LifecycleService {
    heartbeat: Heartbeat,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: Shutdown,
    policy: OnceLock<ConfigPolicy>,
}

impl LifecycleService {
    pub fn new(heartbeat: Heartbeat, shutdown: Shutdown) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);

        Self {
            heartbeat,
            state: Arc::new(state),
            shutdown,
            policy: OnceLock::new(),
        }
    }

    /// Registers the policy answered by `GetConfigPolicy`. Only the first
    /// registration is kept.
    pub fn register_policy(&self, policy: ConfigPolicy) -> bool {
        let registered = self.policy.set(policy).is_ok();
        if !registered {
            warn!("config policy already registered, ignoring");
        }
        registered
    }

    pub fn policy(&self) -> Result<&ConfigPolicy> {
        self.policy
            .get()
            .ok_or(PluginError::NotInitialized("config policy"))
    }

    /// Records a ping from the host.
    pub fn ping(&self) {
        self.heartbeat.beat();

        let first = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Starting {
                *state = LifecycleState::Alive;
                true
            } else {
                false
            }
        });

        if first {
            info!("first ping received, plugin is alive");
        } else {
            debug!("heartbeat");
        }
    }

    /// Requests an orderly shutdown; returns `false` if one is already underway.
    pub fn kill(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        info!(%reason, "kill requested");
        self.shutdown.trigger(ShutdownReason::Killed { reason })
    }

    pub fn get_config_policy(&self) -> Result<v1::GetConfigPolicyReply> {
        Ok(self.policy()?.get_config_policy_reply())
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// A watchdog supervising this service's heartbeat.
    pub fn watchdog(&self, timeout: Duration, miss_limit: u32) -> Watchdog {
        Watchdog::new(
            self.heartbeat.clone(),
            self.state.clone(),
            self.shutdown.clone(),
            timeout,
            miss_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snap_plugin_types::{ConfigKind, ConfigRule, Namespace};

    fn service() -> LifecycleService {
        LifecycleService::new(Heartbeat::new(), Shutdown::new())
    }

    #[test]
    fn test_policy_not_initialized() {
        let service = service();
        assert!(matches!(
            service.get_config_policy(),
            Err(PluginError::NotInitialized(_))
        ));

        let mut policy = ConfigPolicy::new();
        policy
            .add_rule(
                &Namespace::new(),
                ConfigRule::new("user", ConfigKind::String).required(true),
            )
            .unwrap();
        assert!(service.register_policy(policy));
        assert!(!service.register_policy(ConfigPolicy::new()));

        let reply = service.get_config_policy().unwrap();
        assert_eq!(reply.rules.len(), 1);
        assert_eq!(reply.rules[0].key, "user");
    }

    #[test]
    fn test_first_ping_makes_plugin_alive() {
        let service = service();
        assert_eq!(service.state(), LifecycleState::Starting);

        service.ping();
        assert_eq!(service.state(), LifecycleState::Alive);
        service.ping();
        assert_eq!(service.state(), LifecycleState::Alive);
    }

    #[test]
    fn test_kill_is_idempotent() {
        let service = service();
        assert!(service.kill("first"));
        assert!(!service.kill("second"));
        assert_eq!(
            service.shutdown().reason(),
            Some(ShutdownReason::Killed {
                reason: "first".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_stops_watchdog() {
        let service = service();
        let watchdog = tokio::spawn(service.watchdog(Duration::from_secs(1), 3).run());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(service.state(), LifecycleState::TimeoutWarning(1));

        service.kill("host exiting");
        watchdog.await.unwrap();

        // the watchdog never got to expire the heartbeat
        assert_eq!(service.state(), LifecycleState::TimeoutWarning(1));
        assert!(matches!(
            service.shutdown().reason(),
            Some(ShutdownReason::Killed { .. })
        ));
    }
}
