use crate::shutdown::{Shutdown, ShutdownReason};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Liveness state of a plugin as seen by its watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No ping received yet.
    Starting,
    Alive,
    /// `n` consecutive watchdog ticks found no recent ping.
    TimeoutWarning(u32),
    /// The miss limit was reached; the plugin is shutting down.
    Dead,
}

/// Time of the last ping, shared by the RPC handlers and the watchdog.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last_seen: Arc<Mutex<Instant>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn beat(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen())
    }
}

/// Background task that shuts the plugin down once the host stops pinging.
///
/// Every `timeout` the watchdog compares the time since the last ping with
/// `timeout`; each tick at or over it counts as a miss, any tick under it
/// resets the count. Reaching `miss_limit` misses triggers the shutdown.
#[derive(Debug)]
pub struct Watchdog {
    heartbeat: Heartbeat,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: Shutdown,
    timeout: Duration,
    miss_limit: u32,
}

impl Watchdog {
    pub fn new(
        heartbeat: Heartbeat,
        state: Arc<watch::Sender<LifecycleState>>,
        shutdown: Shutdown,
        timeout: Duration,
        miss_limit: u32,
    ) -> Self {
        Self {
            heartbeat,
            state,
            shutdown,
            timeout,
            miss_limit: miss_limit.max(1),
        }
    }

    /// Runs until the heartbeat expires or the shutdown is triggered elsewhere.
    pub async fn run(self) {
        let mut misses = 0u32;

        loop {
            let elapsed = self.heartbeat.elapsed();

            if elapsed >= self.timeout {
                misses += 1;

                if misses >= self.miss_limit {
                    error!(
                        miss = misses,
                        limit = self.miss_limit,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "heartbeat expired"
                    );
                    self.state.send_replace(LifecycleState::Dead);
                    self.shutdown
                        .trigger(ShutdownReason::HeartbeatExpired { misses });
                    return;
                }

                warn!(
                    miss = misses,
                    limit = self.miss_limit,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "missed heartbeat"
                );
                self.state
                    .send_replace(LifecycleState::TimeoutWarning(misses));
            } else {
                if misses > 0 {
                    debug!(previous = misses, "heartbeat resumed, resetting miss count");
                    misses = 0;
                }
                self.state.send_if_modified(|state| {
                    if matches!(state, LifecycleState::TimeoutWarning(_)) {
                        *state = LifecycleState::Alive;
                        true
                    } else {
                        false
                    }
                });
            }

            tokio::select! {
                _ = self.shutdown.triggered() => {
                    debug!("watchdog stopped");
                    return;
                }
                _ = tokio::time::sleep(self.timeout) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn watchdog(heartbeat: &Heartbeat, shutdown: &Shutdown) -> (Watchdog, watch::Receiver<LifecycleState>) {
        let (tx, rx) = watch::channel(LifecycleState::Starting);
        let watchdog = Watchdog::new(heartbeat.clone(), Arc::new(tx), shutdown.clone(), TIMEOUT, 3);
        (watchdog, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_miss_limit() {
        let heartbeat = Heartbeat::new();
        let shutdown = Shutdown::new();
        let (watchdog, state) = watchdog(&heartbeat, &shutdown);

        let started = Instant::now();
        watchdog.run().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= TIMEOUT * 3 && elapsed < TIMEOUT * 3 + TIMEOUT / 2);
        assert_eq!(*state.borrow(), LifecycleState::Dead);
        assert_eq!(
            shutdown.reason(),
            Some(ShutdownReason::HeartbeatExpired { misses: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_resets_miss_count() {
        let heartbeat = Heartbeat::new();
        let shutdown = Shutdown::new();
        let (watchdog, state) = watchdog(&heartbeat, &shutdown);
        let task = tokio::spawn(watchdog.run());

        // two misses, at TIMEOUT and 2 * TIMEOUT
        tokio::time::sleep(TIMEOUT * 2 + TIMEOUT / 2).await;
        assert_eq!(*state.borrow(), LifecycleState::TimeoutWarning(2));

        heartbeat.beat();
        tokio::time::sleep(TIMEOUT).await;
        assert_eq!(*state.borrow(), LifecycleState::Alive);
        assert!(!shutdown.is_triggered());

        // counting starts over from zero
        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(*state.borrow(), LifecycleState::TimeoutWarning(2));
        assert!(!shutdown.is_triggered());

        tokio::time::sleep(TIMEOUT).await;
        task.await.unwrap();
        assert_eq!(*state.borrow(), LifecycleState::Dead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_pings_keep_plugin_alive() {
        let heartbeat = Heartbeat::new();
        let shutdown = Shutdown::new();
        let (watchdog, state) = watchdog(&heartbeat, &shutdown);
        let task = tokio::spawn(watchdog.run());

        for _ in 0..100 {
            tokio::time::sleep(TIMEOUT / 2).await;
            heartbeat.beat();
        }

        assert!(!shutdown.is_triggered());
        assert_ne!(*state.borrow(), LifecycleState::Dead);
        assert!(!task.is_finished());

        shutdown.trigger(ShutdownReason::Killed {
            reason: "test over".to_string(),
        });
        task.await.unwrap();
        assert_ne!(*state.borrow(), LifecycleState::Dead);
    }
}
