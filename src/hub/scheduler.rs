use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use super::registry::ConnectionRegistry;
use crate::config::HubConfig;

/// A background job run on a fixed interval until stopped
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`. The first run happens one period after
    /// spawning. A tick in progress always runs to completion; the stop
    /// signal is observed between ticks.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = if period.is_zero() {
            warn!(task = name, "Zero interval configured, using 1s");
            Duration::from_secs(1)
        } else {
            period
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Skip the first tick which fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        job().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(task = name, "Periodic task stopping");
                            break;
                        }
                    }
                }
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop after its current tick
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait for the task to exit
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Drives the registry's heartbeat and idle sweep
pub struct HeartbeatScheduler {
    heartbeat: PeriodicTask,
    idle_sweep: PeriodicTask,
}

impl HeartbeatScheduler {
    pub fn start(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        config: &HubConfig,
    ) -> Self {
        let heartbeat_registry = Arc::clone(&registry);
        let heartbeat = PeriodicTask::spawn("heartbeat", config.heartbeat_interval(), move || {
            let registry = Arc::clone(&heartbeat_registry);
            async move {
                registry.heartbeat_tick();
            }
        });

        let idle_sweep = PeriodicTask::spawn("idle-sweep", config.idle_sweep_interval(), move || {
            let registry = Arc::clone(&registry);
            let limiter = Arc::clone(&limiter);
            async move {
                registry.idle_sweep();
                let pruned = limiter.sweep_expired();
                if pruned > 0 {
                    debug!(pruned, "Expired rate-limit records removed");
                }
            }
        });

        info!(
            heartbeat_secs = config.heartbeat_interval_secs,
            idle_sweep_secs = config.idle_sweep_interval_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            "Heartbeat scheduler started"
        );

        Self {
            heartbeat,
            idle_sweep,
        }
    }

    pub fn stop_heartbeat(&self) {
        self.heartbeat.stop();
    }

    pub fn stop_idle_sweep(&self) {
        self.idle_sweep.stop();
    }

    pub async fn shutdown(self) {
        self.heartbeat.shutdown().await;
        self.idle_sweep.shutdown().await;
        info!("Heartbeat scheduler stopped");
    }
}
