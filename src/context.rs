//! Process-scoped service context
//!
//! Built once at startup and shared as `Arc<AppContext>`. Construction is
//! two-phase: the leaf services are created first, then the activity tracker
//! is wired to the finished notification service and metrics aggregator.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hub::{
    ConnectionRegistry, EventBus, HeartbeatScheduler, HubEvent, PeriodicTask, RateLimiter,
};
use crate::metrics::MetricsAggregator;
use crate::notifications::{ActivityTracker, NotificationService};
use crate::storage::Storage;

const EVENT_BUS_CAPACITY: usize = 1024;

struct BackgroundTasks {
    heartbeat: HeartbeatScheduler,
    sampler: PeriodicTask,
    retention: PeriodicTask,
    event_logger: JoinHandle<()>,
}

pub struct AppContext {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<MetricsAggregator>,
    pub notifications: Arc<NotificationService>,
    pub activity: ActivityTracker,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl AppContext {
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let registry = Arc::new(ConnectionRegistry::new(
            config.hub.clone(),
            Arc::clone(&limiter),
            events,
        ));
        let metrics = Arc::new(MetricsAggregator::new(
            config.metrics.clone(),
            Arc::clone(&storage),
        ));
        let notifications = Arc::new(NotificationService::new(
            Arc::clone(&storage),
            Arc::clone(&registry),
            config.notifications.clone(),
        ));

        let activity = ActivityTracker::new(Arc::clone(&notifications), Arc::clone(&metrics));

        Arc::new(Self {
            config,
            storage,
            limiter,
            registry,
            metrics,
            notifications,
            activity,
            tasks: Mutex::new(None),
        })
    }

    /// Start the heartbeat, idle sweep, load sampler, retention sweep and
    /// hub event logger. Calling this twice is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_some() {
            return;
        }

        *tasks = Some(BackgroundTasks {
            heartbeat: HeartbeatScheduler::start(
                Arc::clone(&self.registry),
                Arc::clone(&self.limiter),
                &self.config.hub,
            ),
            sampler: self.metrics.start_sampler(),
            retention: self.notifications.start_retention_sweep(),
            event_logger: spawn_event_logger(self.registry.events()),
        });
        info!("Background tasks started");
    }

    /// Stop timers, close every connection and drop limiter state
    pub async fn shutdown(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(tasks) = tasks {
            tasks.heartbeat.shutdown().await;
            tasks.sampler.shutdown().await;
            tasks.retention.shutdown().await;
            tasks.event_logger.abort();
        }

        let closed = self.registry.shutdown();
        self.limiter.clear();
        info!(closed, "Context shut down");
    }
}

fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(HubEvent::Connected { connection_id, .. }) => {
                    debug!(connection_id = %connection_id, "hub event: connected");
                }
                Ok(HubEvent::Disconnected {
                    connection_id,
                    reason,
                    ..
                }) => {
                    debug!(connection_id = %connection_id, reason = %reason, "hub event: disconnected");
                }
                Ok(HubEvent::Message {
                    connection_id,
                    message,
                    ..
                }) => {
                    debug!(connection_id = %connection_id, kind = %message.kind, "hub event: message");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Hub event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
