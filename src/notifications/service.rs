use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::{NotificationConfig, MAX_NOTIFICATION_DAYS};
use crate::hub::{ConnectionRegistry, OutboundEnvelope, PeriodicTask};
use crate::models::{
    now_millis, NewNotification, Notification, NotificationQuery, NotificationRecord,
};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification {0} not found")]
    NotFound(i64),
    #[error("day count {0} is outside 0..={MAX_NOTIFICATION_DAYS}")]
    InvalidDays(i64),
    #[error("invalid notification metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn days_to_millis(days: i64) -> Result<i64, NotificationError> {
    if !(0..=MAX_NOTIFICATION_DAYS).contains(&days) {
        return Err(NotificationError::InvalidDays(days));
    }
    TimeDelta::try_days(days)
        .map(|delta| delta.num_milliseconds())
        .ok_or(NotificationError::InvalidDays(days))
}

/// Persists notifications and pushes them to live connections
pub struct NotificationService {
    storage: Arc<dyn Storage>,
    registry: Arc<ConnectionRegistry>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<ConnectionRegistry>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            config,
        }
    }

    /// Recipient scope shared by every read operation
    pub fn scope(&self) -> &str {
        &self.config.admin_user_id
    }

    /// Persist a notification and broadcast it. A storage failure is
    /// returned to the caller; a broadcast failure is only logged.
    pub async fn create_notification(
        &self,
        new: NewNotification,
    ) -> Result<Notification, NotificationError> {
        let created_at = now_millis();
        let expires_at = created_at
            .checked_add(days_to_millis(self.config.expiry_days)?)
            .ok_or(NotificationError::InvalidDays(self.config.expiry_days))?;
        let metadata = new
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let user_id = new
            .actionable_user_id
            .clone()
            .unwrap_or_else(|| self.config.admin_user_id.clone());

        let record = NotificationRecord {
            user_id,
            kind: new.priority.kind(),
            title: new.title,
            message: new.message,
            link: new.link,
            metadata,
            is_global: true,
            category: new.category,
            priority: new.priority,
            actionable_user_id: new.actionable_user_id,
            created_at,
            expires_at: Some(expires_at),
        };

        let notification = self.storage.insert_notification(&record).await?;

        let envelope = OutboundEnvelope::from_payload("notification", &notification);
        match envelope.map(|envelope| self.registry.broadcast(&envelope, None)) {
            Ok(Ok(recipients)) => info!(
                notification_id = notification.id,
                category = %notification.category,
                priority = %notification.priority,
                recipients,
                "Notification created"
            ),
            Ok(Err(e)) => error!(
                notification_id = notification.id,
                error = %e,
                "Notification broadcast failed"
            ),
            Err(e) => error!(
                notification_id = notification.id,
                error = %e,
                "Notification envelope could not be built"
            ),
        }

        Ok(notification)
    }

    pub async fn get_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, NotificationError> {
        Ok(self.storage.list_notifications(self.scope(), query).await?)
    }

    pub async fn get_notification(&self, id: i64) -> Result<Notification, NotificationError> {
        self.storage
            .get_notification(id, self.scope())
            .await?
            .ok_or(NotificationError::NotFound(id))
    }

    pub async fn get_unread_count(&self) -> Result<i64, NotificationError> {
        Ok(self.storage.count_unread(self.scope()).await?)
    }

    /// Mark one notification read and return its updated state
    pub async fn mark_as_read(&self, id: i64) -> Result<Notification, NotificationError> {
        if !self
            .storage
            .mark_notification_read(id, self.scope(), now_millis())
            .await?
        {
            return Err(NotificationError::NotFound(id));
        }
        self.get_notification(id).await
    }

    pub async fn mark_all_as_read(&self) -> Result<u64, NotificationError> {
        let updated = self.storage.mark_all_read(self.scope(), now_millis()).await?;
        info!(updated, "Notifications marked read");
        Ok(updated)
    }

    pub async fn delete_notification(&self, id: i64) -> Result<(), NotificationError> {
        if self.storage.delete_notification(id, self.scope()).await? {
            Ok(())
        } else {
            Err(NotificationError::NotFound(id))
        }
    }

    /// Delete notifications created more than `retention_days` ago.
    /// Windows outside `0..=MAX_NOTIFICATION_DAYS` are rejected.
    pub async fn cleanup_older_than(&self, retention_days: i64) -> Result<u64, NotificationError> {
        let cutoff = now_millis()
            .checked_sub(days_to_millis(retention_days)?)
            .ok_or(NotificationError::InvalidDays(retention_days))?;
        let deleted = self.storage.delete_notifications_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, retention_days, "Old notifications removed");
        }
        Ok(deleted)
    }

    pub async fn cleanup_expired(&self) -> Result<u64, NotificationError> {
        self.cleanup_older_than(self.config.retention_days).await
    }

    /// Scheduled retention sweep
    pub fn start_retention_sweep(self: &Arc<Self>) -> PeriodicTask {
        let service = Arc::clone(self);
        PeriodicTask::spawn(
            "notification-retention",
            Duration::from_secs(self.config.cleanup_interval_secs),
            move || {
                let service = Arc::clone(&service);
                async move {
                    if let Err(e) = service.cleanup_expired().await {
                        error!(error = %e, "Notification retention sweep failed");
                    }
                }
            },
        )
    }
}
