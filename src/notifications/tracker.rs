//! Maps application activity to notifications

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use super::service::{NotificationError, NotificationService};
use crate::metrics::MetricsAggregator;
use crate::models::{
    NewNotification, Notification, NotificationCategory, NotificationPriority, ResponseStatus,
    SurveyResponseRecord,
};

/// Completed-response counts that produce a milestone notification
const COMPLETION_MILESTONES: &[i64] = &[10, 50, 100, 500, 1000];

pub struct ActivityTracker {
    notifications: Arc<NotificationService>,
    metrics: Arc<MetricsAggregator>,
}

impl ActivityTracker {
    pub fn new(notifications: Arc<NotificationService>, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            notifications,
            metrics,
        }
    }

    pub async fn track_user_registered(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<Notification, NotificationError> {
        self.notifications
            .create_notification(
                NewNotification::new(
                    NotificationCategory::User,
                    NotificationPriority::Medium,
                    "New user registered",
                    format!("{display_name} joined the platform"),
                )
                .with_link("/admin/users")
                .with_metadata(json!({ "userId": user_id }))
                .for_user(user_id),
            )
            .await
    }

    pub async fn track_survey_created(
        &self,
        survey_id: &str,
        title: &str,
        created_by: Option<&str>,
    ) -> Result<Notification, NotificationError> {
        let mut new = NewNotification::new(
            NotificationCategory::Survey,
            NotificationPriority::Low,
            "Survey created",
            format!("Survey \"{title}\" was created"),
        )
        .with_link(format!("/surveys/{survey_id}"))
        .with_metadata(json!({ "surveyId": survey_id }));
        if let Some(user) = created_by {
            new = new.for_user(user);
        }
        self.notifications.create_notification(new).await
    }

    /// Feed the response into survey analytics and announce it. When the
    /// refreshed analytics cross a completion milestone a second
    /// notification is raised.
    pub async fn track_survey_response(
        &self,
        response: SurveyResponseRecord,
    ) -> Result<Notification, NotificationError> {
        let survey_id = response.survey_id.clone();
        let respondent = response.respondent_id.clone();
        let completed = response.status == ResponseStatus::Completed;

        let snapshot = self
            .metrics
            .track_survey_response(&survey_id, response)
            .await;

        let notification = self
            .notifications
            .create_notification(
                NewNotification::new(
                    NotificationCategory::Response,
                    NotificationPriority::Low,
                    "New survey response",
                    format!("Survey {survey_id} received a response"),
                )
                .with_link(format!("/surveys/{survey_id}/responses"))
                .with_metadata(json!({
                    "surveyId": survey_id,
                    "respondentId": respondent,
                    "completed": completed,
                })),
            )
            .await?;

        if let Some(snapshot) = snapshot {
            let completed_total =
                (snapshot.completion_rate / 100.0 * snapshot.total_responses as f64).round() as i64;
            if let Some(milestone) = crossed_milestone(completed_total, self.metrics.batch_size()) {
                if let Err(e) = self.track_completion_milestone(&survey_id, milestone).await {
                    error!(survey_id = %survey_id, error = %e, "Milestone notification failed");
                }
            }
        }

        Ok(notification)
    }

    pub async fn track_completion_milestone(
        &self,
        survey_id: &str,
        completed: i64,
    ) -> Result<Notification, NotificationError> {
        debug!(survey_id, completed, "Completion milestone reached");
        self.notifications
            .create_notification(
                NewNotification::new(
                    NotificationCategory::Response,
                    NotificationPriority::Medium,
                    "Survey milestone reached",
                    format!("Survey {survey_id} has {completed} completed responses"),
                )
                .with_link(format!("/surveys/{survey_id}/analytics"))
                .with_metadata(json!({ "surveyId": survey_id, "completed": completed })),
            )
            .await
    }

    pub async fn track_ai_job_finished(
        &self,
        job_id: &str,
        job_kind: &str,
        succeeded: bool,
        requested_by: Option<&str>,
    ) -> Result<Notification, NotificationError> {
        let (priority, title, message) = if succeeded {
            (
                NotificationPriority::Medium,
                "AI analysis complete",
                format!("{job_kind} job {job_id} finished"),
            )
        } else {
            (
                NotificationPriority::High,
                "AI analysis failed",
                format!("{job_kind} job {job_id} failed"),
            )
        };

        let mut new = NewNotification::new(NotificationCategory::Ai, priority, title, message)
            .with_metadata(json!({ "jobId": job_id, "jobKind": job_kind, "succeeded": succeeded }));
        if let Some(user) = requested_by {
            new = new.for_user(user);
        }
        self.notifications.create_notification(new).await
    }

    pub async fn track_system_alert(
        &self,
        title: &str,
        message: &str,
    ) -> Result<Notification, NotificationError> {
        self.notifications
            .create_notification(NewNotification::new(
                NotificationCategory::System,
                NotificationPriority::High,
                title,
                message,
            ))
            .await
    }
}

/// Highest milestone reached within the last aggregation batch. Snapshots
/// are only refreshed every `batch` responses, so a milestone counts as
/// crossed when it lies in `(completed - batch, completed]`.
fn crossed_milestone(completed: i64, batch: u64) -> Option<i64> {
    let window_start = completed - batch.max(1) as i64;
    COMPLETION_MILESTONES
        .iter()
        .rev()
        .copied()
        .find(|&m| m <= completed && m > window_start)
}
