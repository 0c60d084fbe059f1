use crate::models::{
    DailyCount, DemographicCount, Notification, NotificationQuery, NotificationRecord,
    SurveyResponseRecord, SurveySummary,
};
use anyhow::Result;
use async_trait::async_trait;

/// Persistence for notifications and survey responses.
///
/// Notification reads and writes are scoped to the visibility set of
/// `scope_user`: global notifications plus those addressed to that user.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a notification and return it with its assigned id
    async fn insert_notification(&self, record: &NotificationRecord) -> Result<Notification>;

    async fn get_notification(&self, id: i64, scope_user: &str) -> Result<Option<Notification>>;

    /// List notifications, newest first
    async fn list_notifications(
        &self,
        scope_user: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>>;

    async fn count_unread(&self, scope_user: &str) -> Result<i64>;

    /// Mark one notification read. Returns false when it is not visible.
    async fn mark_notification_read(&self, id: i64, scope_user: &str, now: i64) -> Result<bool>;

    /// Mark every unread notification read, returning how many changed
    async fn mark_all_read(&self, scope_user: &str, now: i64) -> Result<u64>;

    async fn delete_notification(&self, id: i64, scope_user: &str) -> Result<bool>;

    /// Delete notifications created before `cutoff` (unix millis)
    async fn delete_notifications_before(&self, cutoff: i64) -> Result<u64>;

    /// Persist a survey response and bump the survey's response counter
    async fn record_survey_response(&self, record: &SurveyResponseRecord) -> Result<()>;

    async fn survey_summary(&self, survey_id: &str) -> Result<SurveySummary>;

    /// Response counts per UTC calendar date
    async fn survey_daily_counts(&self, survey_id: &str) -> Result<Vec<DailyCount>>;

    /// Counts per age group, gender and region
    async fn survey_demographics(&self, survey_id: &str) -> Result<Vec<DemographicCount>>;
}
