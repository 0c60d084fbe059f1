//! Service behavior when the store fails underneath it

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pulse::config::{Config, MetricsConfig};
use pulse::context::AppContext;
use pulse::hub::ChannelTransport;
use pulse::metrics::SurveyAnalyticsTracker;
use pulse::models::{
    now_millis, DailyCount, DemographicCount, Demographics, NewNotification, Notification,
    NotificationCategory, NotificationPriority, NotificationQuery, NotificationRecord,
    ResponseStatus, SurveyResponseRecord, SurveySummary,
};
use pulse::notifications::NotificationError;
use pulse::storage::{SqliteStorage, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SQLite store whose writes and survey reads can be switched off
struct FlakyStorage {
    inner: SqliteStorage,
    fail_inserts: AtomicBool,
    fail_summaries: AtomicBool,
}

impl FlakyStorage {
    async fn new() -> Arc<Self> {
        let inner = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        inner.init().await.unwrap();
        Arc::new(Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_summaries: AtomicBool::new(false),
        })
    }

    fn summaries_down(&self) -> Result<()> {
        if self.fail_summaries.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset while reading survey data"));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<Notification> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("disk I/O error"));
        }
        self.inner.insert_notification(record).await
    }

    async fn get_notification(&self, id: i64, scope_user: &str) -> Result<Option<Notification>> {
        self.inner.get_notification(id, scope_user).await
    }

    async fn list_notifications(
        &self,
        scope_user: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>> {
        self.inner.list_notifications(scope_user, query).await
    }

    async fn count_unread(&self, scope_user: &str) -> Result<i64> {
        self.inner.count_unread(scope_user).await
    }

    async fn mark_notification_read(&self, id: i64, scope_user: &str, now: i64) -> Result<bool> {
        self.inner.mark_notification_read(id, scope_user, now).await
    }

    async fn mark_all_read(&self, scope_user: &str, now: i64) -> Result<u64> {
        self.inner.mark_all_read(scope_user, now).await
    }

    async fn delete_notification(&self, id: i64, scope_user: &str) -> Result<bool> {
        self.inner.delete_notification(id, scope_user).await
    }

    async fn delete_notifications_before(&self, cutoff: i64) -> Result<u64> {
        self.inner.delete_notifications_before(cutoff).await
    }

    async fn record_survey_response(&self, record: &SurveyResponseRecord) -> Result<()> {
        self.inner.record_survey_response(record).await
    }

    async fn survey_summary(&self, survey_id: &str) -> Result<SurveySummary> {
        self.summaries_down()?;
        self.inner.survey_summary(survey_id).await
    }

    async fn survey_daily_counts(&self, survey_id: &str) -> Result<Vec<DailyCount>> {
        self.summaries_down()?;
        self.inner.survey_daily_counts(survey_id).await
    }

    async fn survey_demographics(&self, survey_id: &str) -> Result<Vec<DemographicCount>> {
        self.summaries_down()?;
        self.inner.survey_demographics(survey_id).await
    }
}

fn create_context(storage: &Arc<FlakyStorage>) -> Arc<AppContext> {
    AppContext::new(Config::for_tests(), Arc::clone(storage) as Arc<dyn Storage>)
}

fn response(survey_id: &str, respondent: &str) -> SurveyResponseRecord {
    SurveyResponseRecord {
        survey_id: survey_id.to_string(),
        respondent_id: respondent.to_string(),
        status: ResponseStatus::Completed,
        rating: Some(5.0),
        completion_time_secs: Some(90),
        demographics: Demographics::default(),
        created_at: now_millis(),
    }
}

#[tokio::test]
async fn test_failed_insert_is_returned_and_not_broadcast() {
    let storage = FlakyStorage::new().await;
    let ctx = create_context(&storage);
    let (transport, mut frames) = ChannelTransport::new();
    ctx.registry
        .admit(Arc::new(transport), "10.0.0.1".parse().unwrap(), None)
        .unwrap();
    // Welcome message
    assert!(frames.try_recv().is_ok());

    storage.fail_inserts.store(true, Ordering::SeqCst);
    let result = ctx
        .notifications
        .create_notification(NewNotification::new(
            NotificationCategory::System,
            NotificationPriority::High,
            "DB down",
            "Primary database is unreachable",
        ))
        .await;

    assert!(matches!(result, Err(NotificationError::Storage(_))));
    assert!(frames.try_recv().is_err());

    storage.fail_inserts.store(false, Ordering::SeqCst);
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_aggregation_keeps_previous_snapshot() {
    let storage = FlakyStorage::new().await;
    let ctx = create_context(&storage);
    storage.record_survey_response(&response("s1", "r1")).await.unwrap();

    let fresh = ctx
        .metrics
        .get_real_time_survey_analytics("s1")
        .await
        .unwrap();
    assert_eq!(fresh.total_responses, 1);

    storage.fail_summaries.store(true, Ordering::SeqCst);
    let fallback = ctx
        .metrics
        .get_real_time_survey_analytics("s1")
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&fresh, &fallback));

    let cached = ctx.metrics.get_cached_survey_analytics("s1").await.unwrap();
    assert!(Arc::ptr_eq(&fresh, &cached));
}

#[tokio::test]
async fn test_failed_aggregation_without_snapshot_is_none() {
    let storage = FlakyStorage::new().await;
    let ctx = create_context(&storage);
    storage.fail_summaries.store(true, Ordering::SeqCst);

    assert!(ctx.metrics.get_real_time_survey_analytics("s1").await.is_none());
    assert!(ctx.metrics.get_cached_survey_analytics("s1").await.is_none());
}

#[tokio::test]
async fn test_tracked_surveys_are_bounded() {
    let storage = FlakyStorage::new().await;
    let config = MetricsConfig {
        max_tracked_surveys: 2,
        aggregation_batch_size: 1_000,
        ..MetricsConfig::default()
    };
    let tracker = SurveyAnalyticsTracker::new(storage as Arc<dyn Storage>, &config);

    for n in 0..50 {
        let survey_id = format!("s{n}");
        tracker
            .track_survey_response(&survey_id, response(&survey_id, "r1"))
            .await;
    }

    assert!(tracker.tracked_surveys() <= 2);
}
