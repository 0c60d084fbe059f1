//! Integration tests for the notification hub and activity tracker

use chrono::Duration as ChronoDuration;
use pulse::config::{Config, MAX_NOTIFICATION_DAYS};
use pulse::context::AppContext;
use pulse::hub::{ChannelTransport, Frame};
use pulse::models::{
    Demographics, NewNotification, NotificationCategory, NotificationKind, NotificationPriority,
    NotificationQuery, NotificationRecord, ResponseStatus, SurveyResponseRecord,
};
use pulse::notifications::NotificationError;
use pulse::storage;
use serde_json::{json, Value};
use std::sync::Arc;

async fn create_context() -> Arc<AppContext> {
    let config = Config::for_tests();
    let storage = storage::connect(&config.database).await.unwrap();
    storage.init().await.unwrap();
    AppContext::new(config, storage)
}

fn db_down() -> NewNotification {
    NewNotification::new(
        NotificationCategory::System,
        NotificationPriority::High,
        "DB down",
        "Primary database is unreachable",
    )
}

#[tokio::test]
async fn test_create_notification_sets_expiry_and_type() {
    let ctx = create_context().await;

    let n = ctx.notifications.create_notification(db_down()).await.unwrap();

    assert_eq!(n.kind, NotificationKind::Alert);
    assert_eq!(n.category, NotificationCategory::System);
    assert_eq!(n.priority, NotificationPriority::High);
    assert!(n.is_global);
    assert_eq!(n.user_id, "admin");
    assert!(!n.is_read);
    assert!(n.updated_at.is_none());
    assert_eq!(n.expires_at, Some(n.created_at + ChronoDuration::days(30)));
}

#[tokio::test]
async fn test_low_priority_is_info() {
    let ctx = create_context().await;
    let n = ctx
        .notifications
        .create_notification(
            NewNotification::new(
                NotificationCategory::Survey,
                NotificationPriority::Low,
                "Survey created",
                "A survey was created",
            )
            .with_link("/surveys/1")
            .with_metadata(json!({ "surveyId": "1" })),
        )
        .await
        .unwrap();

    assert_eq!(n.kind, NotificationKind::Info);
    assert_eq!(n.link.as_deref(), Some("/surveys/1"));
    assert_eq!(n.metadata, Some(json!({ "surveyId": "1" })));
}

#[tokio::test]
async fn test_create_notification_broadcasts_envelope() {
    let ctx = create_context().await;
    let (transport, mut frames) = ChannelTransport::new();
    ctx.registry
        .admit(Arc::new(transport), "10.0.0.1".parse().unwrap(), None)
        .unwrap();
    // Welcome message
    assert!(matches!(frames.try_recv(), Ok(Frame::Text(_))));

    let n = ctx.notifications.create_notification(db_down()).await.unwrap();

    let Ok(Frame::Text(text)) = frames.try_recv() else {
        panic!("expected a broadcast frame");
    };
    let envelope: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope["type"], "notification");
    assert_eq!(envelope["data"]["id"], n.id);
    assert_eq!(envelope["data"]["type"], "alert");
    assert!(envelope["timestamp"].is_string());
}

#[tokio::test]
async fn test_mark_all_as_read() {
    let ctx = create_context().await;
    let n = ctx.notifications.create_notification(db_down()).await.unwrap();
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 1);

    let updated = ctx.notifications.mark_all_as_read().await.unwrap();
    assert!(updated >= 1);

    let fetched = ctx.notifications.get_notification(n.id).await.unwrap();
    assert!(fetched.is_read);
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_mark_read_round_trip() {
    let ctx = create_context().await;
    let n = ctx.notifications.create_notification(db_down()).await.unwrap();

    let listed = ctx
        .notifications
        .get_notifications(&NotificationQuery::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].is_read);

    // Immediately after creation, so the clamp keeps updatedAt ahead
    let read = ctx.notifications.mark_as_read(n.id).await.unwrap();
    assert!(read.is_read);
    let updated_at = read.updated_at.expect("updatedAt set");
    assert!(updated_at > read.created_at);

    let refetched = ctx.notifications.get_notification(n.id).await.unwrap();
    assert!(refetched.is_read);
    assert_eq!(refetched.updated_at, Some(updated_at));
}

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let ctx = create_context().await;
    for i in 0..5 {
        let category = if i % 2 == 0 {
            NotificationCategory::Survey
        } else {
            NotificationCategory::Ai
        };
        ctx.notifications
            .create_notification(NewNotification::new(
                category,
                NotificationPriority::Medium,
                format!("n{i}"),
                "body",
            ))
            .await
            .unwrap();
    }

    let surveys = ctx
        .notifications
        .get_notifications(&NotificationQuery {
            category: Some(NotificationCategory::Survey),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(surveys.len(), 3);

    let page = ctx
        .notifications
        .get_notifications(&NotificationQuery {
            limit: 2,
            offset: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    // Newest first
    assert_eq!(page[0].title, "n3");

    ctx.notifications.mark_as_read(surveys[0].id).await.unwrap();
    let unread = ctx
        .notifications
        .get_notifications(&NotificationQuery {
            is_read: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unread.len(), 4);
}

#[tokio::test]
async fn test_missing_notification_is_not_found() {
    let ctx = create_context().await;

    assert!(matches!(
        ctx.notifications.mark_as_read(999).await,
        Err(NotificationError::NotFound(999))
    ));
    assert!(matches!(
        ctx.notifications.delete_notification(999).await,
        Err(NotificationError::NotFound(999))
    ));

    let n = ctx.notifications.create_notification(db_down()).await.unwrap();
    ctx.notifications.delete_notification(n.id).await.unwrap();
    assert!(matches!(
        ctx.notifications.get_notification(n.id).await,
        Err(NotificationError::NotFound(_))
    ));
}

fn backdated(days: i64) -> NotificationRecord {
    let created_at = pulse::models::now_millis() - ChronoDuration::days(days).num_milliseconds();
    NotificationRecord {
        user_id: "admin".to_string(),
        kind: NotificationKind::Info,
        title: "Old".to_string(),
        message: "Stale notification".to_string(),
        link: None,
        metadata: None,
        is_global: true,
        category: NotificationCategory::System,
        priority: NotificationPriority::Low,
        actionable_user_id: None,
        created_at,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_cleanup_respects_retention() {
    let ctx = create_context().await;
    ctx.notifications.create_notification(db_down()).await.unwrap();
    ctx.storage.insert_notification(&backdated(45)).await.unwrap();

    // Only the record past the 30 day window goes
    assert_eq!(ctx.notifications.cleanup_expired().await.unwrap(), 1);
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 1);

    assert_eq!(ctx.notifications.cleanup_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cleanup_rejects_out_of_range_windows() {
    let ctx = create_context().await;
    ctx.notifications.create_notification(db_down()).await.unwrap();
    ctx.storage.insert_notification(&backdated(45)).await.unwrap();

    for days in [-1, -30, MAX_NOTIFICATION_DAYS + 1, i64::MAX / 1000, i64::MAX] {
        let result = ctx.notifications.cleanup_older_than(days).await;
        assert!(
            matches!(result, Err(NotificationError::InvalidDays(d)) if d == days),
            "{days} days should be rejected"
        );
    }
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 2);

    // The widest accepted window keeps everything
    assert_eq!(
        ctx.notifications
            .cleanup_older_than(MAX_NOTIFICATION_DAYS)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_out_of_range_expiry_is_rejected_before_insert() {
    let mut config = Config::for_tests();
    config.notifications.expiry_days = i64::MAX / 1000;
    let storage = storage::connect(&config.database).await.unwrap();
    storage.init().await.unwrap();
    let ctx = AppContext::new(config, storage);

    let result = ctx.notifications.create_notification(db_down()).await;
    assert!(matches!(result, Err(NotificationError::InvalidDays(_))));
    assert_eq!(ctx.notifications.get_unread_count().await.unwrap(), 0);
}

fn response(survey_id: &str, respondent: &str, status: ResponseStatus) -> SurveyResponseRecord {
    SurveyResponseRecord {
        survey_id: survey_id.to_string(),
        respondent_id: respondent.to_string(),
        status,
        rating: Some(4.0),
        completion_time_secs: Some(120),
        demographics: Demographics {
            age_group: Some("25-34".to_string()),
            gender: None,
            region: Some("EU".to_string()),
        },
        created_at: pulse::models::now_millis(),
    }
}

#[tokio::test]
async fn test_activity_tracker_aggregates_every_fifth_response() {
    let ctx = create_context().await;

    for i in 0..4 {
        let record = response("s1", &format!("r{i}"), ResponseStatus::Completed);
        ctx.storage.record_survey_response(&record).await.unwrap();
        ctx.activity.track_survey_response(record).await.unwrap();
    }
    assert!(ctx.metrics.get_cached_survey_analytics("s1").await.is_none());

    let record = response("s1", "r4", ResponseStatus::InProgress);
    ctx.storage.record_survey_response(&record).await.unwrap();
    ctx.activity.track_survey_response(record).await.unwrap();

    let snapshot = ctx
        .metrics
        .get_cached_survey_analytics("s1")
        .await
        .expect("snapshot after fifth response");
    assert_eq!(snapshot.total_responses, 5);
    assert_eq!(snapshot.unique_respondents, 5);
    assert_eq!(snapshot.active_respondents, 1);
    assert!((snapshot.completion_rate - 80.0).abs() < 1e-9);
    assert_eq!(snapshot.demographics.region.get("EU"), Some(&5));
    assert_eq!(snapshot.demographics.gender.get("unknown"), Some(&5));
    assert_eq!(snapshot.response_rates.daily.values().sum::<u64>(), 5);

    // One notification per response
    let responses = ctx
        .notifications
        .get_notifications(&NotificationQuery {
            category: Some(NotificationCategory::Response),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(responses.len(), 5);
}

#[tokio::test]
async fn test_activity_tracker_priorities() {
    let ctx = create_context().await;

    let failed = ctx
        .activity
        .track_ai_job_finished("job-1", "persona", false, Some("alice"))
        .await
        .unwrap();
    assert_eq!(failed.category, NotificationCategory::Ai);
    assert_eq!(failed.kind, NotificationKind::Alert);
    assert_eq!(failed.actionable_user_id.as_deref(), Some("alice"));

    let done = ctx
        .activity
        .track_ai_job_finished("job-2", "persona", true, None)
        .await
        .unwrap();
    assert_eq!(done.priority, NotificationPriority::Medium);

    let user = ctx
        .activity
        .track_user_registered("u-1", "Alice")
        .await
        .unwrap();
    assert_eq!(user.category, NotificationCategory::User);
    assert_eq!(user.actionable_user_id.as_deref(), Some("u-1"));

    let survey = ctx
        .activity
        .track_survey_created("s-9", "Market fit", None)
        .await
        .unwrap();
    assert_eq!(survey.priority, NotificationPriority::Low);

    let alert = ctx
        .activity
        .track_system_alert("Disk", "Disk almost full")
        .await
        .unwrap();
    assert_eq!(alert.kind, NotificationKind::Alert);
}

#[tokio::test]
async fn test_realtime_analytics_for_unknown_survey() {
    let ctx = create_context().await;
    let snapshot = ctx
        .metrics
        .get_real_time_survey_analytics("nope")
        .await
        .unwrap();
    assert_eq!(snapshot.total_responses, 0);
    assert_eq!(snapshot.completion_rate, 0.0);
}

#[tokio::test]
async fn test_shutdown_releases_state() {
    let ctx = create_context().await;
    ctx.start_background_tasks();

    let (transport, _frames) = ChannelTransport::new();
    ctx.registry
        .admit(Arc::new(transport), "10.0.0.1".parse().unwrap(), None)
        .unwrap();
    ctx.limiter.check_connection_admission("10.0.0.2".parse().unwrap());

    ctx.shutdown().await;
    assert_eq!(ctx.registry.connection_count(), 0);
    assert_eq!(ctx.limiter.stats().tracked_ips, 0);
}
