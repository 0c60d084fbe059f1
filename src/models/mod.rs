pub mod notification;
pub mod survey;

pub use notification::{
    NewNotification, Notification, NotificationCategory, NotificationKind, NotificationPriority,
    NotificationQuery, NotificationRecord, NotificationRow,
};
pub use survey::{
    DailyCount, DemographicBreakdown, DemographicCount, Demographics, ResponseRates,
    ResponseStatus, SurveyAnalytics, SurveyResponseInput, SurveyResponseRecord, SurveySummary,
};

use chrono::{DateTime, Utc};

/// Current wall-clock time as unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
