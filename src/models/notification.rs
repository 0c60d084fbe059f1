use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use super::millis_to_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    User,
    Survey,
    Response,
    Ai,
    System,
}

impl NotificationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationCategory::User => "user",
            NotificationCategory::Survey => "survey",
            NotificationCategory::Response => "response",
            NotificationCategory::Ai => "ai",
            NotificationCategory::System => "system",
        }
    }
}

impl FromStr for NotificationCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(NotificationCategory::User),
            "survey" => Ok(NotificationCategory::Survey),
            "response" => Ok(NotificationCategory::Response),
            "ai" => Ok(NotificationCategory::Ai),
            "system" => Ok(NotificationCategory::System),
            other => Err(anyhow!("unknown notification category '{other}'")),
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    High,
    Medium,
    Low,
}

impl NotificationPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationPriority::High => "high",
            NotificationPriority::Medium => "medium",
            NotificationPriority::Low => "low",
        }
    }

    /// High priority notifications surface as alerts, everything else as info
    pub fn kind(self) -> NotificationKind {
        match self {
            NotificationPriority::High => NotificationKind::Alert,
            _ => NotificationKind::Info,
        }
    }
}

impl FromStr for NotificationPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(NotificationPriority::High),
            "medium" => Ok(NotificationPriority::Medium),
            "low" => Ok(NotificationPriority::Low),
            other => Err(anyhow!("unknown notification priority '{other}'")),
        }
    }
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Alert,
    Info,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::Info => "info",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(NotificationKind::Alert),
            "info" => Ok(NotificationKind::Info),
            other => Err(anyhow!("unknown notification type '{other}'")),
        }
    }
}

/// Notification as exposed to API consumers and pushed over the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub link: Option<String>,
    pub metadata: Option<Value>,
    pub is_global: bool,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub actionable_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Database row; timestamps are unix milliseconds and metadata is JSON text
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub link: Option<String>,
    pub metadata: Option<String>,
    pub is_global: bool,
    pub category: String,
    pub priority: String,
    pub actionable_user_id: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let metadata = match row.metadata.as_deref() {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };

        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            title: row.title,
            message: row.message,
            is_read: row.is_read,
            link: row.link,
            metadata,
            is_global: row.is_global,
            category: row.category.parse()?,
            priority: row.priority.parse()?,
            actionable_user_id: row.actionable_user_id,
            created_at: millis_to_datetime(row.created_at),
            updated_at: row.updated_at.map(millis_to_datetime),
            expires_at: row.expires_at.map(millis_to_datetime),
        })
    }
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub actionable_user_id: Option<String>,
}

impl NewNotification {
    pub fn new(
        category: NotificationCategory,
        priority: NotificationPriority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            priority,
            title: title.into(),
            message: message.into(),
            link: None,
            metadata: None,
            actionable_user_id: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.actionable_user_id = Some(user_id.into());
        self
    }
}

/// Fully resolved notification ready to be inserted
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub metadata: Option<String>,
    pub is_global: bool,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub actionable_user_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Filter and pagination for listing notifications
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub category: Option<NotificationCategory>,
    #[serde(default = "NotificationQuery::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl NotificationQuery {
    const fn default_limit() -> i64 {
        50
    }

    /// Limit clamped to 1..=500 and a non-negative offset
    pub fn bounded(&self) -> (i64, i64) {
        (self.limit.clamp(1, 500), self.offset.max(0))
    }
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            is_read: None,
            category: None,
            limit: Self::default_limit(),
            offset: 0,
        }
    }
}
