use crate::models::{
    DailyCount, DemographicCount, Notification, NotificationQuery, NotificationRecord,
    NotificationRow, SurveyResponseRecord, SurveySummary,
};
use crate::storage::Storage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, is_read, link, metadata, \
     is_global, category, priority, actionable_user_id, created_at, updated_at, expires_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqlitePoolOptions::new().max_connections(max_connections);

        // Every connection to `:memory:` opens its own database, so keep exactly one alive
        if database_url.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(database_url).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                link TEXT,
                metadata TEXT,
                is_global INTEGER NOT NULL DEFAULT 1,
                category TEXT NOT NULL,
                priority TEXT NOT NULL,
                actionable_user_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                expires_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_created_at ON notifications(created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, is_read)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS surveys (
                id TEXT PRIMARY KEY,
                response_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                survey_id TEXT NOT NULL,
                respondent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                rating REAL,
                completion_time_secs INTEGER,
                age_group TEXT,
                gender TEXT,
                region TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_survey_responses_survey ON survey_responses(survey_id, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<Notification> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (
                user_id, kind, title, message, is_read, link, metadata, is_global,
                category, priority, actionable_user_id, created_at, updated_at, expires_at
            )
            VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(record.kind.as_str())
        .bind(&record.title)
        .bind(&record.message)
        .bind(&record.link)
        .bind(&record.metadata)
        .bind(record.is_global)
        .bind(record.category.as_str())
        .bind(record.priority.as_str())
        .bind(&record.actionable_user_id)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(self.pool.as_ref())
        .await?;

        let id = result.last_insert_rowid();
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or_else(|| anyhow!("notification {id} vanished after insert"))?;

        Notification::try_from(row)
    }

    async fn get_notification(&self, id: i64, scope_user: &str) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE id = ? AND (is_global = 1 OR user_id = ?)"
        ))
        .bind(id)
        .bind(scope_user)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn list_notifications(
        &self,
        scope_user: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>> {
        let (limit, offset) = query.bounded();

        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE (is_global = 1 OR user_id = ?1) \
               AND (?2 IS NULL OR is_read = ?2) \
               AND (?3 IS NULL OR category = ?3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?4 OFFSET ?5"
        ))
        .bind(scope_user)
        .bind(query.is_read)
        .bind(query.category.map(|c| c.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn count_unread(&self, scope_user: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE is_read = 0 AND (is_global = 1 OR user_id = ?)
            "#,
        )
        .bind(scope_user)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn mark_notification_read(&self, id: i64, scope_user: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = 1, updated_at = MAX(?1, created_at + 1)
            WHERE id = ?2 AND (is_global = 1 OR user_id = ?3)
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(scope_user)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, scope_user: &str, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = 1, updated_at = MAX(?1, created_at + 1)
            WHERE is_read = 0 AND (is_global = 1 OR user_id = ?2)
            "#,
        )
        .bind(now)
        .bind(scope_user)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, id: i64, scope_user: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE id = ? AND (is_global = 1 OR user_id = ?)
            "#,
        )
        .bind(id)
        .bind(scope_user)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_notifications_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_survey_response(&self, record: &SurveyResponseRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO survey_responses (
                survey_id, respondent_id, status, rating, completion_time_secs,
                age_group, gender, region, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.survey_id)
        .bind(&record.respondent_id)
        .bind(record.status.as_str())
        .bind(record.rating)
        .bind(record.completion_time_secs)
        .bind(&record.demographics.age_group)
        .bind(&record.demographics.gender)
        .bind(&record.demographics.region)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO surveys (id, response_count, updated_at)
            VALUES (?, 1, ?)
            ON CONFLICT (id) DO UPDATE SET
                response_count = surveys.response_count + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.survey_id)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn survey_summary(&self, survey_id: &str) -> Result<SurveySummary> {
        let mut summary = sqlx::query_as::<_, SurveySummary>(
            r#"
            SELECT
                COUNT(*) AS row_total,
                COUNT(DISTINCT respondent_id) AS unique_respondents,
                COUNT(DISTINCT CASE WHEN status = 'in_progress' THEN respondent_id END)
                    AS active_respondents,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
                    AS completed_responses,
                AVG(rating) AS average_rating,
                AVG(completion_time_secs) AS average_completion_time
            FROM survey_responses
            WHERE survey_id = ?
            "#,
        )
        .bind(survey_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        summary.persisted_total =
            sqlx::query_scalar::<_, i64>("SELECT response_count FROM surveys WHERE id = ?")
                .bind(survey_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(summary)
    }

    async fn survey_daily_counts(&self, survey_id: &str) -> Result<Vec<DailyCount>> {
        let counts = sqlx::query_as::<_, DailyCount>(
            r#"
            SELECT strftime('%Y-%m-%d', created_at / 1000, 'unixepoch') AS date,
                   COUNT(*) AS count
            FROM survey_responses
            WHERE survey_id = ?
            GROUP BY date
            ORDER BY date
            "#,
        )
        .bind(survey_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counts)
    }

    async fn survey_demographics(&self, survey_id: &str) -> Result<Vec<DemographicCount>> {
        let counts = sqlx::query_as::<_, DemographicCount>(
            r#"
            SELECT 'age' AS dimension, COALESCE(age_group, 'unknown') AS value, COUNT(*) AS count
            FROM survey_responses WHERE survey_id = ?1
            GROUP BY COALESCE(age_group, 'unknown')
            UNION ALL
            SELECT 'gender', COALESCE(gender, 'unknown'), COUNT(*)
            FROM survey_responses WHERE survey_id = ?1
            GROUP BY COALESCE(gender, 'unknown')
            UNION ALL
            SELECT 'region', COALESCE(region, 'unknown'), COUNT(*)
            FROM survey_responses WHERE survey_id = ?1
            GROUP BY COALESCE(region, 'unknown')
            "#,
        )
        .bind(survey_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counts)
    }
}
