use crate::models::{
    DailyCount, DemographicCount, Notification, NotificationQuery, NotificationRecord,
    NotificationRow, SurveyResponseRecord, SurveySummary,
};
use crate::storage::Storage;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, is_read, link, metadata, \
     is_global, category, priority, actionable_user_id, created_at, updated_at, expires_at";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                is_read BOOLEAN NOT NULL DEFAULT FALSE,
                link TEXT,
                metadata TEXT,
                is_global BOOLEAN NOT NULL DEFAULT TRUE,
                category TEXT NOT NULL,
                priority TEXT NOT NULL,
                actionable_user_id TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT,
                expires_at BIGINT
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
                response_count BIGINT NOT NULL DEFAULT 0,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_responses (
                id BIGSERIAL PRIMARY KEY,
                survey_id TEXT NOT NULL,
                respondent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                rating DOUBLE PRECISION,
                completion_time_secs BIGINT,
                age_group TEXT,
                gender TEXT,
                region TEXT,
                created_at BIGINT NOT NULL
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
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            INSERT INTO notifications (
                user_id, kind, title, message, is_read, link, metadata, is_global,
                category, priority, actionable_user_id, created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7, $8, $9, $10, $11, NULL, $12)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
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
        .fetch_one(self.pool.as_ref())
        .await?;

        Notification::try_from(row)
    }

    async fn get_notification(&self, id: i64, scope_user: &str) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE id = $1 AND (is_global OR user_id = $2)"
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
             WHERE (is_global OR user_id = $1) \
               AND ($2::BOOLEAN IS NULL OR is_read = $2) \
               AND ($3::TEXT IS NULL OR category = $3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
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
            WHERE NOT is_read AND (is_global OR user_id = $1)
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
            SET is_read = TRUE, updated_at = GREATEST($1, created_at + 1)
            WHERE id = $2 AND (is_global OR user_id = $3)
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
            SET is_read = TRUE, updated_at = GREATEST($1, created_at + 1)
            WHERE NOT is_read AND (is_global OR user_id = $2)
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
            WHERE id = $1 AND (is_global OR user_id = $2)
            "#,
        )
        .bind(id)
        .bind(scope_user)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_notifications_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
            VALUES ($1, 1, $2)
            ON CONFLICT (id) DO UPDATE SET
                response_count = surveys.response_count + 1,
                updated_at = EXCLUDED.updated_at
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
                COUNT(DISTINCT respondent_id) FILTER (WHERE status = 'in_progress')
                    AS active_respondents,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_responses,
                AVG(rating)::FLOAT8 AS average_rating,
                AVG(completion_time_secs)::FLOAT8 AS average_completion_time
            FROM survey_responses
            WHERE survey_id = $1
            "#,
        )
        .bind(survey_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        summary.persisted_total =
            sqlx::query_scalar::<_, i64>("SELECT response_count FROM surveys WHERE id = $1")
                .bind(survey_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(summary)
    }

    async fn survey_daily_counts(&self, survey_id: &str) -> Result<Vec<DailyCount>> {
        let counts = sqlx::query_as::<_, DailyCount>(
            r#"
            SELECT to_char(to_timestamp(created_at / 1000.0) AT TIME ZONE 'UTC', 'YYYY-MM-DD')
                       AS date,
                   COUNT(*) AS count
            FROM survey_responses
            WHERE survey_id = $1
            GROUP BY 1
            ORDER BY 1
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
            SELECT 'age'::TEXT AS dimension, COALESCE(age_group, 'unknown') AS value,
                   COUNT(*) AS count
            FROM survey_responses WHERE survey_id = $1
            GROUP BY 2
            UNION ALL
            SELECT 'gender'::TEXT, COALESCE(gender, 'unknown'), COUNT(*)
            FROM survey_responses WHERE survey_id = $1
            GROUP BY 2
            UNION ALL
            SELECT 'region'::TEXT, COALESCE(region, 'unknown'), COUNT(*)
            FROM survey_responses WHERE survey_id = $1
            GROUP BY 2
            "#,
        )
        .bind(survey_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counts)
    }
}
