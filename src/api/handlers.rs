use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::context::AppContext;
use crate::hub::{RateLimiterStats, RegistryStats};
use crate::metrics::{PerformanceMetrics, SystemHealth};
use crate::models::{
    now_millis, NewNotification, Notification, NotificationQuery, SurveyAnalytics,
    SurveyResponseInput, SurveyResponseRecord,
};
use crate::notifications::NotificationError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("too many connections from this address")]
    RateLimited,
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl From<NotificationError> for ApiError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::NotFound(id) => {
                ApiError::NotFound(format!("Notification {id} not found"))
            }
            NotificationError::InvalidMetadata(e) => ApiError::BadRequest(e.to_string()),
            e @ NotificationError::InvalidDays(_) => ApiError::BadRequest(e.to_string()),
            NotificationError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_notifications(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(ctx.notifications.get_notifications(&query).await?))
}

pub async fn create_notification(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<NewNotification>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title cannot be empty".to_string()));
    }
    let notification = ctx.notifications.create_notification(payload).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn unread_count(State(ctx): State<Arc<AppContext>>) -> ApiResult<Json<Value>> {
    let count = ctx.notifications.get_unread_count().await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn mark_read(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(ctx.notifications.mark_as_read(id).await?))
}

pub async fn mark_all_read(State(ctx): State<Arc<AppContext>>) -> ApiResult<Json<Value>> {
    let updated = ctx.notifications.mark_all_as_read().await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    ctx.notifications.delete_notification(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Persist a survey response, then feed it to analytics and announce it
pub async fn record_survey_response(
    State(ctx): State<Arc<AppContext>>,
    Path(survey_id): Path<String>,
    Json(input): Json<SurveyResponseInput>,
) -> ApiResult<StatusCode> {
    if input.respondent_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "respondentId cannot be empty".to_string(),
        ));
    }

    let record = SurveyResponseRecord::from_input(&survey_id, input, now_millis());
    ctx.storage.record_survey_response(&record).await?;

    // The response is stored; a failed notification must not fail the request
    if let Err(e) = ctx.activity.track_survey_response(record).await {
        error!(survey_id = %survey_id, error = %e, "Response notification failed");
    }

    Ok(StatusCode::ACCEPTED)
}

pub async fn cached_survey_analytics(
    State(ctx): State<Arc<AppContext>>,
    Path(survey_id): Path<String>,
) -> ApiResult<Json<Arc<SurveyAnalytics>>> {
    ctx.metrics
        .get_cached_survey_analytics(&survey_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No analytics cached for survey {survey_id}")))
}

pub async fn realtime_survey_analytics(
    State(ctx): State<Arc<AppContext>>,
    Path(survey_id): Path<String>,
) -> ApiResult<Json<Arc<SurveyAnalytics>>> {
    ctx.metrics
        .get_real_time_survey_analytics(&survey_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("analytics for {survey_id} unavailable")))
}

pub async fn performance_metrics(State(ctx): State<Arc<AppContext>>) -> Json<PerformanceMetrics> {
    Json(ctx.metrics.get_performance_metrics())
}

pub async fn system_health(State(ctx): State<Arc<AppContext>>) -> Json<SystemHealth> {
    Json(ctx.metrics.get_system_health())
}

pub async fn reset_metrics(State(ctx): State<Arc<AppContext>>) -> StatusCode {
    ctx.metrics.reset();
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
pub struct HubStats {
    pub registry: RegistryStats,
    pub limiter: RateLimiterStats,
}

pub async fn hub_stats(State(ctx): State<Arc<AppContext>>) -> Json<HubStats> {
    Json(HubStats {
        registry: ctx.registry.stats(),
        limiter: ctx.limiter.stats(),
    })
}
