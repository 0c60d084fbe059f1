use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::context::AppContext;

use super::handlers::{
    cached_survey_analytics, create_notification, delete_notification, health_check,
    hub_stats, list_notifications, mark_all_read, mark_read, performance_metrics,
    realtime_survey_analytics, record_survey_response, reset_metrics, system_health,
    unread_count,
};
use super::middleware::track_requests;
use super::ws::ws_upgrade;

pub fn create_api_router(ctx: Arc<AppContext>) -> Router {
    let api_routes = Router::new()
        .route(
            "/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", patch(mark_all_read))
        .route("/notifications/{id}/read", patch(mark_read))
        .route("/notifications/{id}", delete(delete_notification))
        .route("/surveys/{id}/responses", post(record_survey_response))
        .route("/surveys/{id}/analytics", get(cached_survey_analytics))
        .route(
            "/surveys/{id}/analytics/realtime",
            get(realtime_survey_analytics),
        )
        .route("/metrics/performance", get(performance_metrics))
        .route("/metrics/health", get(system_health))
        .route("/metrics/reset", post(reset_metrics))
        .route("/hub/stats", get(hub_stats))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&ctx),
            track_requests,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
