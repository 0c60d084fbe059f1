use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::AppContext;
use crate::metrics::RequestInfo;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Time every request against its matched route
pub async fn track_requests(
    State(ctx): State<Arc<AppContext>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let info = RequestInfo {
        method: request.method().to_string(),
        route,
        user_id: request
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        ip: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
    };

    let request_id = Uuid::new_v4().to_string();
    let tracked = ctx.metrics.track_request_start(info, request_id.clone());

    let mut response = next.run(request).await;

    if tracked {
        ctx.metrics
            .track_request_end(&request_id, response.status().as_u16());
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
