//! HTTP and websocket surface

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod ws;

pub use handlers::{ApiError, ErrorResponse};
pub use routes::create_api_router;
