pub mod api;
pub mod config;
pub mod context;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod storage;
