//! Notification hub: durable records pushed to live connections

pub mod service;
pub mod tracker;

pub use service::{NotificationError, NotificationService};
pub use tracker::ActivityTracker;
