//! Per-endpoint request latency and error tracking

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Caller-side description of a request as it starts
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub route: String,
    pub user_id: Option<String>,
    pub ip: Option<IpAddr>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            user_id: None,
            ip: None,
        }
    }

    /// `METHOD route`, the key used for endpoint metrics
    pub fn endpoint_key(&self) -> String {
        format!("{} {}", self.method, self.route)
    }
}

#[derive(Debug)]
struct ActiveRequest {
    info: RequestInfo,
    started: Instant,
}

/// Aggregate counters for one endpoint. Durations are milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetric {
    pub count: u64,
    pub total_duration: f64,
    pub average_duration: f64,
    pub slowest_request: f64,
    pub last_request: Option<DateTime<Utc>>,
    pub errors: u64,
}

impl EndpointMetric {
    fn record(&mut self, duration_ms: f64, status: u16) {
        self.count += 1;
        self.total_duration += duration_ms;
        self.average_duration = self.total_duration / self.count as f64;
        if duration_ms > self.slowest_request {
            self.slowest_request = duration_ms;
        }
        self.last_request = Some(Utc::now());
        if status >= 400 {
            self.errors += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: f64,
    #[serde(skip)]
    total_duration: f64,
}

impl OverallMetrics {
    fn record(&mut self, duration_ms: f64, status: u16) {
        self.total_requests += 1;
        if status >= 400 {
            self.failed_requests += 1;
        } else {
            self.successful_requests += 1;
        }
        self.total_duration += duration_ms;
        self.average_response_time = self.total_duration / self.total_requests as f64;
    }
}

/// One finished request, kept in the recent-requests ring buffer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRequest {
    pub request_id: String,
    pub method: String,
    pub route: String,
    pub status: u16,
    pub duration: f64,
    pub user_id: Option<String>,
    pub ip: Option<IpAddr>,
    pub timestamp: DateTime<Utc>,
}

pub struct RequestTracker {
    active: DashMap<String, ActiveRequest>,
    endpoints: DashMap<String, EndpointMetric>,
    overall: Mutex<OverallMetrics>,
    recent: Mutex<VecDeque<CompletedRequest>>,
    recent_capacity: usize,
    max_active: usize,
    active_ttl: Duration,
}

impl RequestTracker {
    pub fn new(recent_capacity: usize, max_active: usize, active_ttl: Duration) -> Self {
        Self {
            active: DashMap::new(),
            endpoints: DashMap::new(),
            overall: Mutex::new(OverallMetrics::default()),
            recent: Mutex::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity,
            max_active,
            active_ttl,
        }
    }

    /// Record the start of a request. Returns false when the active map is
    /// at its cap and the request will not be tracked.
    pub fn track_request_start(&self, info: RequestInfo, request_id: impl Into<String>) -> bool {
        if self.active.len() >= self.max_active {
            warn!(
                limit = self.max_active,
                route = %info.route,
                "Active request map full, request not tracked"
            );
            return false;
        }

        self.active.insert(
            request_id.into(),
            ActiveRequest {
                info,
                started: Instant::now(),
            },
        );
        true
    }

    /// Complete a request. Unknown ids are ignored and return `None`;
    /// otherwise the measured duration in milliseconds is returned.
    pub fn track_request_end(&self, request_id: &str, status: u16) -> Option<f64> {
        let (request_id, active) = self.active.remove(request_id)?;
        let duration_ms = active.started.elapsed().as_micros() as f64 / 1000.0;

        self.endpoints
            .entry(active.info.endpoint_key())
            .or_default()
            .record(duration_ms, status);

        self.overall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(duration_ms, status);

        let completed = CompletedRequest {
            request_id,
            method: active.info.method,
            route: active.info.route,
            status,
            duration: duration_ms,
            user_id: active.info.user_id,
            ip: active.info.ip,
            timestamp: Utc::now(),
        };

        if self.recent_capacity > 0 {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            while recent.len() >= self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(completed);
        }

        Some(duration_ms)
    }

    /// Drop active entries older than the configured TTL
    pub fn reap_stale(&self) -> usize {
        let ttl = self.active_ttl;
        let before = self.active.len();
        self.active.retain(|_, request| request.started.elapsed() <= ttl);
        let reaped = before.saturating_sub(self.active.len());
        if reaped > 0 {
            debug!(reaped, "Stale active requests reaped");
        }
        reaped
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn endpoint(&self, method: &str, route: &str) -> Option<EndpointMetric> {
        self.endpoints
            .get(&format!("{method} {route}"))
            .map(|entry| entry.clone())
    }

    pub fn endpoints(&self) -> BTreeMap<String, EndpointMetric> {
        self.endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn overall(&self) -> OverallMetrics {
        self.overall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent first
    pub fn recent_requests(&self) -> Vec<CompletedRequest> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Start a new epoch: endpoint, overall and recent data are cleared.
    /// In-flight requests stay tracked.
    pub fn reset(&self) {
        self.endpoints.clear();
        *self.overall.lock().unwrap_or_else(PoisonError::into_inner) = OverallMetrics::default();
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
