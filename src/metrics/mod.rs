//! In-process metrics: request latency, survey analytics and host load

pub mod request;
pub mod survey;
pub mod system;

pub use request::{CompletedRequest, EndpointMetric, OverallMetrics, RequestInfo, RequestTracker};
pub use survey::{RateHorizons, SurveyAnalyticsTracker};
pub use system::{evaluate_health, HealthStatus, SystemHealth, SystemLoad};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

use crate::config::MetricsConfig;
use crate::hub::PeriodicTask;
use crate::models::{SurveyAnalytics, SurveyResponseRecord};
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub endpoints: BTreeMap<String, EndpointMetric>,
    pub overall: OverallMetrics,
    pub active_requests: usize,
    pub recent_requests: Vec<CompletedRequest>,
    pub system_load: Option<SystemLoad>,
}

pub struct MetricsAggregator {
    config: MetricsConfig,
    requests: RequestTracker,
    surveys: SurveyAnalyticsTracker,
    system: Mutex<System>,
    system_load: RwLock<Option<SystemLoad>>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig, storage: Arc<dyn Storage>) -> Self {
        let requests = RequestTracker::new(
            config.recent_requests_capacity,
            config.max_active_requests,
            config.active_request_ttl(),
        );
        let surveys = SurveyAnalyticsTracker::new(storage, &config);

        Self {
            config,
            requests,
            surveys,
            system: Mutex::new(System::new()),
            system_load: RwLock::new(None),
        }
    }

    pub fn requests(&self) -> &RequestTracker {
        &self.requests
    }

    pub fn surveys(&self) -> &SurveyAnalyticsTracker {
        &self.surveys
    }

    /// Responses per survey between re-aggregations
    pub fn batch_size(&self) -> u64 {
        self.config.aggregation_batch_size.max(1)
    }

    pub fn track_request_start(&self, info: RequestInfo, request_id: impl Into<String>) -> bool {
        self.requests.track_request_start(info, request_id)
    }

    pub fn track_request_end(&self, request_id: &str, status: u16) -> Option<f64> {
        self.requests.track_request_end(request_id, status)
    }

    pub async fn track_survey_response(
        &self,
        survey_id: &str,
        response: SurveyResponseRecord,
    ) -> Option<Arc<SurveyAnalytics>> {
        self.surveys.track_survey_response(survey_id, response).await
    }

    pub async fn get_cached_survey_analytics(&self, survey_id: &str) -> Option<Arc<SurveyAnalytics>> {
        self.surveys.get_cached_survey_analytics(survey_id).await
    }

    pub async fn get_real_time_survey_analytics(
        &self,
        survey_id: &str,
    ) -> Option<Arc<SurveyAnalytics>> {
        self.surveys.get_real_time_survey_analytics(survey_id).await
    }

    /// Take a fresh host sample and store it as the current snapshot
    pub fn sample_system(&self) -> SystemLoad {
        let load = {
            let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system::sample(&mut sys)
        };
        *self
            .system_load
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(load.clone());
        load
    }

    pub fn system_load(&self) -> Option<SystemLoad> {
        self.system_load
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Health verdict from the last sample, sampling now if none exists yet
    pub fn get_system_health(&self) -> SystemHealth {
        let load = match self.system_load() {
            Some(load) => load,
            None => self.sample_system(),
        };
        evaluate_health(&load)
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            endpoints: self.requests.endpoints(),
            overall: self.requests.overall(),
            active_requests: self.requests.active_count(),
            recent_requests: self.requests.recent_requests(),
            system_load: self.system_load(),
        }
    }

    /// Clear request metrics. Survey snapshots and the load sample stay.
    pub fn reset(&self) {
        self.requests.reset();
        debug!("Request metrics reset");
    }

    /// Periodic host sampling plus stale active-request reaping
    pub fn start_sampler(self: &Arc<Self>) -> PeriodicTask {
        let metrics = Arc::clone(self);
        self.sample_system();
        PeriodicTask::spawn(
            "metrics-sampler",
            Duration::from_secs(self.config.sample_interval_secs),
            move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    metrics.sample_system();
                    metrics.requests.reap_stale();
                }
            },
        )
    }
}
