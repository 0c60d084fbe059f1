//! Incremental survey analytics
//!
//! Responses are buffered per survey and counted into hourly/daily/weekly
//! buckets as they arrive. Every Nth response for a survey re-runs the
//! aggregation queries and replaces the cached snapshot.

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use moka::sync::Cache as SyncCache;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

use crate::config::MetricsConfig;
use crate::models::{millis_to_datetime, ResponseRates, SurveyAnalytics, SurveyResponseRecord};
use crate::storage::Storage;

/// Calendar bucket keys for a response timestamp
pub fn bucket_keys(at: DateTime<Utc>) -> (String, String, String) {
    (
        at.format("%Y-%m-%dT%H").to_string(),
        at.format("%Y-%m-%d").to_string(),
        at.format("%G-W%V").to_string(),
    )
}

/// How far back each response-rate granularity is kept
#[derive(Debug, Clone, Copy)]
pub struct RateHorizons {
    pub hourly: TimeDelta,
    pub daily: TimeDelta,
    pub weekly: TimeDelta,
}

impl RateHorizons {
    pub fn from_config(config: &MetricsConfig) -> Self {
        let clamp = |delta: Option<TimeDelta>| delta.unwrap_or(TimeDelta::MAX).max(TimeDelta::zero());
        Self {
            hourly: clamp(TimeDelta::try_hours(config.hourly_rate_horizon_hours)),
            daily: clamp(TimeDelta::try_days(config.daily_rate_horizon_days)),
            weekly: clamp(TimeDelta::try_weeks(config.weekly_rate_horizon_weeks)),
        }
    }
}

/// Count one response into its buckets and drop buckets that fell out of
/// their horizon relative to that response. Keys sort chronologically.
pub fn record_rate(rates: &mut ResponseRates, at: DateTime<Utc>, horizons: &RateHorizons) {
    let (hour, day, week) = bucket_keys(at);
    *rates.hourly.entry(hour).or_insert(0) += 1;
    *rates.daily.entry(day).or_insert(0) += 1;
    *rates.weekly.entry(week).or_insert(0) += 1;

    prune_before(&mut rates.hourly, at, horizons.hourly, |t| bucket_keys(t).0);
    prune_before(&mut rates.daily, at, horizons.daily, |t| bucket_keys(t).1);
    prune_before(&mut rates.weekly, at, horizons.weekly, |t| bucket_keys(t).2);
}

fn prune_before(
    buckets: &mut BTreeMap<String, u64>,
    at: DateTime<Utc>,
    horizon: TimeDelta,
    key: impl Fn(DateTime<Utc>) -> String,
) {
    if let Some(cutoff) = at.checked_sub_signed(horizon) {
        *buckets = buckets.split_off(&key(cutoff));
    }
}

/// Live state for one survey
#[derive(Debug, Default)]
struct SurveyState {
    recent: VecDeque<SurveyResponseRecord>,
    rates: ResponseRates,
    observed: u64,
}

pub struct SurveyAnalyticsTracker {
    storage: Arc<dyn Storage>,
    surveys: SyncCache<String, Arc<Mutex<SurveyState>>>,
    snapshots: Cache<String, Arc<SurveyAnalytics>>,
    horizons: RateHorizons,
    buffer_capacity: usize,
    batch_size: u64,
}

impl SurveyAnalyticsTracker {
    pub fn new(storage: Arc<dyn Storage>, config: &MetricsConfig) -> Self {
        Self {
            storage,
            surveys: SyncCache::builder()
                .max_capacity(config.max_tracked_surveys)
                .build(),
            snapshots: Cache::builder()
                .max_capacity(config.analytics_cache_capacity)
                .build(),
            horizons: RateHorizons::from_config(config),
            buffer_capacity: config.recent_responses_capacity,
            batch_size: config.aggregation_batch_size.max(1),
        }
    }

    /// Buffer a response and update rate counters. Returns the fresh
    /// snapshot when this response triggered a re-aggregation.
    pub async fn track_survey_response(
        &self,
        survey_id: &str,
        response: SurveyResponseRecord,
    ) -> Option<Arc<SurveyAnalytics>> {
        let state = self
            .surveys
            .get_with(survey_id.to_string(), Default::default);

        let observed = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            record_rate(
                &mut state.rates,
                millis_to_datetime(response.created_at),
                &self.horizons,
            );

            if self.buffer_capacity > 0 {
                while state.recent.len() >= self.buffer_capacity {
                    state.recent.pop_front();
                }
                state.recent.push_back(response);
            }

            state.observed += 1;
            state.observed
        };

        if observed % self.batch_size == 0 {
            debug!(survey_id, observed, "Batch threshold reached, aggregating");
            return self.aggregate_survey_data(survey_id).await;
        }
        None
    }

    /// Recompute the snapshot from the store and cache it. On a query
    /// failure the previous snapshot, if any, is returned unchanged.
    pub async fn aggregate_survey_data(&self, survey_id: &str) -> Option<Arc<SurveyAnalytics>> {
        let queries = tokio::try_join!(
            self.storage.survey_summary(survey_id),
            self.storage.survey_daily_counts(survey_id),
            self.storage.survey_demographics(survey_id),
        );

        match queries {
            Ok((summary, daily, demographics)) => {
                let rates = self.response_rates(survey_id);
                let snapshot = Arc::new(SurveyAnalytics::from_parts(
                    survey_id,
                    &summary,
                    &daily,
                    &demographics,
                    rates,
                ));
                self.snapshots
                    .insert(survey_id.to_string(), Arc::clone(&snapshot))
                    .await;
                Some(snapshot)
            }
            Err(e) => {
                error!(survey_id, error = %e, "Survey aggregation failed");
                self.snapshots.get(survey_id).await
            }
        }
    }

    /// Last computed snapshot, without touching the store
    pub async fn get_cached_survey_analytics(&self, survey_id: &str) -> Option<Arc<SurveyAnalytics>> {
        self.snapshots.get(survey_id).await
    }

    /// Force a recomputation
    pub async fn get_real_time_survey_analytics(
        &self,
        survey_id: &str,
    ) -> Option<Arc<SurveyAnalytics>> {
        self.aggregate_survey_data(survey_id).await
    }

    pub fn response_rates(&self, survey_id: &str) -> ResponseRates {
        self.surveys
            .get(survey_id)
            .map(|state| {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .rates
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Buffered responses, oldest first
    pub fn recent_responses(&self, survey_id: &str) -> Vec<SurveyResponseRecord> {
        self.surveys
            .get(survey_id)
            .map(|state| {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recent
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tracked_surveys(&self) -> u64 {
        self.surveys.run_pending_tasks();
        self.surveys.entry_count()
    }

    pub fn clear(&self) {
        self.surveys.invalidate_all();
        self.snapshots.invalidate_all();
    }
}
