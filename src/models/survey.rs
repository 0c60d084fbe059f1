use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Completed,
    InProgress,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Completed => "completed",
            ResponseStatus::InProgress => "in_progress",
        }
    }
}

impl FromStr for ResponseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ResponseStatus::Completed),
            "in_progress" => Ok(ResponseStatus::InProgress),
            other => Err(anyhow!("unknown response status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    #[serde(default)]
    pub age_group: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Survey response as submitted by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponseInput {
    pub respondent_id: String,
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub completion_time_secs: Option<i64>,
    #[serde(default)]
    pub demographics: Demographics,
}

/// A survey response bound to its survey and receive time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponseRecord {
    pub survey_id: String,
    pub respondent_id: String,
    pub status: ResponseStatus,
    pub rating: Option<f64>,
    pub completion_time_secs: Option<i64>,
    pub demographics: Demographics,
    /// Unix milliseconds
    pub created_at: i64,
}

impl SurveyResponseRecord {
    pub fn from_input(survey_id: &str, input: SurveyResponseInput, created_at: i64) -> Self {
        Self {
            survey_id: survey_id.to_string(),
            respondent_id: input.respondent_id,
            status: input.status,
            rating: input.rating,
            completion_time_secs: input.completion_time_secs,
            demographics: input.demographics,
            created_at,
        }
    }
}

/// Aggregates computed by the store for a single survey
#[derive(Debug, Clone, Default, FromRow)]
pub struct SurveySummary {
    /// Counter maintained on the survey itself, when the survey row exists
    #[sqlx(default)]
    pub persisted_total: Option<i64>,
    pub row_total: i64,
    pub unique_respondents: i64,
    pub active_respondents: i64,
    pub completed_responses: i64,
    pub average_rating: Option<f64>,
    pub average_completion_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DemographicCount {
    /// One of `age`, `gender`, `region`
    pub dimension: String,
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemographicBreakdown {
    pub age: BTreeMap<String, i64>,
    pub gender: BTreeMap<String, i64>,
    pub region: BTreeMap<String, i64>,
}

impl DemographicBreakdown {
    pub fn from_counts(counts: &[DemographicCount]) -> Self {
        let mut breakdown = Self::default();
        for entry in counts {
            let target = match entry.dimension.as_str() {
                "age" => &mut breakdown.age,
                "gender" => &mut breakdown.gender,
                "region" => &mut breakdown.region,
                _ => continue,
            };
            *target.entry(entry.value.clone()).or_insert(0) += entry.count;
        }
        breakdown
    }
}

/// In-memory response-rate counters keyed by calendar bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseRates {
    pub hourly: BTreeMap<String, u64>,
    pub daily: BTreeMap<String, u64>,
    pub weekly: BTreeMap<String, u64>,
}

/// Point-in-time aggregate for one survey
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyAnalytics {
    pub survey_id: String,
    pub total_responses: i64,
    pub unique_respondents: i64,
    pub active_respondents: i64,
    /// Percentage of responses that are completed (0-100)
    pub completion_rate: f64,
    pub average_rating: f64,
    pub average_completion_time: f64,
    pub responses_by_date: BTreeMap<String, i64>,
    pub demographics: DemographicBreakdown,
    pub response_rates: ResponseRates,
    pub last_updated: DateTime<Utc>,
}

impl SurveyAnalytics {
    pub fn from_parts(
        survey_id: &str,
        summary: &SurveySummary,
        daily: &[DailyCount],
        demographics: &[DemographicCount],
        response_rates: ResponseRates,
    ) -> Self {
        let total_responses = summary.persisted_total.unwrap_or(summary.row_total);
        let completion_rate = if total_responses > 0 {
            summary.completed_responses as f64 / total_responses as f64 * 100.0
        } else {
            0.0
        };

        Self {
            survey_id: survey_id.to_string(),
            total_responses,
            unique_respondents: summary.unique_respondents,
            active_respondents: summary.active_respondents,
            completion_rate,
            average_rating: summary.average_rating.unwrap_or(0.0),
            average_completion_time: summary.average_completion_time.unwrap_or(0.0),
            responses_by_date: daily.iter().map(|d| (d.date.clone(), d.count)).collect(),
            demographics: DemographicBreakdown::from_counts(demographics),
            response_rates,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_prefers_persisted_count() {
        let summary = SurveySummary {
            persisted_total: Some(12),
            row_total: 10,
            completed_responses: 6,
            ..Default::default()
        };

        let analytics = SurveyAnalytics::from_parts("s1", &summary, &[], &[], ResponseRates::default());
        assert_eq!(analytics.total_responses, 12);
        assert!((analytics.completion_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_total_falls_back_to_row_count() {
        let summary = SurveySummary {
            persisted_total: None,
            row_total: 4,
            completed_responses: 1,
            ..Default::default()
        };

        let analytics = SurveyAnalytics::from_parts("s1", &summary, &[], &[], ResponseRates::default());
        assert_eq!(analytics.total_responses, 4);
        assert!((analytics.completion_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_survey_has_zero_completion_rate() {
        let analytics = SurveyAnalytics::from_parts(
            "s1",
            &SurveySummary::default(),
            &[],
            &[],
            ResponseRates::default(),
        );
        assert_eq!(analytics.total_responses, 0);
        assert_eq!(analytics.completion_rate, 0.0);
    }

    #[test]
    fn test_demographic_breakdown_groups_by_dimension() {
        let counts = vec![
            DemographicCount {
                dimension: "age".to_string(),
                value: "25-34".to_string(),
                count: 3,
            },
            DemographicCount {
                dimension: "gender".to_string(),
                value: "female".to_string(),
                count: 2,
            },
            DemographicCount {
                dimension: "region".to_string(),
                value: "EU".to_string(),
                count: 5,
            },
            DemographicCount {
                dimension: "shoe_size".to_string(),
                value: "42".to_string(),
                count: 1,
            },
        ];

        let breakdown = DemographicBreakdown::from_counts(&counts);
        assert_eq!(breakdown.age.get("25-34"), Some(&3));
        assert_eq!(breakdown.gender.get("female"), Some(&2));
        assert_eq!(breakdown.region.get("EU"), Some(&5));
    }
}
