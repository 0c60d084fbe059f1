use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub hub: HubConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub notifications: NotificationConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Production-like environments enforce the per-IP registry cap.
    pub fn is_production_like(self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            "test" => Environment::Test,
            "development" | "dev" => Environment::Development,
            other => {
                tracing::warn!(
                    "Unknown APP_ENV '{other}', falling back to 'development'. Supported values: development, test, staging, production"
                );
                Environment::Development
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection registry limits and heartbeat cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum number of live connections across all clients
    pub pool_capacity: usize,
    /// Maximum live connections per source IP (registry-side)
    pub max_connections_per_ip: usize,
    /// Whether the per-IP registry cap is enforced
    pub enforce_ip_limit: bool,
    pub heartbeat_interval_secs: u64,
    pub idle_sweep_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 1000,
            max_connections_per_ip: 10,
            enforce_ip_limit: false,
            heartbeat_interval_secs: 15,
            idle_sweep_interval_secs: 60,
            idle_timeout_secs: 300,
        }
    }
}

/// IP-keyed admission and message throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_connections_per_ip: u32,
    pub max_messages_per_window: u32,
    pub message_window_secs: u64,
    pub connection_block_secs: u64,
    pub message_block_secs: u64,
    pub whitelist: Vec<IpAddr>,
}

impl RateLimitConfig {
    pub fn message_window(&self) -> Duration {
        Duration::from_secs(self.message_window_secs)
    }

    pub fn connection_block(&self) -> Duration {
        Duration::from_secs(self.connection_block_secs)
    }

    pub fn message_block(&self) -> Duration {
        Duration::from_secs(self.message_block_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 5,
            max_messages_per_window: 100,
            message_window_secs: 60,
            connection_block_secs: 300,
            message_block_secs: 120,
            whitelist: vec![
                IpAddr::from([127, 0, 0, 1]),
                IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1]),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Trust nothing, always use the socket address
    None,
    /// RFC 7239 `Forwarded` and `X-Forwarded-For`
    Standard,
    /// `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

/// Upper bound for notification expiry and retention windows
pub const MAX_NOTIFICATION_DAYS: i64 = 36_500;

/// Reject day counts outside `0..=MAX_NOTIFICATION_DAYS`
pub fn check_day_count(key: &str, days: i64) -> anyhow::Result<i64> {
    if !(0..=MAX_NOTIFICATION_DAYS).contains(&days) {
        anyhow::bail!("{key} must be between 0 and {MAX_NOTIFICATION_DAYS} days, got {days}");
    }
    Ok(days)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Recipient used for global notifications
    pub admin_user_id: String,
    pub expiry_days: i64,
    pub retention_days: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            admin_user_id: "admin".to_string(),
            expiry_days: 30,
            retention_days: 30,
            cleanup_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub sample_interval_secs: u64,
    pub recent_requests_capacity: usize,
    pub recent_responses_capacity: usize,
    /// Re-aggregate a survey every Nth tracked response
    pub aggregation_batch_size: u64,
    pub active_request_ttl_secs: u64,
    pub max_active_requests: usize,
    pub analytics_cache_capacity: u64,
    /// Surveys with live buffers and rate counters; least used are evicted
    pub max_tracked_surveys: u64,
    pub hourly_rate_horizon_hours: i64,
    pub daily_rate_horizon_days: i64,
    pub weekly_rate_horizon_weeks: i64,
}

impl MetricsConfig {
    pub fn active_request_ttl(&self) -> Duration {
        Duration::from_secs(self.active_request_ttl_secs)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            recent_requests_capacity: 100,
            recent_responses_capacity: 100,
            aggregation_batch_size: 5,
            active_request_ttl_secs: 300,
            max_active_requests: 10_000,
            analytics_cache_capacity: 1000,
            max_tracked_surveys: 1000,
            hourly_rate_horizon_hours: 48,
            daily_rate_horizon_days: 90,
            weekly_rate_horizon_weeks: 52,
        }
    }
}

/// Read an environment variable, falling back to `default` when unset.
/// A value that is set but fails to parse is an error.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        _ => Ok(default),
    }
}

/// Parse a comma-separated list, skipping blanks
fn parse_list<T>(key: &str, raw: &str) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .with_context(|| format!("{key} contains an invalid entry: '{s}'"))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let environment =
            Environment::parse(&std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()));

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./pulse.db?mode=rwc".to_string());

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_or("API_PORT", 8080u16)?;

        let hub_defaults = HubConfig::default();
        let hub = HubConfig {
            pool_capacity: env_or("WS_MAX_CONNECTIONS", hub_defaults.pool_capacity)?,
            max_connections_per_ip: env_or(
                "WS_MAX_CONNECTIONS_PER_IP",
                hub_defaults.max_connections_per_ip,
            )?,
            enforce_ip_limit: environment.is_production_like(),
            heartbeat_interval_secs: env_or(
                "WS_HEARTBEAT_INTERVAL_SECS",
                hub_defaults.heartbeat_interval_secs,
            )?,
            idle_sweep_interval_secs: env_or(
                "WS_IDLE_SWEEP_INTERVAL_SECS",
                hub_defaults.idle_sweep_interval_secs,
            )?,
            idle_timeout_secs: env_or("WS_IDLE_TIMEOUT_SECS", hub_defaults.idle_timeout_secs)?,
        };

        let limit_defaults = RateLimitConfig::default();
        let whitelist = match std::env::var("RATE_LIMIT_WHITELIST") {
            Ok(raw) => parse_list::<IpAddr>("RATE_LIMIT_WHITELIST", &raw)?,
            Err(_) => limit_defaults.whitelist.clone(),
        };
        let rate_limit = RateLimitConfig {
            max_connections_per_ip: env_or(
                "RATE_LIMIT_MAX_CONNECTIONS_PER_IP",
                limit_defaults.max_connections_per_ip,
            )?,
            max_messages_per_window: env_or(
                "RATE_LIMIT_MAX_MESSAGES",
                limit_defaults.max_messages_per_window,
            )?,
            message_window_secs: env_or(
                "RATE_LIMIT_WINDOW_SECS",
                limit_defaults.message_window_secs,
            )?,
            connection_block_secs: env_or(
                "RATE_LIMIT_CONNECTION_BLOCK_SECS",
                limit_defaults.connection_block_secs,
            )?,
            message_block_secs: env_or(
                "RATE_LIMIT_MESSAGE_BLOCK_SECS",
                limit_defaults.message_block_secs,
            )?,
            whitelist,
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };
        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(raw) => parse_list::<IpNet>("TRUSTED_PROXIES", &raw)?,
            Err(_) => Vec::new(),
        };
        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let notification_defaults = NotificationConfig::default();
        let notifications = NotificationConfig {
            admin_user_id: std::env::var("NOTIFICATION_ADMIN_USER_ID")
                .unwrap_or(notification_defaults.admin_user_id),
            expiry_days: check_day_count(
                "NOTIFICATION_EXPIRY_DAYS",
                env_or("NOTIFICATION_EXPIRY_DAYS", notification_defaults.expiry_days)?,
            )?,
            retention_days: check_day_count(
                "NOTIFICATION_RETENTION_DAYS",
                env_or(
                    "NOTIFICATION_RETENTION_DAYS",
                    notification_defaults.retention_days,
                )?,
            )?,
            cleanup_interval_secs: env_or(
                "NOTIFICATION_CLEANUP_INTERVAL_SECS",
                notification_defaults.cleanup_interval_secs,
            )?,
        };

        let metrics_defaults = MetricsConfig::default();
        let metrics = MetricsConfig {
            sample_interval_secs: env_or(
                "METRICS_SAMPLE_INTERVAL_SECS",
                metrics_defaults.sample_interval_secs,
            )?,
            recent_requests_capacity: env_or(
                "METRICS_RECENT_REQUESTS",
                metrics_defaults.recent_requests_capacity,
            )?,
            recent_responses_capacity: env_or(
                "METRICS_RECENT_RESPONSES",
                metrics_defaults.recent_responses_capacity,
            )?,
            aggregation_batch_size: env_or(
                "METRICS_AGGREGATION_BATCH",
                metrics_defaults.aggregation_batch_size,
            )?,
            active_request_ttl_secs: env_or(
                "METRICS_ACTIVE_REQUEST_TTL_SECS",
                metrics_defaults.active_request_ttl_secs,
            )?,
            max_active_requests: env_or(
                "METRICS_MAX_ACTIVE_REQUESTS",
                metrics_defaults.max_active_requests,
            )?,
            analytics_cache_capacity: env_or(
                "METRICS_ANALYTICS_CACHE_CAPACITY",
                metrics_defaults.analytics_cache_capacity,
            )?,
            max_tracked_surveys: env_or(
                "METRICS_MAX_TRACKED_SURVEYS",
                metrics_defaults.max_tracked_surveys,
            )?,
            hourly_rate_horizon_hours: env_or(
                "METRICS_HOURLY_RATE_HORIZON_HOURS",
                metrics_defaults.hourly_rate_horizon_hours,
            )?,
            daily_rate_horizon_days: env_or(
                "METRICS_DAILY_RATE_HORIZON_DAYS",
                metrics_defaults.daily_rate_horizon_days,
            )?,
            weekly_rate_horizon_weeks: env_or(
                "METRICS_WEEKLY_RATE_HORIZON_WEEKS",
                metrics_defaults.weekly_rate_horizon_weeks,
            )?,
        };

        Ok(Config {
            environment,
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10u32)?,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            hub,
            rate_limit,
            proxy: ProxyConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            notifications,
            metrics,
        })
    }

    /// Configuration suitable for tests: in-memory SQLite and default limits
    pub fn for_tests() -> Self {
        Config {
            environment: Environment::Test,
            database: DatabaseConfig {
                backend: DatabaseBackend::Sqlite,
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            api_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            hub: HubConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            notifications: NotificationConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_skips_blanks() {
        let ips = parse_list::<IpAddr>("TEST", "10.0.0.1, ,::1,").unwrap();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0], "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_parse_list_rejects_garbage() {
        assert!(parse_list::<IpNet>("TEST", "10.0.0.0/8,not-a-cidr").is_err());
    }

    #[test]
    fn test_day_count_bounds() {
        assert_eq!(check_day_count("TEST", 0).unwrap(), 0);
        assert_eq!(check_day_count("TEST", MAX_NOTIFICATION_DAYS).unwrap(), MAX_NOTIFICATION_DAYS);
        assert!(check_day_count("TEST", -1).is_err());
        assert!(check_day_count("TEST", MAX_NOTIFICATION_DAYS + 1).is_err());
        assert!(check_day_count("TEST", i64::MAX / 1000).is_err());
    }

    #[test]
    fn test_environment_production_like() {
        assert!(Environment::parse("production").is_production_like());
        assert!(Environment::parse("STAGING").is_production_like());
        assert!(!Environment::parse("development").is_production_like());
        assert!(!Environment::parse("something-else").is_production_like());
    }
}
