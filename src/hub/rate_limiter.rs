//! IP-keyed admission and message throttling
//!
//! Connection admission and message throughput are tracked and escalated
//! independently: a burst of messages on one long-lived connection only ever
//! triggers message-level throttling, while connection floods are handled at
//! admission time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Until(Instant),
    Permanent,
}

impl Block {
    fn is_active(&self, now: Instant) -> bool {
        match self {
            Block::Until(expiry) => now < *expiry,
            Block::Permanent => true,
        }
    }
}

/// Per-source-address counters
#[derive(Debug, Clone)]
pub struct IpQuota {
    pub active_connections: u32,
    /// Live connections plus admissions rejected since the last accept/close
    pub connection_attempts: u32,
    pub message_count: u32,
    pub window_start: Instant,
    pub last_message: Option<Instant>,
    pub connection_block: Option<Block>,
    pub message_block: Option<Block>,
}

impl IpQuota {
    fn new(now: Instant) -> Self {
        Self {
            active_connections: 0,
            connection_attempts: 0,
            message_count: 0,
            window_start: now,
            last_message: None,
            connection_block: None,
            message_block: None,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.connection_block.is_some_and(|b| b.is_active(now))
            || self.message_block.is_some_and(|b| b.is_active(now))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub active_connections: u64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    whitelist: HashSet<IpAddr>,
    quotas: DashMap<IpAddr, IpQuota>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let whitelist = config.whitelist.iter().copied().collect();
        Self {
            config,
            whitelist,
            quotas: DashMap::new(),
        }
    }

    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist.contains(&ip)
    }

    /// Decide whether `ip` may open another connection. An accepted
    /// admission reserves a slot that must be released with
    /// [`RateLimiter::on_connection_closed`].
    pub fn check_connection_admission(&self, ip: IpAddr) -> bool {
        self.check_connection_admission_at(ip, Instant::now())
    }

    fn check_connection_admission_at(&self, ip: IpAddr, now: Instant) -> bool {
        if self.is_whitelisted(ip) {
            return true;
        }

        let mut quota = self.quotas.entry(ip).or_insert_with(|| IpQuota::new(now));

        match quota.connection_block {
            Some(block) if block.is_active(now) => {
                warn!(ip = %ip, "Connection rejected: IP is blocked");
                return false;
            }
            Some(_) => {
                info!(ip = %ip, "Connection block expired, unblocking IP");
                quota.connection_block = None;
                quota.connection_attempts = quota.active_connections;
            }
            None => {}
        }

        let max = self.config.max_connections_per_ip;
        if quota.active_connections >= max {
            quota.connection_attempts = quota.connection_attempts.saturating_add(1);
            if quota.connection_attempts >= max.saturating_mul(2) {
                quota.connection_block = Some(Block::Until(now + self.config.connection_block()));
                warn!(
                    ip = %ip,
                    attempts = quota.connection_attempts,
                    block_secs = self.config.connection_block_secs,
                    "Connection flood detected, blocking IP"
                );
            } else {
                warn!(
                    ip = %ip,
                    active = quota.active_connections,
                    limit = max,
                    "Connection rejected: per-IP limit reached"
                );
            }
            return false;
        }

        quota.active_connections += 1;
        quota.connection_attempts = quota.active_connections;
        true
    }

    /// Count one inbound message from `ip` against its window
    pub fn check_message_admission(&self, ip: IpAddr) -> bool {
        self.check_message_admission_at(ip, Instant::now())
    }

    fn check_message_admission_at(&self, ip: IpAddr, now: Instant) -> bool {
        if self.is_whitelisted(ip) {
            return true;
        }

        let mut quota = self.quotas.entry(ip).or_insert_with(|| IpQuota::new(now));

        match quota.message_block {
            Some(block) if block.is_active(now) => return false,
            Some(_) => {
                quota.message_block = None;
                quota.message_count = 0;
                quota.window_start = now;
            }
            None => {}
        }

        if now.duration_since(quota.window_start) >= self.config.message_window() {
            quota.message_count = 0;
            quota.window_start = now;
        }

        quota.message_count = quota.message_count.saturating_add(1);
        quota.last_message = Some(now);

        let max = self.config.max_messages_per_window;
        if quota.message_count > max {
            if f64::from(quota.message_count) >= f64::from(max) * 1.5 {
                quota.message_block = Some(Block::Until(now + self.config.message_block()));
                warn!(
                    ip = %ip,
                    messages = quota.message_count,
                    block_secs = self.config.message_block_secs,
                    "Message flood detected, blocking IP messages"
                );
            }
            return false;
        }

        true
    }

    /// Release the slot reserved by an accepted admission
    pub fn on_connection_closed(&self, ip: IpAddr) {
        let now = Instant::now();
        if let Entry::Occupied(mut entry) = self.quotas.entry(ip) {
            let remove = {
                let quota = entry.get_mut();
                quota.active_connections = quota.active_connections.saturating_sub(1);
                quota.connection_attempts = quota.active_connections;
                quota.active_connections == 0 && !quota.is_blocked(now)
            };
            if remove {
                entry.remove();
            }
        }
    }

    /// Block both connections and messages from `ip`; `None` blocks permanently
    pub fn block(&self, ip: IpAddr, duration: Option<Duration>) {
        let now = Instant::now();
        let block = match duration {
            Some(d) => Block::Until(now + d),
            None => Block::Permanent,
        };
        let mut quota = self.quotas.entry(ip).or_insert_with(|| IpQuota::new(now));
        quota.connection_block = Some(block);
        quota.message_block = Some(block);
        warn!(ip = %ip, ?duration, "IP blocked");
    }

    pub fn unblock(&self, ip: IpAddr) -> bool {
        match self.quotas.get_mut(&ip) {
            Some(mut quota) => {
                quota.connection_block = None;
                quota.message_block = None;
                quota.connection_attempts = quota.active_connections;
                info!(ip = %ip, "IP unblocked");
                true
            }
            None => false,
        }
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        self.quotas
            .get(&ip)
            .map(|quota| quota.is_blocked(now))
            .unwrap_or(false)
    }

    pub fn quota(&self, ip: IpAddr) -> Option<IpQuota> {
        self.quotas.get(&ip).map(|quota| quota.clone())
    }

    /// Drop records with no connections, no active block and an elapsed
    /// message window. Returns the number of records removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let window = self.config.message_window();
        let before = self.quotas.len();
        self.quotas.retain(|_, quota| {
            quota.active_connections > 0
                || quota.is_blocked(now)
                || now.duration_since(quota.window_start) < window
        });
        before.saturating_sub(self.quotas.len())
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut stats = RateLimiterStats::default();
        for entry in self.quotas.iter() {
            stats.tracked_ips += 1;
            stats.active_connections += u64::from(entry.active_connections);
            if entry.is_blocked(now) {
                stats.blocked_ips += 1;
            }
        }
        stats
    }

    pub fn clear(&self) {
        self.quotas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_connections: u32, max_messages: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_connections_per_ip: max_connections,
            max_messages_per_window: max_messages,
            message_window_secs: 60,
            connection_block_secs: 300,
            message_block_secs: 120,
            whitelist: vec!["10.0.0.1".parse().unwrap()],
        })
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_limit_and_flood_block() {
        let limiter = limiter(5, 100);
        let addr = ip("1.2.3.4");

        for _ in 0..5 {
            assert!(limiter.check_connection_admission(addr));
        }

        // Attempts 6 through 9 are rejected without blocking
        for _ in 0..4 {
            assert!(!limiter.check_connection_admission(addr));
            assert!(!limiter.is_blocked(addr));
        }

        // The 10th attempt reaches 2x the limit
        assert!(!limiter.check_connection_admission(addr));
        assert!(limiter.is_blocked(addr));

        for _ in 0..5 {
            limiter.on_connection_closed(addr);
        }
        // Blocked records survive a zero connection count
        assert!(limiter.quota(addr).is_some());
        assert!(!limiter.check_connection_admission(addr));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!limiter.check_connection_admission(addr));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check_connection_admission(addr));
        assert!(!limiter.is_blocked(addr));
    }

    #[tokio::test]
    async fn test_whitelisted_ip_always_passes() {
        let limiter = limiter(1, 1);
        let addr = ip("10.0.0.1");

        for _ in 0..50 {
            assert!(limiter.check_connection_admission(addr));
            assert!(limiter.check_message_admission(addr));
        }
        assert!(limiter.quota(addr).is_none());
    }

    #[tokio::test]
    async fn test_record_deleted_when_last_connection_closes() {
        let limiter = limiter(5, 100);
        let addr = ip("5.6.7.8");

        assert!(limiter.check_connection_admission(addr));
        assert!(limiter.check_connection_admission(addr));
        limiter.on_connection_closed(addr);
        assert_eq!(limiter.quota(addr).unwrap().active_connections, 1);

        limiter.on_connection_closed(addr);
        assert!(limiter.quota(addr).is_none());

        // Unknown IPs are ignored
        limiter.on_connection_closed(ip("9.9.9.9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_window_resets() {
        let limiter = limiter(5, 3);
        let addr = ip("1.1.1.1");

        for _ in 0..3 {
            assert!(limiter.check_message_admission(addr));
        }
        assert!(!limiter.check_message_admission(addr));
        assert!(!limiter.is_blocked(addr));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check_message_admission(addr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_flood_blocks_messages_only() {
        let limiter = limiter(5, 4);
        let addr = ip("2.2.2.2");

        assert!(limiter.check_connection_admission(addr));
        for _ in 0..4 {
            assert!(limiter.check_message_admission(addr));
        }
        // 5th is over the limit, 6th reaches 1.5x and blocks
        assert!(!limiter.check_message_admission(addr));
        assert!(!limiter.is_blocked(addr));
        assert!(!limiter.check_message_admission(addr));
        assert!(limiter.is_blocked(addr));

        // Connection admission is unaffected by the message block
        assert!(limiter.check_connection_admission(addr));

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(!limiter.check_message_admission(addr));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check_message_admission(addr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_block_and_unblock() {
        let limiter = limiter(5, 100);
        let addr = ip("3.3.3.3");

        limiter.block(addr, None);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!limiter.check_connection_admission(addr));
        assert!(!limiter.check_message_admission(addr));

        assert!(limiter.unblock(addr));
        assert!(limiter.check_connection_admission(addr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired_keeps_live_records() {
        let limiter = limiter(5, 100);
        let connected = ip("4.4.4.4");
        let chatty = ip("4.4.4.5");

        assert!(limiter.check_connection_admission(connected));
        assert!(limiter.check_message_admission(chatty));

        assert_eq!(limiter.sweep_expired(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.sweep_expired(), 1);
        assert!(limiter.quota(connected).is_some());
        assert!(limiter.quota(chatty).is_none());

        let stats = limiter.stats();
        assert_eq!(stats.tracked_ips, 1);
        assert_eq!(stats.active_connections, 1);
    }
}
