//! Connection registry
//!
//! Authoritative map of connection id → connection plus the per-IP index.
//! Map guards are never held while sending to a transport or while calling
//! back into `remove`, so a failing send can evict its own connection.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connection::{Connection, ConnectionId, ConnectionInfo};
use super::error::{AdmissionError, HubError};
use super::events::{DisconnectReason, EventBus, HubEvent};
use super::message::{InboundMessage, OutboundEnvelope};
use super::rate_limiter::RateLimiter;
use super::transport::{close_code, Frame, Transport};
use crate::config::HubConfig;

/// Result of one heartbeat pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub probed: usize,
    pub evicted: usize,
}

/// What happened to an inbound text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Published as a `HubEvent::Message`
    Accepted,
    /// Application-level ping answered with a pong
    Pong,
    RateLimited,
    Malformed,
    UnknownConnection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub connections: usize,
    pub capacity: usize,
    pub unique_ips: usize,
    pub authenticated: usize,
}

pub struct ConnectionRegistry {
    config: HubConfig,
    connections: DashMap<ConnectionId, Connection>,
    by_ip: DashMap<IpAddr, HashSet<ConnectionId>>,
    /// Serializes capacity checks against inserts
    admission: Mutex<()>,
    limiter: Arc<RateLimiter>,
    events: EventBus,
}

impl ConnectionRegistry {
    pub fn new(config: HubConfig, limiter: Arc<RateLimiter>, events: EventBus) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            by_ip: DashMap::new(),
            admission: Mutex::new(()),
            limiter,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a new connection.
    ///
    /// On rejection the transport is closed with `TRY_AGAIN_LATER` and the
    /// registry is left untouched. The caller still owns any rate-limiter
    /// slot it reserved for this attempt.
    pub fn admit(
        &self,
        transport: Arc<dyn Transport>,
        ip: IpAddr,
        user_id: Option<String>,
    ) -> Result<ConnectionId, AdmissionError> {
        let id = {
            let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

            if self.connections.len() >= self.config.pool_capacity {
                warn!(
                    ip = %ip,
                    capacity = self.config.pool_capacity,
                    "Connection rejected: pool capacity reached"
                );
                transport.close(close_code::TRY_AGAIN_LATER, "connection pool is full");
                return Err(AdmissionError::PoolFull {
                    capacity: self.config.pool_capacity,
                });
            }

            if self.config.enforce_ip_limit {
                let from_ip = self.by_ip.get(&ip).map(|set| set.len()).unwrap_or(0);
                if from_ip >= self.config.max_connections_per_ip {
                    warn!(
                        ip = %ip,
                        limit = self.config.max_connections_per_ip,
                        "Connection rejected: too many connections from IP"
                    );
                    transport.close(close_code::TRY_AGAIN_LATER, "too many connections");
                    return Err(AdmissionError::IpLimit {
                        ip,
                        limit: self.config.max_connections_per_ip,
                    });
                }
            }

            let id = ConnectionId::new();
            self.connections.insert(
                id,
                Connection {
                    id,
                    transport,
                    ip,
                    user_id: user_id.clone(),
                    alive: true,
                    last_activity: Instant::now(),
                    connected_at: chrono::Utc::now(),
                },
            );
            self.by_ip.entry(ip).or_default().insert(id);
            id
        };

        info!(
            connection_id = %id,
            ip = %ip,
            user_id = user_id.as_deref().unwrap_or("-"),
            total = self.connections.len(),
            "Client connected"
        );
        self.events.publish(HubEvent::Connected {
            connection_id: id,
            ip,
            user_id,
        });

        self.send_to(
            &id,
            &OutboundEnvelope::new("connected", json!({ "connectionId": id })),
        );

        Ok(id)
    }

    /// Drop a connection. Unknown ids are a no-op and return false.
    pub fn remove(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        let Some((_, connection)) = self.connections.remove(id) else {
            return false;
        };

        if let Entry::Occupied(mut entry) = self.by_ip.entry(connection.ip) {
            entry.get_mut().remove(id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }

        if connection.transport.is_open() {
            connection
                .transport
                .close(reason.close_code(), reason.as_str());
        }

        self.limiter.on_connection_closed(connection.ip);

        info!(
            connection_id = %id,
            ip = %connection.ip,
            reason = %reason,
            remaining = self.connections.len(),
            "Client disconnected"
        );
        self.events.publish(HubEvent::Disconnected {
            connection_id: *id,
            ip: connection.ip,
            user_id: connection.user_id,
            reason,
        });

        true
    }

    /// Serialize and send to one connection. Returns false when the
    /// connection is unknown or its transport is not open.
    pub fn send_to<T: Serialize + ?Sized>(&self, id: &ConnectionId, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(id, text),
            Err(e) => {
                error!(connection_id = %id, error = %e, "Failed to serialize payload");
                false
            }
        }
    }

    fn send_text(&self, id: &ConnectionId, text: String) -> bool {
        let transport = {
            let Some(mut connection) = self.connections.get_mut(id) else {
                return false;
            };
            if !connection.transport.is_open() {
                return false;
            }
            connection.last_activity = Instant::now();
            Arc::clone(&connection.transport)
        };

        match transport.send(Frame::Text(text)) {
            Ok(()) => true,
            Err(e) => {
                error!(connection_id = %id, error = %e, "Send failed, dropping connection");
                self.remove(id, DisconnectReason::SendFailed);
                false
            }
        }
    }

    /// Send `payload` to every open connection accepted by `filter`.
    ///
    /// Iterates over a snapshot taken at call time. Connections whose
    /// transport is already closed, or whose send fails, are removed and not
    /// counted.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        filter: Option<&dyn Fn(&ConnectionInfo) -> bool>,
    ) -> Result<usize, HubError> {
        let text = serde_json::to_string(payload)?;

        let targets: Vec<(ConnectionInfo, Arc<dyn Transport>)> = self
            .connections
            .iter()
            .map(|entry| (entry.info(), Arc::clone(&entry.transport)))
            .collect();

        let mut sent = 0;
        let mut dead = Vec::new();

        for (info, transport) in targets {
            if !transport.is_open() {
                dead.push((info.id, DisconnectReason::Closed));
                continue;
            }
            if let Some(filter) = filter {
                if !filter(&info) {
                    continue;
                }
            }

            match transport.send(Frame::Text(text.clone())) {
                // Fan-out is not client activity; the idle clock keeps running
                Ok(()) => sent += 1,
                Err(e) => {
                    error!(connection_id = %info.id, error = %e, "Broadcast send failed");
                    dead.push((info.id, DisconnectReason::SendFailed));
                }
            }
        }

        for (id, reason) in dead {
            self.remove(&id, reason);
        }

        debug!(recipients = sent, "Broadcast delivered");
        Ok(sent)
    }

    /// Send to every connection owned by `user_id`
    pub fn send_to_user<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        payload: &T,
    ) -> Result<usize, HubError> {
        let filter = |info: &ConnectionInfo| info.user_id.as_deref() == Some(user_id);
        self.broadcast(payload, Some(&filter))
    }

    /// One heartbeat pass: connections that did not answer the previous
    /// probe are evicted, the rest are marked not-alive and pinged.
    pub fn heartbeat_tick(&self) -> HeartbeatReport {
        let snapshot: Vec<(ConnectionId, bool, Arc<dyn Transport>)> = self
            .connections
            .iter_mut()
            .map(|mut entry| {
                let was_alive = entry.alive;
                entry.alive = false;
                (entry.id, was_alive, Arc::clone(&entry.transport))
            })
            .collect();

        let mut report = HeartbeatReport::default();

        for (id, was_alive, transport) in snapshot {
            if !was_alive {
                warn!(connection_id = %id, "Heartbeat timeout, evicting connection");
                if self.remove(&id, DisconnectReason::HeartbeatTimeout) {
                    report.evicted += 1;
                }
                continue;
            }

            match transport.send(Frame::Ping) {
                Ok(()) => report.probed += 1,
                Err(e) => {
                    error!(connection_id = %id, error = %e, "Heartbeat ping failed");
                    if self.remove(&id, DisconnectReason::TransportError) {
                        report.evicted += 1;
                    }
                }
            }
        }

        if report.evicted > 0 {
            info!(
                probed = report.probed,
                evicted = report.evicted,
                "Heartbeat pass complete"
            );
        }
        report
    }

    /// Evict connections inactive for longer than the idle timeout
    pub fn idle_sweep(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.idle_timeout();

        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| now.duration_since(entry.last_activity) > timeout)
            .map(|entry| entry.id)
            .collect();

        let mut evicted = 0;
        for id in idle {
            if self.remove(&id, DisconnectReason::IdleTimeout) {
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, "Idle connections evicted");
        }
        evicted
    }

    /// Pong frame received
    pub fn handle_pong(&self, id: &ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.alive = true;
            connection.last_activity = Instant::now();
        }
    }

    /// Text frame received. Any traffic counts as liveness; the message is
    /// then gated by the rate limiter and parsed. Malformed payloads are
    /// dropped without affecting the connection.
    pub fn handle_inbound(&self, id: &ConnectionId, raw: &str) -> InboundOutcome {
        let (ip, user_id) = {
            let Some(mut connection) = self.connections.get_mut(id) else {
                return InboundOutcome::UnknownConnection;
            };
            connection.alive = true;
            connection.last_activity = Instant::now();
            (connection.ip, connection.user_id.clone())
        };

        if !self.limiter.check_message_admission(ip) {
            warn!(connection_id = %id, ip = %ip, "Message rate limit exceeded");
            self.send_to(
                id,
                &OutboundEnvelope::new(
                    "error",
                    json!({ "code": "rate_limited", "message": "Message rate limit exceeded" }),
                ),
            );
            return InboundOutcome::RateLimited;
        }

        let message = match serde_json::from_str::<InboundMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Dropping malformed message");
                return InboundOutcome::Malformed;
            }
        };

        if message.kind == "ping" {
            self.send_to(id, &OutboundEnvelope::new("pong", json!({})));
            return InboundOutcome::Pong;
        }

        debug!(connection_id = %id, kind = %message.kind, "Inbound message");
        self.events.publish(HubEvent::Message {
            connection_id: *id,
            user_id,
            message,
        });
        InboundOutcome::Accepted
    }

    /// Close and remove every connection
    pub fn shutdown(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| entry.id).collect();
        let closed = ids
            .iter()
            .filter(|id| self.remove(id, DisconnectReason::Shutdown))
            .count();
        self.by_ip.clear();
        info!(closed, "Connection registry shut down");
        closed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn connection_info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|entry| entry.info())
    }

    /// Liveness flag of a connection, `None` when unknown
    pub fn is_alive(&self, id: &ConnectionId) -> Option<bool> {
        self.connections.get(id).map(|entry| entry.alive)
    }

    pub fn connections_for_ip(&self, ip: IpAddr) -> usize {
        self.by_ip.get(&ip).map(|set| set.len()).unwrap_or(0)
    }

    pub fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.user_id.as_deref() == Some(user_id))
            .map(|entry| entry.id)
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            capacity: self.config.pool_capacity,
            unique_ips: self.by_ip.len(),
            authenticated: self
                .connections
                .iter()
                .filter(|entry| entry.user_id.is_some())
                .count(),
        }
    }
}
