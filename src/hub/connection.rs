use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use super::transport::Transport;

/// Opaque connection identifier; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One live duplex channel, owned by the registry
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub transport: Arc<dyn Transport>,
    pub ip: IpAddr,
    pub user_id: Option<String>,
    pub alive: bool,
    pub last_activity: Instant,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            ip: self.ip,
            user_id: self.user_id.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a connection handed to filters and callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub ip: IpAddr,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}
