use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use tokio::sync::broadcast;

use super::connection::ConnectionId;
use super::message::InboundMessage;
use super::transport::close_code;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Client closed the socket
    Closed,
    TransportError,
    HeartbeatTimeout,
    IdleTimeout,
    SendFailed,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Closed => "closed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::SendFailed => "send_failed",
            DisconnectReason::Shutdown => "shutdown",
        }
    }

    pub fn close_code(self) -> u16 {
        match self {
            DisconnectReason::Closed => close_code::NORMAL,
            DisconnectReason::HeartbeatTimeout
            | DisconnectReason::IdleTimeout
            | DisconnectReason::Shutdown => close_code::GOING_AWAY,
            DisconnectReason::TransportError | DisconnectReason::SendFailed => {
                close_code::INTERNAL_ERROR
            }
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lifecycle and traffic events published by the registry
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    Connected {
        connection_id: ConnectionId,
        ip: IpAddr,
        user_id: Option<String>,
    },
    Disconnected {
        connection_id: ConnectionId,
        ip: IpAddr,
        user_id: Option<String>,
        reason: DisconnectReason,
    },
    Message {
        connection_id: ConnectionId,
        user_id: Option<String>,
        message: InboundMessage,
    },
}

/// Fan-out of hub events to any number of subscribers.
///
/// Publishing never blocks; subscribers that fall behind observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: HubEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
