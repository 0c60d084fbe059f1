//! Real-time notification hub
//!
//! Owns live client connections, gates them by source IP, probes them with
//! heartbeats and fans structured events out to them.
//!
//! The registry never touches a socket directly: every connection is backed
//! by a [`Transport`], and the websocket glue in `api::ws` drives the
//! registry's inbound handlers (`handle_inbound`, `handle_pong`, `remove`).

pub mod connection;
pub mod error;
pub mod events;
pub mod ip_extractor;
pub mod message;
pub mod rate_limiter;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use connection::{ConnectionId, ConnectionInfo};
pub use error::{AdmissionError, HubError};
pub use events::{DisconnectReason, EventBus, HubEvent};
pub use ip_extractor::extract_client_ip;
pub use message::{InboundMessage, OutboundEnvelope};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use registry::{ConnectionRegistry, HeartbeatReport, InboundOutcome, RegistryStats};
pub use scheduler::{HeartbeatScheduler, PeriodicTask};
pub use transport::{close_code, ChannelTransport, Frame, Transport, TransportError};
