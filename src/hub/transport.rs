use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Websocket close codes used by the hub
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// A frame queued for delivery to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

/// Outbound half of a duplex client channel
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Queue a close frame and stop accepting further frames. Closing twice is a no-op.
    fn close(&self, code: u16, reason: &str);
}

/// Transport backed by an unbounded channel drained by a socket writer task
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Frame>,
    open: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: AtomicBool::new(true),
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}
