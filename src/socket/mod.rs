//! WebSocket Event Logger
//!
//! Opens WebSocket connections with tokio-tungstenite and reports their
//! lifecycle (`open`, `message`, `close`, `error`) to the log and to a
//! per-connection event channel. No framing or subprotocol is imposed on
//! the payloads.

mod manager;

pub use manager::{SocketConnection, SocketError, SocketLogger};

/// Connection ready states (matching the browser API values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// An event observed on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    /// Binary frame; only its length is reported.
    Binary(usize),
    Close { code: u16, reason: String },
    Error(String),
}

impl SocketEvent {
    /// Event name as a browser would report it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) | Self::Binary(_) => "message",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
        }
    }
}
