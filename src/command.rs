use std::fmt;

use crate::message::InboundMessage;

/// Everything the connection task publishes to the view.
#[derive(Debug, Clone)]
pub enum Command {
    Connection(ConnectionState),
    Inbound(InboundMessage),
    FrameDiscarded(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn indicator_label(&self) -> &'static str {
        match self {
            ConnectionState::Open => "● LIVE SYSTEM",
            ConnectionState::Closing => "● CLOSING",
            ConnectionState::Disconnected => "● DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(label)
    }
}
