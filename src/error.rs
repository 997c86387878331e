//! Closed error taxonomy for the engine.
//!
//! Every fallible operation named in the component design returns one of
//! these enums instead of a bare `String` or `anyhow::Error`. `anyhow` is
//! reserved for the example binary, which talks to a human and wants
//! `.context(...)` chains rather than a `match`.

use std::net::AddrParseError;

use thiserror::Error;

/// Errors from the wire codec (C1).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too small to hold the frame")]
    TooSmall,
    #[error("frame is malformed: {0}")]
    Malformed(&'static str),
}

/// Errors from the peer roster (C2).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("roster has no free slot")]
    Full,
    #[error("index {index} out of range ({active} active slots)")]
    OutOfRange { index: usize, active: usize },
}

/// Errors surfaced by the transport adapter (C3).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation would block")]
    WouldBlock,
    #[error("no data available")]
    NoData,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("connection reset by peer")]
    Reset,
    #[error("operation timed out")]
    TimedOut,
    #[error("connection refused")]
    Refused,
    #[error("transport is unusable: {0}")]
    Fatal(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid address: {0}")]
    Addr(#[from] AddrParseError),
}

/// Errors surfaced to the caller of `send_text`/`broadcast_text`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no such peer: {0}")]
    NoSuchPeer(String),
    #[error("send failed: {cause}")]
    SendFailed {
        #[source]
        cause: TransportError,
    },
}

impl SendError {
    pub fn failed(cause: TransportError) -> Self {
        SendError::SendFailed { cause }
    }
}

/// Errors from `engine_init` and other fatal engine transitions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind discovery socket: {0}")]
    DiscoveryBind(#[source] TransportError),
    #[error("failed to bind tcp listener: {0}")]
    ListenerBind(#[source] TransportError),
    #[error("could not resolve a local IPv4 address")]
    NoLocalAddress,
}

/// Errors from the configuration loader (C7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("discovery_port and tcp_port must differ (both are {0})")]
    PortsCollide(u16),
    #[error("invalid log level {0:?}; expected one of error|warn|info|debug|trace")]
    InvalidLogLevel(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}
