//! A peer-to-peer LAN messenger networking engine: UDP broadcast discovery,
//! a bounded peer roster, a TCP connection lifecycle, and the wire codec
//! and dispatch glue tying them together. See each module for its piece of
//! the design; `engine` is the only module a UI collaborator should depend
//! on directly.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod roster;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::RuntimeConfig;
pub use dispatch::EngineCallbacks;
pub use engine::Engine;
