//! Playground client - session engine for remote terminal playgrounds.
//!
//! This crate keeps one playground session, a set of remote terminal
//! instances, in sync with the backend over a single WebSocket channel plus
//! a small REST API. It buffers terminal output until a widget can draw it,
//! coalesces keystrokes into periodic messages, and follows the session's
//! lifecycle (expiry countdown, termination, shared viewport size).
//!
//! # Architecture
//!
//! All state lives in one [`SessionEngine`] and is only mutated on its
//! event loop:
//!
//! - **Transport** - WebSocket with fixed-interval reconnect, decodes frames once
//! - **Dispatcher** - routes typed inbound events to handlers
//! - **Registry** - instances by name, hostname index, display order, selection
//! - **Input / Output** - per-instance keystroke coalescing and output buffering
//! - **Lifecycle** - TTL countdown, termination, viewport debounce and fan-out
//!
//! # Modules
//!
//! - [`session`] - the engine, commands and notices
//! - [`transport`] - session channel
//! - [`api`] - REST client
//! - [`config`] - configuration loading

pub mod api;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod input;
pub mod instance;
pub mod lifecycle;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod terminal;
pub mod timer;
pub mod transport;

// Re-export commonly used types
pub use api::{ApiClient, CreateInstanceRequest, SessionApi, SessionRecord};
pub use config::Config;
pub use error::SessionError;
pub use instance::{Instance, InstanceRecord};
pub use protocol::{EventKind, InboundEvent, OutboundEvent, ProtocolError, ProtocolVersion};
pub use registry::Registry;
pub use session::{Command, EngineSettings, Notice, SessionCore, SessionEngine};
pub use terminal::{Geometry, TerminalWidget, WidgetFactory};
pub use transport::{Channel, Transport, TransportOptions};
