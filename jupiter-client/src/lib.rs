//! Session engine for the Jupiter chat client.
//!
//! One persistent TCP connection, brace-framed JSON messages, a login state
//! machine, a ping/pong heartbeat and bounded automatic reconnection. Build an
//! [`Engine`] from [`config::ConnectionSettings`], register subscribers, then
//! hand it to [`runtime::spawn`].

pub mod config;
pub mod engine;
pub mod events;
pub mod heartbeat;
pub mod reconnect;
pub mod runtime;
pub mod session;
pub mod transport;

pub use engine::{Action, ConnectionState, Engine};
pub use events::{EngineEvent, Subscribers};
pub use runtime::{spawn, EngineHandle};
pub use session::SessionState;
