//! Server-pushed stage progress: event-stream transport, frame decoding, the
//! reconnecting client and the session wrapper built on it.

pub mod client;
pub mod endpoints;
pub mod frame;
pub mod listeners;
pub mod session;
pub mod transport;

pub use client::{ConnectOptions, ConnectionState, ReconnectPolicy, SseClient, SseClientBuilder};
pub use endpoints::{StreamEndpoints, open_project_stream, open_stage_stream};
pub use frame::EventFrame;
pub use listeners::{Handler, handler};
pub use session::{NoHooks, SessionHooks, StageSession};
pub use transport::{Connector, HttpConnector, TransportEvent, TransportStream};
