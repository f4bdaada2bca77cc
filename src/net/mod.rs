// net/mod.rs
//! Networking layer: transports, connectors and the stream inflater.
//! Nothing in here knows about gateway opcodes.

pub mod inflate;
pub mod transport;
pub mod websocket;

pub use inflate::Inflater;
pub use transport::{Connector, Inbound, Outbound, Transport, TransportPeer};
pub use websocket::WebSocketConnector;
