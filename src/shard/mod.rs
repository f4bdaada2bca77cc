//! One gateway connection per shard.
//!
//! `session` holds the protocol state machine and never touches IO.
//! `connection` wraps it in an actor task that owns the transport, the
//! heartbeat timer and the reconnect timer.

pub mod connection;
pub mod event;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod settings;
pub mod state;

pub use connection::Connection;
pub use event::{ShardEvent, ShardEventKind};
pub use reconnect::ReconnectPolicy;
pub use session::{ShardSession, ShardSnapshot};
pub use settings::ShardSettings;
pub use state::{ShardStatus, Strategy};
