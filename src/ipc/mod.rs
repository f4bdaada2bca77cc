//! Parent/worker control channel: one tagged message type, length-framed JSON.

pub mod codec;
pub mod message;
pub mod pipe;

pub use codec::{IpcCodec, IpcError};
pub use message::IpcMessage;
pub use pipe::{spawn_frame_reader, spawn_frame_writer};
