//! Gateway wire protocol: opcodes, close-code policy and payload shapes.
//! Nothing in here performs IO.

pub mod close_code;
pub mod opcode;
pub mod payload;
pub mod url;

pub use close_code::{CloseAction, classify_close};
pub use opcode::Opcode;
pub use payload::{GatewayPayload, Hello, IdentifyProperties, ReadyData};
pub use url::{Compression, gateway_url};
