//! Fleet coordination: sizing, partitioning, worker launch and the shared
//! handshake budget.

pub mod fleet;
pub mod gateway_info;
pub mod handshake_queue;
pub mod partition;

pub use fleet::{FleetEvent, FleetSettings, Orchestrator};
pub use gateway_info::{
    GatewayInfo, GatewayInfoSource, RestGatewayInfo, SessionStartLimit, StaticGatewayInfo,
};
pub use handshake_queue::{HANDSHAKE_WINDOW, HandshakeQueue, WindowLimiter};
pub use partition::partition;
