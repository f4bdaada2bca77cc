pub mod admin;
pub mod analytics;
pub mod config;
pub mod errors;
pub mod group;
pub mod ipc;
pub mod net;
pub mod orchestrator;
pub mod protocol;
pub mod shard;
pub mod worker;

pub use config::Config;
pub use errors::GatewayError;
pub use group::{Group, GroupSpec};
pub use orchestrator::{FleetEvent, Orchestrator};
pub use shard::Connection;
pub use worker::WorkerBridge;
