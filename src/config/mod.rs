mod cli;
#[allow(clippy::module_inception)]
mod config;
mod gateway;
mod types;

pub use cli::{CliConfig, Mode, WorkerArgs};
pub use config::Config;
pub use gateway::{ConfigError, GatewayConfig, TOKEN_ENV};
pub use types::{LogLevel, Runtime};
