use parking_lot::RwLock;
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use super::{
    cli::{CliConfig, Mode},
    gateway::GatewayConfig,
    types::LogLevel,
};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub config_file: PathBuf,
    pub log_level: LogLevel,
    pub mode: Mode,
    pub gateway: &'static GatewayConfig,
    cli: CliConfig,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because GatewayConfig::init() reads the file without blocking.
    pub async fn init() {
        CliConfig::init();
        let cli = CliConfig::snapshot();
        GatewayConfig::init(&cli.config_file_location).await;

        Self::load();
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Public --------------------------------------------------------

impl Config {
    /// Flags a worker process needs to load this same configuration.
    pub fn worker_args(&self) -> Vec<std::ffi::OsString> {
        self.cli.worker_args()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    fn load() {
        let cli = CliConfig::snapshot();

        let next = Config {
            config_file: cli.config_file_location.clone(),
            log_level: cli.log_level,
            mode: cli.mode.clone(),
            gateway: GatewayConfig::handle(),
            cli,
        };

        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
