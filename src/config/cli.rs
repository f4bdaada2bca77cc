use clap::{Parser, Subcommand};
use parking_lot::RwLock;
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use super::types::LogLevel;
use crate::group::GroupSpec;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: PathBuf,
    pub log_level: LogLevel,
    pub mode: Mode,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Run the fleet coordinator (default).
    Run,

    /// Host one group; spawned by the coordinator, speaks IPC over stdio.
    Worker(WorkerArgs),
}

#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct WorkerArgs {
    #[arg(long = "group-id")]
    pub group_id: u32,

    #[arg(long = "shard-start")]
    pub shard_start: u32,

    // Exclusive.
    #[arg(long = "shard-end")]
    pub shard_end: u32,

    #[arg(long = "total-shards")]
    pub total_shards: u32,

    #[arg(long = "gateway-url")]
    pub gateway_url: String,
}

impl WorkerArgs {
    pub fn spec(&self) -> GroupSpec {
        GroupSpec::new(self.group_id, self.shard_start..self.shard_end, self.total_shards)
    }
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args(std::env::args_os())
                .unwrap_or_else(|e| panic!("Invalid CLI/ENV: {e}"));
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }

    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(args)?;

        Ok(Self {
            config_file_location: args.config_file,
            log_level: args.log_level,
            mode: args.mode.unwrap_or(Mode::Run),
        })
    }

    /// Global flags a worker process needs to load the same configuration.
    pub fn worker_args(&self) -> Vec<OsString> {
        vec![
            "--config".into(),
            self.config_file_location.clone().into(),
            "--log".into(),
            self.log_level.as_str().into(),
        ]
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn validate(&self) {
        must_exist_file(&self.config_file_location, "--config / gatecrab.toml");
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gatecrab", version, about = "Sharded gateway fleet")]
struct Args {
    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info", global = true)]
    log_level: LogLevel,

    // Must exist; no defaults.
    #[arg(long = "config", env = "GATECRAB_CONFIG_FILE", global = true, required = false)]
    config_file: PathBuf,

    #[command(subcommand)]
    mode: Option<Mode>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("config not initialized; call Config::init().await first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
