//! Runtime units that host groups, and the parent-side bridge to them.
//!
//! A worker is either a child process speaking IPC over stdio or a tokio
//! task in the parent; both run `host::serve_group` and look identical to
//! the `WorkerBridge`.

pub mod bridge;
pub mod host;
pub mod launcher;

pub use bridge::{BridgeEvent, BridgeOptions, Signal, WorkerBridge};
pub use host::{serve_group, serve_stdio};
pub use launcher::{
    GroupLauncher, InProcessLauncher, LaunchedGroup, ProcessLauncher, WorkerExit, WorkerHandle,
};
