use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::host::serve_group;
use crate::errors::GatewayError;
use crate::group::GroupSpec;
use crate::ipc::{IpcMessage, spawn_frame_reader, spawn_frame_writer};
use crate::net::Connector;
use crate::shard::ShardSettings;

// -----------------------------------------------------------------------------
// ----- GroupLauncher ---------------------------------------------------------

/// Starts the runtime unit that hosts one group: an OS process or a task.
#[async_trait]
pub trait GroupLauncher: Send + Sync + 'static {
    async fn launch(&self, spec: GroupSpec, gateway_url: &str)
    -> Result<LaunchedGroup, GatewayError>;
}

/// Both ends of a running worker as the parent sees them.
#[derive(Debug)]
pub struct LaunchedGroup {
    /// parent -> worker
    pub outbound: mpsc::UnboundedSender<IpcMessage>,
    /// worker -> parent; closes when the worker is gone
    pub inbound: mpsc::UnboundedReceiver<IpcMessage>,
    pub handle: WorkerHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    pub detail: String,
}

// -----------------------------------------------------------------------------
// ----- WorkerHandle ----------------------------------------------------------

/// Supervised exit of one worker. The supervisor task owns the process or
/// task; this handle can only ask it to die and watch it go.
#[derive(Debug)]
pub struct WorkerHandle {
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerHandle {
    /// Handle plus the supervisor's ends of it.
    pub fn new() -> (Self, oneshot::Receiver<()>, watch::Sender<Option<WorkerExit>>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let handle = Self {
            kill: Some(kill_tx),
            exit: exit_rx,
        };
        (handle, kill_rx, exit_tx)
    }

    /// Hard kill. Idempotent.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    pub fn exit(&self) -> Option<WorkerExit> {
        self.exit.borrow().clone()
    }

    pub fn watch_exit(&self) -> watch::Receiver<Option<WorkerExit>> {
        self.exit.clone()
    }

    pub async fn wait(&self) -> WorkerExit {
        wait_exit(self.exit.clone()).await
    }
}

pub async fn wait_exit(mut exit: watch::Receiver<Option<WorkerExit>>) -> WorkerExit {
    match exit.wait_for(Option::is_some).await {
        Ok(state) => state.clone().unwrap_or_else(supervisor_gone),
        Err(_) => supervisor_gone(),
    }
}

fn supervisor_gone() -> WorkerExit {
    WorkerExit {
        success: false,
        detail: "supervisor stopped".into(),
    }
}

// -----------------------------------------------------------------------------
// ----- ProcessLauncher -------------------------------------------------------

/// Re-executes a binary (normally the current one) with the `worker`
/// subcommand. The IPC channel runs over the child's stdin/stdout; its logs
/// go to the inherited stderr.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    /// `args` come before the `worker` subcommand (global flags such as
    /// `--config` and `--log`).
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn current_exe(args: Vec<OsString>) -> Result<Self, GatewayError> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl GroupLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: GroupSpec,
        gateway_url: &str,
    ) -> Result<LaunchedGroup, GatewayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("worker")
            .arg("--group-id")
            .arg(spec.group_id.to_string())
            .arg("--shard-start")
            .arg(spec.shard_start.to_string())
            .arg("--shard-end")
            .arg(spec.shard_end.to_string())
            .arg("--total-shards")
            .arg(spec.total_shards.to_string())
            .arg("--gateway-url")
            .arg(gateway_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_error(spec, e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(launch_error(spec, "stdio was not captured"));
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        spawn_frame_writer(stdin, out_rx);
        spawn_frame_reader(stdout, in_tx);

        info!(
            "group {}: worker process {} started",
            spec.group_id,
            child.id().unwrap_or_default()
        );

        let (handle, kill_rx, exit_tx) = WorkerHandle::new();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    debug!("group {}: killing worker process", spec.group_id);
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => WorkerExit {
                    success: status.success(),
                    detail: status.to_string(),
                },
                Err(err) => WorkerExit {
                    success: false,
                    detail: err.to_string(),
                },
            };
            let _ = exit_tx.send(Some(exit));
        });

        Ok(LaunchedGroup {
            outbound: out_tx,
            inbound: in_rx,
            handle,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- InProcessLauncher -----------------------------------------------------

/// Hosts the group as a task in this process. Same host loop, same messages,
/// no serialization boundary.
pub struct InProcessLauncher {
    settings: ShardSettings,
    connector: Arc<dyn Connector>,
}

impl InProcessLauncher {
    pub fn new(settings: ShardSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
        }
    }
}

#[async_trait]
impl GroupLauncher for InProcessLauncher {
    async fn launch(
        &self,
        spec: GroupSpec,
        gateway_url: &str,
    ) -> Result<LaunchedGroup, GatewayError> {
        let mut settings = self.settings.clone();
        settings.gateway_url = gateway_url.to_string();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let mut task = tokio::spawn(serve_group(
            spec,
            Arc::new(settings),
            self.connector.clone(),
            out_rx,
            in_tx,
        ));

        let (handle, kill_rx, exit_tx) = WorkerHandle::new();
        tokio::spawn(async move {
            let joined = tokio::select! {
                joined = &mut task => joined,
                _ = kill_rx => {
                    debug!("group {}: aborting worker task", spec.group_id);
                    task.abort();
                    task.await
                }
            };

            let exit = match joined {
                Ok(()) => WorkerExit {
                    success: true,
                    detail: "task finished".into(),
                },
                Err(err) if err.is_cancelled() => WorkerExit {
                    success: false,
                    detail: "task aborted".into(),
                },
                Err(err) => {
                    warn!("group {}: worker task panicked: {err}", spec.group_id);
                    WorkerExit {
                        success: false,
                        detail: err.to_string(),
                    }
                }
            };
            let _ = exit_tx.send(Some(exit));
        });

        Ok(LaunchedGroup {
            outbound: out_tx,
            inbound: in_rx,
            handle,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn launch_error(spec: GroupSpec, reason: impl ToString) -> GatewayError {
    GatewayError::Launch {
        group_id: spec.group_id,
        reason: reason.to_string(),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
