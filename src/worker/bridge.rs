use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::launcher::{GroupLauncher, LaunchedGroup, WorkerExit, WorkerHandle, wait_exit};
use crate::admin::{AdminCommand, EvalReply};
use crate::errors::GatewayError;
use crate::group::{GroupEvent, GroupSpec};
use crate::ipc::IpcMessage;
use crate::protocol::close_code::NORMAL_CLOSURE;

// -----------------------------------------------------------------------------
// ----- Signal ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the worker to close its shards, hard-kill after the grace period.
    Terminate,
    /// Kill immediately.
    Kill,
}

// -----------------------------------------------------------------------------
// ----- BridgeEvent -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Group { group_id: u32, event: GroupEvent },

    /// The worker is gone. `expected` is true when `kill()` caused it.
    Exited {
        group_id: u32,
        expected: bool,
        exit: WorkerExit,
    },
}

// -----------------------------------------------------------------------------
// ----- BridgeOptions ---------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    pub eval_timeout: Duration,
    pub kill_grace: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            eval_timeout: Duration::from_secs(30),
            kill_grace: Duration::from_secs(5),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- WorkerBridge ----------------------------------------------------------

type EvalWaiter = oneshot::Sender<Result<EvalReply, GatewayError>>;

/// Parent-side proxy for one worker hosting one group.
#[derive(Debug)]
pub struct WorkerBridge {
    spec: GroupSpec,
    options: BridgeOptions,
    outbound: mpsc::UnboundedSender<IpcMessage>,
    pending: Arc<Mutex<PendingEvals>>,
    next_nonce: AtomicU64,
    killing: Arc<AtomicBool>,
    handle: Mutex<WorkerHandle>,
    exit: watch::Receiver<Option<WorkerExit>>,
}

#[derive(Debug, Default)]
struct PendingEvals {
    closed: bool,
    waiters: HashMap<u64, EvalWaiter>,
}

// -----------------------------------------------------------------------------
// ----- WorkerBridge: Static --------------------------------------------------

impl WorkerBridge {
    /// Launch the worker and start relaying its messages onto `events`.
    pub async fn spawn(
        spec: GroupSpec,
        launcher: &dyn GroupLauncher,
        gateway_url: &str,
        options: BridgeOptions,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Result<Self, GatewayError> {
        let LaunchedGroup {
            outbound,
            inbound,
            handle,
        } = launcher.launch(spec, gateway_url).await?;

        let pending = Arc::new(Mutex::new(PendingEvals::default()));
        let killing = Arc::new(AtomicBool::new(false));
        let exit = handle.watch_exit();

        tokio::spawn(read_loop(
            spec.group_id,
            inbound,
            exit.clone(),
            pending.clone(),
            killing.clone(),
            events,
        ));

        Ok(Self {
            spec,
            options,
            outbound,
            pending,
            next_nonce: AtomicU64::new(1),
            killing,
            handle: Mutex::new(handle),
            exit,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- WorkerBridge: Public --------------------------------------------------

impl WorkerBridge {
    pub fn spec(&self) -> GroupSpec {
        self.spec
    }

    pub fn group_id(&self) -> u32 {
        self.spec.group_id
    }

    pub fn contains(&self, shard_id: u32) -> bool {
        self.spec.contains(shard_id)
    }

    pub fn exit(&self) -> Option<WorkerExit> {
        self.exit.borrow().clone()
    }

    pub fn pending_evals(&self) -> usize {
        self.pending.lock().waiters.len()
    }

    /// Handshake grant for one shard of this group.
    pub fn handshake(&self, shard_id: u32) -> Result<(), GatewayError> {
        self.post(IpcMessage::Handshake { shard_id })
    }

    pub fn send(&self, shard_id: Option<u32>, payload: Value) -> Result<(), GatewayError> {
        self.post(IpcMessage::Send { shard_id, payload })
    }

    /// Run an admin command in the worker. Rejected when the worker exits or
    /// the reply does not arrive within the eval timeout.
    pub async fn eval(&self, command: AdminCommand) -> Result<EvalReply, GatewayError> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(self.exited());
            }
            pending.waiters.insert(nonce, tx);
        }

        if self.post(IpcMessage::Eval { nonce, command }).is_err() {
            self.pending.lock().waiters.remove(&nonce);
            return Err(self.exited());
        }

        match tokio::time::timeout(self.options.eval_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.exited()),
            Err(_) => {
                self.pending.lock().waiters.remove(&nonce);
                Err(GatewayError::EvalTimeout {
                    group_id: self.spec.group_id,
                    timeout: self.options.eval_timeout,
                })
            }
        }
    }

    /// Stop the worker and wait for it to exit. Pending evals are rejected
    /// first. Safe to call more than once.
    pub async fn kill(&self, signal: Signal) {
        if self.killing.swap(true, Ordering::SeqCst) {
            wait_exit(self.exit.clone()).await;
            return;
        }

        reject_pending(self.spec.group_id, &self.pending);

        if signal == Signal::Terminate {
            let _ = self.outbound.send(IpcMessage::Shutdown {
                code: NORMAL_CLOSURE,
            });

            let graceful = tokio::time::timeout(self.options.kill_grace, wait_exit(self.exit.clone()));
            if graceful.await.is_ok() {
                info!("group {}: worker stopped", self.spec.group_id);
                return;
            }
            warn!(
                "group {}: worker ignored shutdown for {:?}, killing",
                self.spec.group_id, self.options.kill_grace
            );
        }

        self.handle.lock().kill();
        let exit = wait_exit(self.exit.clone()).await;
        info!("group {}: worker killed ({})", self.spec.group_id, exit.detail);
    }
}

// -----------------------------------------------------------------------------
// ----- WorkerBridge: Private -------------------------------------------------

impl WorkerBridge {
    fn post(&self, msg: IpcMessage) -> Result<(), GatewayError> {
        self.outbound.send(msg).map_err(|_| self.exited())
    }

    fn exited(&self) -> GatewayError {
        GatewayError::ProcessExited {
            group_id: self.spec.group_id,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Reader ------------------------------------------------------

async fn read_loop(
    group_id: u32,
    mut inbound: mpsc::UnboundedReceiver<IpcMessage>,
    exit: watch::Receiver<Option<WorkerExit>>,
    pending: Arc<Mutex<PendingEvals>>,
    killing: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) {
    while let Some(msg) = inbound.recv().await {
        match msg {
            IpcMessage::Dispatch(event) => {
                let _ = events.send(BridgeEvent::Group { group_id, event });
            }
            IpcMessage::EvalResponse { nonce, result } => {
                let waiter = pending.lock().waiters.remove(&nonce);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result.map_err(GatewayError::Eval));
                    }
                    None => debug!("group {group_id}: late eval response {nonce}"),
                }
            }
            other => debug!("group {group_id}: unexpected message from worker: {other:?}"),
        }
    }

    // channel closed: the worker is gone or going
    reject_pending(group_id, &pending);
    let exit = wait_exit(exit).await;
    let expected = killing.load(Ordering::SeqCst);

    if expected {
        debug!("group {group_id}: worker exited ({})", exit.detail);
    } else {
        warn!("group {group_id}: worker exited unexpectedly ({})", exit.detail);
    }

    let _ = events.send(BridgeEvent::Exited {
        group_id,
        expected,
        exit,
    });
}

fn reject_pending(group_id: u32, pending: &Mutex<PendingEvals>) {
    let waiters = {
        let mut pending = pending.lock();
        pending.closed = true;
        std::mem::take(&mut pending.waiters)
    };

    for (_, waiter) in waiters {
        let _ = waiter.send(Err(GatewayError::ProcessExited { group_id }));
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Hands the worker side of the channel to the test instead of running a group.
    struct ManualLauncher {
        workers: mpsc::UnboundedSender<ManualWorker>,
    }

    struct ManualWorker {
        commands: mpsc::UnboundedReceiver<IpcMessage>,
        replies: mpsc::UnboundedSender<IpcMessage>,
        kill: oneshot::Receiver<()>,
        exit: watch::Sender<Option<WorkerExit>>,
    }

    impl ManualWorker {
        fn exit(self, success: bool) {
            drop(self.replies);
            let _ = self.exit.send(Some(WorkerExit {
                success,
                detail: "test".into(),
            }));
        }
    }

    #[async_trait]
    impl GroupLauncher for ManualLauncher {
        async fn launch(
            &self,
            _spec: GroupSpec,
            _gateway_url: &str,
        ) -> Result<LaunchedGroup, GatewayError> {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (handle, kill, exit) = WorkerHandle::new();
            let _ = self.workers.send(ManualWorker {
                commands: out_rx,
                replies: in_tx,
                kill,
                exit,
            });
            Ok(LaunchedGroup {
                outbound: out_tx,
                inbound: in_rx,
                handle,
            })
        }
    }

    async fn bridge(
        options: BridgeOptions,
    ) -> (WorkerBridge, ManualWorker, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let launcher = ManualLauncher { workers: worker_tx };

        let bridge = WorkerBridge::spawn(
            GroupSpec::new(2, 4..5, 5),
            &launcher,
            "wss://gateway.test",
            options,
            event_tx,
        )
        .await
        .unwrap();
        let worker = worker_rx.recv().await.unwrap();
        (bridge, worker, event_rx)
    }

    #[tokio::test]
    async fn eval_is_correlated_by_nonce() {
        let (bridge, mut worker, _events) = bridge(BridgeOptions::default()).await;

        let answer = tokio::spawn(async move {
            let Some(IpcMessage::Eval { nonce, .. }) = worker.commands.recv().await else {
                panic!("expected an eval");
            };
            worker
                .replies
                .send(IpcMessage::EvalResponse {
                    nonce: nonce + 100,
                    result: Ok(EvalReply::Ack),
                })
                .unwrap();
            worker
                .replies
                .send(IpcMessage::EvalResponse {
                    nonce,
                    result: Err("no such shard".into()),
                })
                .unwrap();
            worker
        });

        let err = bridge.eval(AdminCommand::Ping).await.unwrap_err();
        assert!(matches!(err, GatewayError::Eval(msg) if msg == "no such shard"));
        assert_eq!(bridge.pending_evals(), 0);
        drop(answer.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_eval_times_out_and_is_forgotten() {
        let options = BridgeOptions {
            eval_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let (bridge, _worker, _events) = bridge(options).await;

        let err = bridge.eval(AdminCommand::Stats).await.unwrap_err();
        assert!(matches!(err, GatewayError::EvalTimeout { group_id: 2, .. }));
        assert_eq!(bridge.pending_evals(), 0);
    }

    #[tokio::test]
    async fn worker_exit_rejects_pending_evals() {
        let (bridge, worker, mut events) = bridge(BridgeOptions::default()).await;
        let bridge = Arc::new(bridge);

        let pending = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.eval(AdminCommand::Ping).await }
        });
        while bridge.pending_evals() == 0 {
            tokio::task::yield_now().await;
        }
        worker.exit(false);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::ProcessExited { group_id: 2 }));

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            BridgeEvent::Exited {
                group_id: 2,
                expected: false,
                ..
            }
        ));
        assert!(matches!(
            bridge.eval(AdminCommand::Ping).await,
            Err(GatewayError::ProcessExited { group_id: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_falls_back_to_kill_after_grace() {
        let (bridge, worker, mut events) = bridge(BridgeOptions::default()).await;
        let ManualWorker {
            mut commands,
            replies,
            kill,
            exit,
        } = worker;

        // ignores shutdown, dies on the hard kill
        tokio::spawn(async move {
            let _ = kill.await;
            drop(replies);
            let _ = exit.send(Some(WorkerExit {
                success: false,
                detail: "killed".into(),
            }));
        });

        bridge.kill(Signal::Terminate).await;
        bridge.kill(Signal::Terminate).await;

        assert_eq!(
            commands.recv().await,
            Some(IpcMessage::Shutdown {
                code: NORMAL_CLOSURE
            })
        );
        assert_eq!(bridge.exit().map(|e| e.detail), Some("killed".to_string()));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::Exited { expected: true, .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
