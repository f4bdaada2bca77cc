use std::sync::Arc;

use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use gatecrab::admin::{AdminCommand, EvalReply, format_stats};
use gatecrab::config::{Mode, Runtime, WorkerArgs};
use gatecrab::net::WebSocketConnector;
use gatecrab::orchestrator::RestGatewayInfo;
use gatecrab::shard::ShardEventKind;
use gatecrab::worker::{GroupLauncher, InProcessLauncher, ProcessLauncher, Signal, serve_stdio};
use gatecrab::{Config, FleetEvent, GatewayError, Orchestrator};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🦀 gatecrab";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    setup().await;

    match Config::snapshot().mode {
        Mode::Run => run_forever().await,
        Mode::Worker(args) => {
            run_worker(args).await;
            // the blocking stdin reader would hold the runtime open until the parent closes the pipe
            std::process::exit(0)
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str()).unwrap();

    // stdout belongs to the ipc channel in worker processes
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> Result<(), GatewayError> {
    let config = Config::snapshot();
    let gateway = config.gateway;

    let info = Arc::new(RestGatewayInfo::new(&gateway.api_base, gateway.token.clone()));

    let launcher: Arc<dyn GroupLauncher> = match gateway.runtime {
        Runtime::Process => Arc::new(ProcessLauncher::current_exe(config.worker_args())?),
        Runtime::Task => Arc::new(InProcessLauncher::new(
            gateway.shard_settings(""),
            Arc::new(WebSocketConnector),
        )),
    };

    let orchestrator = Orchestrator::new(gateway.fleet_settings(), info, launcher);
    let events = orchestrator.take_events();

    orchestrator.spawn().await?;
    info!(
        "{} spawned {} group(s) for {} shard(s)",
        APP_NAME,
        orchestrator.groups().len(),
        orchestrator.total_shards()
    );

    let logger = tokio::spawn(async move {
        let Some(mut events) = events else { return };
        while let Some(event) = events.recv().await {
            log_event(event);
        }
    });

    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }

    info!("{} shutting down", APP_NAME);
    log_fleet_stats(&orchestrator).await;
    orchestrator.kill(Signal::Terminate).await;
    logger.abort();

    Ok(())
}

async fn run_worker(args: WorkerArgs) {
    let config = Config::snapshot();
    let settings = config.gateway.shard_settings(&args.gateway_url);

    debug!("group {}: worker for shards {:?}", args.group_id, args.spec().shards());
    serve_stdio(args.spec(), Arc::new(settings), Arc::new(WebSocketConnector)).await;
}

async fn log_fleet_stats(orchestrator: &Orchestrator) {
    let replies = match orchestrator.broadcast_eval(AdminCommand::Stats).await {
        Ok(replies) => replies,
        Err(e) => {
            warn!("failed to collect fleet stats: {e}");
            return;
        }
    };

    for (group_id, reply) in replies {
        match reply {
            Ok(EvalReply::Stats(stats)) => info!("final stats:\n{}", format_stats(&stats)),
            Ok(other) => warn!("group {group_id}: unexpected stats reply {other:?}"),
            Err(e) => warn!("group {group_id}: stats unavailable: {e}"),
        }
    }
}

fn log_event(event: FleetEvent) {
    match event {
        FleetEvent::Shard { group_id, event } => match event.kind {
            ShardEventKind::Dispatch { .. } => {}
            ShardEventKind::Error { message } => {
                warn!("group {group_id} shard {}: {message}", event.shard_id)
            }
            ShardEventKind::Fatal { code, message } => {
                error!("group {group_id} shard {}: fatal close {code}: {message}", event.shard_id)
            }
            kind => debug!("group {group_id} shard {}: {kind:?}", event.shard_id),
        },
        FleetEvent::GroupReady { group_id } => info!("group {group_id} ready"),
        FleetEvent::FleetReady => info!("{} all groups ready", APP_NAME),
        FleetEvent::WorkerExited { group_id, expected } if !expected => {
            error!("group {group_id}: worker exited unexpectedly")
        }
        FleetEvent::WorkerExited { group_id, .. } => info!("group {group_id}: worker stopped"),
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
