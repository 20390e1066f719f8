//! The agent binary: boots the resource manager, wires the component
//! pipeline over queues and pubsubs, bridges to the client, and runs
//! until shutdown, pilot cancellation or wall-clock expiry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skiff_agent::context::{AgentContext, TOPIC_CONTROL};
use skiff_agent::executor::Executor;
use skiff_agent::raptor::{FunctionRegistry, Master};
use skiff_agent::sched::Scheduler;
use skiff_agent::session::Sandboxes;
use skiff_agent::staging::{StagingInput, StagingOutput};
use skiff_agent::update::UpdateSink;

use skiff_core::config::{AgentConfig, PlatformConfig};
use skiff_core::protocol::{AgentFrame, ClientFrame, ControlMsg, StateUpdate, Unschedule};
use skiff_core::state::TaskState;
use skiff_core::task::Task;
use skiff_core::{timestamp, CoreError};
use skiff_launch::LaunchRegistry;
use skiff_scheduler::ResourceMap;
use skiff_transport::{queue, Bridge, PubSub};

#[derive(Parser)]
#[command(name = "skiff-agent", about = "In-allocation pilot agent")]
struct Cli {
    /// Platform configuration file (JSON object keyed by platform name)
    #[arg(long)]
    platform_config: PathBuf,

    /// Platform entry to use
    #[arg(long)]
    platform: String,

    /// Agent runtime configuration (JSON); defaults apply when omitted
    #[arg(long)]
    agent_config: Option<PathBuf>,

    #[arg(long, default_value = "session.0000")]
    session: String,

    #[arg(long, default_value = "pilot.0000")]
    pilot: String,

    /// Root of the sandbox tree on the target filesystem
    #[arg(long, default_value = ".")]
    sandbox_root: PathBuf,

    /// Bridge listen address, overriding config and $SKIFF_DBURL
    #[arg(long)]
    bridge_addr: Option<String>,

    /// Write rolling logs here instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_env("SKIFF_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let appender = tracing_appender::rolling::daily(dir, "agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_ref());

    if let Err(e) = run(cli).await {
        error!("agent failed: {e}");
        std::process::exit(e.exit_code());
    }
    info!("agent exiting cleanly");
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let platform = PlatformConfig::load(&cli.platform_config, &cli.platform)?;
    let mut agent_cfg = match &cli.agent_config {
        Some(path) => AgentConfig::load(path)?,
        None => {
            // Fall back to the user config dir before the defaults.
            let user_cfg = skiff_core::config::config_dir().join("agent.json");
            if user_cfg.is_file() {
                AgentConfig::load(&user_cfg)?
            } else {
                AgentConfig::default()
            }
        }
    };
    if let Some(addr) = &cli.bridge_addr {
        agent_cfg.bridge_addr = addr.clone();
    } else if let Ok(addr) = std::env::var("SKIFF_DBURL") {
        agent_cfg.bridge_addr = addr;
    }

    if platform.agent_spawner != "POPEN" {
        return Err(CoreError::Config(format!(
            "unknown agent spawner `{}`",
            platform.agent_spawner
        )));
    }

    // Resource discovery comes first: a broken allocation must not get
    // as far as accepting tasks.
    let rm = skiff_rm::create(&platform)?;
    let specs = rm.nodes()?;
    info!(rm = rm.name(), nodes = specs.len(), "allocation discovered");
    let arch = &platform.system_architecture;
    let map = ResourceMap::new(&specs, &arch.blocked_cores, &arch.blocked_gpus);

    for (key, value) in rm.launch_env() {
        std::env::set_var(key, value);
    }

    let registry = Arc::new(LaunchRegistry::from_config(&platform.launch_methods)?);
    info!(methods = ?registry.names(), "launch methods ready");
    let placer = skiff_scheduler::create(&platform.agent_scheduler)?;

    let workdir = platform.remote_workdir().map(PathBuf::from);
    let sandbox_root = workdir.unwrap_or(cli.sandbox_root);
    let sandboxes = Sandboxes::create(&sandbox_root, &cli.session, &cli.pilot)
        .map_err(|e| CoreError::Bootstrap(format!("sandbox tree: {e}")))?;

    let hwm = agent_cfg.stall_hwm;
    let (stage_in_tx, stage_in_rx) = queue::<Task>("agent_staging_input", hwm);
    let (sched_tx, sched_rx) = queue::<Task>("agent_scheduling", hwm);
    let (exec_tx, exec_rx) = queue::<Task>("agent_executing", hwm);
    let (stage_out_tx, stage_out_rx) = queue::<Task>("agent_staging_output", hwm);
    let (state_tx, state_rx) = queue::<StateUpdate>("agent_state", hwm);
    let (raptor_tx, raptor_rx) = queue::<Task>("raptor_scheduling", hwm);
    let control = PubSub::<ControlMsg>::new("control", 256);
    let unschedule = PubSub::<Unschedule>::new("unschedule", 1024);

    let ctx = AgentContext::new(
        agent_cfg.clone(),
        sandboxes,
        control.clone(),
        unschedule.clone(),
        state_tx,
    );

    let bridge = Arc::new(
        Bridge::<ClientFrame, AgentFrame>::listen(&agent_cfg.bridge_addr)
            .await
            .map_err(|e| CoreError::Bootstrap(e.to_string()))?,
    );

    for _ in 0..agent_cfg.replicas("staging_input") {
        let component = StagingInput::new(ctx.clone(), sched_tx.clone());
        tokio::spawn(component.run(stage_in_rx.clone()));
    }
    // The scheduler owns the resource map; exactly one instance.
    tokio::spawn(Scheduler::new(ctx.clone(), placer, map, exec_tx.clone()).run(sched_rx));
    for _ in 0..agent_cfg.replicas("executor") {
        let component = Executor::new(ctx.clone(), registry.clone(), stage_out_tx.clone());
        tokio::spawn(component.run(exec_rx.clone()));
    }
    for _ in 0..agent_cfg.replicas("staging_output") {
        tokio::spawn(StagingOutput::new(ctx.clone()).run(stage_out_rx.clone()));
    }
    tokio::spawn(Master::new(ctx.clone(), FunctionRegistry::default()).run(raptor_rx));
    let update_handle = tokio::spawn(UpdateSink::new(bridge.clone()).run(state_rx));

    let _ = bridge.send(AgentFrame::Pilot {
        state: "ACTIVE".into(),
        ts: timestamp(),
    });
    let agent_id = uuid::Uuid::new_v4();
    info!(%agent_id, addr = %bridge.local_addr(), pilot = %cli.pilot, "agent active");

    let deadline = if agent_cfg.runtime_secs > 0 {
        Some(tokio::time::Instant::now() + Duration::from_secs(agent_cfg.runtime_secs))
    } else {
        None
    };

    let mut control_sub = control.subscribe(&[TOPIC_CONTROL]);
    let final_state = loop {
        let expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            frame = bridge.recv() => match frame {
                Some(ClientFrame::Submit(tasks)) => {
                    intake(&ctx, tasks, &stage_in_tx, &raptor_tx).await;
                }
                Some(ClientFrame::Control(msg)) => {
                    info!(?msg, "control received");
                    let stop = matches!(msg, ControlMsg::CancelPilot | ControlMsg::Shutdown);
                    let canceled = matches!(msg, ControlMsg::CancelPilot);
                    control.publish(TOPIC_CONTROL, msg);
                    if stop {
                        break if canceled { "CANCELED" } else { "DONE" };
                    }
                }
                None => break "FAILED",
            },
            msg = control_sub.recv() => {
                if matches!(msg, Some(ControlMsg::CancelPilot) | None) {
                    break "CANCELED";
                }
            },
            _ = expiry => {
                warn!("pilot wall-clock budget expired");
                control.publish(TOPIC_CONTROL, ControlMsg::CancelPilot);
                break "DONE";
            },
            _ = tokio::signal::ctrl_c() => {
                control.publish(TOPIC_CONTROL, ControlMsg::Shutdown);
                break "CANCELED";
            },
        }
    };

    // Orderly shutdown: stop intake, let every component drain out, and
    // flush the update stream before reporting the pilot state.
    control.publish(TOPIC_CONTROL, ControlMsg::Shutdown);
    drop(stage_in_tx);
    drop(raptor_tx);
    drop(sched_tx);
    drop(exec_tx);
    drop(stage_out_tx);
    drop(ctx);

    match tokio::time::timeout(Duration::from_secs(30), update_handle).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => warn!("update sink panicked: {e}"),
        Err(_) => warn!("update sink did not drain in time"),
    }
    let _ = bridge.send(AgentFrame::Pilot {
        state: final_state.into(),
        ts: timestamp(),
    });
    Ok(())
}

/// Route submitted tasks into the pipeline: raptor-shaped work to the
/// master, everything else to input staging.
async fn intake(
    ctx: &AgentContext,
    tasks: Vec<Task>,
    stage_in_tx: &skiff_transport::QueueSender<Task>,
    raptor_tx: &skiff_transport::QueueSender<Task>,
) {
    for mut task in tasks {
        let raptor = task.description.mode.is_raptor_request()
            || matches!(
                task.description.mode,
                skiff_core::task::TaskMode::Master | skiff_core::task::TaskMode::Worker
            );
        if raptor {
            if raptor_tx.put(task).await.is_err() {
                warn!("raptor queue closed");
            }
            continue;
        }
        ctx.advance(&mut task, TaskState::AgentStagingInputPending, None).await;
        if stage_in_tx.put(task).await.is_err() {
            warn!("staging-input queue closed");
        }
    }
}
