//! The executor component: turns a scheduled task into a launch-script
//! child process, watches it, and turns the exit back into pipeline
//! traffic. Children run in their own process group so cancellation can
//! signal the whole launcher tree.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use skiff_core::protocol::ControlMsg;
use skiff_core::state::TaskState;
use skiff_core::task::Task;
use skiff_core::timestamp;
use skiff_core::types::Slots;
use skiff_core::CoreError;
use skiff_launch::LaunchRegistry;
use skiff_transport::{QueueReceiver, QueueSender};

use crate::context::{AgentContext, TOPIC_CONTROL};
use crate::scripts;

/// Bytes of task stdout/stderr surfaced in state updates; the full
/// files stay in the sandbox.
const SURFACE_BYTES: usize = 1024;

struct RunningTask {
    pgid: i32,
    canceled: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct Executor {
    ctx: AgentContext,
    registry: Arc<LaunchRegistry>,
    out_tx: QueueSender<Task>,
    running: Arc<Mutex<HashMap<String, RunningTask>>>,
    cancel_requested: Arc<Mutex<HashSet<String>>>,
}

impl Executor {
    pub fn new(ctx: AgentContext, registry: Arc<LaunchRegistry>, out_tx: QueueSender<Task>) -> Self {
        Self {
            ctx,
            registry,
            out_tx,
            running: Arc::new(Mutex::new(HashMap::new())),
            cancel_requested: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self, exec_rx: QueueReceiver<Task>) {
        let canceller = self.clone();
        let cancel_loop = tokio::spawn(async move { canceller.cancel_loop().await });

        while let Some(task) = exec_rx.get().await {
            self.handle(task).await;
        }

        cancel_loop.abort();
    }

    async fn handle(&self, mut task: Task) {
        // Canceled between scheduling and here: drop through cleanly.
        if self.cancel_requested.lock().unwrap().remove(&task.uid) {
            self.ctx.release_slots(&task);
            self.ctx.advance(&mut task, TaskState::Canceled, None).await;
            return;
        }

        match self.launch(&mut task).await {
            Ok((child, canceled)) => {
                let watcher = self.clone();
                tokio::spawn(async move { watcher.watch(task, child, canceled).await });
            }
            Err(e) => {
                warn!(uid = %task.uid, "launch failed: {e}");
                self.ctx.release_slots(&task);
                self.ctx.fail(&mut task, e.to_string()).await;
            }
        }
    }

    /// Materialize sandbox, scripts and aux files, then spawn the
    /// launch script in its own process group.
    async fn launch(&self, task: &mut Task) -> Result<(tokio::process::Child, Arc<AtomicBool>), CoreError> {
        let lm = self
            .registry
            .resolve(&task.description)
            .ok_or_else(|| CoreError::LmUnavailable(format!("no launch method for task {}", task.uid)))?;

        let sandbox = self.ctx.sandboxes.task_sandbox(task);
        std::fs::create_dir_all(&sandbox)?;

        let slots = task.slots.clone().unwrap_or_else(Slots::default);
        let exec_path = sandbox.join(scripts::exec_script_name(&task.uid));
        let cmd = lm.build_command(task, &slots, &exec_path)?;

        for aux in &cmd.aux_files {
            std::fs::write(sandbox.join(&aux.name), &aux.content)?;
        }
        write_executable(&exec_path, &scripts::exec_script(task, lm))?;

        let launch_path = sandbox.join(scripts::launch_script_name(&task.uid));
        let script = scripts::launch_script(task, lm, &cmd.argv, &self.ctx.sandboxes.env());
        write_executable(&launch_path, &script)?;

        let launch_out = std::fs::File::create(sandbox.join(format!("{}.launch.out", task.uid)))?;
        let launch_err = std::fs::File::create(sandbox.join(format!("{}.launch.err", task.uid)))?;

        let mut command = Command::new(&launch_path);
        command
            .current_dir(&sandbox)
            .stdin(Stdio::null())
            .stdout(Stdio::from(launch_out))
            .stderr(Stdio::from(launch_err));
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| CoreError::Runtime(format!("spawn {}: {e}", launch_path.display())))?;

        let pgid = child.id().map(|p| p as i32).unwrap_or(0);
        let canceled = Arc::new(AtomicBool::new(false));
        self.running.lock().unwrap().insert(
            task.uid.clone(),
            RunningTask {
                pgid,
                canceled: canceled.clone(),
            },
        );

        task.started = Some(timestamp());
        info!(uid = %task.uid, method = lm.name(), pgid, "task launched");
        self.ctx.advance(task, TaskState::AgentExecuting, None).await;
        Ok((child, canceled))
    }

    /// Wait for the child, release slots, and route the outcome.
    async fn watch(&self, mut task: Task, mut child: tokio::process::Child, canceled: Arc<AtomicBool>) {
        let status = child.wait().await;
        self.running.lock().unwrap().remove(&task.uid);
        task.stopped = Some(timestamp());

        // Slots return to the map regardless of the outcome.
        self.ctx.release_slots(&task);

        let code = match &status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        task.exit_code = Some(code);

        if canceled.load(Ordering::SeqCst) {
            info!(uid = %task.uid, "task canceled");
            self.ctx.advance(&mut task, TaskState::Canceled, None).await;
        } else if code == 0 {
            debug!(uid = %task.uid, "task done executing");
            self.ctx
                .advance(&mut task, TaskState::AgentStagingOutputPending, None)
                .await;
            if self.out_tx.put(task).await.is_err() {
                warn!("staging-output queue closed");
            }
        } else {
            let sandbox = self.ctx.sandboxes.task_sandbox(&task);
            let stderr_tail = surface_file(&sandbox.join(scripts::stderr_name(&task)));
            info!(uid = %task.uid, code, "task failed");
            let error = if code == scripts::PRE_EXEC_FAILED {
                format!(
                    "pre_exec failed on rank 0{}: {stderr_tail}",
                    self.isolation_report(&task, &sandbox)
                )
            } else {
                format!("task exited with code {code}: {stderr_tail}")
            };
            self.ctx.fail(&mut task, error).await;
        }
    }

    /// When rank-0 `pre_exec` failed, report which launcher-injected
    /// variables the exec script withheld from it, by diffing the env
    /// dumps the scripts left in the sandbox.
    fn isolation_report(&self, task: &Task, sandbox: &Path) -> String {
        let Some(lm) = self.registry.resolve(&task.description) else {
            return String::new();
        };
        let launch_dump = std::fs::read_to_string(
            sandbox.join(scripts::launch_env_dump_name(&task.uid)),
        )
        .unwrap_or_default();
        let rank_dump = std::fs::read_to_string(
            sandbox.join(scripts::rank_env_dump_name(&task.uid, 0)),
        )
        .unwrap_or_default();
        let withheld = skiff_launch::env::injected_names(
            &skiff_launch::env::parse_dump(&launch_dump),
            &skiff_launch::env::parse_dump(&rank_dump),
            lm.injected_prefixes(),
        );
        if withheld.is_empty() {
            String::new()
        } else {
            format!(" (withheld launcher vars: {})", withheld.join(","))
        }
    }

    /// Control fan-in: SIGTERM the process group, escalate to SIGKILL
    /// after the grace period. Safe to repeat for the same uid.
    async fn cancel_loop(&self) {
        let grace = Duration::from_secs(self.ctx.cfg.cancel_grace_secs);
        let mut sub = self.ctx.control.subscribe(&[TOPIC_CONTROL]);
        while let Some(msg) = sub.recv().await {
            let uids = match msg {
                ControlMsg::CancelTasks { uids } => uids,
                ControlMsg::CancelPilot | ControlMsg::Shutdown => {
                    self.running.lock().unwrap().keys().cloned().collect::<Vec<_>>()
                }
            };
            for uid in uids {
                self.cancel_one(&uid, grace);
            }
        }
    }

    fn cancel_one(&self, uid: &str, grace: Duration) {
        let pgid = {
            let running = self.running.lock().unwrap();
            match running.get(uid) {
                Some(entry) => {
                    entry.canceled.store(true, Ordering::SeqCst);
                    entry.pgid
                }
                None => {
                    // Not launched yet; mark for the pre-spawn check.
                    self.cancel_requested.lock().unwrap().insert(uid.to_string());
                    return;
                }
            }
        };
        info!(uid, pgid, "signaling task");
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGTERM);

        let running = self.running.clone();
        let uid = uid.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_up = running.lock().unwrap().contains_key(&uid);
            if still_up {
                warn!(uid, pgid, "grace expired, killing");
                let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
            }
        });
    }
}

fn write_executable(path: &Path, content: &str) -> Result<(), CoreError> {
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// The tail of an output file, bounded for surfacing in a state update.
fn surface_file(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let bytes = content.as_bytes();
    if bytes.len() <= SURFACE_BYTES {
        return content;
    }
    let tail = String::from_utf8_lossy(&bytes[bytes.len() - SURFACE_BYTES..]);
    format!("[... content shortened ...]\n{tail}")
}
