//! Staging components. Input staging materializes task inputs in the
//! sandbox before scheduling; output staging collects results afterwards.
//! Both execute the same directive set; they differ only in pipeline
//! position and the states they drive.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use skiff_core::state::TaskState;
use skiff_core::task::{StagingAction, StagingDirective, Task};
use skiff_core::CoreError;
use skiff_transport::{QueueReceiver, QueueSender};

use crate::context::AgentContext;

pub struct StagingInput {
    ctx: AgentContext,
    sched_tx: QueueSender<Task>,
}

impl StagingInput {
    pub fn new(ctx: AgentContext, sched_tx: QueueSender<Task>) -> Self {
        Self { ctx, sched_tx }
    }

    pub async fn run(self, rx: QueueReceiver<Task>) {
        let bulk = self.ctx.cfg.bulk_size;
        let threshold = self.ctx.cfg.task_bulk_mkdir_threshold;

        while let Some(tasks) = rx.get_bulk(bulk).await {
            // Large bulks batch sandbox creation into one mkdir call to
            // spare the shared filesystem's metadata servers.
            let dirs: Vec<PathBuf> = tasks.iter().map(|t| self.ctx.sandboxes.task_sandbox(t)).collect();
            if dirs.len() >= threshold {
                bulk_mkdir(&dirs).await;
            }

            for mut task in tasks {
                self.ctx.advance(&mut task, TaskState::AgentStagingInput, None).await;
                let sandbox = self.ctx.sandboxes.task_sandbox(&task);
                if let Err(e) = std::fs::create_dir_all(&sandbox) {
                    self.ctx.fail(&mut task, format!("cannot create sandbox: {e}")).await;
                    continue;
                }
                let directives = task.description.input_staging.clone();
                match run_directives(&self.ctx, &task, &directives) {
                    Ok(()) => {
                        self.ctx
                            .advance(&mut task, TaskState::AgentSchedulingPending, None)
                            .await;
                        if self.sched_tx.put(task).await.is_err() {
                            warn!("scheduler queue closed");
                        }
                    }
                    Err(e) => self.ctx.fail(&mut task, e.to_string()).await,
                }
            }
        }
    }
}

pub struct StagingOutput {
    ctx: AgentContext,
}

impl StagingOutput {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self, rx: QueueReceiver<Task>) {
        while let Some(mut task) = rx.get().await {
            self.ctx.advance(&mut task, TaskState::AgentStagingOutput, None).await;
            let directives = task.description.output_staging.clone();
            match run_directives(&self.ctx, &task, &directives) {
                Ok(()) => {
                    info!(uid = %task.uid, "task done");
                    self.ctx.advance(&mut task, TaskState::Done, None).await;
                }
                // Slots were already released by the executor.
                Err(e) => self.ctx.fail(&mut task, e.to_string()).await,
            }
        }
    }
}

/// One `mkdir -p` with every path, as the platform guidance asks for
/// bulk submission. Failures fall back to per-directory creation later.
async fn bulk_mkdir(dirs: &[PathBuf]) {
    debug!(n = dirs.len(), "bulk mkdir");
    let status = Command::new("mkdir").arg("-p").args(dirs).status().await;
    if let Err(e) = status {
        warn!("bulk mkdir failed: {e}");
    }
}

fn run_directives(ctx: &AgentContext, task: &Task, directives: &[StagingDirective]) -> Result<(), CoreError> {
    let sandbox = ctx.sandboxes.task_sandbox(task);
    for directive in directives {
        run_directive(ctx, &sandbox, directive).map_err(|reason| CoreError::Staging {
            directive: format!(
                "{:?} {} -> {}",
                directive.action, directive.source, directive.target
            ),
            reason,
        })?;
    }
    Ok(())
}

fn run_directive(ctx: &AgentContext, sandbox: &Path, directive: &StagingDirective) -> Result<(), String> {
    let src = ctx
        .sandboxes
        .resolve(&directive.source, sandbox)
        .map_err(|e| e.to_string())?;
    let dst = ctx
        .sandboxes
        .resolve(&directive.target, sandbox)
        .map_err(|e| e.to_string())?;

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("mkdir {}: {e}", parent.display()))?;
    }

    debug!(?directive.action, src = %src.display(), dst = %dst.display(), "staging");
    match directive.action {
        StagingAction::Transfer | StagingAction::Copy => copy_path(&src, &dst),
        StagingAction::Move => {
            if std::fs::rename(&src, &dst).is_ok() {
                Ok(())
            } else {
                copy_path(&src, &dst)?;
                std::fs::remove_file(&src).map_err(|e| format!("remove {}: {e}", src.display()))
            }
        }
        StagingAction::Link => {
            #[cfg(unix)]
            {
                std::os::unix::fs::symlink(&src, &dst)
                    .map_err(|e| format!("link {} -> {}: {e}", dst.display(), src.display()))
            }
            #[cfg(not(unix))]
            {
                Err("symlinks unsupported on this platform".to_string())
            }
        }
    }
}

fn copy_path(src: &Path, dst: &Path) -> Result<(), String> {
    if src.is_dir() {
        copy_dir(src, dst).map_err(|e| format!("copy {}: {e}", src.display()))
    } else {
        std::fs::copy(src, dst)
            .map(|_| ())
            .map_err(|e| format!("copy {}: {e}", src.display()))
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
