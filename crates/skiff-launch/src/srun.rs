use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// SLURM's native launcher. Handles MPI and serial tasks alike and does
/// its own core binding from the task geometry.
pub struct Srun {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Srun {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("SRUN", &options, &["srun"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Srun {
    fn name(&self) -> &'static str {
        "SRUN"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let td = &task.description;
        let mut argv = vec![
            self.command.display().to_string(),
            format!("--nodes={}", slots.node_names().len()),
            format!("--ntasks={}", slots.len()),
            format!("--ntasks-per-node={}", slots.max_ranks_per_node()),
            format!("--cpus-per-task={}", td.cores_per_rank.max(1)),
        ];
        if td.gpus_per_rank > 0 {
            argv.push(format!("--gpus-per-task={}", td.gpus_per_rank));
        }
        argv.push(format!("--nodelist={}", hostfile::nodelist(slots)));
        argv.push("--export=ALL".into());
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("SLURM_PROCID")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["SLURM_", "SLURMD_", "PMI_", "PMIX_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
