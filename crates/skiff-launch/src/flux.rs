use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// Flux instance launcher (`flux run`). The agent assumes a Flux
/// instance spans the allocation; placement within it is by counts.
pub struct Flux {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Flux {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("FLUX", &options, &["flux"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Flux {
    fn name(&self) -> &'static str {
        "FLUX"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let td = &task.description;
        let mut argv = vec![
            self.command.display().to_string(),
            "run".into(),
            "-n".into(),
            slots.len().to_string(),
            "-N".into(),
            slots.node_names().len().to_string(),
            "-c".into(),
            td.cores_per_rank.max(1).to_string(),
        ];
        if td.gpus_per_rank > 0 {
            argv.push("-g".into());
            argv.push(td.gpus_per_rank.to_string());
        }
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("FLUX_TASK_RANK")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["FLUX_", "PMI_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
