use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// Cray ALPS launcher. Geometry is flags only: total ranks, ranks per
/// node, depth per rank, candidate node list.
pub struct Aprun {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Aprun {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("APRUN", &options, &["aprun"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Aprun {
    fn name(&self) -> &'static str {
        "APRUN"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let td = &task.description;
        let mut argv = vec![
            self.command.display().to_string(),
            "-n".into(),
            slots.len().to_string(),
            "-N".into(),
            slots.max_ranks_per_node().to_string(),
            "-d".into(),
            td.cores_per_rank.max(1).to_string(),
            "-L".into(),
            hostfile::nodelist(slots),
        ];
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("ALPS_APP_PE")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["ALPS_", "APRUN_", "PMI_", "CRAY_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
