use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// Hydra-style `mpiexec` (MPICH, Intel MPI): hosts are passed inline as
/// `host:count` pairs.
pub struct Mpiexec {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Mpiexec {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("MPIEXEC", &options, &["mpiexec", "mpiexec.hydra"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Mpiexec {
    fn name(&self) -> &'static str {
        "MPIEXEC"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, _task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let mut argv = vec![
            self.command.display().to_string(),
            "-n".into(),
            slots.len().to_string(),
            "-hosts".into(),
            hostfile::host_string(slots),
        ];
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("PMI_RANK")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["PMI_", "HYDRA_", "MPIEXEC_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
