use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// PMIx reference runtime: tasks are `prun` submissions against a
/// persistent DVM that the agent started at boot.
pub struct Prte {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Prte {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("PRTE", &options, &["prun"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Prte {
    fn name(&self) -> &'static str {
        "PRTE"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, _task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let mut argv = vec![self.command.display().to_string()];
        if let Some(uri) = &self.options.dvm_uri {
            argv.push("--dvm-uri".into());
            argv.push(uri.clone());
        }
        argv.push("-np".into());
        argv.push(slots.len().to_string());
        argv.push("--host".into());
        argv.push(hostfile::host_string(slots));
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("PMIX_RANK")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["PMIX_", "PRTE_", "OMPI_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
