use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, AuxFile, Barrier, LaunchCmd, LaunchMethod};

/// IBM jsrun (Summit-class LSF machines). Placement and binding are
/// expressed entirely in an explicit resource file derived from the
/// slot map.
pub struct Jsrun {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Jsrun {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("JSRUN", &options, &["jsrun"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Jsrun {
    fn name(&self) -> &'static str {
        "JSRUN"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let erf_name = format!("{}.rs", task.uid);
        let mut argv = vec![
            self.command.display().to_string(),
            "--erf_input".into(),
            erf_name.clone(),
        ];
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: vec![AuxFile {
                name: erf_name,
                content: hostfile::erf(slots),
            }],
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("PMIX_RANK")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["PMIX_", "OMPI_", "JSM_", "LSF_", "LSB_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}
