use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{resolve_command, Barrier, LaunchCmd, LaunchMethod};

/// Remote shell launch for serial tasks on platforms without a proper
/// launcher. Assumes a shared filesystem: the exec script path must be
/// valid on the target node.
pub struct Ssh {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Ssh {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        let command = resolve_command("SSH", &options, &["ssh"])?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Ssh {
    fn name(&self) -> &'static str {
        "SSH"
    }

    fn applicable(&self, td: &TaskDescription) -> bool {
        !td.uses_mpi() && td.ranks == 1
    }

    fn build_command(&self, _task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let rank = slots
            .ranks
            .first()
            .ok_or_else(|| CoreError::Runtime("ssh launch without slots".into()))?;
        let mut argv = vec![
            self.command.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "ControlMaster=auto".into(),
        ];
        argv.extend(self.options.options.iter().cloned());
        argv.push(rank.node_name.clone());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        None
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["SSH_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::Filesystem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::{make_slots, make_task};

    fn ssh() -> Ssh {
        Ssh::new(LaunchMethodOptions {
            command: Some("/usr/bin/ssh".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn targets_the_assigned_node() {
        let task = make_task("task.0008", 1, 1, false);
        let slots = make_slots(&[("n7", &[&[2]])]);
        let cmd = ssh()
            .build_command(&task, &slots, Path::new("/sb/task.0008.exec.sh"))
            .unwrap();
        assert_eq!(cmd.argv.last().unwrap(), "/sb/task.0008.exec.sh");
        assert!(cmd.argv.contains(&"n7".to_string()));
        assert!(cmd.argv.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn rejects_mpi_and_multi_rank() {
        let lm = ssh();
        assert!(lm.applicable(&make_task("t", 1, 1, false).description));
        assert!(!lm.applicable(&make_task("t", 1, 1, true).description));
        assert!(!lm.applicable(&make_task("t", 2, 1, false).description));
        assert_eq!(lm.barrier(), Barrier::Filesystem);
    }
}
