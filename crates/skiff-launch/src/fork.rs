use std::path::Path;

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{Barrier, LaunchCmd, LaunchMethod};

/// Local spawn without any launcher binary: the exec script runs
/// directly as rank 0 on the agent node. Serial tasks only.
pub struct Fork {
    options: LaunchMethodOptions,
}

impl Fork {
    pub fn new(options: LaunchMethodOptions) -> Self {
        Self { options }
    }
}

impl LaunchMethod for Fork {
    fn name(&self) -> &'static str {
        "FORK"
    }

    fn applicable(&self, td: &TaskDescription) -> bool {
        !td.uses_mpi() && td.ranks == 1
    }

    fn build_command(&self, _task: &Task, _slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        Ok(LaunchCmd {
            argv: vec![exec_path.display().to_string()],
            aux_files: Vec::new(),
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        None
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &[]
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

    #[test]
    fn runs_the_exec_script_directly() {
        let lm = Fork::new(LaunchMethodOptions::default());
        let task = make_task("task.0009", 1, 1, false);
        let slots = make_slots(&[("localhost", &[&[0]])]);
        let cmd = lm
            .build_command(&task, &slots, Path::new("/sb/task.0009.exec.sh"))
            .unwrap();
        assert_eq!(cmd.argv, vec!["/sb/task.0009.exec.sh"]);
        assert!(lm.rank_id_var().is_none());
    }

    #[test]
    fn serial_only() {
        let lm = Fork::new(LaunchMethodOptions::default());
        assert!(!lm.applicable(&make_task("t", 4, 1, true).description));
        assert!(!lm.applicable(&make_task("t", 2, 1, false).description));
    }
}
