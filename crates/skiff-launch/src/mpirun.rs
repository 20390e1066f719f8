use std::path::{Path, PathBuf};

use skiff_core::config::LaunchMethodOptions;
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

use crate::{hostfile, resolve_command, AuxFile, Barrier, LaunchCmd, LaunchMethod};

/// Open MPI / generic `mpirun`. Placement goes through a per-task
/// hostfile and a rankfile carrying the core binding.
pub struct Mpirun {
    command: PathBuf,
    options: LaunchMethodOptions,
}

impl Mpirun {
    pub fn new(options: LaunchMethodOptions) -> Result<Self, CoreError> {
        // Same candidate list the original field deployments needed.
        let command = resolve_command(
            "MPIRUN",
            &options,
            &["mpirun", "mpirun_rsh", "mpirun-mpich-mp", "mpirun-openmpi-mp"],
        )?;
        Ok(Self { command, options })
    }
}

impl LaunchMethod for Mpirun {
    fn name(&self) -> &'static str {
        "MPIRUN"
    }

    fn applicable(&self, _td: &TaskDescription) -> bool {
        true
    }

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError> {
        let hosts_name = format!("{}.hosts", task.uid);
        let rankfile_name = format!("{}.rf", task.uid);
        let mut argv = vec![
            self.command.display().to_string(),
            "-np".into(),
            slots.len().to_string(),
            "--hostfile".into(),
            hosts_name.clone(),
            "--rankfile".into(),
            rankfile_name.clone(),
        ];
        argv.extend(self.options.options.iter().cloned());
        argv.push(exec_path.display().to_string());
        Ok(LaunchCmd {
            argv,
            aux_files: vec![
                AuxFile {
                    name: hosts_name,
                    content: hostfile::hostfile(slots),
                },
                AuxFile {
                    name: rankfile_name,
                    content: hostfile::rankfile(slots),
                },
            ],
        })
    }

    fn rank_id_var(&self) -> Option<&'static str> {
        Some("OMPI_COMM_WORLD_RANK")
    }

    fn injected_prefixes(&self) -> &'static [&'static str] {
        &["OMPI_", "PMIX_", "PMI_", "OPAL_"]
    }

    fn pre_exec_cached(&self) -> &[String] {
        &self.options.pre_exec_cached
    }

    fn barrier(&self) -> Barrier {
        Barrier::MpiInit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::{make_slots, make_task};

    fn mpirun() -> Mpirun {
        Mpirun::new(LaunchMethodOptions {
            command: Some("/opt/ompi/bin/mpirun".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn emits_hostfile_and_rankfile_from_slots() {
        let task = make_task("task.0002", 6, 1, true);
        let slots = make_slots(&[("n1", &[&[0], &[1], &[2], &[3]]), ("n2", &[&[0], &[1]])]);
        let cmd = mpirun()
            .build_command(&task, &slots, Path::new("/sb/task.0002.exec.sh"))
            .unwrap();
        assert_eq!(
            cmd.argv,
            vec![
                "/opt/ompi/bin/mpirun",
                "-np",
                "6",
                "--hostfile",
                "task.0002.hosts",
                "--rankfile",
                "task.0002.rf",
                "/sb/task.0002.exec.sh",
            ]
        );
        assert_eq!(cmd.aux_files.len(), 2);
        assert_eq!(cmd.aux_files[0].name, "task.0002.hosts");
        assert_eq!(cmd.aux_files[0].content, "n1 slots=4\nn2 slots=2\n");
        assert_eq!(cmd.aux_files[1].name, "task.0002.rf");
        assert!(cmd.aux_files[1].content.starts_with("rank 0=n1 slot=0\n"));
        assert!(cmd.aux_files[1].content.ends_with("rank 5=n2 slot=1\n"));
    }

    #[test]
    fn extra_options_ride_along() {
        let lm = Mpirun::new(LaunchMethodOptions {
            command: Some("mpirun".into()),
            options: vec!["--bind-to".into(), "core".into()],
            ..Default::default()
        })
        .unwrap();
        let task = make_task("task.0003", 1, 1, false);
        let slots = make_slots(&[("n1", &[&[0]])]);
        let cmd = lm.build_command(&task, &slots, Path::new("x.sh")).unwrap();
        let pos = cmd.argv.iter().position(|a| a == "--bind-to").unwrap();
        assert_eq!(cmd.argv[pos + 1], "core");
        assert_eq!(cmd.argv.last().unwrap(), "x.sh");
    }
}
