//! Launch methods translate a task plus its slot assignment into a
//! launcher invocation (`srun`, `mpirun`, `jsrun`, ...) with matching
//! host lists, rank files and binding arguments. Methods are stateless;
//! the registry holds the configured set in platform order and resolves
//! the first applicable one per task.

pub mod aprun;
pub mod env;
pub mod flux;
pub mod fork;
pub mod hostfile;
pub mod jsrun;
pub mod mpiexec;
pub mod mpirun;
pub mod prte;
pub mod srun;
pub mod ssh;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use skiff_core::config::{LaunchMethodsConfig, LaunchMethodOptions};
use skiff_core::task::{Task, TaskDescription};
use skiff_core::types::Slots;
use skiff_core::CoreError;

pub use aprun::Aprun;
pub use flux::Flux;
pub use fork::Fork;
pub use jsrun::Jsrun;
pub use mpiexec::Mpiexec;
pub use mpirun::Mpirun;
pub use prte::Prte;
pub use srun::Srun;
pub use ssh::Ssh;

/// How ranks other than rank 0 are held back until rank 0 finished the
/// task's `pre_exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// The payload's MPI_Init synchronizes: rank 0 joins it only after
    /// `pre_exec` ran.
    MpiInit,
    /// Rank 0 drops a flag file in the sandbox; other ranks poll for it.
    Filesystem,
}

/// A file the executor materializes in the task sandbox before spawning
/// the launch script (hostfiles, rank files, resource sets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxFile {
    pub name: String,
    pub content: String,
}

/// The launcher invocation for one task. `argv` refers to aux files by
/// bare name; the launch script runs with the sandbox as working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCmd {
    pub argv: Vec<String>,
    pub aux_files: Vec<AuxFile>,
}

pub trait LaunchMethod: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this method can launch the given description on this
    /// platform (MPI support, rank count limits).
    fn applicable(&self, td: &TaskDescription) -> bool;

    fn build_command(&self, task: &Task, slots: &Slots, exec_path: &Path) -> Result<LaunchCmd, CoreError>;

    /// Environment variable the launcher sets to the rank id, if any.
    /// When None the exec script falls back to `SKIFF_RANK`.
    fn rank_id_var(&self) -> Option<&'static str>;

    /// Variable prefixes the launcher injects into the rank environment;
    /// these are stripped before user `pre_exec` runs.
    fn injected_prefixes(&self) -> &'static [&'static str];

    /// Idempotent environment prep run once per agent (from platform
    /// config, e.g. `module load` lines).
    fn pre_exec_cached(&self) -> &[String];

    fn barrier(&self) -> Barrier;
}

/// Look up an executable by candidate names on `$PATH`, like the shell
/// would.
pub fn find_executable(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for name in names {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve the launcher binary for a method: an explicit `command` in
/// the options wins, otherwise the candidates are probed on `$PATH`.
pub(crate) fn resolve_command(
    method: &str,
    options: &LaunchMethodOptions,
    candidates: &[&str],
) -> Result<PathBuf, CoreError> {
    if let Some(cmd) = &options.command {
        return Ok(PathBuf::from(cmd));
    }
    find_executable(candidates).ok_or_else(|| {
        CoreError::LmUnavailable(format!("{method}: none of {candidates:?} found on $PATH"))
    })
}

/// The configured launch methods, in platform order.
pub struct LaunchRegistry {
    methods: Vec<Box<dyn LaunchMethod>>,
}

impl LaunchRegistry {
    /// Build every method named in `launch_methods.order`. A method
    /// whose launcher binary is missing is skipped with a warning; an
    /// empty result is a configuration error.
    pub fn from_config(cfg: &LaunchMethodsConfig) -> Result<Self, CoreError> {
        let mut methods: Vec<Box<dyn LaunchMethod>> = Vec::new();
        for name in &cfg.order {
            let options = cfg.options(name);
            let built: Result<Box<dyn LaunchMethod>, CoreError> = match name.as_str() {
                "SRUN" => Srun::new(options).map(|m| Box::new(m) as _),
                "MPIRUN" => Mpirun::new(options).map(|m| Box::new(m) as _),
                "MPIEXEC" => Mpiexec::new(options).map(|m| Box::new(m) as _),
                "JSRUN" => Jsrun::new(options).map(|m| Box::new(m) as _),
                "APRUN" => Aprun::new(options).map(|m| Box::new(m) as _),
                "PRTE" => Prte::new(options).map(|m| Box::new(m) as _),
                "SSH" => Ssh::new(options).map(|m| Box::new(m) as _),
                "FORK" => Ok(Box::new(Fork::new(options)) as _),
                "FLUX" => Flux::new(options).map(|m| Box::new(m) as _),
                other => Err(CoreError::Config(format!("unknown launch method `{other}`"))),
            };
            match built {
                Ok(m) => {
                    debug!(method = m.name(), "registered launch method");
                    methods.push(m);
                }
                Err(CoreError::LmUnavailable(why)) => {
                    warn!("skipping launch method {name}: {why}");
                }
                Err(e) => return Err(e),
            }
        }
        if methods.is_empty() {
            return Err(CoreError::Config(
                "no usable launch method on this platform".into(),
            ));
        }
        Ok(Self { methods })
    }

    pub fn from_methods(methods: Vec<Box<dyn LaunchMethod>>) -> Self {
        Self { methods }
    }

    /// First configured method that can launch this description.
    pub fn resolve(&self, td: &TaskDescription) -> Option<&dyn LaunchMethod> {
        self.methods.iter().find(|m| m.applicable(td)).map(|m| m.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests_common {
    use std::collections::HashMap;

    use skiff_core::task::{Task, TaskDescription, ThreadingType};
    use skiff_core::types::{RankSlot, Slots};

    pub fn make_task(uid: &str, ranks: usize, cores_per_rank: usize, mpi: bool) -> Task {
        Task::new(
            uid,
            TaskDescription {
                executable: "/bin/date".into(),
                ranks,
                cores_per_rank,
                threading: if mpi { ThreadingType::Mpi } else { ThreadingType::None },
                environment: HashMap::new(),
                ..Default::default()
            },
        )
    }

    /// `layout` is ranks per node: `&[(name, &[rank core sets])]`.
    pub fn make_slots(layout: &[(&str, &[&[usize]])]) -> Slots {
        let mut ranks = Vec::new();
        for (node_id, (name, rank_cores)) in layout.iter().enumerate() {
            for cores in rank_cores.iter() {
                ranks.push(RankSlot {
                    node_id,
                    node_name: name.to_string(),
                    core_ids: cores.to_vec(),
                    gpu_ids: Vec::new(),
                    lfs: 0,
                    mem: 0,
                });
            }
        }
        Slots::new(ranks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::config::LaunchMethodsConfig;

    fn config_with(order: &[&str], fake_cmd: &str) -> LaunchMethodsConfig {
        let mut cfg = LaunchMethodsConfig {
            order: order.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        for name in order {
            cfg.methods.insert(
                name.to_string(),
                LaunchMethodOptions {
                    command: Some(fake_cmd.into()),
                    ..Default::default()
                },
            );
        }
        cfg
    }

    #[test]
    fn registry_resolves_in_configured_order() {
        let cfg = config_with(&["MPIRUN", "FORK"], "/usr/bin/mpirun");
        let reg = LaunchRegistry::from_config(&cfg).unwrap();
        assert_eq!(reg.names(), vec!["MPIRUN", "FORK"]);

        let mpi = tests_common::make_task("t.0", 2, 1, true).description;
        assert_eq!(reg.resolve(&mpi).unwrap().name(), "MPIRUN");

        // MPIRUN also covers serial tasks, so order wins over fit.
        let serial = tests_common::make_task("t.1", 1, 1, false).description;
        assert_eq!(reg.resolve(&serial).unwrap().name(), "MPIRUN");
    }

    #[test]
    fn serial_only_method_skips_mpi_tasks() {
        let cfg = config_with(&["FORK"], "");
        let reg = LaunchRegistry::from_config(&cfg).unwrap();
        let mpi = tests_common::make_task("t.0", 2, 1, true).description;
        assert!(reg.resolve(&mpi).is_none());
    }

    #[test]
    fn empty_registry_is_config_error() {
        // SRUN probed on $PATH and (presumably) absent, nothing else.
        let cfg = LaunchMethodsConfig {
            order: vec!["SRUN".into()],
            ..Default::default()
        };
        if find_executable(&["srun"]).is_none() {
            assert!(matches!(
                LaunchRegistry::from_config(&cfg),
                Err(CoreError::Config(_))
            ));
        }
    }

    #[test]
    fn unknown_method_name_is_config_error() {
        let cfg = config_with(&["WARP"], "/bin/true");
        assert!(matches!(
            LaunchRegistry::from_config(&cfg),
            Err(CoreError::Config(_))
        ));
    }
}
