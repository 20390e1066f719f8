//! Resource managers: discover the node list of the allocation the pilot
//! runs in, from whatever manifest the hosting batch system provides.
//! The output is data only; all slot bookkeeping happens in the scheduler.

pub mod cobalt;
pub mod fork;
pub mod hostlist;
pub mod lsf;
pub mod pbspro;
pub mod slurm;
pub mod torque;

use std::collections::HashMap;

use skiff_core::config::PlatformConfig;
use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

pub use cobalt::Cobalt;
pub use fork::Fork;
pub use lsf::Lsf;
pub use pbspro::PbsPro;
pub use slurm::Slurm;
pub use torque::Torque;

/// Environment snapshot the managers parse their manifest from. Taken
/// once at boot; tests inject their own.
pub type EnvMap = HashMap<String, String>;

/// Node shape expected by the platform config, against which the
/// discovered allocation is validated.
#[derive(Debug, Clone)]
pub struct RmInfo {
    pub cores_per_node: usize,
    pub gpus_per_node: usize,
    pub lfs_path: Option<String>,
    pub lfs_size: u64,
    pub mem_per_node: u64,
    /// Hardware threads per core exposed to the scheduler.
    pub smt: usize,
}

impl RmInfo {
    pub fn from_platform(cfg: &PlatformConfig, env: &EnvMap) -> Self {
        let smt = env
            .get("SKIFF_SMT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.system_architecture.smt)
            .max(1);
        Self {
            cores_per_node: cfg.cores_per_node,
            gpus_per_node: cfg.gpus_per_node,
            lfs_path: cfg.lfs_path_per_node.clone(),
            lfs_size: cfg.lfs_size_per_node,
            mem_per_node: cfg.mem_per_node,
            smt,
        }
    }

    /// Schedulable cores per node after SMT expansion.
    pub fn slots_per_node(&self) -> usize {
        self.cores_per_node * self.smt
    }

    pub fn node_spec(&self, name: String) -> NodeSpec {
        NodeSpec {
            name,
            cores: self.slots_per_node(),
            gpus: self.gpus_per_node,
            lfs_path: self.lfs_path.clone(),
            lfs_size: self.lfs_size,
            mem: self.mem_per_node,
        }
    }
}

pub trait ResourceManager: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// The allocation's nodes, in the order the batch system declared
    /// them. That order is load-bearing: the scheduler walks it.
    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError>;

    /// Environment handed to launch methods (host lists and the like).
    fn launch_env(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Build the resource manager selected by the platform config tag.
pub fn create(cfg: &PlatformConfig) -> Result<Box<dyn ResourceManager>, CoreError> {
    let env: EnvMap = std::env::vars().collect();
    create_with_env(cfg, env)
}

pub fn create_with_env(cfg: &PlatformConfig, env: EnvMap) -> Result<Box<dyn ResourceManager>, CoreError> {
    let info = RmInfo::from_platform(cfg, &env);
    match cfg.resource_manager.as_str() {
        "SLURM" => Ok(Box::new(Slurm::new(env, info))),
        "TORQUE" => Ok(Box::new(Torque::new(env, info))),
        "PBSPRO" => Ok(Box::new(PbsPro::new(env, info))),
        "LSF" => Ok(Box::new(Lsf::new(env, info))),
        "COBALT" => Ok(Box::new(Cobalt::new(env, info))),
        "FORK" => Ok(Box::new(Fork::new(env, info))),
        other => Err(CoreError::Config(format!("unknown resource manager `{other}`"))),
    }
}

pub(crate) fn require(env: &EnvMap, key: &str) -> Result<String, CoreError> {
    env.get(key)
        .cloned()
        .ok_or_else(|| CoreError::AllocationUnreadable(format!("${key} not set")))
}

/// Deduplicate while keeping first-appearance order.
pub(crate) fn unique_ordered(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::config::{LaunchMethodsConfig, PlatformConfig};

    fn platform(rm: &str) -> PlatformConfig {
        PlatformConfig {
            resource_manager: rm.into(),
            cores_per_node: 4,
            launch_methods: LaunchMethodsConfig {
                order: vec!["FORK".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn unknown_tag_is_config_error() {
        let err = create_with_env(&platform("YARN2"), EnvMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn smt_env_override_scales_slots() {
        let mut env = EnvMap::new();
        env.insert("SKIFF_SMT".into(), "2".into());
        let info = RmInfo::from_platform(&platform("FORK"), &env);
        assert_eq!(info.slots_per_node(), 8);
    }

    #[test]
    fn unique_ordered_keeps_first_appearance() {
        let names = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(unique_ordered(names), vec!["b", "a", "c"]);
    }
}
