use tracing::{info, warn};

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{hostlist, require, EnvMap, ResourceManager, RmInfo};

/// Reads the SLURM allocation manifest: `SLURM_NODELIST` (compact form),
/// `SLURM_NNODES` and `SLURM_CPUS_ON_NODE`.
#[derive(Debug)]
pub struct Slurm {
    env: EnvMap,
    info: RmInfo,
}

impl Slurm {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }
}

impl ResourceManager for Slurm {
    fn name(&self) -> &'static str {
        "SLURM"
    }

    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError> {
        let nodelist = require(&self.env, "SLURM_NODELIST")?;
        let names = hostlist::expand(&nodelist)?;
        info!(nodelist, n = names.len(), "expanded SLURM_NODELIST");

        if let Some(nnodes) = self.env.get("SLURM_NNODES") {
            let nnodes: usize = nnodes
                .parse()
                .map_err(|_| CoreError::AllocationUnreadable("$SLURM_NNODES not numeric".into()))?;
            if nnodes != names.len() {
                return Err(CoreError::ConfigMismatch(format!(
                    "$SLURM_NNODES ({nnodes}) != len($SLURM_NODELIST) ({})",
                    names.len()
                )));
            }
        }

        if let Some(cpn) = self.env.get("SLURM_CPUS_ON_NODE") {
            let cpn: usize = cpn
                .parse()
                .map_err(|_| CoreError::AllocationUnreadable("$SLURM_CPUS_ON_NODE not numeric".into()))?;
            if cpn != self.info.slots_per_node() {
                // SMT settings legitimately differ; only a plain
                // core-count disagreement is fatal.
                if cpn != self.info.cores_per_node {
                    return Err(CoreError::ConfigMismatch(format!(
                        "$SLURM_CPUS_ON_NODE ({cpn}) != configured cores per node ({})",
                        self.info.cores_per_node
                    )));
                }
                warn!(
                    cpn,
                    slots = self.info.slots_per_node(),
                    "SLURM core count differs from SMT-expanded slot count"
                );
            }
        }

        Ok(names.into_iter().map(|n| self.info.node_spec(n)).collect())
    }

    fn launch_env(&self) -> Vec<(String, String)> {
        self.env
            .get("SLURM_NODELIST")
            .map(|v| vec![("SKIFF_RM_NODELIST".to_string(), v.clone())])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RmInfo {
        RmInfo {
            cores_per_node: 4,
            gpus_per_node: 0,
            lfs_path: None,
            lfs_size: 0,
            mem_per_node: 16384,
            smt: 1,
        }
    }

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn expands_nodelist_in_order() {
        let rm = Slurm::new(
            env(&[
                ("SLURM_NODELIST", "n[01-02]"),
                ("SLURM_NNODES", "2"),
                ("SLURM_CPUS_ON_NODE", "4"),
            ]),
            info(),
        );
        let nodes = rm.nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "n01");
        assert_eq!(nodes[1].name, "n02");
        assert_eq!(nodes[0].cores, 4);
    }

    #[test]
    fn missing_manifest_is_unreadable() {
        let rm = Slurm::new(EnvMap::new(), info());
        assert!(matches!(rm.nodes(), Err(CoreError::AllocationUnreadable(_))));
    }

    #[test]
    fn node_count_mismatch_is_fatal() {
        let rm = Slurm::new(
            env(&[("SLURM_NODELIST", "n[01-02]"), ("SLURM_NNODES", "3")]),
            info(),
        );
        assert!(matches!(rm.nodes(), Err(CoreError::ConfigMismatch(_))));
    }

    #[test]
    fn core_count_mismatch_is_fatal() {
        let rm = Slurm::new(
            env(&[("SLURM_NODELIST", "n01"), ("SLURM_CPUS_ON_NODE", "8")]),
            info(),
        );
        assert!(matches!(rm.nodes(), Err(CoreError::ConfigMismatch(_))));
    }
}
