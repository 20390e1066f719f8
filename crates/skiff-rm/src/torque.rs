use tracing::{info, warn};

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{require, unique_ordered, EnvMap, ResourceManager, RmInfo};

/// Torque writes one line per allocated core to `$PBS_NODEFILE`; the
/// node list is the unique hostnames, the per-node core count either
/// comes from `$PBS_NUM_PPN` (newer Torque) or from the entry ratio.
#[derive(Debug)]
pub struct Torque {
    env: EnvMap,
    info: RmInfo,
}

impl Torque {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }
}

impl ResourceManager for Torque {
    fn name(&self) -> &'static str {
        "TORQUE"
    }

    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError> {
        let nodefile = require(&self.env, "PBS_NODEFILE")?;
        let raw = std::fs::read_to_string(&nodefile).map_err(|e| {
            CoreError::AllocationUnreadable(format!("cannot read $PBS_NODEFILE {nodefile}: {e}"))
        })?;
        let entries: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if entries.is_empty() {
            return Err(CoreError::AllocationUnreadable("$PBS_NODEFILE is empty".into()));
        }
        let names = unique_ordered(entries.iter().cloned());
        info!(nodefile, nodes = names.len(), entries = entries.len(), "parsed PBS_NODEFILE");

        let ppn = match self.env.get("PBS_NUM_PPN").and_then(|v| v.parse::<usize>().ok()) {
            Some(ppn) => ppn,
            None => {
                warn!("$PBS_NUM_PPN not set, deriving cores per node from nodefile");
                entries.len() / names.len()
            }
        };

        if let Some(nnodes) = self.env.get("PBS_NUM_NODES").and_then(|v| v.parse::<usize>().ok()) {
            if nnodes * ppn != entries.len() {
                return Err(CoreError::ConfigMismatch(format!(
                    "len($PBS_NODEFILE) ({}) != $PBS_NUM_NODES * $PBS_NUM_PPN ({nnodes}*{ppn})",
                    entries.len()
                )));
            }
        }

        if ppn != self.info.cores_per_node {
            return Err(CoreError::ConfigMismatch(format!(
                "allocation reports {ppn} cores per node, platform config says {}",
                self.info.cores_per_node
            )));
        }

        Ok(names.into_iter().map(|n| self.info.node_spec(n)).collect())
    }

    fn launch_env(&self) -> Vec<(String, String)> {
        self.env
            .get("PBS_NODEFILE")
            .map(|v| vec![("SKIFF_RM_NODEFILE".to_string(), v.clone())])
            .unwrap_or_default()
    }
}
