use tracing::info;

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{require, unique_ordered, EnvMap, ResourceManager, RmInfo};

/// PBSPro also hands out `$PBS_NODEFILE`, with duplicate entries per
/// process slot; `$NUM_PPN` and `$NODE_COUNT` cross-check the shape.
#[derive(Debug)]
pub struct PbsPro {
    env: EnvMap,
    info: RmInfo,
}

impl PbsPro {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }
}

impl ResourceManager for PbsPro {
    fn name(&self) -> &'static str {
        "PBSPRO"
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

        let ppn = self
            .env
            .get("NUM_PPN")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(self.info.cores_per_node);
        if let Some(node_count) = self.env.get("NODE_COUNT").and_then(|v| v.parse::<usize>().ok()) {
            if node_count != names.len() {
                return Err(CoreError::ConfigMismatch(format!(
                    "$NODE_COUNT ({node_count}) != unique nodes in $PBS_NODEFILE ({})",
                    names.len()
                )));
            }
        }
        if ppn != self.info.cores_per_node {
            return Err(CoreError::ConfigMismatch(format!(
                "$NUM_PPN ({ppn}) != configured cores per node ({})",
                self.info.cores_per_node
            )));
        }

        info!(nodefile, nodes = names.len(), ppn, "parsed PBSPro allocation");
        Ok(names.into_iter().map(|n| self.info.node_spec(n)).collect())
    }

    fn launch_env(&self) -> Vec<(String, String)> {
        self.env
            .get("PBS_NODEFILE")
            .map(|v| vec![("SKIFF_RM_NODEFILE".to_string(), v.clone())])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn info() -> RmInfo {
        RmInfo {
            cores_per_node: 3,
            gpus_per_node: 0,
            lfs_path: None,
            lfs_size: 0,
            mem_per_node: 8192,
            smt: 1,
        }
    }

    #[test]
    fn parses_and_cross_checks() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"x1\nx1\nx1\nx2\nx2\nx2\n").unwrap();
        let mut env = EnvMap::new();
        env.insert("PBS_NODEFILE".into(), f.path().display().to_string());
        env.insert("NUM_PPN".into(), "3".into());
        env.insert("NODE_COUNT".into(), "2".into());
        let nodes = PbsPro::new(env, info()).nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name, "x2");
        assert_eq!(nodes[1].cores, 3);
    }

    #[test]
    fn ppn_disagreement_is_fatal() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"x1\n").unwrap();
        let mut env = EnvMap::new();
        env.insert("PBS_NODEFILE".into(), f.path().display().to_string());
        env.insert("NUM_PPN".into(), "8".into());
        assert!(matches!(
            PbsPro::new(env, info()).nodes(),
            Err(CoreError::ConfigMismatch(_))
        ));
    }
}
