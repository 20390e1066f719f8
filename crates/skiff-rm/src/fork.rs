use sysinfo::System;
use tracing::info;

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{EnvMap, ResourceManager, RmInfo};

/// Single-host "allocation" for local runs and tests: the node list is
/// localhost, core and memory counts come from the host unless the
/// platform config pins them.
#[derive(Debug)]
pub struct Fork {
    env: EnvMap,
    info: RmInfo,
}

impl Fork {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }
}

impl ResourceManager for Fork {
    fn name(&self) -> &'static str {
        "FORK"
    }

    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError> {
        let mut system = System::new_all();
        system.refresh_all();

        let hostname = self
            .env
            .get("SKIFF_HOSTNAME")
            .cloned()
            .or_else(System::host_name)
            .unwrap_or_else(|| "localhost".into());

        let mut spec = self.info.node_spec(hostname);
        if self.info.cores_per_node == 0 {
            spec.cores = system.cpus().len().max(1) * self.info.smt;
        }
        if self.info.mem_per_node == 0 {
            spec.mem = system.total_memory() / 1024 / 1024;
        }

        info!(name = %spec.name, cores = spec.cores, mem = spec.mem, "forked local node");
        Ok(vec![spec])
    }
}
