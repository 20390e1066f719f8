use tracing::info;

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{require, unique_ordered, EnvMap, ResourceManager, RmInfo};

/// LSF provides `$LSB_DJOB_HOSTFILE` (one line per task slot) and
/// `$LSB_MCPU_HOSTS` (`host1 N host2 N ...`) with per-host slot counts.
#[derive(Debug)]
pub struct Lsf {
    env: EnvMap,
    info: RmInfo,
}

impl Lsf {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }

    fn mcpu_counts(raw: &str) -> Result<Vec<(String, usize)>, CoreError> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() % 2 != 0 {
            return Err(CoreError::AllocationUnreadable(
                "$LSB_MCPU_HOSTS is not `host count` pairs".into(),
            ));
        }
        tokens
            .chunks(2)
            .map(|pair| {
                let count = pair[1].parse::<usize>().map_err(|_| {
                    CoreError::AllocationUnreadable(format!(
                        "$LSB_MCPU_HOSTS count `{}` not numeric",
                        pair[1]
                    ))
                })?;
                Ok((pair[0].to_string(), count))
            })
            .collect()
    }
}

impl ResourceManager for Lsf {
    fn name(&self) -> &'static str {
        "LSF"
    }

    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError> {
        let hostfile = require(&self.env, "LSB_DJOB_HOSTFILE")?;
        let raw = std::fs::read_to_string(&hostfile).map_err(|e| {
            CoreError::AllocationUnreadable(format!("cannot read $LSB_DJOB_HOSTFILE {hostfile}: {e}"))
        })?;
        let names = unique_ordered(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
        if names.is_empty() {
            return Err(CoreError::AllocationUnreadable("$LSB_DJOB_HOSTFILE is empty".into()));
        }

        let mcpu = require(&self.env, "LSB_MCPU_HOSTS")?;
        let counts = Self::mcpu_counts(&mcpu)?;
        let min_count = counts.iter().map(|(_, n)| *n).min().unwrap_or(0);
        if min_count != self.info.cores_per_node {
            return Err(CoreError::ConfigMismatch(format!(
                "LSF reports {min_count} slots per host, platform config says {}",
                self.info.cores_per_node
            )));
        }

        info!(hostfile, nodes = names.len(), "parsed LSF allocation");
        Ok(names.into_iter().map(|n| self.info.node_spec(n)).collect())
    }

    fn launch_env(&self) -> Vec<(String, String)> {
        self.env
            .get("LSB_DJOB_HOSTFILE")
            .map(|v| vec![("SKIFF_RM_NODEFILE".to_string(), v.clone())])
            .unwrap_or_default()
    }
}
