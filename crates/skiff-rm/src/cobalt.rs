use tracing::info;

use skiff_core::types::NodeSpec;
use skiff_core::CoreError;

use crate::{unique_ordered, EnvMap, ResourceManager, RmInfo};

/// Cobalt exposes either `$COBALT_NODEFILE` (one host per line) or, on
/// Cray front-ends, `$COBALT_PARTNAME` id ranges (`12-15,20`) that map to
/// `nid%05d` hostnames. `$COBALT_JOBSIZE` cross-checks the node count.
#[derive(Debug)]
pub struct Cobalt {
    env: EnvMap,
    info: RmInfo,
}

impl Cobalt {
    pub fn new(env: EnvMap, info: RmInfo) -> Self {
        Self { env, info }
    }

    fn partname_nodes(part: &str) -> Result<Vec<String>, CoreError> {
        let mut names = Vec::new();
        for item in part.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u64 = lo.parse().map_err(|_| Self::bad_part(part))?;
                    let hi: u64 = hi.parse().map_err(|_| Self::bad_part(part))?;
                    if hi < lo {
                        return Err(Self::bad_part(part));
                    }
                    for n in lo..=hi {
                        names.push(format!("nid{n:05}"));
                    }
                }
                None => {
                    let n: u64 = item.parse().map_err(|_| Self::bad_part(part))?;
                    names.push(format!("nid{n:05}"));
                }
            }
        }
        if names.is_empty() {
            return Err(Self::bad_part(part));
        }
        Ok(names)
    }

    fn bad_part(part: &str) -> CoreError {
        CoreError::AllocationUnreadable(format!("malformed $COBALT_PARTNAME `{part}`"))
    }
}

impl ResourceManager for Cobalt {
    fn name(&self) -> &'static str {
        "COBALT"
    }

    fn nodes(&self) -> Result<Vec<NodeSpec>, CoreError> {
        let names = if let Some(nodefile) = self.env.get("COBALT_NODEFILE") {
            let raw = std::fs::read_to_string(nodefile).map_err(|e| {
                CoreError::AllocationUnreadable(format!(
                    "cannot read $COBALT_NODEFILE {nodefile}: {e}"
                ))
            })?;
            unique_ordered(
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from),
            )
        } else if let Some(part) = self.env.get("COBALT_PARTNAME") {
            Self::partname_nodes(part)?
        } else {
            return Err(CoreError::AllocationUnreadable(
                "neither $COBALT_NODEFILE nor $COBALT_PARTNAME set".into(),
            ));
        };

        if let Some(jobsize) = self.env.get("COBALT_JOBSIZE").and_then(|v| v.parse::<usize>().ok()) {
            if jobsize != names.len() {
                return Err(CoreError::ConfigMismatch(format!(
                    "$COBALT_JOBSIZE ({jobsize}) != discovered node count ({})",
                    names.len()
                )));
            }
        }

        info!(n = names.len(), "parsed Cobalt allocation");
        Ok(names.into_iter().map(|n| self.info.node_spec(n)).collect())
    }
}
