//! Launcher-injected environment handling. Launchers smuggle their own
//! variables (`PMIX_*`, `OMPI_*`, ...) into the rank environment after
//! startup, so a curated spawn environment cannot catch them. The exec
//! script therefore dumps the pre-launch and per-rank environments and
//! strips the difference before user `pre_exec` runs; the executor reads
//! the same dumps back through these helpers when it has to explain a
//! `pre_exec` failure.

use std::collections::HashMap;

/// Parse a `env | sort`-style dump into a map. Lines without `=` (e.g.
/// exported multi-line values spilling over) are ignored.
pub fn parse_dump(dump: &str) -> HashMap<String, String> {
    dump.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Names present in the rank environment but not in the pre-launch
/// environment, restricted to the launcher's prefixes — the set the
/// exec script withholds from user `pre_exec`. Sorted for deterministic
/// reporting.
pub fn injected_names(
    launch_env: &HashMap<String, String>,
    rank_env: &HashMap<String, String>,
    prefixes: &[&str],
) -> Vec<String> {
    let mut names: Vec<String> = rank_env
        .keys()
        .filter(|k| !launch_env.contains_key(*k))
        .filter(|k| prefixes.iter().any(|p| k.starts_with(p)))
        .cloned()
        .collect();
    names.sort();
    names
}
