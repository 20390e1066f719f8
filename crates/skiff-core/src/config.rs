use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Access schema entry: either a concrete endpoint pair or an alias to
/// another schema in the same platform entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessSchema {
    Alias(String),
    Endpoints {
        job_manager_endpoint: String,
        filesystem_endpoint: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemArchitecture {
    #[serde(default = "default_smt")]
    pub smt: usize,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub blocked_cores: Vec<usize>,
    #[serde(default)]
    pub blocked_gpus: Vec<usize>,
}

fn default_smt() -> usize {
    1
}

/// Per-method option table under `launch_methods`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaunchMethodOptions {
    #[serde(default)]
    pub pre_exec_cached: Vec<String>,
    /// Explicit launcher binary, overriding `$PATH` discovery.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    /// PRTE only: URI of a persistent DVM.
    #[serde(default)]
    pub dvm_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaunchMethodsConfig {
    pub order: Vec<String>,
    #[serde(flatten)]
    pub methods: HashMap<String, LaunchMethodOptions>,
}

impl LaunchMethodsConfig {
    pub fn options(&self, name: &str) -> LaunchMethodOptions {
        self.methods.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VirtenvMode {
    #[default]
    Create,
    Recreate,
    Use,
    Update,
    Local,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PythonDist {
    #[default]
    Default,
    Anaconda,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentVersion {
    #[default]
    Release,
    Local,
    Installed,
}

/// One platform entry in the platform configuration file. The file is a
/// JSON object keyed by platform name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub schemas: HashMap<String, AccessSchema>,
    #[serde(default)]
    pub default_queue: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    pub resource_manager: String,
    pub cores_per_node: usize,
    #[serde(default)]
    pub gpus_per_node: usize,
    #[serde(default)]
    pub lfs_path_per_node: Option<String>,
    #[serde(default)]
    pub lfs_size_per_node: u64,
    #[serde(default)]
    pub mem_per_node: u64,
    #[serde(default)]
    pub system_architecture: SystemArchitecture,
    #[serde(default = "default_scheduler")]
    pub agent_scheduler: String,
    #[serde(default = "default_spawner")]
    pub agent_spawner: String,
    #[serde(default)]
    pub agent_config: Option<String>,
    pub launch_methods: LaunchMethodsConfig,
    #[serde(default)]
    pub pre_bootstrap_0: Vec<String>,
    #[serde(default)]
    pub pre_bootstrap_1: Vec<String>,
    #[serde(default)]
    pub virtenv_mode: VirtenvMode,
    #[serde(default)]
    pub python_dist: PythonDist,
    #[serde(default)]
    pub rp_version: AgentVersion,
    #[serde(default)]
    pub default_remote_workdir: Option<String>,
}

fn default_scheduler() -> String {
    "CONTINUOUS".into()
}

fn default_spawner() -> String {
    "POPEN".into()
}

impl PlatformConfig {
    /// Load one platform entry from a config file keyed by platform name.
    pub fn load(path: &Path, platform: &str) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut all: HashMap<String, PlatformConfig> = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("invalid platform config: {e}")))?;
        let cfg = all
            .remove(platform)
            .ok_or_else(|| CoreError::Config(format!("unknown platform `{platform}`")))?;
        debug!(platform, rm = %cfg.resource_manager, "loaded platform config");
        Ok(cfg)
    }

    /// Resolve a schema, following alias entries. Alias chains are
    /// bounded by the schema count to rule out cycles.
    pub fn schema(&self, name: &str) -> Option<&AccessSchema> {
        let mut name = name;
        for _ in 0..=self.schemas.len() {
            match self.schemas.get(name) {
                Some(AccessSchema::Alias(target)) => name = target,
                other => return other,
            }
        }
        None
    }

    /// Expand `default_remote_workdir` placeholders (`$USER`, `$HOME`,
    /// `%(pd.project)s`) against the process environment.
    pub fn remote_workdir(&self) -> Option<String> {
        let raw = self.default_remote_workdir.as_deref()?;
        let mut out = raw.to_string();
        if let Ok(user) = std::env::var("USER") {
            out = out.replace("$USER", &user);
        }
        if let Ok(home) = std::env::var("HOME") {
            out = out.replace("$HOME", &home);
        }
        if let Some(project) = &self.project {
            out = out.replace("%(pd.project)s", project);
        }
        Some(out)
    }
}

fn default_stall_hwm() -> usize {
    1024
}

fn default_bulk_mkdir_threshold() -> usize {
    16
}

fn default_bulk_size() -> usize {
    64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub count: usize,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self { count: 1 }
    }
}

/// Agent-side runtime knobs, separate from the platform description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Address the client bridge listens on.
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,
    /// Queue capacity; a producer exceeding it blocks until the consumer
    /// drains (back-pressure, not an error).
    #[serde(default = "default_stall_hwm")]
    pub stall_hwm: usize,
    /// Max tasks drained from a queue in one scheduling pass.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_bulk_mkdir_threshold")]
    pub task_bulk_mkdir_threshold: usize,
    /// Replica count per component name (staging_input, executor, ...).
    #[serde(default)]
    pub components: HashMap<String, ComponentConfig>,
    /// Seconds between SIGTERM and SIGKILL on cancellation.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    /// Wall-clock budget for the pilot; zero means unlimited.
    #[serde(default)]
    pub runtime_secs: u64,
}

fn default_bridge_addr() -> String {
    "127.0.0.1:10001".into()
}

fn default_cancel_grace() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bridge_addr: default_bridge_addr(),
            stall_hwm: default_stall_hwm(),
            bulk_size: default_bulk_size(),
            task_bulk_mkdir_threshold: default_bulk_mkdir_threshold(),
            components: HashMap::new(),
            cancel_grace_secs: default_cancel_grace(),
            runtime_secs: 0,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| CoreError::Config(format!("invalid agent config: {e}")))
    }

    pub fn replicas(&self, component: &str) -> usize {
        self.components.get(component).map(|c| c.count.max(1)).unwrap_or(1)
    }
}

/// User-level config directory, `SKIFF_CONFIG_DIR` overriding the default.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SKIFF_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_home().join(".skiff")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
    {
        "test_cluster": {
            "schemas": {
                "ssh": {
                    "job_manager_endpoint": "slurm+ssh://test.example.org/",
                    "filesystem_endpoint": "sftp://test.example.org/"
                },
                "batch": "ssh"
            },
            "default_queue": "normal",
            "resource_manager": "SLURM",
            "cores_per_node": 4,
            "gpus_per_node": 0,
            "mem_per_node": 16384,
            "system_architecture": {"smt": 1, "blocked_cores": [0]},
            "launch_methods": {
                "order": ["SRUN", "FORK"],
                "SRUN": {"pre_exec_cached": ["module load slurm"]}
            }
        }
    }
    "#;

    #[test]
    fn load_platform_entry() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = PlatformConfig::load(f.path(), "test_cluster").unwrap();
        assert_eq!(cfg.resource_manager, "SLURM");
        assert_eq!(cfg.cores_per_node, 4);
        assert_eq!(cfg.system_architecture.blocked_cores, vec![0]);
        assert_eq!(cfg.agent_scheduler, "CONTINUOUS");
        assert_eq!(cfg.launch_methods.order, vec!["SRUN", "FORK"]);
        assert_eq!(
            cfg.launch_methods.options("SRUN").pre_exec_cached,
            vec!["module load slurm"]
        );
        assert!(cfg.launch_methods.options("FORK").pre_exec_cached.is_empty());
    }

    #[test]
    fn unknown_platform_is_config_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let err = PlatformConfig::load(f.path(), "nope").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn schema_alias_resolves() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = PlatformConfig::load(f.path(), "test_cluster").unwrap();
        match cfg.schema("batch") {
            Some(AccessSchema::Endpoints { job_manager_endpoint, .. }) => {
                assert!(job_manager_endpoint.starts_with("slurm+ssh"));
            }
            other => panic!("alias did not resolve: {other:?}"),
        }
    }

    #[test]
    fn agent_config_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.replicas("executor"), 1);
        assert!(cfg.stall_hwm > 0);
        assert!(cfg.task_bulk_mkdir_threshold > 0);
    }
}
