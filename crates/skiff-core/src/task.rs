use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::TaskState;
use crate::types::Slots;

/// What kind of payload a task carries. `Executable` tasks go through the
/// scheduler/executor pipeline; the raptor modes are routed to a master
/// once one is up, and `Master`/`Worker` are themselves executable tasks
/// that form the raptor overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TaskMode {
    #[default]
    #[serde(rename = "executable")]
    Executable,
    #[serde(rename = "raptor.master")]
    Master,
    #[serde(rename = "raptor.worker")]
    Worker,
    #[serde(rename = "task.function")]
    Function,
    #[serde(rename = "task.proc")]
    Proc,
    #[serde(rename = "task.eval")]
    Eval,
    #[serde(rename = "task.exec")]
    Exec,
    #[serde(rename = "task.shell")]
    Shell,
}

impl TaskMode {
    /// Modes executed inside a raptor worker instead of the agent executor.
    pub fn is_raptor_request(&self) -> bool {
        matches!(
            self,
            Self::Function | Self::Proc | Self::Eval | Self::Exec | Self::Shell
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingType {
    #[default]
    None,
    OpenMp,
    Mpi,
    MpiOpenMp,
}

impl ThreadingType {
    pub fn uses_mpi(&self) -> bool {
        matches!(self, Self::Mpi | Self::MpiOpenMp)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StagingAction {
    Transfer,
    Copy,
    Link,
    Move,
}

/// One data movement instruction, executed by staging-input before the
/// task is scheduled or by staging-output after it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingDirective {
    pub action: StagingAction,
    /// Source URL; `client://`, `session://`, `pilot://` and `task://`
    /// schemes resolve against the sandbox tree, plain paths against the
    /// task sandbox.
    pub source: String,
    pub target: String,
}

fn default_ranks() -> usize {
    1
}

fn default_cores_per_rank() -> usize {
    1
}

/// Client-provided description of a task. The agent never mutates this.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskDescription {
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    #[serde(default = "default_cores_per_rank")]
    pub cores_per_rank: usize,
    #[serde(default)]
    pub gpus_per_rank: usize,
    #[serde(default)]
    pub threading: ThreadingType,
    /// MiB per rank; zero means "no constraint".
    #[serde(default)]
    pub mem_per_rank: u64,
    /// MiB of node-local scratch per rank; zero means "no constraint".
    #[serde(default)]
    pub lfs_per_rank: u64,
    /// Run once by rank 0, gated behind the launch method's barrier.
    #[serde(default)]
    pub pre_exec: Vec<String>,
    #[serde(default)]
    pub post_exec: Vec<String>,
    /// Run in the launch script, before the launcher is invoked.
    #[serde(default)]
    pub pre_launch: Vec<String>,
    #[serde(default)]
    pub post_launch: Vec<String>,
    #[serde(default)]
    pub input_staging: Vec<StagingDirective>,
    #[serde(default)]
    pub output_staging: Vec<StagingDirective>,
    /// Defaults to `<uid>.out` in the task sandbox.
    #[serde(default)]
    pub stdout: Option<String>,
    /// Defaults to `<uid>.err` in the task sandbox.
    #[serde(default)]
    pub stderr: Option<String>,
    /// Overrides the sandbox directory name (defaults to the uid).
    #[serde(default)]
    pub sandbox: Option<String>,
    #[serde(default)]
    pub named_env: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Raptor only: payload for function/eval requests.
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub args_json: Option<serde_json::Value>,
}

impl TaskDescription {
    pub fn uses_mpi(&self) -> bool {
        self.threading.uses_mpi()
    }

    /// Total cores over all ranks.
    pub fn total_cores(&self) -> usize {
        self.ranks * self.cores_per_rank
    }

    pub fn total_gpus(&self) -> usize {
        self.ranks * self.gpus_per_rank
    }
}

/// A task moving through the agent pipeline. Components mutate only
/// `state`, `slots`, `exit_code`, the timestamps and `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uid: String,
    pub description: TaskDescription,
    pub state: TaskState,
    #[serde(default)]
    pub slots: Option<Slots>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub started: Option<f64>,
    #[serde(default)]
    pub stopped: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    pub fn new(uid: impl Into<String>, description: TaskDescription) -> Self {
        Self {
            uid: uid.into(),
            description,
            state: TaskState::New,
            slots: None,
            exit_code: None,
            started: None,
            stopped: None,
            error: None,
        }
    }
}
