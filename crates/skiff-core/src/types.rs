use serde::{Deserialize, Serialize};

/// Index of a node in the pilot's ordered node list.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Busy,
    /// Excluded from scheduling for the pilot lifetime (platform config).
    Blocked,
}

/// Hardware description of one allocation node as reported by the
/// resource manager, before any slot bookkeeping is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub cores: usize,
    pub gpus: usize,
    pub lfs_path: Option<String>,
    /// Node-local scratch space in MiB.
    pub lfs_size: u64,
    /// Memory in MiB.
    pub mem: u64,
}

/// One allocation node with per-slot state. The slot vectors are sized at
/// boot and never grow or shrink afterwards; only the states change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub cores: Vec<SlotState>,
    pub gpus: Vec<SlotState>,
    pub lfs_path: Option<String>,
    pub lfs_free: u64,
    pub mem_free: u64,
}

impl Node {
    pub fn from_spec(id: NodeId, spec: &NodeSpec, blocked_cores: &[usize], blocked_gpus: &[usize]) -> Self {
        let mut cores = vec![SlotState::Free; spec.cores];
        for &c in blocked_cores {
            if c < cores.len() {
                cores[c] = SlotState::Blocked;
            }
        }
        let mut gpus = vec![SlotState::Free; spec.gpus];
        for &g in blocked_gpus {
            if g < gpus.len() {
                gpus[g] = SlotState::Blocked;
            }
        }
        Self {
            id,
            name: spec.name.clone(),
            cores,
            gpus,
            lfs_path: spec.lfs_path.clone(),
            lfs_free: spec.lfs_size,
            mem_free: spec.mem,
        }
    }

    pub fn free_cores(&self) -> usize {
        self.cores.iter().filter(|s| **s == SlotState::Free).count()
    }

    pub fn free_gpus(&self) -> usize {
        self.gpus.iter().filter(|s| **s == SlotState::Free).count()
    }
}

/// Hardware assigned to a single rank of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankSlot {
    pub node_id: NodeId,
    pub node_name: String,
    pub core_ids: Vec<usize>,
    pub gpu_ids: Vec<usize>,
    pub lfs: u64,
    pub mem: u64,
}

/// The result of a successful placement: one entry per rank, in rank
/// order. Carries everything a launch method needs to build host lists,
/// rank files and binding arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Slots {
    pub ranks: Vec<RankSlot>,
}

impl Slots {
    pub fn new(ranks: Vec<RankSlot>) -> Self {
        Self { ranks }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Distinct node names in first-use order.
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for rank in &self.ranks {
            if !names.contains(&rank.node_name) {
                names.push(rank.node_name.clone());
            }
        }
        names
    }

    /// `(node_name, ranks_on_node)` pairs in first-use order.
    pub fn ranks_per_node(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = Vec::new();
        for rank in &self.ranks {
            match out.iter_mut().find(|(name, _)| *name == rank.node_name) {
                Some((_, n)) => *n += 1,
                None => out.push((rank.node_name.clone(), 1)),
            }
        }
        out
    }

    /// Largest number of ranks placed on any single node.
    pub fn max_ranks_per_node(&self) -> usize {
        self.ranks_per_node().into_iter().map(|(_, n)| n).max().unwrap_or(0)
    }
}
