//! Task placement over the pilot's resource map. The placer answers one
//! question — where do this task's ranks go — and never mutates the map;
//! the owning scheduler component applies the answer with
//! `ResourceMap::acquire` and undoes it on unschedule with `release`.

pub mod continuous;
pub mod resource_map;

#[cfg(test)]
pub(crate) mod tests_common;

use skiff_core::task::TaskDescription;
use skiff_core::types::Slots;
use skiff_core::CoreError;

pub use continuous::ContinuousPlacer;
pub use resource_map::ResourceMap;

/// Resource requirement of one task, normalized to per-rank units.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub ranks: usize,
    pub cores_per_rank: usize,
    pub gpus_per_rank: usize,
    pub lfs_per_rank: u64,
    pub mem_per_rank: u64,
    pub mpi: bool,
}

impl Request {
    pub fn from_description(td: &TaskDescription) -> Self {
        Self {
            ranks: td.ranks.max(1),
            cores_per_rank: td.cores_per_rank.max(1),
            gpus_per_rank: td.gpus_per_rank,
            lfs_per_rank: td.lfs_per_rank,
            mem_per_rank: td.mem_per_rank,
            mpi: td.uses_mpi(),
        }
    }

    pub fn total_cores(&self) -> usize {
        self.ranks * self.cores_per_rank
    }

    pub fn total_gpus(&self) -> usize {
        self.ranks * self.gpus_per_rank
    }
}

#[derive(Debug, Clone)]
pub enum Placement {
    /// The task fits right now; the returned slots are free.
    Slots(Slots),
    /// The task fits the pilot but not the current free map; retry on
    /// the next unschedule event.
    Defer,
    /// The task can never fit this pilot.
    Never(String),
}

pub trait Placer: Send {
    fn name(&self) -> &'static str;

    fn place(&self, req: &Request, map: &ResourceMap) -> Placement;
}

/// Build the placer selected by the platform config tag.
pub fn create(tag: &str) -> Result<Box<dyn Placer>, CoreError> {
    match tag {
        "CONTINUOUS" => Ok(Box::new(ContinuousPlacer::default())),
        other => Err(CoreError::Config(format!("unknown agent scheduler `{other}`"))),
    }
}
