use tracing::trace;

use skiff_core::types::{Node, RankSlot, SlotState, Slots};

use crate::{Placement, Placer, Request, ResourceMap};

/// The continuous bin packer: walk nodes in declared order, greedily
/// consuming whole or partial nodes until all ranks are placed. Within a
/// node a rank's cores are contiguous (configurable) and the lowest free
/// core index wins; across nodes the earlier node wins.
pub struct ContinuousPlacer {
    /// Require each rank's cores to be a contiguous index run.
    pub contiguous: bool,
}

impl Default for ContinuousPlacer {
    fn default() -> Self {
        Self { contiguous: true }
    }
}

impl Placer for ContinuousPlacer {
    fn name(&self) -> &'static str {
        "CONTINUOUS"
    }

    fn place(&self, req: &Request, map: &ResourceMap) -> Placement {
        if let Some(reason) = self.never_fits(req, map) {
            return Placement::Never(reason);
        }

        let mut ranks: Vec<RankSlot> = Vec::with_capacity(req.ranks);
        for node in map.nodes() {
            if ranks.len() == req.ranks {
                break;
            }
            let want = req.ranks - ranks.len();
            let mut got = self.ranks_from_node(node, want, req);
            if !req.mpi && got.len() < req.ranks {
                // Non-MPI tasks cannot span nodes: all or nothing here.
                continue;
            }
            ranks.append(&mut got);
        }

        if ranks.len() == req.ranks {
            trace!(ranks = ranks.len(), "placed");
            Placement::Slots(Slots::new(ranks))
        } else {
            Placement::Defer
        }
    }
}

impl ContinuousPlacer {
    /// Requirements that exceed what the pilot can offer even when idle.
    fn never_fits(&self, req: &Request, map: &ResourceMap) -> Option<String> {
        if req.cores_per_rank > map.max_usable_cores_per_node() {
            return Some(format!(
                "rank wants {} cores, largest node offers {}",
                req.cores_per_rank,
                map.max_usable_cores_per_node()
            ));
        }
        if req.gpus_per_rank > map.max_usable_gpus_per_node() {
            return Some(format!(
                "rank wants {} gpus, largest node offers {}",
                req.gpus_per_rank,
                map.max_usable_gpus_per_node()
            ));
        }
        if req.total_cores() > map.usable_cores() {
            return Some(format!(
                "task wants {} cores, pilot owns {}",
                req.total_cores(),
                map.usable_cores()
            ));
        }
        if req.total_gpus() > map.usable_gpus() {
            return Some(format!(
                "task wants {} gpus, pilot owns {}",
                req.total_gpus(),
                map.usable_gpus()
            ));
        }
        if !req.mpi && req.total_cores() > map.max_usable_cores_per_node() {
            return Some(format!(
                "non-MPI task wants {} cores on one node, largest node offers {}",
                req.total_cores(),
                map.max_usable_cores_per_node()
            ));
        }
        None
    }

    /// Carve up to `want` ranks out of one node's free slots, lowest
    /// indices first. Works on a scratch copy; the map is not touched.
    fn ranks_from_node(&self, node: &Node, want: usize, req: &Request) -> Vec<RankSlot> {
        let mut cores = node.cores.clone();
        let mut gpus = node.gpus.clone();
        let mut lfs_free = node.lfs_free;
        let mut mem_free = node.mem_free;
        let mut out = Vec::new();

        while out.len() < want {
            if lfs_free < req.lfs_per_rank || mem_free < req.mem_per_rank {
                break;
            }
            let Some(core_ids) = take_cores(&mut cores, req.cores_per_rank, self.contiguous) else {
                break;
            };
            let Some(gpu_ids) = take_free(&mut gpus, req.gpus_per_rank) else {
                break;
            };
            lfs_free -= req.lfs_per_rank;
            mem_free -= req.mem_per_rank;
            out.push(RankSlot {
                node_id: node.id,
                node_name: node.name.clone(),
                core_ids,
                gpu_ids,
                lfs: req.lfs_per_rank,
                mem: req.mem_per_rank,
            });
        }
        out
    }
}

/// First `n` free indices, or a contiguous run of `n`, marked busy in the
/// scratch vector.
fn take_cores(scratch: &mut [SlotState], n: usize, contiguous: bool) -> Option<Vec<usize>> {
    if contiguous {
        let start = find_run(scratch, n)?;
        for slot in &mut scratch[start..start + n] {
            *slot = SlotState::Busy;
        }
        Some((start..start + n).collect())
    } else {
        take_free(scratch, n)
    }
}

fn take_free(scratch: &mut [SlotState], n: usize) -> Option<Vec<usize>> {
    let free: Vec<usize> = scratch
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == SlotState::Free)
        .map(|(i, _)| i)
        .take(n)
        .collect();
    if free.len() < n {
        return None;
    }
    for &i in &free {
        scratch[i] = SlotState::Busy;
    }
    Some(free)
}

/// Lowest start index of `n` consecutive free slots.
fn find_run(slots: &[SlotState], n: usize) -> Option<usize> {
    if n == 0 || slots.len() < n {
        return None;
    }
    let mut run = 0;
    for (i, slot) in slots.iter().enumerate() {
        if *slot == SlotState::Free {
            run += 1;
            if run == n {
                return Some(i + 1 - n);
            }
        } else {
            run = 0;
        }
    }
    None
}
