use skiff_core::types::{Node, NodeSpec, SlotState, Slots};
use skiff_core::CoreError;

/// The authoritative view of slot state across the allocation. Owned
/// exclusively by the scheduler component; everything else learns about
/// slot changes through messages. `acquire` and `release` are the only
/// mutations and run on the owner's single thread.
#[derive(Debug, Clone)]
pub struct ResourceMap {
    nodes: Vec<Node>,
}

impl ResourceMap {
    pub fn new(specs: &[NodeSpec], blocked_cores: &[usize], blocked_gpus: &[usize]) -> Self {
        let nodes = specs
            .iter()
            .enumerate()
            .map(|(id, spec)| Node::from_spec(id, spec, blocked_cores, blocked_gpus))
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Mark the slots busy and debit lfs/mem. Fails without side effects
    /// if any slot is not free — the placer only ever proposes free
    /// slots, so a failure here is a bookkeeping bug.
    pub fn acquire(&mut self, slots: &Slots) -> Result<(), CoreError> {
        self.check_free(slots)?;
        for rank in &slots.ranks {
            let node = &mut self.nodes[rank.node_id];
            for &c in &rank.core_ids {
                node.cores[c] = SlotState::Busy;
            }
            for &g in &rank.gpu_ids {
                node.gpus[g] = SlotState::Busy;
            }
            node.lfs_free -= rank.lfs;
            node.mem_free -= rank.mem;
        }
        Ok(())
    }

    fn check_free(&self, slots: &Slots) -> Result<(), CoreError> {
        for rank in &slots.ranks {
            let node = self
                .nodes
                .get(rank.node_id)
                .ok_or_else(|| CoreError::Runtime(format!("no node {}", rank.node_id)))?;
            for &c in &rank.core_ids {
                if node.cores.get(c) != Some(&SlotState::Free) {
                    return Err(CoreError::Runtime(format!(
                        "core {c} on node {} not free",
                        node.name
                    )));
                }
            }
            for &g in &rank.gpu_ids {
                if node.gpus.get(g) != Some(&SlotState::Free) {
                    return Err(CoreError::Runtime(format!(
                        "gpu {g} on node {} not free",
                        node.name
                    )));
                }
            }
            if node.lfs_free < rank.lfs || node.mem_free < rank.mem {
                return Err(CoreError::Runtime(format!(
                    "lfs/mem underflow on node {}",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Return the slots to the free pool. Releasing a free slot is a
    /// bookkeeping bug and loud.
    pub fn release(&mut self, slots: &Slots) {
        for rank in &slots.ranks {
            let node = &mut self.nodes[rank.node_id];
            for &c in &rank.core_ids {
                debug_assert_eq!(node.cores[c], SlotState::Busy);
                node.cores[c] = SlotState::Free;
            }
            for &g in &rank.gpu_ids {
                debug_assert_eq!(node.gpus[g], SlotState::Busy);
                node.gpus[g] = SlotState::Free;
            }
            node.lfs_free += rank.lfs;
            node.mem_free += rank.mem;
        }
    }

    pub fn free_cores(&self) -> usize {
        self.count_cores(SlotState::Free)
    }

    pub fn busy_cores(&self) -> usize {
        self.count_cores(SlotState::Busy)
    }

    pub fn blocked_cores(&self) -> usize {
        self.count_cores(SlotState::Blocked)
    }

    pub fn total_cores(&self) -> usize {
        self.nodes.iter().map(|n| n.cores.len()).sum()
    }

    fn count_cores(&self, state: SlotState) -> usize {
        self.nodes
            .iter()
            .map(|n| n.cores.iter().filter(|s| **s == state).count())
            .sum()
    }

    pub fn free_gpus(&self) -> usize {
        self.nodes.iter().map(Node::free_gpus).sum()
    }

    /// Largest schedulable (non-blocked) core count on any node.
    pub fn max_usable_cores_per_node(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.cores.iter().filter(|s| **s != SlotState::Blocked).count())
            .max()
            .unwrap_or(0)
    }

    pub fn max_usable_gpus_per_node(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.gpus.iter().filter(|s| **s != SlotState::Blocked).count())
            .max()
            .unwrap_or(0)
    }

    /// Schedulable cores across the allocation, busy or not.
    pub fn usable_cores(&self) -> usize {
        self.total_cores() - self.blocked_cores()
    }

    pub fn usable_gpus(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.gpus.iter().filter(|s| **s != SlotState::Blocked).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::{make_map, rank_on};

    #[test]
    fn conservation_over_acquire_release() {
        let mut map = make_map(2, 4, 0);
        let total = map.total_cores();
        let slots = Slots::new(vec![rank_on(&map, 0, &[0, 1]), rank_on(&map, 1, &[0])]);

        map.acquire(&slots).unwrap();
        assert_eq!(map.busy_cores(), 3);
        assert_eq!(map.free_cores() + map.busy_cores() + map.blocked_cores(), total);

        map.release(&slots);
        assert_eq!(map.busy_cores(), 0);
        assert_eq!(map.free_cores() + map.blocked_cores(), total);
    }

    #[test]
    fn double_acquire_is_rejected_without_side_effects() {
        let mut map = make_map(1, 4, 0);
        let slots = Slots::new(vec![rank_on(&map, 0, &[1, 2])]);
        map.acquire(&slots).unwrap();
        assert!(map.acquire(&slots).is_err());
        assert_eq!(map.busy_cores(), 2);
    }

    #[test]
    fn partial_overlap_leaves_map_untouched() {
        let mut map = make_map(1, 4, 0);
        map.acquire(&Slots::new(vec![rank_on(&map, 0, &[0])])).unwrap();
        // Overlaps core 0, would fit cores 1-2 otherwise.
        let overlapping = Slots::new(vec![rank_on(&map, 0, &[0, 1, 2])]);
        assert!(map.acquire(&overlapping).is_err());
        assert_eq!(map.busy_cores(), 1);
        assert_eq!(map.free_cores(), 3);
    }

    #[test]
    fn mem_and_lfs_follow_slots() {
        let mut map = make_map(1, 4, 0);
        let mem0 = map.nodes()[0].mem_free;
        let mut rank = rank_on(&map, 0, &[0]);
        rank.mem = 100;
        let slots = Slots::new(vec![rank]);
        map.acquire(&slots).unwrap();
        assert_eq!(map.nodes()[0].mem_free, mem0 - 100);
        map.release(&slots);
        assert_eq!(map.nodes()[0].mem_free, mem0);
    }
}
