use skiff_core::types::{NodeSpec, RankSlot};

use crate::{Request, ResourceMap};

pub fn make_map(nodes: usize, cores: usize, gpus: usize) -> ResourceMap {
    make_map_with(nodes, cores, gpus, &[])
}

pub fn make_map_blocked(nodes: usize, cores: usize, blocked_cores: &[usize]) -> ResourceMap {
    make_map_with(nodes, cores, 0, blocked_cores)
}

fn make_map_with(nodes: usize, cores: usize, gpus: usize, blocked_cores: &[usize]) -> ResourceMap {
    let specs: Vec<NodeSpec> = (0..nodes)
        .map(|i| NodeSpec {
            name: format!("node{i}"),
            cores,
            gpus,
            lfs_path: Some("/tmp".into()),
            lfs_size: 1024,
            mem: 4096,
        })
        .collect();
    ResourceMap::new(&specs, blocked_cores, &[])
}

pub fn make_req(ranks: usize, cores_per_rank: usize, mpi: bool) -> Request {
    Request {
        ranks,
        cores_per_rank,
        gpus_per_rank: 0,
        lfs_per_rank: 0,
        mem_per_rank: 0,
        mpi,
    }
}

pub fn rank_on(map: &ResourceMap, node: usize, cores: &[usize]) -> RankSlot {
    RankSlot {
        node_id: node,
        node_name: map.nodes()[node].name.clone(),
        core_ids: cores.to_vec(),
        gpu_ids: Vec::new(),
        lfs: 0,
        mem: 0,
    }
}
