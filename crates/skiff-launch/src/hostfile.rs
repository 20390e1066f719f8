use skiff_core::types::Slots;

/// Comma-separated distinct node names, in rank order: `n1,n2`.
pub fn nodelist(slots: &Slots) -> String {
    slots.node_names().join(",")
}

/// `host:ranks` pairs as Hydra-style launchers take them: `n1:4,n2:2`.
pub fn host_string(slots: &Slots) -> String {
    slots
        .ranks_per_node()
        .into_iter()
        .map(|(name, n)| format!("{name}:{n}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Open MPI hostfile: one `<host> slots=<n>` line per node.
pub fn hostfile(slots: &Slots) -> String {
    let mut out = String::new();
    for (name, n) in slots.ranks_per_node() {
        out.push_str(&format!("{name} slots={n}\n"));
    }
    out
}

/// Open MPI rankfile pinning each rank to its core set:
/// `rank 0=n1 slot=0-3`.
pub fn rankfile(slots: &Slots) -> String {
    let mut out = String::new();
    for (i, rank) in slots.ranks.iter().enumerate() {
        out.push_str(&format!(
            "rank {i}={} slot={}\n",
            rank.node_name,
            id_ranges(&rank.core_ids)
        ));
    }
    out
}

/// jsrun explicit resource file: one resource set per rank.
pub fn erf(slots: &Slots) -> String {
    let mut out = String::from("cpu_index_using: logical\n");
    for (i, rank) in slots.ranks.iter().enumerate() {
        let mut line = format!(
            "rank: {i}: {{ host: {}; cpu: {{{}}}",
            rank.node_id + 1,
            id_ranges(&rank.core_ids)
        );
        if !rank.gpu_ids.is_empty() {
            line.push_str(&format!("; gpu: {{{}}}", id_ranges(&rank.gpu_ids)));
        }
        line.push_str(" }\n");
        out.push_str(&line);
    }
    out
}

/// Collapse sorted ids into range notation: `[0,1,2,5]` -> `0-2,5`.
fn id_ranges(ids: &[usize]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < ids.len() {
        let start = ids[i];
        let mut end = start;
        while i + 1 < ids.len() && ids[i + 1] == end + 1 {
            end = ids[i + 1];
            i += 1;
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
        i += 1;
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::make_slots;

    #[test]
    fn host_views_of_a_two_node_layout() {
        let slots = make_slots(&[("n1", &[&[0], &[1], &[2], &[3]]), ("n2", &[&[0], &[1]])]);
        assert_eq!(nodelist(&slots), "n1,n2");
        assert_eq!(host_string(&slots), "n1:4,n2:2");
        assert_eq!(hostfile(&slots), "n1 slots=4\nn2 slots=2\n");
    }

    #[test]
    fn rankfile_pins_core_ranges() {
        let slots = make_slots(&[("n1", &[&[0, 1], &[2, 3]])]);
        assert_eq!(rankfile(&slots), "rank 0=n1 slot=0-1\nrank 1=n1 slot=2-3\n");
    }

    #[test]
    fn erf_numbers_hosts_from_one() {
        let slots = make_slots(&[("n1", &[&[0, 1]]), ("n2", &[&[0, 1]])]);
        let erf = erf(&slots);
        assert!(erf.starts_with("cpu_index_using: logical\n"));
        assert!(erf.contains("rank: 0: { host: 1; cpu: {0-1} }"));
        assert!(erf.contains("rank: 1: { host: 2; cpu: {0-1} }"));
    }

    #[test]
    fn id_ranges_mixes_runs_and_singles() {
        assert_eq!(id_ranges(&[0, 1, 2, 5]), "0-2,5");
        assert_eq!(id_ranges(&[4]), "4");
        assert_eq!(id_ranges(&[]), "");
    }
}
