//! Replica assignment engine
//!
//! Pure functions over replica matrices: grow the partition count, change the
//! replication factor, and bring placements in line with rack constraints.
//! All three are deterministic in their inputs, never mutate the input
//! matrix, and perform no I/O.

use std::collections::BTreeMap;

use crate::def::topic::{PartitionAssignments, PartitionRackAssignments};

/// Extend `current` to `target_count` partitions.
///
/// New partitions stripe round-robin over the sorted broker ids with an
/// offset that rotates per partition, so successive new partitions get
/// distinct preferred leaders wherever the cluster has more than one broker.
pub fn add_partitions(
    current: &PartitionAssignments,
    target_count: usize,
    broker_ids: &[i32],
) -> PartitionAssignments {
    let replication_factor = current.first().map_or(0, |r| r.len());
    let mut brokers = broker_ids.to_vec();
    brokers.sort_unstable();

    let mut result = current.clone();
    for partition in current.len()..target_count {
        let replicas = (0..replication_factor)
            .map(|r| brokers[(partition + r) % brokers.len()])
            .collect();
        result.push(replicas);
    }
    result
}

/// Rebuild every partition at `target_factor` replicas.
///
/// Growth appends brokers not already hosting the partition, preferring those
/// with the fewest replica placements across the matrix; shrinking truncates
/// trailing replicas so the preferred leader is preserved.
pub fn alter_replication_factor(
    current: &PartitionAssignments,
    target_factor: usize,
    broker_ids: &[i32],
) -> PartitionAssignments {
    let mut load = placement_counts(current, broker_ids);
    let mut result = current.clone();

    for replicas in &mut result {
        while replicas.len() > target_factor {
            if let Some(removed) = replicas.pop() {
                decrement(&mut load, removed);
            }
        }
        while replicas.len() < target_factor {
            let candidate = broker_ids
                .iter()
                .copied()
                .filter(|id| !replicas.contains(id))
                .min_by_key(|id| (load.get(id).copied().unwrap_or(0), *id));
            match candidate {
                Some(id) => {
                    replicas.push(id);
                    *load.entry(id).or_insert(0) += 1;
                }
                None => break,
            }
        }
    }
    result
}

/// Replace placements that violate their rack constraint.
///
/// For each partition `p` and replica slot `r`, a broker already in rack
/// `racks[p][r]` is preserved; otherwise a broker from that rack is chosen,
/// preferring one not already used in the partition and globally least
/// loaded, with ties broken by ascending broker id. Rows of `current` shorter
/// than the rack matrix (including empty rows for topic creation) are treated
/// as unassigned slots.
pub fn sync_rack_assignments(
    current: &PartitionAssignments,
    racks: &PartitionRackAssignments,
    brokers_by_rack: &BTreeMap<String, Vec<i32>>,
) -> PartitionAssignments {
    let mut load: BTreeMap<i32, usize> = BTreeMap::new();
    for replicas in current {
        for id in replicas {
            *load.entry(*id).or_insert(0) += 1;
        }
    }

    let mut result: PartitionAssignments = Vec::with_capacity(racks.len());
    for (p, partition_racks) in racks.iter().enumerate() {
        let existing = current.get(p).cloned().unwrap_or_default();
        let mut row: Vec<i32> = Vec::with_capacity(partition_racks.len());

        for (r, rack) in partition_racks.iter().enumerate() {
            let slot = existing.get(r).copied();
            let rack_brokers = brokers_by_rack.get(rack).map_or(&[][..], |ids| &ids[..]);

            if let Some(id) = slot {
                if rack_brokers.contains(&id) {
                    row.push(id);
                    continue;
                }
            }

            // Occurrences in the row built so far plus the slots of the
            // existing assignment not yet visited.
            let in_partition = |id: i32| {
                row.iter().filter(|b| **b == id).count()
                    + existing.iter().skip(r + 1).filter(|b| **b == id).count()
            };

            let candidate = rack_brokers
                .iter()
                .copied()
                .min_by_key(|id| (in_partition(*id), load.get(id).copied().unwrap_or(0), *id));

            match candidate {
                Some(id) => {
                    if let Some(old) = slot {
                        decrement(&mut load, old);
                    }
                    *load.entry(id).or_insert(0) += 1;
                    row.push(id);
                }
                // No broker in the rack; leave the slot as it was. Metadata
                // validation rejects this before the engine runs.
                None => row.push(slot.unwrap_or(-1)),
            }
        }
        result.push(row);
    }
    result
}

fn placement_counts(assignments: &PartitionAssignments, broker_ids: &[i32]) -> BTreeMap<i32, usize> {
    let mut load: BTreeMap<i32, usize> = broker_ids.iter().map(|id| (*id, 0)).collect();
    for replicas in assignments {
        for id in replicas {
            *load.entry(*id).or_insert(0) += 1;
        }
    }
    load
}

fn decrement(load: &mut BTreeMap<i32, usize>, id: i32) {
    if let Some(count) = load.get_mut(&id) {
        *count = count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn add_partitions_preserves_existing_rows() {
        let current = vec![vec![1, 2], vec![2, 3]];
        let result = add_partitions(&current, 4, &[1, 2, 3]);
        assert_eq!(result.len(), 4);
        assert_eq!(&result[..2], &current[..]);
    }

    #[test]
    fn add_partitions_rotates_leaders() {
        let current = vec![vec![1, 2]];
        let result = add_partitions(&current, 4, &[3, 1, 2]);
        // Partitions 1..4 stripe over the sorted ids [1, 2, 3].
        assert_eq!(result[1], vec![2, 3]);
        assert_eq!(result[2], vec![3, 1]);
        assert_eq!(result[3], vec![1, 2]);
    }

    #[test]
    fn add_partitions_replicas_are_distinct() {
        let result = add_partitions(&vec![vec![1, 2, 3]], 6, &[5, 4, 3, 2, 1]);
        for replicas in &result {
            let mut sorted = replicas.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), replicas.len());
        }
    }

    #[test]
    fn alter_replication_factor_grows_with_least_loaded() {
        let current = vec![vec![1, 2], vec![1, 3]];
        let result = alter_replication_factor(&current, 3, &[1, 2, 3, 4]);
        // Broker 4 has no placements and is appended first everywhere.
        assert_eq!(result, vec![vec![1, 2, 4], vec![1, 3, 4]]);
    }

    #[test]
    fn alter_replication_factor_truncates_trailing_replicas() {
        let current = vec![vec![3, 1, 2], vec![2, 3, 1]];
        let result = alter_replication_factor(&current, 1, &[1, 2, 3]);
        assert_eq!(result, vec![vec![3], vec![2]]);
    }

    #[test]
    fn sync_racks_create_case_is_deterministic() {
        let mut by_rack = BTreeMap::new();
        by_rack.insert("rack-a".to_string(), vec![1, 2]);
        by_rack.insert("rack-b".to_string(), vec![3]);

        let racks = vec![
            vec!["rack-a".to_string(), "rack-b".to_string()],
            vec!["rack-b".to_string(), "rack-a".to_string()],
        ];
        let result = sync_rack_assignments(&vec![vec![], vec![]], &racks, &by_rack);
        assert_eq!(result, vec![vec![1, 3], vec![3, 2]]);
    }

    #[test]
    fn sync_racks_preserves_satisfying_brokers() {
        let mut by_rack = BTreeMap::new();
        by_rack.insert("rack-a".to_string(), vec![1, 2]);
        by_rack.insert("rack-b".to_string(), vec![3, 4]);

        let current = vec![vec![2, 3], vec![4, 1]];
        let racks = vec![
            vec!["rack-a".to_string(), "rack-b".to_string()],
            vec!["rack-b".to_string(), "rack-a".to_string()],
        ];
        assert_eq!(sync_rack_assignments(&current, &racks, &by_rack), current);
    }

    #[test]
    fn sync_racks_replaces_misplaced_brokers() {
        let mut by_rack = BTreeMap::new();
        by_rack.insert("rack-a".to_string(), vec![1, 2]);
        by_rack.insert("rack-b".to_string(), vec![3, 4]);

        let current = vec![vec![3, 1]];
        let racks = vec![vec!["rack-a".to_string(), "rack-b".to_string()]];
        let result = sync_rack_assignments(&current, &racks, &by_rack);
        // Slot 0 moves to rack-a avoiding broker 1 which remains in slot 1's
        // place until replaced; slot 1 moves to rack-b.
        assert_eq!(result[0][1], 3);
        assert_eq!(result[0][0], 2);
    }

    fn arb_matrix() -> impl Strategy<Value = (PartitionAssignments, Vec<i32>)> {
        (1usize..6, 1usize..4).prop_flat_map(|(partitions, rf)| {
            let brokers: Vec<i32> = (1..=(rf as i32 + 3)).collect();
            let matrix = proptest::collection::vec(
                proptest::sample::subsequence(brokers.clone(), rf..=rf).prop_shuffle(),
                partitions..=partitions,
            );
            (matrix, Just(brokers))
        })
    }

    proptest! {
        #[test]
        fn prop_add_partitions_extends((matrix, brokers) in arb_matrix(), extra in 0usize..5) {
            let target = matrix.len() + extra;
            let result = add_partitions(&matrix, target, &brokers);
            prop_assert_eq!(result.len(), target);
            prop_assert_eq!(&result[..matrix.len()], &matrix[..]);
            let rf = matrix[0].len();
            for replicas in &result {
                prop_assert_eq!(replicas.len(), rf);
                let mut sorted = replicas.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(sorted.len(), rf);
            }
        }

        #[test]
        fn prop_alter_rf_preserves_leaders((matrix, brokers) in arb_matrix(), rf in 1usize..5) {
            let rf = rf.min(brokers.len());
            let result = alter_replication_factor(&matrix, rf, &brokers);
            prop_assert_eq!(result.len(), matrix.len());
            for (row, original) in result.iter().zip(&matrix) {
                prop_assert_eq!(row.len(), rf);
                prop_assert_eq!(row[0], original[0]);
                let mut sorted = row.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(sorted.len(), row.len());
            }
        }

        #[test]
        fn prop_sync_racks_satisfies_constraints(
            (matrix, brokers) in arb_matrix(),
            rack_count in 1usize..3,
        ) {
            // Assign brokers to racks round-robin and demand arbitrary racks.
            let mut by_rack: BTreeMap<String, Vec<i32>> = BTreeMap::new();
            for (i, id) in brokers.iter().enumerate() {
                by_rack.entry(format!("rack-{}", i % rack_count)).or_default().push(*id);
            }
            let racks: PartitionRackAssignments = matrix
                .iter()
                .enumerate()
                .map(|(p, row)| {
                    row.iter()
                        .enumerate()
                        .map(|(r, _)| format!("rack-{}", (p + r) % rack_count.min(by_rack.len())))
                        .collect()
                })
                .collect();

            let result = sync_rack_assignments(&matrix, &racks, &by_rack);
            for (p, row) in result.iter().enumerate() {
                for (r, id) in row.iter().enumerate() {
                    prop_assert!(by_rack[&racks[p][r]].contains(id));
                    if by_rack[&racks[p][r]].contains(&matrix[p][r]) {
                        prop_assert_eq!(*id, matrix[p][r]);
                    }
                }
            }
        }
    }
}
