//! Contiguous task sharding.

/// Splits `tasks` into at most `worker_budget` contiguous, non-overlapping
/// shards of `ceil(N / W)` tasks each. Empty shards are dropped, so fewer
/// tasks than workers yields fewer shards.
pub fn shard_tasks<T>(tasks: Vec<T>, worker_budget: usize) -> Vec<Vec<T>> {
    if tasks.is_empty() || worker_budget == 0 {
        return Vec::new();
    }
    let shard_size = tasks.len().div_ceil(worker_budget);

    let mut shards = Vec::new();
    let mut current = tasks;
    while !current.is_empty() {
        let tail = current.split_off(shard_size.min(current.len()));
        shards.push(current);
        current = tail;
    }
    shards
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn uneven_division_puts_the_remainder_last() {
        let shards = shard_tasks((0..10).collect(), 4);
        let sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn exact_division_fills_every_shard_evenly() {
        let shards = shard_tasks((0..8).collect(), 4);
        let sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 2, 2]);
    }

    #[test]
    fn fewer_tasks_than_workers_drops_empty_shards() {
        let shards = shard_tasks(vec!["a", "b"], 4);
        assert_eq!(shards, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn single_worker_gets_everything() {
        let shards = shard_tasks((0..5).collect(), 1);
        assert_eq!(shards, vec![vec![0, 1, 2, 3, 4]]);
    }

    #[test]
    fn no_tasks_means_no_shards() {
        let shards: Vec<Vec<u8>> = shard_tasks(Vec::new(), 4);
        assert!(shards.is_empty());
    }

    proptest! {
        #[test]
        fn concatenated_shards_reconstruct_the_input(n in 0usize..200, w in 1usize..10) {
            let tasks: Vec<usize> = (0..n).collect();
            let shards = shard_tasks(tasks.clone(), w);

            let flattened: Vec<usize> = shards.iter().flatten().copied().collect();
            prop_assert_eq!(flattened, tasks);
            prop_assert!(shards.len() <= w);
            prop_assert!(shards.iter().all(|shard| !shard.is_empty()));
            if n > 0 {
                let shard_size = n.div_ceil(w);
                prop_assert!(shards.iter().all(|shard| shard.len() <= shard_size));
            }
        }
    }
}
