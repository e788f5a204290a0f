mod common;

use common::{assert_sorted, creator_budget, drain, manager, U32Cmp, U64Cmp, BS};
use emsort::{SortError, Sorter};
use rand::prelude::*;

type U32Sorter = Sorter<u32, U32Cmp, BS>;

#[test]
fn empty_input_yields_empty_output() {
    let (_dir, bm) = manager(1);
    let mut sorter = U32Sorter::new(U32Cmp, bm.clone(), creator_budget(4)).unwrap();
    assert_eq!(sorter.size(), 0);
    sorter.sort().unwrap();
    assert!(sorter.empty());
    assert_eq!(sorter.size(), 0);
    assert_eq!(bm.allocated_block_count(), 0);
}

#[test]
fn small_input_sorts_without_any_block_allocation() {
    let (_dir, bm) = manager(1);
    let mut sorter = U32Sorter::new(U32Cmp, bm.clone(), creator_budget(4)).unwrap();
    for v in [7u32, 3, 5] {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    assert_eq!(bm.allocated_block_count(), 0);
    assert_eq!(drain(&mut sorter), vec![3, 5, 7]);
}

#[test]
fn two_runs_merge_in_one_pass() {
    let (_dir, bm) = manager(1);
    // m = 2 blocks: 4-element runs
    let mut sorter = U32Sorter::with_memory(
        U32Cmp,
        bm.clone(),
        creator_budget(2),
        16 * BS,
    )
    .unwrap();
    for v in [8u32, 2, 6, 4, 1, 7, 5, 3] {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    // two runs of one block each were spilled
    assert_eq!(bm.allocated_block_count(), 2);
    assert_eq!(drain(&mut sorter), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn equal_keys_survive_multiple_runs() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(2), 16 * BS).unwrap();
    for _ in 0..12 {
        sorter.push(5).unwrap();
    }
    sorter.sort().unwrap();
    assert_eq!(drain(&mut sorter), vec![5; 12]);
}

#[test]
fn padding_is_never_emitted() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(4), 16 * BS).unwrap();
    let mut data: Vec<u32> = (0..17).collect();
    data.shuffle(&mut rand::rng());
    for &v in &data {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    assert_eq!(sorter.size(), 17);
    let out = drain(&mut sorter);
    let expected: Vec<u32> = (0..17).collect();
    assert_eq!(out, expected);
}

#[test]
fn recursive_pass_merges_sixteen_runs() {
    let (_dir, bm) = manager(1);
    // 64-element runs; 1024 elements -> 16 runs of 16 blocks each. Eleven
    // merger input buffers cannot hold 16 runs, forcing one recursive pass
    // with merge factor 4.
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm.clone(), creator_budget(32), 12 * BS).unwrap();
    let mut data: Vec<u32> = (0..1024).map(|v| (v * 7919) % 1024).collect();
    data.shuffle(&mut rand::rng());
    for &v in &data {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();

    // the original 16 runs were replaced by 4 intermediate runs of the same
    // total block count; the consumed blocks are already free
    assert_eq!(bm.allocated_block_count(), 256);

    let out = drain(&mut sorter);
    let expected: Vec<u32> = (0..1024).collect();
    assert_eq!(out, expected);

    drop(sorter);
    assert_eq!(bm.allocated_block_count(), 0);
}

#[test]
fn output_is_a_sorted_permutation_of_random_input() {
    let (_dir, bm) = manager(2);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(8), 64 * BS).unwrap();
    let mut rng = rand::rng();
    let data: Vec<u32> = (0..5000).map(|_| rng.random::<u32>()).collect();
    for &v in &data {
        sorter.push(v).unwrap();
    }
    assert_eq!(sorter.size(), 5000);
    sorter.sort().unwrap();

    let out = drain(&mut sorter);
    let mut expected = data;
    expected.sort_unstable();
    assert_eq!(out, expected);
}

#[test]
fn sentinel_values_in_the_input_are_ordinary_elements() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(2), 16 * BS).unwrap();
    let data = [u32::MAX, 0, 17, u32::MAX, 0, 4, 9, u32::MAX, 1, 0];
    for &v in &data {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    let out = drain(&mut sorter);
    let mut expected = data.to_vec();
    expected.sort_unstable();
    assert_eq!(out, expected);
}

#[test]
fn rewind_replays_identical_output() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(4), 20 * BS).unwrap();
    let mut rng = rand::rng();
    for _ in 0..100 {
        sorter.push(rng.random_range(0..1000)).unwrap();
    }
    sorter.sort().unwrap();
    let first = drain(&mut sorter);
    assert!(sorter.empty());

    sorter.rewind().unwrap();
    assert_eq!(sorter.size(), 100);
    let second = drain(&mut sorter);
    assert_eq!(first, second);
}

#[test]
fn sort_from_output_state_also_rewinds() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(2), 16 * BS).unwrap();
    for v in (0..20u32).rev() {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    // consume a prefix, then sort() again from OUTPUT state
    for _ in 0..7 {
        sorter.advance().unwrap();
    }
    sorter.sort().unwrap();
    let out = drain(&mut sorter);
    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(out, expected);
}

#[test]
fn clear_restarts_with_fresh_input() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm.clone(), creator_budget(2), 16 * BS).unwrap();
    for v in (0..32u32).rev() {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    assert_eq!(drain(&mut sorter), (0..32).collect::<Vec<u32>>());

    sorter.clear();
    assert_eq!(bm.allocated_block_count(), 0);
    assert_eq!(sorter.size(), 0);
    for v in [30u32, 10, 20] {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    assert_eq!(drain(&mut sorter), vec![10, 20, 30]);
}

#[test]
fn clear_from_input_state_discards_pushed_items() {
    let (_dir, bm) = manager(1);
    let mut sorter = U32Sorter::new(U32Cmp, bm, creator_budget(2)).unwrap();
    for v in 0..100u32 {
        sorter.push(v).unwrap();
    }
    sorter.clear();
    sorter.push(1).unwrap();
    sorter.sort().unwrap();
    assert_eq!(drain(&mut sorter), vec![1]);
}

#[test]
fn sort_reuse_keeps_working() {
    let (_dir, bm) = manager(1);
    let mut sorter = U32Sorter::new(U32Cmp, bm, creator_budget(2)).unwrap();
    for v in [3u32, 1, 2] {
        sorter.push(v).unwrap();
    }
    sorter.sort_reuse().unwrap();
    assert_eq!(drain(&mut sorter), vec![1, 2, 3]);
}

#[test]
fn finish_clear_releases_all_blocks() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm.clone(), creator_budget(2), 24 * BS).unwrap();
    for v in 0..64u32 {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    assert!(bm.allocated_block_count() > 0);
    sorter.finish_clear().unwrap();
    assert_eq!(bm.allocated_block_count(), 0);
}

#[test]
fn recursive_budget_matches_ample_budget() {
    let (_dir, bm) = manager(1);
    let mut rng = rand::rng();
    let data: Vec<u32> = (0..1024).map(|_| rng.random::<u32>()).collect();

    let mut ample =
        U32Sorter::with_memory(U32Cmp, bm.clone(), creator_budget(4), 256 * BS).unwrap();
    let mut tight =
        U32Sorter::with_memory(U32Cmp, bm.clone(), creator_budget(4), 12 * BS).unwrap();
    for &v in &data {
        ample.push(v).unwrap();
        tight.push(v).unwrap();
    }
    ample.sort().unwrap();
    tight.sort().unwrap();
    let a = drain(&mut ample);
    let b = drain(&mut tight);
    assert_sorted(&a);
    assert_eq!(a, b);
}

#[test]
fn sixty_four_bit_elements_round_trip() {
    let (_dir, bm) = manager(2);
    // 32-byte blocks hold 4 u64 keys
    let mut sorter = Sorter::<u64, U64Cmp, 32>::new(
        U64Cmp,
        bm,
        8 * 32 * emsort::memory_usage_factor(),
    )
    .unwrap();
    let mut rng = rand::rng();
    let data: Vec<u64> = (0..500).map(|_| rng.random::<u64>()).collect();
    for &v in &data {
        sorter.push(v).unwrap();
    }
    sorter.sort().unwrap();
    let out = drain(&mut sorter);
    let mut expected = data;
    expected.sort_unstable();
    assert_eq!(out, expected);
}

#[test]
fn creator_memory_below_two_blocks_is_rejected() {
    let (_dir, bm) = manager(1);
    let err = U32Sorter::new(U32Cmp, bm, creator_budget(2) - 1).unwrap_err();
    assert!(matches!(err, SortError::InsufficientMemory { .. }));
}

#[test]
fn merger_memory_below_recursion_floor_is_rejected() {
    let (_dir, bm) = manager(1);
    let mut sorter =
        U32Sorter::with_memory(U32Cmp, bm, creator_budget(2), 6 * BS).unwrap();
    for v in 0..64u32 {
        sorter.push(v).unwrap();
    }
    let err = sorter.sort().unwrap_err();
    assert!(matches!(err, SortError::InsufficientMemory { .. }));
}

#[test]
#[should_panic(expected = "push is only valid in input state")]
fn push_in_output_state_panics() {
    let (_dir, bm) = manager(1);
    let mut sorter = U32Sorter::new(U32Cmp, bm, creator_budget(2)).unwrap();
    sorter.push(1).unwrap();
    sorter.sort().unwrap();
    let _ = sorter.push(2);
}

#[test]
#[should_panic(expected = "requires output state")]
fn current_in_input_state_panics() {
    let (_dir, bm) = manager(1);
    let sorter = U32Sorter::new(U32Cmp, bm, creator_budget(2)).unwrap();
    let _ = sorter.current();
}
