#![allow(dead_code)]

use std::sync::Arc;

use emsort::{BlockManager, ElementStream, SentinelCmp};

/// 4 u32 elements per block.
pub const BS: usize = 16;

#[derive(Clone)]
pub struct U32Cmp;

impl SentinelCmp<u32> for U32Cmp {
    fn less(&self, a: &u32, b: &u32) -> bool {
        a < b
    }

    fn min_value(&self) -> u32 {
        0
    }

    fn max_value(&self) -> u32 {
        u32::MAX
    }
}

#[derive(Clone)]
pub struct U64Cmp;

impl SentinelCmp<u64> for U64Cmp {
    fn less(&self, a: &u64, b: &u64) -> bool {
        a < b
    }

    fn min_value(&self) -> u64 {
        0
    }

    fn max_value(&self) -> u64 {
        u64::MAX
    }
}

pub fn manager(disks: usize) -> (tempfile::TempDir, Arc<BlockManager>) {
    let dir = tempfile::TempDir::new().unwrap();
    let bm = BlockManager::open_in_dir(dir.path(), disks).unwrap();
    (dir, bm)
}

/// Memory budget holding `blocks` blocks of run-creator accounting.
pub fn creator_budget(blocks: usize) -> usize {
    blocks * BS * emsort::memory_usage_factor()
}

pub fn drain<S>(stream: &mut S) -> Vec<S::Item>
where
    S: ElementStream,
    S::Item: Copy,
{
    let mut out = Vec::new();
    while !stream.empty() {
        out.push(*stream.current());
        stream.advance().unwrap();
    }
    out
}

pub fn assert_sorted(values: &[u32]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "inversion: {} > {}", pair[0], pair[1]);
    }
}
