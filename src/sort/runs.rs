use std::sync::Arc;

use log::debug;

use crate::comparator::SentinelCmp;
use crate::diskio::block::{Bid, Block};
use crate::diskio::manager::BlockManager;
use crate::error::Result;
use crate::Element;

/// One block of a run: its id plus the block's first element, cached so the
/// merger can schedule reads without touching the disk.
#[derive(Clone, Copy, Debug)]
pub struct TriggerEntry<T> {
    pub bid: Bid,
    pub value: T,
}

/// An ordered list of blocks whose concatenated payloads form a sorted
/// sequence. Every block is full; the last one may be padded with MAX
/// sentinels.
pub type Run<T> = Vec<TriggerEntry<T>>;

/// The sorted-runs descriptor handed from the run creator to the run
/// merger: the runs, their exact element counts, and — when the whole input
/// fit into one block — the in-memory small-run buffer instead.
///
/// The descriptor owns every block id it names; they are freed when it is
/// dropped or cleared. Transferring ids elsewhere therefore requires
/// emptying the run list first.
pub struct SortedRuns<T: Element, const BS: usize> {
    pub(crate) runs: Vec<Run<T>>,
    pub(crate) run_sizes: Vec<u64>,
    pub(crate) elements: u64,
    pub(crate) small_run: Vec<T>,
    bm: Arc<BlockManager>,
}

impl<T: Element, const BS: usize> SortedRuns<T, BS> {
    pub fn new(bm: Arc<BlockManager>) -> Self {
        SortedRuns {
            runs: Vec::new(),
            run_sizes: Vec::new(),
            elements: 0,
            small_run: Vec::new(),
            bm,
        }
    }

    pub(crate) fn add_run(&mut self, run: Run<T>, size: u64) {
        self.runs.push(run);
        self.run_sizes.push(size);
        self.elements += size;
    }

    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn run_sizes(&self) -> &[u64] {
        &self.run_sizes
    }

    /// Total number of real elements across all runs (padding excluded).
    pub fn total_elements(&self) -> u64 {
        self.elements
    }

    /// Blocks across all runs.
    pub fn total_blocks(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }

    /// True when the input was retained in memory and no blocks exist.
    pub fn has_small_run(&self) -> bool {
        !self.small_run.is_empty()
    }

    pub(crate) fn block_manager(&self) -> &Arc<BlockManager> {
        &self.bm
    }

    /// Frees every owned block id and resets the descriptor to empty.
    pub fn clear(&mut self) {
        for run in &self.runs {
            free_run(&self.bm, run);
        }
        self.runs.clear();
        self.run_sizes.clear();
        self.small_run.clear();
        self.elements = 0;
    }
}

impl<T: Element, const BS: usize> Drop for SortedRuns<T, BS> {
    fn drop(&mut self) {
        for run in &self.runs {
            free_run(&self.bm, run);
        }
    }
}

pub(crate) fn free_run<T>(bm: &BlockManager, run: &[TriggerEntry<T>]) {
    let bids: Vec<Bid> = run.iter().map(|entry| entry.bid).collect();
    bm.free_blocks(&bids);
}

/// Reads every run back and verifies the descriptor invariants: each trigger
/// equals its block's first element, and each run is non-decreasing over its
/// real element count.
pub fn check_sorted_runs<T, C, const BS: usize>(
    sruns: &SortedRuns<T, BS>,
    cmp: &C,
) -> Result<bool>
where
    T: Element,
    C: SentinelCmp<T>,
{
    let bm = sruns.block_manager();
    let capacity = Block::<T, BS>::CAPACITY;
    for (irun, run) in sruns.runs.iter().enumerate() {
        let requests: Vec<_> = run
            .iter()
            .map(|entry| bm.read_block::<T, BS>(entry.bid, Block::filled(cmp.max_value())))
            .collect();
        let mut elements = Vec::with_capacity(run.len() * capacity);
        for (entry, request) in run.iter().zip(requests) {
            let block = request.wait()?;
            if cmp.less(&block[0], &entry.value) || cmp.less(&entry.value, &block[0]) {
                debug!("run {}: trigger does not match block head", irun);
                return Ok(false);
            }
            elements.extend_from_slice(&block);
        }
        let real = sruns.run_sizes[irun] as usize;
        for pair in elements[..real].windows(2) {
            if cmp.less(&pair[1], &pair[0]) {
                debug!("run {}: inversion inside run", irun);
                return Ok(false);
            }
        }
    }
    Ok(true)
}
