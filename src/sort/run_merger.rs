//! Run merging: plan the prefetch order over all runs' blocks, build a
//! merge frontier, and stream the elements back out in sorted order. When
//! the run count exceeds what one pass can hold, whole groups of runs are
//! merged into longer intermediate runs first.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::comparator::{ordering, verify_sentinel_order, SentinelCmp};
use crate::diskio::block::Block;
use crate::diskio::manager::{AllocStrategy, BlockManager, QueuePriority};
use crate::diskio::writer::BufferedBlockWriter;
use crate::error::{Result, SortError};
use crate::sort::losers::{LoserTree, RunCursor};
use crate::sort::merge::SequenceFrontier;
use crate::sort::prefetch::{compute_prefetch_schedule, identity_schedule, Prefetcher};
use crate::sort::runs::{Run, SortedRuns, TriggerEntry};
use crate::Element;

/// Merge arity for a balanced multi-pass merge: the smallest factor that
/// still reaches `max_arity` runs in the same number of passes.
pub(crate) fn optimal_merge_factor(num_runs: usize, max_arity: usize) -> usize {
    debug_assert!(num_runs > max_arity && max_arity >= 2);
    let passes = (num_runs as f64).ln() / (max_arity as f64).ln();
    let factor = (num_runs as f64).powf(1.0 / passes.ceil()).ceil() as usize;
    factor.clamp(2, max_arity)
}

enum Frontier<T: Element, C: SentinelCmp<T>, const BS: usize> {
    Losers(LoserTree<T, C, BS>),
    Sequences(SequenceFrontier<T, BS>),
}

/// Streams the contents of a sorted-runs descriptor in sorted order:
/// `empty()`, `current()`, `advance()`. Construction is cheap; the real
/// planning happens in `initialize`.
pub struct RunMerger<T: Element, C: SentinelCmp<T>, const BS: usize> {
    cmp: C,
    bm: Arc<BlockManager>,
    memory_to_use: usize,
    sruns: Option<SortedRuns<T, BS>>,
    elements_remaining: u64,
    out_block: Block<T, BS>,
    out_pos: usize,
    out_end: usize,
    prefetcher: Option<Prefetcher<T, BS>>,
    frontier: Option<Frontier<T, C, BS>>,
    /// Elements known emittable without another block load; maintained
    /// across refills on the sequence-frontier path.
    mergeable: u64,
    #[cfg(feature = "check-order")]
    last_emitted: Option<T>,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> RunMerger<T, C, BS> {
    pub fn new(cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Self {
        verify_sentinel_order(&cmp);
        let out_block = Block::filled(cmp.max_value());
        RunMerger {
            cmp,
            bm,
            memory_to_use,
            sruns: None,
            elements_remaining: 0,
            out_block,
            out_pos: 0,
            out_end: 0,
            prefetcher: None,
            frontier: None,
            mergeable: 0,
            #[cfg(feature = "check-order")]
            last_emitted: None,
        }
    }

    /// Takes effect on the next `initialize`.
    pub fn set_memory_to_use(&mut self, memory_to_use: usize) {
        self.memory_to_use = memory_to_use;
    }

    /// Takes ownership of the descriptor and stages the first output block.
    pub fn initialize(&mut self, sruns: SortedRuns<T, BS>) -> Result<()> {
        self.drop_merge_structures();
        self.sruns = Some(sruns);
        self.init_from_retained()
    }

    /// Restarts streaming from the beginning of the retained descriptor.
    pub fn rewind(&mut self) -> Result<()> {
        assert!(self.sruns.is_some(), "rewind without a sorted result");
        self.drop_merge_structures();
        self.init_from_retained()
    }

    /// Drops the merge structures and releases the descriptor, freeing its
    /// blocks.
    pub fn deallocate(&mut self) {
        self.drop_merge_structures();
        self.sruns = None;
        self.elements_remaining = 0;
        self.out_pos = 0;
        self.out_end = 0;
    }

    /// Drops the merge structures but keeps the descriptor for a later
    /// `rewind`.
    pub fn release_buffers(&mut self) {
        self.drop_merge_structures();
    }

    /// Moves the retained descriptor out, e.g. to hand it back to a sorter.
    pub(crate) fn take_runs(&mut self) -> Option<SortedRuns<T, BS>> {
        self.drop_merge_structures();
        self.elements_remaining = 0;
        self.out_pos = 0;
        self.out_end = 0;
        self.sruns.take()
    }

    pub fn empty(&self) -> bool {
        self.elements_remaining == 0
    }

    /// Elements left to stream.
    pub fn size(&self) -> u64 {
        self.elements_remaining
    }

    pub fn current(&self) -> &T {
        debug_assert!(!self.empty());
        &self.out_block[self.out_pos]
    }

    /// True iff the next `advance` has to merge a new output block.
    pub fn next_output_would_block(&self) -> bool {
        self.out_pos + 1 == self.out_end
    }

    /// Elements staged per merge step.
    pub fn output_block_size(&self) -> usize {
        Block::<T, BS>::CAPACITY
    }

    pub fn advance(&mut self) -> Result<()> {
        debug_assert!(!self.empty());
        debug_assert!(self.out_pos < self.out_end);

        self.elements_remaining -= 1;
        self.out_pos += 1;
        if self.out_pos == self.out_end && !self.empty() {
            self.fill_buffer()?;
        }

        #[cfg(feature = "check-order")]
        if !self.empty() {
            if let Some(last) = self.last_emitted {
                assert!(
                    !self.cmp.less(self.current(), &last),
                    "merger output inversion at {} elements remaining",
                    self.elements_remaining
                );
            }
            self.last_emitted = Some(*self.current());
        }

        Ok(())
    }

    fn drop_merge_structures(&mut self) {
        self.frontier = None;
        self.prefetcher = None;
        self.mergeable = 0;
        #[cfg(feature = "check-order")]
        {
            self.last_emitted = None;
        }
    }

    fn init_from_retained(&mut self) -> Result<()> {
        let capacity = Block::<T, BS>::CAPACITY;
        {
            let sruns = self.sruns.as_ref().expect("descriptor retained");
            self.elements_remaining = sruns.total_elements();
            self.out_pos = 0;
            self.out_end = 0;

            if self.empty() {
                return Ok(());
            }

            if sruns.has_small_run() {
                // The input never left memory; expose it straight from the
                // output block.
                let small = &sruns.small_run;
                debug_assert_eq!(small.len() as u64, self.elements_remaining);
                debug_assert!(small.len() <= capacity);
                self.out_block[..small.len()].copy_from_slice(small);
                self.out_end = small.len();
                return Ok(());
            }
        }

        #[cfg(feature = "check-order")]
        debug_assert!(crate::sort::runs::check_sorted_runs(
            self.sruns.as_ref().expect("descriptor retained"),
            &self.cmp
        )?);

        self.bm.set_priority(QueuePriority::Write);

        let disks = self.bm.disks_number();
        let min_prefetch_buffers = 2 * disks;
        let input_buffers = self.memory_to_use.saturating_sub(BS) / BS;
        let mut nruns = self.sruns.as_ref().expect("descriptor retained").num_runs();

        if input_buffers < nruns + min_prefetch_buffers {
            warn!(
                "single merge pass infeasible: {} input buffers for {} runs + {} prefetch \
                 buffers; merging recursively",
                input_buffers, nruns, min_prefetch_buffers
            );
            let recursive_merge_buffers = self.memory_to_use / BS;
            if recursive_merge_buffers < 2 * min_prefetch_buffers + 1 + 2 {
                return Err(SortError::InsufficientMemory {
                    required: (2 * min_prefetch_buffers + 1 + 2) * BS,
                    available: self.memory_to_use,
                });
            }
            self.merge_recursively()?;
            nruns = self.sruns.as_ref().expect("descriptor retained").num_runs();
        }
        debug_assert!(nruns + min_prefetch_buffers <= input_buffers);

        self.bm.set_priority(QueuePriority::Read);

        // Flatten all runs' triggers into the consume sequence. The sort is
        // stable and sequential so equal triggers keep their run order and
        // intra-run blocks are read in run order.
        let sruns = self.sruns.as_ref().expect("descriptor retained");
        let mut consume: Vec<TriggerEntry<T>> = Vec::with_capacity(sruns.total_blocks());
        for run in &sruns.runs {
            consume.extend_from_slice(run);
        }
        consume.sort_by(|a, b| ordering(&self.cmp, &a.value, &b.value));

        let total_blocks = consume.len();
        let n_prefetch_buffers = min_prefetch_buffers.max(input_buffers - nruns);
        let schedule = if cfg!(feature = "optimal-prefetch") {
            let n_opt = min_prefetch_buffers
                + 3 * (n_prefetch_buffers - min_prefetch_buffers) / 10;
            compute_prefetch_schedule(&consume, n_opt, self.bm.max_device_id())
        } else {
            identity_schedule(total_blocks)
        };

        debug!(
            "merger init: {} runs, {} blocks, {} prefetch buffers",
            nruns, total_blocks, n_prefetch_buffers
        );

        let mut prefetcher = Prefetcher::new(
            Arc::clone(&self.bm),
            consume,
            schedule,
            (nruns + n_prefetch_buffers).min(total_blocks),
            self.cmp.max_value(),
        );

        let frontier = if cfg!(feature = "parallel-merge") {
            Frontier::Sequences(SequenceFrontier::new(nruns, &mut prefetcher)?)
        } else {
            let mut cursors = Vec::with_capacity(nruns);
            for _ in 0..nruns {
                cursors.push(RunCursor::new(prefetcher.pull_block()?));
            }
            Frontier::Losers(LoserTree::new(cursors, self.cmp.clone()))
        };

        self.prefetcher = Some(prefetcher);
        self.frontier = Some(frontier);
        self.mergeable = 0;
        self.fill_buffer()
    }

    /// Stages the next `min(B, remaining)` elements into the output block.
    fn fill_buffer(&mut self) -> Result<()> {
        let rest = (Block::<T, BS>::CAPACITY as u64).min(self.elements_remaining) as usize;
        let prefetcher = self.prefetcher.as_mut().expect("merge structures live");
        match self.frontier.as_mut().expect("merge structures live") {
            Frontier::Losers(tree) => {
                tree.multi_merge(&mut self.out_block[..rest], prefetcher)?;
            }
            Frontier::Sequences(frontier) => {
                let mut filled = 0;
                while filled < rest && !frontier.is_empty() {
                    if self.mergeable < (rest - filled) as u64 {
                        self.mergeable = if prefetcher.empty() {
                            // everything left is already in memory
                            self.elements_remaining
                        } else {
                            frontier.count_less_equal(prefetcher.next_trigger(), &self.cmp)
                        };
                    }
                    let batch = self.mergeable.min((rest - filled) as u64) as usize;
                    frontier.multiway_merge(&mut self.out_block[filled..filled + batch], &self.cmp);
                    filled += batch;
                    self.mergeable -= batch as u64;
                    frontier.refill_or_remove(prefetcher)?;
                }
                debug_assert_eq!(filled, rest);
            }
        }

        #[cfg(feature = "check-order")]
        for pair in self.out_block[..rest].windows(2) {
            assert!(
                !self.cmp.less(&pair[1], &pair[0]),
                "staged output block is not sorted"
            );
        }

        self.out_pos = 0;
        self.out_end = rest;

        if self.elements_remaining <= Block::<T, BS>::CAPACITY as u64 {
            // all remaining data sits in the output block now
            self.drop_merge_structures();
        }
        Ok(())
    }

    /// Merges groups of runs into longer intermediate runs until one pass
    /// can take the rest. Every pass replaces the descriptor's run list;
    /// the consumed runs' blocks are freed as each group's scratch
    /// descriptor is dropped.
    fn merge_recursively(&mut self) -> Result<()> {
        let capacity = Block::<T, BS>::CAPACITY as u64;
        let disks = self.bm.disks_number();
        let nwrite_buffers = 2 * disks;
        let memory_for_write_buffers = nwrite_buffers * BS;
        let memory_for_buffers = memory_for_write_buffers + 2 * disks * BS + BS;
        let max_arity = self.memory_to_use.saturating_sub(memory_for_buffers) / BS;

        let mut nruns = self.sruns.as_ref().expect("descriptor retained").num_runs();
        let merge_factor = optimal_merge_factor(nruns, max_arity);
        debug_assert!(merge_factor > 1 && merge_factor <= max_arity);

        while nruns > max_arity {
            let new_nruns = nruns.div_ceil(merge_factor);
            info!(
                "merge pass: {} runs, factor {}, max arity {} -> {} runs",
                nruns, merge_factor, max_arity, new_nruns
            );
            self.bm.set_priority(QueuePriority::Write);

            let mut old: VecDeque<(Run<T>, u64)> = {
                let sruns = self.sruns.as_mut().expect("descriptor retained");
                // Empty the id lists before moving ownership so the
                // descriptor cannot free blocks that now live elsewhere.
                let runs = mem::take(&mut sruns.runs);
                let sizes = mem::take(&mut sruns.run_sizes);
                runs.into_iter().zip(sizes).collect()
            };

            let mut new_runs: Vec<Run<T>> = Vec::with_capacity(new_nruns);
            let mut new_sizes: Vec<u64> = Vec::with_capacity(new_nruns);

            while !old.is_empty() {
                let runs2merge = merge_factor.min(old.len());
                if runs2merge == 1 {
                    // nothing to merge, carry the run over unchanged
                    let (run, size) = old.pop_front().expect("non-empty");
                    new_runs.push(run);
                    new_sizes.push(size);
                    continue;
                }

                let mut group = SortedRuns::new(Arc::clone(&self.bm));
                for _ in 0..runs2merge {
                    let (run, size) = old.pop_front().expect("non-empty");
                    group.add_run(run, size);
                }
                let elements_in_new_run = group.total_elements();
                let blocks_in_new_run = elements_in_new_run.div_ceil(capacity) as usize;

                let mut strategy = AllocStrategy::default();
                let bids = self
                    .bm
                    .allocate_blocks(&mut strategy, blocks_in_new_run, BS);

                let mut merger = RunMerger::<T, C, BS>::new(
                    self.cmp.clone(),
                    Arc::clone(&self.bm),
                    self.memory_to_use - memory_for_write_buffers,
                );
                merger.initialize(group)?;
                // the inner initialize prefers reads once its planning is
                // done; this pass is write-bound
                self.bm.set_priority(QueuePriority::Write);

                let mut writer = BufferedBlockWriter::<T, BS>::new(
                    Arc::clone(&self.bm),
                    nwrite_buffers,
                    self.cmp.max_value(),
                );
                let mut out = writer.take_block();
                let mut new_run: Run<T> = Vec::with_capacity(blocks_in_new_run);
                let mut offset = 0usize;
                for _ in 0..elements_in_new_run {
                    let value = *merger.current();
                    if offset == 0 {
                        new_run.push(TriggerEntry {
                            bid: bids[new_run.len()],
                            value,
                        });
                    }
                    out[offset] = value;
                    offset += 1;
                    merger.advance()?;
                    if offset == Block::<T, BS>::CAPACITY {
                        let bid = new_run.last().expect("trigger recorded").bid;
                        out = writer.write(out, bid)?;
                        offset = 0;
                    }
                }
                debug_assert!(merger.empty());
                if offset > 0 {
                    for slot in &mut out[offset..] {
                        *slot = self.cmp.max_value();
                    }
                    let bid = new_run.last().expect("trigger recorded").bid;
                    out = writer.write(out, bid)?;
                }
                drop(out);
                writer.flush()?;
                // dropping the merger releases the group descriptor and
                // frees the consumed runs' blocks
                drop(merger);

                new_runs.push(new_run);
                new_sizes.push(elements_in_new_run);
            }

            let sruns = self.sruns.as_mut().expect("descriptor retained");
            sruns.runs = new_runs;
            sruns.run_sizes = new_sizes;
            nruns = sruns.num_runs();
            debug_assert_eq!(nruns, new_nruns);
        }
        Ok(())
    }
}
