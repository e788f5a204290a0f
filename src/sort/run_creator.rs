//! Run creation: accumulate unordered input into two block-aligned memory
//! halves, sort each full half, and write it out as a run while the other
//! half keeps filling. Push mode and stream mode share the same flush
//! pipeline and differ only in how elements arrive.

use std::mem;
use std::sync::Arc;

use log::debug;

use crate::comparator::{verify_sentinel_order, SentinelCmp};
use crate::diskio::block::{Block, RunStorage};
use crate::diskio::manager::{AllocStrategy, BlockManager, QueuePriority};
use crate::diskio::request::WriteRequest;
use crate::error::{Result, SortError};
use crate::sort::runs::{free_run, SortedRuns, TriggerEntry};
use crate::{Element, ElementStream};

/// Per-element memory multiplier of the run creator. The parallel in-run
/// sort works out of place, so half the accounted memory is left to its
/// scratch buffers.
pub const fn memory_usage_factor() -> usize {
    if cfg!(feature = "parallel-sort") {
        2
    } else {
        1
    }
}

/// Sorts one run's worth of elements with the configured internal sort.
pub(crate) fn sort_run<T, C>(elems: &mut [T], cmp: &C)
where
    T: Element,
    C: SentinelCmp<T>,
{
    #[cfg(feature = "parallel-sort")]
    {
        use rayon::prelude::*;
        elems.par_sort_unstable_by(|a, b| crate::comparator::ordering(cmp, a, b));
    }
    #[cfg(not(feature = "parallel-sort"))]
    elems.sort_unstable_by(|a, b| crate::comparator::ordering(cmp, a, b));
}

/// A run whose writes are still in flight: the sorted elements shared with
/// the I/O threads, and one request per block, indexed by slot.
struct FlushState<T: Element, const BS: usize> {
    storage: Arc<RunStorage<T>>,
    requests: Vec<Option<WriteRequest<T, BS>>>,
}

/// The flush/sort/write pipeline shared by both creator modes.
struct CreatorCore<T: Element, C: SentinelCmp<T>, const BS: usize> {
    cmp: C,
    bm: Arc<BlockManager>,
    /// Elements per run: half the accounted memory, in whole blocks.
    el_in_run: usize,
    /// The half currently being filled.
    fill: Vec<T>,
    /// The previously flushed half, reclaimed and ready for refilling.
    spare: Option<Vec<T>>,
    in_flight: Option<FlushState<T, BS>>,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> CreatorCore<T, C, BS> {
    fn new(cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Result<Self> {
        verify_sentinel_order(&cmp);
        let required = 2 * BS * memory_usage_factor();
        if memory_to_use < required {
            return Err(SortError::InsufficientMemory {
                required,
                available: memory_to_use,
            });
        }
        let m = memory_to_use / BS / memory_usage_factor();
        let m2 = m / 2;
        debug_assert!(m2 > 0);
        Ok(CreatorCore {
            cmp,
            bm,
            el_in_run: m2 * Block::<T, BS>::CAPACITY,
            fill: Vec::new(),
            spare: None,
            in_flight: None,
        })
    }

    /// Writes the (already sorted) fill buffer out as one run: pads the tail
    /// block with MAX, allocates fresh block ids, records triggers, and
    /// issues one asynchronous write per block, waiting slot-wise for the
    /// peer half's outstanding writes. Leaves `fill` empty and ready.
    fn write_fill_as_run(&mut self, result: &mut SortedRuns<T, BS>) -> Result<()> {
        debug_assert!(!self.fill.is_empty());
        let capacity = Block::<T, BS>::CAPACITY;
        let count = self.fill.len() as u64;
        let nblocks = self.fill.len().div_ceil(capacity);

        // Padding is part of the on-disk layout: every block of a run holds
        // exactly `capacity` elements.
        self.fill.resize(nblocks * capacity, self.cmp.max_value());

        let mut strategy = AllocStrategy::default();
        let bids = self.bm.allocate_blocks(&mut strategy, nblocks, BS);
        self.bm.set_priority(QueuePriority::Write);

        let storage = Arc::new(RunStorage::from_vec(mem::take(&mut self.fill)));
        let mut prev = self.in_flight.take();
        let mut run = Vec::with_capacity(nblocks);
        let mut requests: Vec<Option<WriteRequest<T, BS>>> =
            (0..nblocks).map(|_| None).collect();
        for (i, &bid) in bids.iter().enumerate() {
            run.push(TriggerEntry {
                bid,
                value: storage.elements()[i * capacity],
            });
            if let Some(prev) = prev.as_mut() {
                if let Some(req) = prev.requests.get_mut(i).and_then(Option::take) {
                    req.wait()?;
                }
            }
            requests[i] = Some(self.bm.write_run_block(bid, Arc::clone(&storage), i));
        }
        if let Some(prev) = prev {
            self.reclaim(prev)?;
        }
        self.in_flight = Some(FlushState { storage, requests });

        debug!("run {} flushed: {} elements, {} blocks", result.num_runs(), count, nblocks);
        result.add_run(run, count);

        self.fill = match self.spare.take() {
            Some(mut v) => {
                v.clear();
                v
            }
            None => Vec::new(),
        };
        Ok(())
    }

    /// Waits for the remaining writes of a flushed half and turns its
    /// storage back into the spare fill buffer.
    fn reclaim(&mut self, mut flush: FlushState<T, BS>) -> Result<()> {
        for req in flush.requests.iter_mut().filter_map(Option::take) {
            req.wait()?;
        }
        let storage = Arc::try_unwrap(flush.storage)
            .ok()
            .expect("all block writes settled");
        self.spare = Some(storage.into_vec());
        Ok(())
    }

    /// Awaits every outstanding write. Nothing is in flight afterwards.
    fn finish_writes(&mut self) -> Result<()> {
        if let Some(flush) = self.in_flight.take() {
            self.reclaim(flush)?;
        }
        Ok(())
    }

    /// Cancels whatever writes have not started and settles the rest.
    fn cancel_writes(&mut self) {
        if let Some(mut flush) = self.in_flight.take() {
            for req in flush.requests.iter_mut().filter_map(Option::take) {
                let _ = req.cancel();
            }
            if let Ok(storage) = Arc::try_unwrap(flush.storage) {
                self.spare = Some(storage.into_vec());
            }
        }
    }

    /// Drops the accumulation buffers, keeping only the comparator and
    /// storage handle.
    fn release_buffers(&mut self) {
        self.fill = Vec::new();
        self.spare = None;
    }

    fn bm_handle(&self) -> &Arc<BlockManager> {
        &self.bm
    }
}

/// Push-mode run creator: elements arrive one at a time through `push`, and
/// `result()` freezes the descriptor.
pub struct RunCreator<T: Element, C: SentinelCmp<T>, const BS: usize> {
    core: CreatorCore<T, C, BS>,
    result: Option<SortedRuns<T, BS>>,
    result_computed: bool,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> std::fmt::Debug for RunCreator<T, C, BS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCreator").finish_non_exhaustive()
    }
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> RunCreator<T, C, BS> {
    /// Fails with `InsufficientMemory` unless `memory_to_use` holds at
    /// least two blocks (times the internal sort's memory factor).
    pub fn new(cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Result<Self> {
        let core = CreatorCore::new(cmp, Arc::clone(&bm), memory_to_use)?;
        Ok(RunCreator {
            core,
            result: Some(SortedRuns::new(bm)),
            result_computed: false,
        })
    }

    /// Number of elements per run.
    pub fn elements_per_run(&self) -> usize {
        self.core.el_in_run
    }

    /// Adds an element. Flushes a full half as a sorted run, overlapping
    /// the write with subsequent pushes into the other half.
    pub fn push(&mut self, value: T) -> Result<()> {
        assert!(
            !self.result_computed,
            "push() after result() is a contract violation"
        );
        if self.core.fill.len() == self.core.el_in_run {
            sort_run(&mut self.core.fill, &self.core.cmp);
            let result = self.result.as_mut().expect("result present in input phase");
            self.core.write_fill_as_run(result)?;
        }
        self.core.fill.push(value);
        Ok(())
    }

    /// Number of elements pushed so far.
    pub fn size(&self) -> u64 {
        self.result.as_ref().map_or(0, SortedRuns::total_elements) + self.core.fill.len() as u64
    }

    /// Finishes the descriptor (once) and returns it for inspection.
    pub fn result(&mut self) -> Result<&SortedRuns<T, BS>> {
        if !self.result_computed {
            self.compute_result()?;
            self.result_computed = true;
        }
        Ok(self.result.as_ref().expect("result not taken"))
    }

    /// Finishes the descriptor and moves it out, e.g. into a merger.
    pub(crate) fn take_result(&mut self) -> Result<SortedRuns<T, BS>> {
        self.result()?;
        Ok(self.result.take().expect("result not taken"))
    }

    fn compute_result(&mut self) -> Result<()> {
        let result = self.result.as_mut().expect("result not taken");
        if self.core.fill.is_empty() {
            debug_assert_eq!(result.num_runs(), 0);
            return Ok(());
        }

        sort_run(&mut self.core.fill, &self.core.cmp);

        if self.core.fill.len() <= Block::<T, BS>::CAPACITY && result.total_elements() == 0 {
            // The whole input fits in one block: keep it in memory, no
            // block ids are ever allocated.
            debug!(
                "small input optimization: {} elements stay in memory",
                self.core.fill.len()
            );
            result.small_run = mem::take(&mut self.core.fill);
            result.elements = result.small_run.len() as u64;
            return Ok(());
        }

        self.core.write_fill_as_run(result)?;
        self.core.finish_writes()
    }

    /// Cancels outstanding writes, drops the current result (freeing its
    /// blocks) and returns to an empty input state.
    pub fn clear(&mut self) {
        self.core.cancel_writes();
        self.core.fill.clear();
        self.result = Some(SortedRuns::new(Arc::clone(self.core.bm_handle())));
        self.result_computed = false;
    }

    /// Re-establishes the accumulation buffers and clears the state.
    pub fn allocate(&mut self) {
        self.clear();
    }

    /// Finishes the result and drops the accumulation buffers.
    pub fn deallocate(&mut self) -> Result<()> {
        if self.result.is_some() {
            self.result()?;
        }
        self.core.release_buffers();
        Ok(())
    }

    /// Empties the retained descriptor, freeing its blocks.
    pub fn clear_result(&mut self) {
        if let Some(result) = self.result.as_mut() {
            result.clear();
        }
    }
}

/// Stream-mode run creator: pulls the whole input from an element stream.
/// Same flush pipeline as push mode, plus a shortcut when the entire input
/// fits into the two memory halves.
pub struct StreamRunCreator<I, C, const BS: usize>
where
    I: ElementStream,
    I::Item: Element,
    C: SentinelCmp<I::Item>,
{
    input: I,
    core: CreatorCore<I::Item, C, BS>,
    result: Option<SortedRuns<I::Item, BS>>,
    result_computed: bool,
}

impl<I, C, const BS: usize> StreamRunCreator<I, C, BS>
where
    I: ElementStream,
    I::Item: Element,
    C: SentinelCmp<I::Item>,
{
    pub fn new(input: I, cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Result<Self> {
        let core = CreatorCore::new(cmp, Arc::clone(&bm), memory_to_use)?;
        Ok(StreamRunCreator {
            input,
            core,
            result: Some(SortedRuns::new(bm)),
            result_computed: false,
        })
    }

    /// Consumes the input and returns the finished descriptor for
    /// inspection.
    pub fn result(&mut self) -> Result<&SortedRuns<I::Item, BS>> {
        if !self.result_computed {
            self.compute_result()?;
            self.result_computed = true;
        }
        Ok(self.result.as_ref().expect("result not taken"))
    }

    /// Consumes the input and moves the descriptor out.
    pub fn take_result(&mut self) -> Result<SortedRuns<I::Item, BS>> {
        self.result()?;
        Ok(self.result.take().expect("result not taken"))
    }

    /// Fills the current half from the input, up to one run's worth.
    fn fetch(&mut self) -> Result<()> {
        while !self.input.empty() && self.core.fill.len() < self.core.el_in_run {
            self.core.fill.push(*self.input.current());
            self.input.advance()?;
        }
        Ok(())
    }

    fn compute_result(&mut self) -> Result<()> {
        let capacity = Block::<I::Item, BS>::CAPACITY;

        self.fetch()?;
        sort_run(&mut self.core.fill, &self.core.cmp);

        if self.core.fill.len() <= capacity && self.input.empty() {
            let result = self.result.as_mut().expect("result not taken");
            if self.core.fill.is_empty() {
                return Ok(());
            }
            debug!(
                "small input optimization: {} elements stay in memory",
                self.core.fill.len()
            );
            result.small_run = mem::take(&mut self.core.fill);
            result.elements = result.small_run.len() as u64;
            return Ok(());
        }

        let first_run_size = self.core.fill.len() as u64;
        {
            let result = self.result.as_mut().expect("result not taken");
            self.core.write_fill_as_run(result)?;
        }
        if self.input.empty() {
            return self.core.finish_writes();
        }

        self.fetch()?;
        if self.input.empty() {
            // The whole input fits into both halves: resort them as one
            // range so only a single run is produced.
            debug!("whole input fits in memory halves, rewriting as one run");
            self.core.finish_writes()?;
            let result = self.result.as_mut().expect("result not taken");
            let first = result.runs.pop().expect("first run was just written");
            result.run_sizes.pop();
            result.elements -= first_run_size;
            free_run(result.block_manager(), &first);

            let mut combined = self.core.spare.take().expect("first half reclaimed");
            combined.append(&mut self.core.fill);
            self.core.fill = combined;
            sort_run(&mut self.core.fill, &self.core.cmp);
            self.core.write_fill_as_run(result)?;
            return self.core.finish_writes();
        }

        sort_run(&mut self.core.fill, &self.core.cmp);
        {
            let result = self.result.as_mut().expect("result not taken");
            self.core.write_fill_as_run(result)?;
        }

        while !self.input.empty() {
            self.fetch()?;
            sort_run(&mut self.core.fill, &self.core.cmp);
            let result = self.result.as_mut().expect("result not taken");
            self.core.write_fill_as_run(result)?;
        }
        self.core.finish_writes()
    }
}
