//! The sorter container: a run creator and a run merger behind one
//! two-state interface. Fill it with `push`, flip it with `sort`, drain it
//! like a stream, `rewind` to read again, `clear` to start over.

use std::sync::Arc;

use crate::comparator::SentinelCmp;
use crate::diskio::manager::BlockManager;
use crate::error::Result;
use crate::sort::run_creator::RunCreator;
use crate::sort::run_merger::RunMerger;
use crate::{Element, ElementStream};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Input,
    Output,
}

/// Two-phase external sorter.
///
/// In the INPUT state unordered items are accepted through `push` and
/// presorted into runs of one memory half each. `sort` switches to the
/// OUTPUT state, after which the items stream back in sorted order through
/// `current`/`advance`. `rewind` restarts the output stream over the same
/// runs; `clear` returns to an empty INPUT state.
pub struct Sorter<T: Element, C: SentinelCmp<T>, const BS: usize> {
    state: State,
    creator: RunCreator<T, C, BS>,
    merger: RunMerger<T, C, BS>,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> std::fmt::Debug for Sorter<T, C, BS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sorter").field("state", &self.state).finish_non_exhaustive()
    }
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> Sorter<T, C, BS> {
    /// One memory budget for both phases (they are never active at once).
    pub fn new(cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Result<Self> {
        Self::with_memory(cmp, bm, memory_to_use, memory_to_use)
    }

    /// Separate budgets for run creation and merging.
    pub fn with_memory(
        cmp: C,
        bm: Arc<BlockManager>,
        creator_memory: usize,
        merger_memory: usize,
    ) -> Result<Self> {
        let creator = RunCreator::new(cmp.clone(), Arc::clone(&bm), creator_memory)?;
        let merger = RunMerger::new(cmp, bm, merger_memory);
        Ok(Sorter {
            state: State::Input,
            creator,
            merger,
        })
    }

    /// Adds an item; INPUT state only.
    pub fn push(&mut self, value: T) -> Result<()> {
        assert_eq!(self.state, State::Input, "push is only valid in input state");
        self.creator.push(value)
    }

    /// Switches to the OUTPUT state. From INPUT this finalizes the runs and
    /// initializes the merger; from OUTPUT it restarts the stream, like
    /// `rewind`.
    pub fn sort(&mut self) -> Result<()> {
        match self.state {
            State::Output => {
                let runs = self.merger.take_runs().expect("output state has a result");
                self.merger.initialize(runs)?;
            }
            State::Input => {
                self.creator.deallocate()?;
                let runs = self.creator.take_result()?;
                self.merger.initialize(runs)?;
            }
        }
        self.state = State::Output;
        Ok(())
    }

    /// `sort` with a new merger memory budget.
    pub fn sort_with_memory(&mut self, merger_memory: usize) -> Result<()> {
        self.merger.set_memory_to_use(merger_memory);
        self.sort()
    }

    /// Switches to OUTPUT without releasing the creator's buffers, for
    /// callers that will `clear` and refill soon.
    pub fn sort_reuse(&mut self) -> Result<()> {
        assert_eq!(self.state, State::Input, "sort_reuse requires input state");
        let runs = self.creator.take_result()?;
        self.merger.initialize(runs)?;
        self.state = State::Output;
        Ok(())
    }

    /// Restarts the output stream from the beginning of the sorted result.
    pub fn rewind(&mut self) -> Result<()> {
        assert_eq!(self.state, State::Output, "rewind requires output state");
        self.merger.rewind()
    }

    /// Cancels and discards everything; back to an empty INPUT state.
    pub fn clear(&mut self) {
        if self.state == State::Output {
            self.merger.deallocate();
        }
        self.creator.allocate();
        self.state = State::Input;
    }

    /// Releases the working buffers on both sides but keeps the sorted
    /// result available.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == State::Output {
            self.merger.release_buffers();
        }
        self.creator.deallocate()
    }

    /// `finish` plus dropping the sorted result and its blocks.
    pub fn finish_clear(&mut self) -> Result<()> {
        if self.state == State::Output {
            self.merger.deallocate();
        }
        self.creator.deallocate()?;
        self.creator.clear_result();
        Ok(())
    }

    /// Items pushed so far (INPUT) or items remaining to read (OUTPUT).
    pub fn size(&self) -> u64 {
        match self.state {
            State::Input => self.creator.size(),
            State::Output => self.merger.size(),
        }
    }

    pub fn empty(&self) -> bool {
        assert_eq!(self.state, State::Output, "empty requires output state");
        self.merger.empty()
    }

    pub fn current(&self) -> &T {
        assert_eq!(self.state, State::Output, "current requires output state");
        self.merger.current()
    }

    pub fn advance(&mut self) -> Result<()> {
        assert_eq!(self.state, State::Output, "advance requires output state");
        self.merger.advance()
    }

    /// Forwarded to the merger; takes effect on the next `sort`.
    pub fn set_merger_memory_to_use(&mut self, merger_memory: usize) {
        self.merger.set_memory_to_use(merger_memory);
    }

    /// True iff the next `advance` will merge a new output block.
    pub fn next_output_would_block(&self) -> bool {
        assert_eq!(self.state, State::Output, "requires output state");
        self.merger.next_output_would_block()
    }

    /// Elements staged per merge step.
    pub fn output_block_size(&self) -> usize {
        self.merger.output_block_size()
    }
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> ElementStream for Sorter<T, C, BS> {
    type Item = T;

    fn empty(&self) -> bool {
        Sorter::empty(self)
    }

    fn current(&self) -> &T {
        Sorter::current(self)
    }

    fn advance(&mut self) -> Result<()> {
        Sorter::advance(self)
    }
}
