//! Streaming composition: input stream -> run creator -> run merger ->
//! sorted output stream.

use std::sync::Arc;

use crate::comparator::SentinelCmp;
use crate::diskio::manager::BlockManager;
use crate::error::Result;
use crate::sort::run_creator::StreamRunCreator;
use crate::sort::run_merger::RunMerger;
use crate::{Element, ElementStream};

/// Sorts an element stream in two passes and exposes the sorted sequence
/// as a stream itself. The input is fully consumed during construction;
/// the creator's buffers are released before the merge begins.
pub struct SortPipeline<T: Element, C: SentinelCmp<T>, const BS: usize> {
    merger: RunMerger<T, C, BS>,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> SortPipeline<T, C, BS> {
    /// Single budget, split evenly between the two phases.
    pub fn new<I>(input: I, cmp: C, bm: Arc<BlockManager>, memory_to_use: usize) -> Result<Self>
    where
        I: ElementStream<Item = T>,
    {
        Self::with_memory(input, cmp, bm, memory_to_use / 2, memory_to_use / 2)
    }

    /// Separate budgets for run creation and merging.
    pub fn with_memory<I>(
        input: I,
        cmp: C,
        bm: Arc<BlockManager>,
        creator_memory: usize,
        merger_memory: usize,
    ) -> Result<Self>
    where
        I: ElementStream<Item = T>,
    {
        let mut creator =
            StreamRunCreator::<I, C, BS>::new(input, cmp.clone(), Arc::clone(&bm), creator_memory)?;
        let runs = creator.take_result()?;
        drop(creator);

        let mut merger = RunMerger::new(cmp, bm, merger_memory);
        merger.initialize(runs)?;
        Ok(SortPipeline { merger })
    }

    pub fn empty(&self) -> bool {
        self.merger.empty()
    }

    /// Elements remaining in the output stream.
    pub fn size(&self) -> u64 {
        self.merger.size()
    }

    pub fn current(&self) -> &T {
        self.merger.current()
    }

    pub fn advance(&mut self) -> Result<()> {
        self.merger.advance()
    }
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> ElementStream for SortPipeline<T, C, BS> {
    type Item = T;

    fn empty(&self) -> bool {
        SortPipeline::empty(self)
    }

    fn current(&self) -> &T {
        SortPipeline::current(self)
    }

    fn advance(&mut self) -> Result<()> {
        SortPipeline::advance(self)
    }
}
