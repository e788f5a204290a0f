//! External-memory sorting engine.
//!
//! Sorts sequences far larger than main memory in two phases: unordered
//! input is accumulated into memory halves, each sorted and written to
//! block storage as a *run*, then all runs are k-way merged back into one
//! sorted stream, recursively when the run count exceeds what a single
//! pass can buffer. Throughput is dominated by block layout and prefetch
//! scheduling, so both are explicit here: every run block carries its first
//! element as a *trigger*, and the merger sorts all triggers to plan the
//! exact order blocks will be needed in.
//!
//! ```no_run
//! use std::sync::Arc;
//! use emsort::{BlockManager, SentinelCmp, Sorter};
//!
//! #[derive(Clone)]
//! struct ByValue;
//!
//! impl SentinelCmp<u64> for ByValue {
//!     fn less(&self, a: &u64, b: &u64) -> bool { a < b }
//!     fn min_value(&self) -> u64 { 0 }
//!     fn max_value(&self) -> u64 { u64::MAX }
//! }
//!
//! # fn main() -> Result<(), emsort::SortError> {
//! let bm = BlockManager::open_in_dir("/tmp", 2)?;
//! let mut sorter = Sorter::<u64, ByValue, 4096>::new(ByValue, bm, 1 << 20)?;
//! for value in [42u64, 7, 19] {
//!     sorter.push(value)?;
//! }
//! sorter.sort()?;
//! while !sorter.empty() {
//!     println!("{}", sorter.current());
//!     sorter.advance()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod comparator;
pub mod diskio;
pub mod error;
pub mod sort;

/// Elements are fixed-size, relocatable plain data: they travel between
/// memory and disk as raw bytes, so a type stored here must be fully
/// defined by its bit pattern (no references, no invariants beyond size).
pub trait Element: Copy + Send + Sync + 'static {}

impl<T: Copy + Send + Sync + 'static> Element for T {}

/// The element-stream shape every stage speaks: consumed by the run
/// creators, produced by the mergers, the sorter and the pipeline.
pub trait ElementStream {
    type Item;

    /// True once the stream is exhausted.
    fn empty(&self) -> bool;

    /// The current element; requires `!empty()`.
    fn current(&self) -> &Self::Item;

    /// Steps to the next element. May block on and surface I/O.
    fn advance(&mut self) -> error::Result<()>;
}

/// Adapts any iterator into an [`ElementStream`].
pub struct IterStream<I: Iterator> {
    iter: I,
    current: Option<I::Item>,
}

impl<I: Iterator> IterStream<I> {
    pub fn new(mut iter: I) -> Self {
        let current = iter.next();
        IterStream { iter, current }
    }
}

impl<I: Iterator> ElementStream for IterStream<I> {
    type Item = I::Item;

    fn empty(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> &I::Item {
        self.current.as_ref().expect("stream not empty")
    }

    fn advance(&mut self) -> error::Result<()> {
        self.current = self.iter.next();
        Ok(())
    }
}

pub use comparator::{verify_sentinel_order, SentinelCmp};
pub use diskio::{AllocStrategy, Bid, Block, BlockManager, BufferedBlockWriter, QueuePriority};
pub use error::SortError;
pub use sort::{
    check_sorted_runs, memory_usage_factor, Run, RunCreator, RunMerger, SortPipeline,
    SortedRuns, Sorter, StreamRunCreator, TriggerEntry,
};
