use std::io;

use thiserror::Error;

/// Errors surfaced by the sorting engine.
///
/// Contract violations (pushing after `result()`, reading an empty stream,
/// invalid sorter state transitions) are programming errors and are enforced
/// with assertions instead of being reported here.
#[derive(Debug, Error)]
pub enum SortError {
    /// The memory budget cannot hold the minimal working set: two blocks for
    /// a run creator, or the input/prefetch/write-back buffers a recursive
    /// merge pass needs.
    #[error("insufficient memory: {required} bytes required, {available} provided")]
    InsufficientMemory { required: usize, available: usize },

    /// I/O failure reported by the block storage layer.
    #[error("block storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SortError>;
