//! Block-addressable external storage: typed blocks, asynchronous
//! read/write requests, per-disk I/O queues with a read/write priority
//! hint, and write-back buffering.

pub mod block;
pub mod manager;
pub mod request;
pub mod writer;

pub use block::{Bid, Block};
pub use manager::{AllocStrategy, BlockManager, QueuePriority};
pub use request::{ReadRequest, WriteRequest};
pub use writer::BufferedBlockWriter;
