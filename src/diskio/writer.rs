use std::collections::VecDeque;
use std::sync::Arc;

use crate::diskio::block::{Bid, Block};
use crate::diskio::manager::BlockManager;
use crate::diskio::request::WriteRequest;
use crate::error::Result;
use crate::Element;

/// Write-back buffering over the block manager: a fixed pool of blocks
/// circulates between the caller and the outstanding writes, so the caller
/// always has a buffer to fill while earlier blocks are still in flight.
pub struct BufferedBlockWriter<T: Element, const BS: usize> {
    bm: Arc<BlockManager>,
    free: Vec<Block<T, BS>>,
    pending: VecDeque<WriteRequest<T, BS>>,
}

impl<T: Element, const BS: usize> BufferedBlockWriter<T, BS> {
    /// Creates a writer with `buffers` circulating blocks, each initialized
    /// to `fill`.
    pub fn new(bm: Arc<BlockManager>, buffers: usize, fill: T) -> Self {
        assert!(buffers >= 2, "need at least one fill and one flight buffer");
        BufferedBlockWriter {
            bm,
            free: (0..buffers).map(|_| Block::filled(fill)).collect(),
            pending: VecDeque::new(),
        }
    }

    /// Takes a buffer from the pool for the caller to fill.
    pub fn take_block(&mut self) -> Block<T, BS> {
        self.free.pop().expect("buffer pool exhausted")
    }

    /// Queues `block` for writing to `bid` and returns a fresh buffer,
    /// waiting for the oldest outstanding write when the pool ran dry.
    pub fn write(&mut self, block: Block<T, BS>, bid: Bid) -> Result<Block<T, BS>> {
        self.pending.push_back(self.bm.write_block(bid, block));
        if let Some(block) = self.free.pop() {
            return Ok(block);
        }
        let oldest = self.pending.pop_front().expect("write was just queued");
        Ok(oldest.wait()?.expect("block write returns its buffer"))
    }

    /// Waits for every outstanding write.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(req) = self.pending.pop_front() {
            let block = req.wait()?.expect("block write returns its buffer");
            self.free.push(block);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskio::manager::AllocStrategy;

    #[test]
    fn blocks_circulate_through_the_pool() {
        let dir = tempfile::TempDir::new().unwrap();
        let bm = BlockManager::open_in_dir(dir.path(), 1).unwrap();
        let mut strategy = AllocStrategy::default();
        let bids = bm.allocate_blocks(&mut strategy, 8, 16);

        let mut writer = BufferedBlockWriter::<u32, 16>::new(Arc::clone(&bm), 2, 0);
        let mut cur = writer.take_block();
        for (i, bid) in bids.iter().enumerate() {
            let base = (i * 4) as u32;
            cur.copy_from_slice(&[base, base + 1, base + 2, base + 3]);
            cur = writer.write(cur, *bid).unwrap();
        }
        writer.flush().unwrap();

        for (i, bid) in bids.iter().enumerate() {
            let block = bm
                .read_block::<u32, 16>(*bid, Block::filled(0))
                .wait()
                .unwrap();
            assert_eq!(block[0], (i * 4) as u32);
            assert_eq!(block[3], (i * 4) as u32 + 3);
        }
    }
}
