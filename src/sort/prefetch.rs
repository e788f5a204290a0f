//! Read-ahead for the merge phase. The consume sequence fixes the order in
//! which the merger will need blocks; the prefetch schedule is the order in
//! which reads are issued, either identical to it or rotated across disks.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::diskio::block::Block;
use crate::diskio::manager::BlockManager;
use crate::diskio::request::ReadRequest;
use crate::error::Result;
use crate::sort::runs::TriggerEntry;
use crate::Element;

/// The identity permutation: reads are issued in consume order.
pub(crate) fn identity_schedule(total_blocks: usize) -> Vec<usize> {
    (0..total_blocks).collect()
}

/// Disk-aware issue order: within a lookahead window of `window` blocks,
/// always issue next on the disk that has waited longest, so no queue sits
/// idle while another backs up.
pub(crate) fn compute_prefetch_schedule<T>(
    consume: &[TriggerEntry<T>],
    window: usize,
    max_device_id: usize,
) -> Vec<usize> {
    let window = window.max(1);
    let mut schedule = Vec::with_capacity(consume.len());
    let mut candidates: VecDeque<usize> = (0..consume.len().min(window)).collect();
    let mut next = candidates.len();
    let mut last_use = vec![0u64; max_device_id];
    let mut tick = 1u64;

    while let Some(&front) = candidates.front() {
        let mut pick = 0;
        let mut best = (last_use[consume[front].bid.disk_index()], front);
        for (i, &ci) in candidates.iter().enumerate().skip(1) {
            let key = (last_use[consume[ci].bid.disk_index()], ci);
            if key < best {
                best = key;
                pick = i;
            }
        }
        let chosen = candidates.remove(pick).expect("candidate in window");
        last_use[consume[chosen].bid.disk_index()] = tick;
        tick += 1;
        schedule.push(chosen);
        if next < consume.len() {
            candidates.push_back(next);
            next += 1;
        }
    }
    schedule
}

/// Keeps up to `buffers` block reads in flight, handing blocks out strictly
/// in consume order while issuing reads in schedule order.
pub(crate) struct Prefetcher<T: Element, const BS: usize> {
    bm: Arc<BlockManager>,
    consume: Vec<TriggerEntry<T>>,
    schedule: Vec<usize>,
    schedule_pos: usize,
    requests: Vec<Option<ReadRequest<T, BS>>>,
    issued: Vec<bool>,
    next_consume: usize,
    free: Vec<Block<T, BS>>,
}

impl<T: Element, const BS: usize> Prefetcher<T, BS> {
    pub(crate) fn new(
        bm: Arc<BlockManager>,
        consume: Vec<TriggerEntry<T>>,
        schedule: Vec<usize>,
        buffers: usize,
        fill: T,
    ) -> Self {
        debug_assert_eq!(consume.len(), schedule.len());
        let mut pf = Prefetcher {
            bm,
            requests: consume.iter().map(|_| None).collect(),
            issued: vec![false; consume.len()],
            consume,
            schedule,
            schedule_pos: 0,
            next_consume: 0,
            free: (0..buffers).map(|_| Block::filled(fill)).collect(),
        };
        pf.top_up();
        pf
    }

    /// True once every block of the consume sequence was handed out.
    pub(crate) fn empty(&self) -> bool {
        self.next_consume >= self.consume.len()
    }

    /// Trigger value of the next block the merger will receive. The merge
    /// must not emit past it while the block is still on disk.
    pub(crate) fn next_trigger(&self) -> &T {
        debug_assert!(!self.empty());
        &self.consume[self.next_consume].value
    }

    /// Hands out the next block in consume order, waiting for its read.
    pub(crate) fn pull_block(&mut self) -> Result<Block<T, BS>> {
        debug_assert!(!self.empty());
        let idx = self.next_consume;
        if !self.issued[idx] {
            self.issue_on_demand(idx)?;
        }
        let block = self.requests[idx].take().expect("read was issued").wait()?;
        self.next_consume += 1;
        self.top_up();
        Ok(block)
    }

    /// Recycles a drained buffer. Returns the next consume-order block, or
    /// `None` once the sequence is exhausted.
    pub(crate) fn block_consumed(&mut self, block: Block<T, BS>) -> Result<Option<Block<T, BS>>> {
        self.free.push(block);
        self.top_up();
        if self.empty() {
            Ok(None)
        } else {
            Ok(Some(self.pull_block()?))
        }
    }

    /// Issues scheduled reads while spare buffers remain.
    fn top_up(&mut self) {
        while !self.free.is_empty() && self.schedule_pos < self.schedule.len() {
            let idx = self.schedule[self.schedule_pos];
            self.schedule_pos += 1;
            if self.issued[idx] {
                continue;
            }
            let buf = self.free.pop().expect("free buffer available");
            self.requests[idx] = Some(self.bm.read_block(self.consume[idx].bid, buf));
            self.issued[idx] = true;
        }
    }

    /// The schedule put this block after others that are hogging the pool:
    /// reclaim the buffer of the latest outstanding read and fetch the
    /// needed block directly.
    fn issue_on_demand(&mut self, idx: usize) -> Result<()> {
        if self.free.is_empty() {
            let victim = (idx + 1..self.consume.len())
                .rev()
                .find(|&j| self.requests[j].is_some())
                .expect("an outstanding later read holds a buffer");
            let buf = self.requests[victim].take().expect("outstanding").cancel()?;
            self.issued[victim] = false;
            self.free.push(buf);
        }
        let buf = self.free.pop().expect("free buffer available");
        self.requests[idx] = Some(self.bm.read_block(self.consume[idx].bid, buf));
        self.issued[idx] = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskio::manager::AllocStrategy;
    use crate::diskio::Bid;

    const BS: usize = 16;

    fn entries(bids: &[Bid]) -> Vec<TriggerEntry<u32>> {
        bids.iter()
            .enumerate()
            .map(|(i, &bid)| TriggerEntry {
                bid,
                value: (i * 4) as u32,
            })
            .collect()
    }

    fn write_blocks(bm: &BlockManager, bids: &[Bid]) {
        for (i, &bid) in bids.iter().enumerate() {
            let mut block = Block::<u32, BS>::filled(0);
            let base = (i * 4) as u32;
            block.copy_from_slice(&[base, base + 1, base + 2, base + 3]);
            bm.write_block(bid, block).wait().unwrap();
        }
    }

    #[test]
    fn pulls_in_consume_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let bm = BlockManager::open_in_dir(dir.path(), 2).unwrap();
        let bids = bm.allocate_blocks(&mut AllocStrategy::default(), 6, BS);
        write_blocks(&bm, &bids);

        let consume = entries(&bids);
        let schedule = identity_schedule(consume.len());
        let mut pf = Prefetcher::<u32, BS>::new(Arc::clone(&bm), consume, schedule, 2, u32::MAX);
        for i in 0..6 {
            let block = pf.pull_block().unwrap();
            assert_eq!(block[0], (i * 4) as u32);
            assert!(pf.block_consumed(block).is_ok());
        }
    }

    #[test]
    fn survives_an_adversarial_schedule() {
        let dir = tempfile::TempDir::new().unwrap();
        let bm = BlockManager::open_in_dir(dir.path(), 1).unwrap();
        let bids = bm.allocate_blocks(&mut AllocStrategy::default(), 5, BS);
        write_blocks(&bm, &bids);

        let consume = entries(&bids);
        // Reversed issue order with a pool too small to hold it: the
        // prefetcher must fall back to fetching on demand.
        let schedule = vec![4, 3, 2, 1, 0];
        let mut pf = Prefetcher::<u32, BS>::new(Arc::clone(&bm), consume, schedule, 2, u32::MAX);
        let mut got = Vec::new();
        while !pf.empty() {
            let block = pf.pull_block().unwrap();
            got.push(block[0]);
            pf.free.push(block);
        }
        assert_eq!(got, vec![0, 4, 8, 12, 16]);
    }

    #[test]
    fn schedule_rotates_across_disks() {
        let dir = tempfile::TempDir::new().unwrap();
        let bm = BlockManager::open_in_dir(dir.path(), 2).unwrap();
        let bids = bm.allocate_blocks(&mut AllocStrategy::default(), 4, BS);
        let consume = entries(&bids);
        let schedule = compute_prefetch_schedule(&consume, 3, bm.max_device_id());
        let mut seen = schedule.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        // Round-robin allocation alternates disks, so the window heuristic
        // keeps alternating too.
        assert_ne!(
            consume[schedule[0]].bid.disk_index(),
            consume[schedule[1]].bid.disk_index()
        );
    }
}
