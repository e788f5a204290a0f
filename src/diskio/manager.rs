use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::debug;

use crate::diskio::block::{Bid, Block, RunStorage};
use crate::diskio::request::{IoJob, ReadJob, ReadRequest, WriteBuf, WriteJob, WriteRequest};
use crate::error::Result;
use crate::Element;

/// Which queue direction the disk workers should drain first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueuePriority {
    Read,
    Write,
}

/// Round-robin placement over the configured disks. A fresh instance is
/// used per run so placement restarts at the first disk.
#[derive(Default)]
pub struct AllocStrategy {
    next_disk: usize,
}

struct QueueState {
    reads: VecDeque<Arc<dyn IoJob>>,
    writes: VecDeque<Arc<dyn IoJob>>,
    shutdown: bool,
}

struct DiskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl DiskQueue {
    fn new() -> Self {
        DiskQueue {
            state: Mutex::new(QueueState {
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn enqueue(&self, job: Arc<dyn IoJob>, write: bool) {
        let mut state = self.state.lock().unwrap();
        if write {
            state.writes.push_back(job);
        } else {
            state.reads.push_back(job);
        }
        self.ready.notify_one();
    }

    fn serve(&self, file: &File, prefer_writes: &AtomicBool) {
        loop {
            let job = {
                let mut state = self.state.lock().unwrap();
                loop {
                    let job = if prefer_writes.load(Ordering::Relaxed) {
                        state.writes.pop_front().or_else(|| state.reads.pop_front())
                    } else {
                        state.reads.pop_front().or_else(|| state.writes.pop_front())
                    };
                    match job {
                        Some(job) => break job,
                        None if state.shutdown => return,
                        None => state = self.ready.wait(state).unwrap(),
                    }
                }
            };
            job.perform(file);
        }
    }

    fn shut_down(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.ready.notify_all();
    }
}

struct DiskAlloc {
    end: u64,
    free: HashMap<u32, Vec<u64>>,
}

struct Disk {
    file: Arc<File>,
    path: PathBuf,
    queue: Arc<DiskQueue>,
    alloc: Mutex<DiskAlloc>,
}

/// Block storage over one scratch file per configured disk, each served by
/// its own I/O thread. Issues block ids, performs asynchronous typed-block
/// reads and writes, and honors a global read/write priority hint.
pub struct BlockManager {
    disks: Vec<Disk>,
    prefer_writes: Arc<AtomicBool>,
    live_blocks: AtomicU64,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl BlockManager {
    /// Opens `disks` scratch files inside `dir` and starts one I/O worker
    /// per file. The files are removed when the manager is dropped.
    pub fn open_in_dir(dir: impl AsRef<Path>, disks: usize) -> Result<Arc<Self>> {
        assert!(disks > 0, "at least one disk required");
        let paths = (0..disks)
            .map(|i| dir.as_ref().join(format!("emsort_disk_{}.dat", i)))
            .collect::<Vec<_>>();
        Self::open(&paths)
    }

    /// Opens one scratch file per path.
    pub fn open(paths: &[PathBuf]) -> Result<Arc<Self>> {
        assert!(!paths.is_empty(), "at least one disk required");
        let mut disks = Vec::with_capacity(paths.len());
        for path in paths {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            disks.push(Disk {
                file: Arc::new(file),
                path: path.clone(),
                queue: Arc::new(DiskQueue::new()),
                alloc: Mutex::new(DiskAlloc {
                    end: 0,
                    free: HashMap::new(),
                }),
            });
        }

        let prefer_writes = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(disks.len());
        for (i, disk) in disks.iter().enumerate() {
            let queue = Arc::clone(&disk.queue);
            let file = Arc::clone(&disk.file);
            let prefer = Arc::clone(&prefer_writes);
            workers.push(
                thread::Builder::new()
                    .name(format!("emsort-disk-{}", i))
                    .spawn(move || queue.serve(&file, &prefer))
                    .expect("failed to spawn disk I/O thread"),
            );
        }

        debug!("block manager open: {} disk(s)", disks.len());
        Ok(Arc::new(BlockManager {
            disks,
            prefer_writes,
            live_blocks: AtomicU64::new(0),
            workers: Mutex::new(workers),
        }))
    }

    pub fn disks_number(&self) -> usize {
        self.disks.len()
    }

    /// Upper bound (exclusive) on disk indices, for prefetch scheduling.
    pub fn max_device_id(&self) -> usize {
        self.disks.len()
    }

    /// Hints every disk queue to serve the given direction first. The hint
    /// is shared by all users of this manager.
    pub fn set_priority(&self, priority: QueuePriority) {
        self.prefer_writes
            .store(priority == QueuePriority::Write, Ordering::Relaxed);
    }

    /// Number of blocks currently allocated and not yet freed.
    pub fn allocated_block_count(&self) -> u64 {
        self.live_blocks.load(Ordering::Relaxed)
    }

    /// Issues `count` block ids of `block_size` bytes each, placed across
    /// disks by `strategy`. Freed slots are reused before the files grow.
    pub fn allocate_blocks(
        &self,
        strategy: &mut AllocStrategy,
        count: usize,
        block_size: usize,
    ) -> Vec<Bid> {
        let size = block_size as u32;
        let mut bids = Vec::with_capacity(count);
        for _ in 0..count {
            let disk = strategy.next_disk % self.disks.len();
            strategy.next_disk += 1;
            let mut alloc = self.disks[disk].alloc.lock().unwrap();
            let offset = match alloc.free.get_mut(&size).and_then(Vec::pop) {
                Some(offset) => offset,
                None => {
                    let offset = alloc.end;
                    alloc.end += u64::from(size);
                    offset
                }
            };
            bids.push(Bid {
                disk: disk as u32,
                size,
                offset,
            });
        }
        self.live_blocks.fetch_add(count as u64, Ordering::Relaxed);
        bids
    }

    /// Returns the named blocks' slots to their disks' free lists.
    pub fn free_blocks(&self, bids: &[Bid]) {
        let mut freed = 0u64;
        for bid in bids {
            if !bid.is_valid() {
                continue;
            }
            let mut alloc = self.disks[bid.disk as usize].alloc.lock().unwrap();
            alloc.free.entry(bid.size).or_default().push(bid.offset);
            freed += 1;
        }
        self.live_blocks.fetch_sub(freed, Ordering::Relaxed);
    }

    /// Issues an asynchronous write of `block` to `bid`. The buffer comes
    /// back from `WriteRequest::wait`.
    pub fn write_block<T: Element, const BS: usize>(
        &self,
        bid: Bid,
        block: Block<T, BS>,
    ) -> WriteRequest<T, BS> {
        self.write(bid, WriteBuf::Block(block))
    }

    /// Issues an asynchronous write of one block-sized chunk of a run's
    /// shared storage.
    pub(crate) fn write_run_block<T: Element, const BS: usize>(
        &self,
        bid: Bid,
        storage: Arc<RunStorage<T>>,
        index: usize,
    ) -> WriteRequest<T, BS> {
        self.write(bid, WriteBuf::Run(storage, index))
    }

    fn write<T: Element, const BS: usize>(
        &self,
        bid: Bid,
        buf: WriteBuf<T, BS>,
    ) -> WriteRequest<T, BS> {
        debug_assert!(bid.is_valid());
        debug_assert_eq!(bid.size as usize, BS);
        let job = Arc::new(WriteJob::new(bid.offset, buf));
        self.disks[bid.disk as usize]
            .queue
            .enqueue(Arc::clone(&job) as Arc<dyn IoJob>, true);
        WriteRequest::new(job)
    }

    /// Issues an asynchronous read of `bid` into `buf`; the filled block
    /// comes back from `ReadRequest::wait`.
    pub fn read_block<T: Element, const BS: usize>(
        &self,
        bid: Bid,
        buf: Block<T, BS>,
    ) -> ReadRequest<T, BS> {
        debug_assert!(bid.is_valid());
        debug_assert_eq!(bid.size as usize, BS);
        let job = Arc::new(ReadJob::new(bid.offset, buf));
        self.disks[bid.disk as usize]
            .queue
            .enqueue(Arc::clone(&job) as Arc<dyn IoJob>, false);
        ReadRequest::new(job)
    }
}

impl Drop for BlockManager {
    fn drop(&mut self) {
        for disk in &self.disks {
            disk.queue.shut_down();
        }
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
        for disk in &self.disks {
            let _ = std::fs::remove_file(&disk.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBlock = Block<u32, 16>;

    fn manager() -> (tempfile::TempDir, Arc<BlockManager>) {
        let dir = tempfile::TempDir::new().unwrap();
        let bm = BlockManager::open_in_dir(dir.path(), 2).unwrap();
        (dir, bm)
    }

    #[test]
    fn round_robin_allocation_spans_disks() {
        let (_dir, bm) = manager();
        let mut strategy = AllocStrategy::default();
        let bids = bm.allocate_blocks(&mut strategy, 4, 16);
        assert_eq!(bids.len(), 4);
        assert_eq!(bids[0].disk, 0);
        assert_eq!(bids[1].disk, 1);
        assert_eq!(bids[2].disk, 0);
        assert_eq!(bids[3].disk, 1);
        assert_eq!(bm.allocated_block_count(), 4);
        bm.free_blocks(&bids);
        assert_eq!(bm.allocated_block_count(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let (_dir, bm) = manager();
        let mut strategy = AllocStrategy::default();
        let first = bm.allocate_blocks(&mut strategy, 2, 16);
        bm.free_blocks(&first);
        let mut strategy = AllocStrategy::default();
        let second = bm.allocate_blocks(&mut strategy, 2, 16);
        assert_eq!(first, second);
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, bm) = manager();
        let mut strategy = AllocStrategy::default();
        let bids = bm.allocate_blocks(&mut strategy, 2, 16);

        let mut a = TestBlock::filled(0);
        a.copy_from_slice(&[1, 2, 3, 4]);
        let mut b = TestBlock::filled(0);
        b.copy_from_slice(&[5, 6, 7, 8]);

        let ra = bm.write_block(bids[0], a);
        let rb = bm.write_block(bids[1], b);
        let a = ra.wait().unwrap().unwrap();
        let _b = rb.wait().unwrap().unwrap();

        let got = bm.read_block(bids[1], a).wait().unwrap();
        assert_eq!(&got[..], &[5, 6, 7, 8]);
        let got = bm.read_block(bids[0], got).wait().unwrap();
        assert_eq!(&got[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_queued_write_reclaims_buffer() {
        let (_dir, bm) = manager();
        let mut strategy = AllocStrategy::default();
        let bids = bm.allocate_blocks(&mut strategy, 1, 16);
        let block = TestBlock::filled(9);
        let req = bm.write_block(bids[0], block);
        // Whether the worker got to it first or not, cancel must settle the
        // request and hand the buffer back.
        let block = req.cancel().unwrap().unwrap();
        assert_eq!(block.len(), 4);
    }

    #[test]
    fn run_storage_writes_land_per_block() {
        let (_dir, bm) = manager();
        let mut strategy = AllocStrategy::default();
        let bids = bm.allocate_blocks(&mut strategy, 2, 16);

        let storage = Arc::new(RunStorage::from_vec(vec![1u32, 2, 3, 4, 5, 6, 7, 8]));
        let r0 = bm.write_run_block::<u32, 16>(bids[0], Arc::clone(&storage), 0);
        let r1 = bm.write_run_block::<u32, 16>(bids[1], Arc::clone(&storage), 1);
        assert!(r0.wait().unwrap().is_none());
        assert!(r1.wait().unwrap().is_none());
        let storage = Arc::try_unwrap(storage).ok().expect("writes released storage");
        assert_eq!(storage.into_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);

        let got = bm
            .read_block::<u32, 16>(bids[1], TestBlock::filled(0))
            .wait()
            .unwrap();
        assert_eq!(&got[..], &[5, 6, 7, 8]);
    }
}
