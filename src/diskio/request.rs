use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Condvar, Mutex};

use crate::diskio::block::{Block, RunStorage};
use crate::error::{Result, SortError};
use crate::Element;

/// A queued I/O operation, type-erased so one disk queue serves blocks of
/// any element type.
pub(crate) trait IoJob: Send + Sync {
    fn perform(&self, file: &File);
}

/// Buffer backing a write: either an owned block (returned to the caller on
/// `wait`) or a shared slice of a run's storage.
pub(crate) enum WriteBuf<T: Element, const BS: usize> {
    Block(Block<T, BS>),
    Run(Arc<RunStorage<T>>, usize),
}

impl<T: Element, const BS: usize> WriteBuf<T, BS> {
    fn bytes(&self) -> &[u8] {
        match self {
            WriteBuf::Block(block) => block.bytes(),
            WriteBuf::Run(storage, index) => storage.block_bytes::<BS>(*index),
        }
    }

    fn into_block(self) -> Option<Block<T, BS>> {
        match self {
            WriteBuf::Block(block) => Some(block),
            WriteBuf::Run(..) => None,
        }
    }
}

enum WriteState<T: Element, const BS: usize> {
    Queued(WriteBuf<T, BS>),
    Running,
    Done(Option<Block<T, BS>>),
    Cancelled(Option<Block<T, BS>>),
    Failed(io::Error, Option<Block<T, BS>>),
}

pub(crate) struct WriteJob<T: Element, const BS: usize> {
    offset: u64,
    state: Mutex<WriteState<T, BS>>,
    done: Condvar,
}

impl<T: Element, const BS: usize> WriteJob<T, BS> {
    pub(crate) fn new(offset: u64, buf: WriteBuf<T, BS>) -> Self {
        WriteJob {
            offset,
            state: Mutex::new(WriteState::Queued(buf)),
            done: Condvar::new(),
        }
    }
}

impl<T: Element, const BS: usize> IoJob for WriteJob<T, BS> {
    fn perform(&self, file: &File) {
        let buf = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, WriteState::Running) {
                WriteState::Queued(buf) => buf,
                other => {
                    // Cancelled before the queue reached it.
                    *state = other;
                    return;
                }
            }
        };

        let result = file.write_all_at(buf.bytes(), self.offset);

        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(()) => WriteState::Done(buf.into_block()),
            Err(err) => WriteState::Failed(err, buf.into_block()),
        };
        self.done.notify_all();
    }
}

/// Handle on an asynchronous block write.
///
/// `wait` returns the owned buffer (if the write was buffer-backed) once the
/// data is committed; the issuing buffer must not be reused before then.
pub struct WriteRequest<T: Element, const BS: usize> {
    job: Arc<WriteJob<T, BS>>,
}

impl<T: Element, const BS: usize> WriteRequest<T, BS> {
    pub(crate) fn new(job: Arc<WriteJob<T, BS>>) -> Self {
        WriteRequest { job }
    }

    /// Blocks until the write completed, returning the buffer for reuse.
    pub fn wait(self) -> Result<Option<Block<T, BS>>> {
        let mut state = self.job.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, WriteState::Running) {
                WriteState::Done(block) | WriteState::Cancelled(block) => return Ok(block),
                WriteState::Failed(err, _block) => return Err(SortError::Io(err)),
                queued @ WriteState::Queued(_) => {
                    *state = queued;
                    state = self.job.done.wait(state).unwrap();
                }
                WriteState::Running => {
                    state = self.job.done.wait(state).unwrap();
                }
            }
        }
    }

    /// Cancels the write if it has not started; waits for it otherwise.
    /// Either way, no I/O is in flight for this request afterwards.
    pub fn cancel(self) -> Result<Option<Block<T, BS>>> {
        {
            let mut state = self.job.state.lock().unwrap();
            match std::mem::replace(&mut *state, WriteState::Running) {
                WriteState::Queued(buf) => *state = WriteState::Cancelled(buf.into_block()),
                other => *state = other,
            }
        }
        self.wait()
    }
}

enum ReadState<T: Element, const BS: usize> {
    Queued(Block<T, BS>),
    Running,
    Done(Block<T, BS>),
    Cancelled(Block<T, BS>),
    Failed(io::Error, Block<T, BS>),
    Taken,
}

pub(crate) struct ReadJob<T: Element, const BS: usize> {
    offset: u64,
    state: Mutex<ReadState<T, BS>>,
    done: Condvar,
}

impl<T: Element, const BS: usize> ReadJob<T, BS> {
    pub(crate) fn new(offset: u64, buf: Block<T, BS>) -> Self {
        ReadJob {
            offset,
            state: Mutex::new(ReadState::Queued(buf)),
            done: Condvar::new(),
        }
    }
}

impl<T: Element, const BS: usize> IoJob for ReadJob<T, BS> {
    fn perform(&self, file: &File) {
        let mut buf = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, ReadState::Running) {
                ReadState::Queued(buf) => buf,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let result = file.read_exact_at(buf.bytes_mut(), self.offset);

        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(()) => ReadState::Done(buf),
            Err(err) => ReadState::Failed(err, buf),
        };
        self.done.notify_all();
    }
}

/// Handle on an asynchronous block read; `wait` yields the filled block.
pub struct ReadRequest<T: Element, const BS: usize> {
    job: Arc<ReadJob<T, BS>>,
}

impl<T: Element, const BS: usize> ReadRequest<T, BS> {
    pub(crate) fn new(job: Arc<ReadJob<T, BS>>) -> Self {
        ReadRequest { job }
    }

    /// Blocks until the read completed and returns the filled block.
    pub fn wait(self) -> Result<Block<T, BS>> {
        let mut state = self.job.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, ReadState::Taken) {
                ReadState::Done(block) | ReadState::Cancelled(block) => return Ok(block),
                ReadState::Failed(err, _block) => return Err(SortError::Io(err)),
                queued @ ReadState::Queued(_) => {
                    *state = queued;
                    state = self.job.done.wait(state).unwrap();
                }
                ReadState::Running | ReadState::Taken => {
                    *state = ReadState::Running;
                    state = self.job.done.wait(state).unwrap();
                }
            }
        }
    }

    /// Cancels the read if still queued; reclaims the buffer either way.
    /// The block contents are unspecified after a cancel.
    pub fn cancel(self) -> Result<Block<T, BS>> {
        {
            let mut state = self.job.state.lock().unwrap();
            match std::mem::replace(&mut *state, ReadState::Running) {
                ReadState::Queued(buf) => *state = ReadState::Cancelled(buf),
                other => *state = other,
            }
        }
        self.wait()
    }
}
