//! Sequence frontier for the multiway-merge path: the runs' loaded blocks
//! as (block, position) pairs, merged in bounded batches so emission never
//! outruns the prefetcher.

use crate::comparator::SentinelCmp;
use crate::diskio::block::Block;
use crate::error::Result;
use crate::sort::prefetch::Prefetcher;
use crate::Element;

struct Sequence<T: Element, const BS: usize> {
    block: Block<T, BS>,
    pos: usize,
}

impl<T: Element, const BS: usize> Sequence<T, BS> {
    fn rest(&self) -> &[T] {
        &self.block[self.pos..]
    }
}

pub(crate) struct SequenceFrontier<T: Element, const BS: usize> {
    seqs: Vec<Sequence<T, BS>>,
}

impl<T: Element, const BS: usize> SequenceFrontier<T, BS> {
    /// Pulls the first `n` blocks of the consume sequence, one per slot.
    pub(crate) fn new(n: usize, pf: &mut Prefetcher<T, BS>) -> Result<Self> {
        let mut seqs = Vec::with_capacity(n);
        for _ in 0..n {
            seqs.push(Sequence {
                block: pf.pull_block()?,
                pos: 0,
            });
        }
        Ok(SequenceFrontier { seqs })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// How many loaded elements may be emitted before a block that is still
    /// on disk could be needed: the number of elements `<= bound` across
    /// all sequences, found by upper-bound searches.
    pub(crate) fn count_less_equal<C: SentinelCmp<T>>(&self, bound: &T, cmp: &C) -> u64 {
        self.seqs
            .iter()
            .map(|seq| seq.rest().partition_point(|e| !cmp.less(bound, e)) as u64)
            .sum()
    }

    /// Merges exactly `out.len()` elements from the sequences into `out`.
    /// The caller guarantees that many are safely mergeable.
    pub(crate) fn multiway_merge<C: SentinelCmp<T>>(&mut self, out: &mut [T], cmp: &C) {
        for slot in out.iter_mut() {
            let mut best: Option<usize> = None;
            for (i, seq) in self.seqs.iter().enumerate() {
                if seq.pos == Block::<T, BS>::CAPACITY {
                    continue;
                }
                match best {
                    None => best = Some(i),
                    Some(b) => {
                        if cmp.less(&seq.block[seq.pos], &self.seqs[b].block[self.seqs[b].pos]) {
                            best = Some(i);
                        }
                    }
                }
            }
            let b = best.expect("mergeable element available");
            *slot = self.seqs[b].block[self.seqs[b].pos];
            self.seqs[b].pos += 1;
        }
    }

    /// Swaps the next consume-order block into each drained slot, dropping
    /// slots once the prefetcher has nothing left.
    pub(crate) fn refill_or_remove(&mut self, pf: &mut Prefetcher<T, BS>) -> Result<()> {
        let mut i = 0;
        while i < self.seqs.len() {
            if self.seqs[i].pos < Block::<T, BS>::CAPACITY {
                i += 1;
                continue;
            }
            let drained = self.seqs.swap_remove(i);
            if let Some(block) = pf.block_consumed(drained.block)? {
                self.seqs.push(Sequence { block, pos: 0 });
            }
        }
        Ok(())
    }
}
