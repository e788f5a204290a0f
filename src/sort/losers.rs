//! Tournament tree for the native merge path. Each leaf is a cursor over
//! one prefetched block stream; an exhausted cursor compares as +infinity,
//! so the inner loop needs no bounds checks.

use crate::comparator::SentinelCmp;
use crate::diskio::block::Block;
use crate::error::Result;
use crate::sort::prefetch::Prefetcher;
use crate::Element;

/// Forward cursor over the blocks a prefetcher hands out. A cursor does not
/// belong to one run: whenever its block drains it simply picks up the next
/// block in consume order, which by the trigger discipline never breaks the
/// cursor stream's ordering.
pub(crate) struct RunCursor<T: Element, const BS: usize> {
    block: Option<Block<T, BS>>,
    pos: usize,
}

impl<T: Element, const BS: usize> RunCursor<T, BS> {
    pub(crate) fn new(block: Block<T, BS>) -> Self {
        RunCursor {
            block: Some(block),
            pos: 0,
        }
    }

    pub(crate) fn empty(&self) -> bool {
        self.block.is_none()
    }

    pub(crate) fn current(&self) -> &T {
        &self.block.as_ref().expect("cursor not empty")[self.pos]
    }

    pub(crate) fn advance(&mut self, pf: &mut Prefetcher<T, BS>) -> Result<()> {
        self.pos += 1;
        if self.pos == Block::<T, BS>::CAPACITY {
            let block = self.block.take().expect("cursor not empty");
            self.block = pf.block_consumed(block)?;
            self.pos = 0;
        }
        Ok(())
    }
}

/// Loser tree of `n` run cursors. `nodes[0]` holds the current winner;
/// `nodes[1..k]` hold the loser of each internal match. Leaves are padded
/// to a power of two with permanently empty cursors.
pub(crate) struct LoserTree<T: Element, C: SentinelCmp<T>, const BS: usize> {
    cursors: Vec<RunCursor<T, BS>>,
    nodes: Vec<usize>,
    k: usize,
    cmp: C,
}

impl<T: Element, C: SentinelCmp<T>, const BS: usize> LoserTree<T, C, BS> {
    pub(crate) fn new(cursors: Vec<RunCursor<T, BS>>, cmp: C) -> Self {
        assert!(!cursors.is_empty());
        let k = cursors.len().next_power_of_two();
        let mut tree = LoserTree {
            cursors,
            nodes: vec![usize::MAX; k],
            k,
            cmp,
        };
        if k > 1 {
            let winner = tree.play(1);
            tree.nodes[0] = winner;
        } else {
            tree.nodes[0] = 0;
        }
        tree
    }

    /// Plays the subtournament below `node`, recording losers, returning
    /// the winner.
    fn play(&mut self, node: usize) -> usize {
        if node >= self.k {
            return node - self.k;
        }
        let a = self.play(2 * node);
        let b = self.play(2 * node + 1);
        if self.cursor_less(a, b) {
            self.nodes[node] = b;
            a
        } else {
            self.nodes[node] = a;
            b
        }
    }

    fn cursor_empty(&self, i: usize) -> bool {
        i >= self.cursors.len() || self.cursors[i].empty()
    }

    /// Sentinel emulation: an empty cursor never wins a match.
    fn cursor_less(&self, a: usize, b: usize) -> bool {
        if self.cursor_empty(b) {
            return true;
        }
        if self.cursor_empty(a) {
            return false;
        }
        self.cmp
            .less(self.cursors[a].current(), self.cursors[b].current())
    }

    /// Emits the next `out.len()` smallest elements in order.
    pub(crate) fn multi_merge(&mut self, out: &mut [T], pf: &mut Prefetcher<T, BS>) -> Result<()> {
        for slot in out {
            let winner = self.nodes[0];
            debug_assert!(!self.cursor_empty(winner));
            *slot = *self.cursors[winner].current();
            self.cursors[winner].advance(pf)?;

            // replay the path from the winner's leaf to the root
            let mut winner = winner;
            let mut node = (self.k + winner) / 2;
            while node > 0 {
                if self.cursor_less(self.nodes[node], winner) {
                    std::mem::swap(&mut self.nodes[node], &mut winner);
                }
                node /= 2;
            }
            self.nodes[0] = winner;
        }
        Ok(())
    }
}
