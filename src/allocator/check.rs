//! On-demand heap and free-list cross-validation.
//!
//! Corruption (a double free, a stray free, a codec bug) is not prevented at
//! the call site; it is detected here. [`check_heap`](SegMalloc::check_heap)
//! makes two independent passes over the same state and insists that they
//! agree, so a bug in one traversal path cannot vouch for itself.

use tracing::error;

use crate::arena::Grower;
use crate::block::{self, DSIZE, WSIZE};
use crate::freelist::{self, bin_index, BIN_COUNT, NIL};

use super::SegMalloc;

macro_rules! fatal {
    ($tag:expr, $($arg:tt)*) => {{
        let detail = format!($($arg)*);
        error!(tag = $tag, %detail, "heap consistency violation");
        panic!("check_heap({}): {}", $tag, detail);
    }};
}

impl<G: Grower> SegMalloc<G> {
    /// Validates every structural invariant of the heap, panicking with a
    /// diagnostic on the first violation. `tag` names the call site in the
    /// panic message.
    ///
    /// Two passes run independently: a physical walk from the prologue to
    /// the epilogue, and a walk of all seven bins. Each counts the free
    /// blocks it sees, and the counts must match.
    pub fn check_heap(&self, tag: &str) {
        let free_in_heap = self.check_heap_walk(tag);
        let free_in_bins = self.check_bins(tag);
        if free_in_heap != free_in_bins {
            fatal!(
                tag,
                "free counts disagree: {} in heap walk, {} in bins",
                free_in_heap,
                free_in_bins
            );
        }
    }

    /// Physical walk; returns the number of free blocks passed.
    fn check_heap_walk(&self, tag: &str) -> usize {
        let heap = self.arena.bytes();
        let len = heap.len();

        let prologue = block::header(heap, self.prologue);
        if prologue.size() != DSIZE || !prologue.is_alloc() {
            fatal!(tag, "bad prologue header at {}", self.prologue);
        }

        let mut free_count = 0;
        let mut bp = self.prologue;
        loop {
            let word = block::header(heap, bp);
            if word.size() == 0 {
                // Epilogue.
                if !word.is_alloc() {
                    fatal!(tag, "epilogue at {} not marked allocated", bp);
                }
                break;
            }
            if bp % DSIZE != 0 {
                fatal!(tag, "block at {} is not 8-aligned", bp);
            }
            if word.size() % DSIZE != 0 {
                fatal!(tag, "block at {} has unaligned size {}", bp, word.size());
            }
            if bp < WSIZE || bp + word.size() > len {
                fatal!(tag, "block at {} (size {}) outside arena bounds", bp, word.size());
            }

            let nbp = bp + word.size();
            let next = block::header(heap, nbp);
            if word.is_alloc() != next.prev_alloc() {
                fatal!(
                    tag,
                    "block at {}: allocation flag not mirrored into next block's header",
                    bp
                );
            }
            if !word.is_alloc() && !next.is_alloc() {
                fatal!(tag, "uncoalesced free blocks at {} and {}", bp, nbp);
            }
            if !word.is_alloc() {
                free_count += 1;
            }
            bp = nbp;
        }
        free_count
    }

    /// Free-list walk over all bins; returns the number of blocks linked.
    fn check_bins(&self, tag: &str) -> usize {
        let heap = self.arena.bytes();
        let mut free_count = 0;
        for bin in 0..BIN_COUNT {
            let Some(head) = self.bins.head(bin) else {
                continue;
            };
            self.check_cycle(tag, bin, head);
            let mut bp = head;
            loop {
                self.check_free_block(tag, bin, bp);
                free_count += 1;
                match freelist::succ(heap, bp) {
                    NIL => break,
                    s => bp = s,
                }
            }
        }
        free_count
    }

    /// Floyd's fast/slow traversal: if the two cursors ever coincide before
    /// the terminator, the list is circular.
    fn check_cycle(&self, tag: &str, bin: usize, head: usize) {
        let heap = self.arena.bytes();
        let mut slow = head;
        let mut fast = head;
        loop {
            slow = freelist::succ(heap, slow);
            fast = match freelist::succ(heap, fast) {
                NIL => return,
                s => s,
            };
            fast = match freelist::succ(heap, fast) {
                NIL => return,
                s => s,
            };
            if slow == NIL {
                return;
            }
            if slow == fast {
                fatal!(tag, "cycle in bin {} (met at {})", bin, slow);
            }
        }
    }

    fn check_free_block(&self, tag: &str, bin: usize, bp: usize) {
        let heap = self.arena.bytes();
        let len = heap.len();
        if bp % DSIZE != 0 {
            fatal!(tag, "free block at {} is not 8-aligned", bp);
        }
        let word = block::header(heap, bp);
        if bp < WSIZE || bp - WSIZE + word.size() > len {
            fatal!(tag, "free block at {} (size {}) outside arena bounds", bp, word.size());
        }
        if word.is_alloc() {
            fatal!(tag, "allocated block at {} linked in bin {}", bp, bin);
        }
        let foot = block::footer(heap, bp);
        if foot.size() != word.size() || foot.is_alloc() != word.is_alloc() {
            fatal!(
                tag,
                "free block at {}: header {}/{} disagrees with footer {}/{}",
                bp,
                word.size(),
                word.is_alloc(),
                foot.size(),
                foot.is_alloc()
            );
        }
        if bin_index(word.size()) != bin {
            fatal!(
                tag,
                "free block at {} (size {}) filed in bin {} instead of {}",
                bp,
                word.size(),
                bin,
                bin_index(word.size())
            );
        }

        let p = freelist::pred(heap, bp);
        let s = freelist::succ(heap, bp);
        if p == NIL {
            if self.bins.head(bin) != Some(bp) {
                fatal!(tag, "free block at {} has no predecessor but is not head of bin {}", bp, bin);
            }
        } else if freelist::succ(heap, p) != bp {
            fatal!(tag, "predecessor of free block at {} does not link back", bp);
        }
        if s != NIL && freelist::pred(heap, s) != bp {
            fatal!(tag, "successor of free block at {} does not link back", bp);
        }
    }
}
