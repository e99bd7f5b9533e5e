//! The segregated-fit allocator.
//!
//! # Heap layout
//! The arena starts with a padding word, then an 8-byte prologue block that
//! is permanently allocated, then the real blocks, and finally a zero-size
//! epilogue header that is also permanently allocated. The two sentinels
//! bound every traversal: the heap walk starts at the prologue and stops at
//! the first zero-size header, and coalescing can never run off either end
//! because both sentinels read as allocated neighbors.
//!
//! # Request adjustment
//! A request of `size` bytes is served from a block of
//! `max(16, round_up(size + 4, 8))` bytes: 4 bytes of header overhead, and a
//! 16-byte floor so that the block can later hold the two free-list links
//! and the footer once it is freed.

use std::fmt;

use static_assertions::const_assert;
use tracing::{debug, instrument, Level};

use crate::arena::{ArenaExhausted, Grower};
use crate::block::{self, HeaderWord, DSIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::freelist::{self, bin_index, SegList, BIN_COUNT, NIL};
use crate::util::round_up;

use self::util::adjusted_size;

mod check;
mod util;

#[cfg(test)]
mod tests;

/// Arena growth requested when the free lists cannot satisfy an allocation.
pub(crate) const CHUNK_SIZE: usize = 1 << 6;

/// Free-list links are 4-byte offsets, which caps how far the arena may
/// grow.
const MAX_HEAP: usize = u32::MAX as usize - (DSIZE - 1);

const_assert!(CHUNK_SIZE % DSIZE == 0);
const_assert!(CHUNK_SIZE >= MIN_BLOCK_SIZE);

/// A segregated free-list allocator over a growable byte arena.
///
/// Allocations are identified by their payload offset into the arena, with
/// offset 0 playing the role of the null pointer. The allocator owns all of
/// its state; dropping it tears the heap down.
pub struct SegMalloc<G: Grower> {
    arena: G,
    bins: SegList,
    /// Payload offset of the prologue sentinel, where heap walks start.
    prologue: usize,
}

impl<G: Grower> fmt::Debug for SegMalloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegMalloc")
            .field("heap_len", &self.arena.len())
            .field("bins", &self.bins)
            .finish()
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Initializes an allocator over `arena`, laying down the sentinels and
    /// one free block of at least [`CHUNK_SIZE`] bytes.
    ///
    /// `arena` is expected to be empty. Growth failure surfaces as
    /// [`ArenaExhausted`] with nothing allocated.
    pub fn init(mut arena: G) -> Result<Self, ArenaExhausted> {
        let (base, grown) = arena.grow(2 * DSIZE + CHUNK_SIZE)?;
        debug_assert_eq!(base % DSIZE, 0);
        debug_assert_eq!(grown % DSIZE, 0);

        let heap = arena.bytes_mut();
        // Padding word; keeps every payload offset 8-aligned and reserves
        // offset 0 as the null offset.
        block::store_u32(heap, base, 0);
        let prologue = base + DSIZE;
        block::set_header(heap, prologue, HeaderWord::new(DSIZE, false, true));
        block::set_footer(heap, prologue, HeaderWord::new(DSIZE, false, true));

        // One free block spans the rest of the initial growth; the epilogue
        // header takes the final word.
        let bp = prologue + DSIZE;
        let size = base + grown - bp;
        block::set_header(heap, bp, HeaderWord::new(size, true, false));
        block::set_footer(heap, bp, HeaderWord::new(size, false, false));
        block::set_header(heap, bp + size, HeaderWord::new(0, false, true));

        let mut bins = SegList::new();
        bins.insert(heap, bp);

        debug!(heap_len = base + grown, first_block = bp, size, "heap initialized");
        Ok(SegMalloc { arena, bins, prologue })
    }

    /// Allocates `size` bytes and returns the payload offset, or `None` if
    /// `size` is zero or the arena cannot grow to fit the request.
    ///
    /// The returned offset is always 8-aligned and at least `size` bytes of
    /// payload are usable behind it.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn malloc(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let asize = adjusted_size(size)?;
        debug!(asize, "request adjusted");

        if let Some(bp) = self.find_fit(asize) {
            self.place(bp, asize);
            return Some(bp);
        }

        debug!("no fit, growing the arena");
        let bp = self.extend_heap(asize.max(CHUNK_SIZE)).ok()?;
        self.place(bp, asize);
        Some(bp)
    }

    /// Frees the block at payload offset `bp`. Passing the null offset is a
    /// no-op.
    ///
    /// Like its C counterpart, this does not validate `bp`: freeing a stray
    /// offset or freeing twice corrupts the heap in a way that
    /// [`check_heap`](Self::check_heap) later reports.
    #[instrument(level = "info")]
    pub fn free(&mut self, bp: usize) {
        if bp == NIL {
            return;
        }
        let heap = self.arena.bytes_mut();
        let word = block::header(heap, bp);
        let size = word.size();
        // The prev-alloc bit rides along untouched.
        block::set_header(heap, bp, word.with_alloc(false));
        block::set_footer(heap, bp, HeaderWord::new(size, false, false));
        block::set_prev_alloc(heap, bp + size, false);
        self.coalesce(bp);
    }

    /// Resizes the allocation at `bp` to `size` bytes.
    ///
    /// `size == 0` frees the block and returns `None`; a null `bp` is plain
    /// [`malloc`](Self::malloc). Otherwise the data always moves: a new
    /// block is allocated, `min(old capacity, size)` bytes are copied and
    /// the old block is freed. Growing in place is intentionally not
    /// attempted. If the new allocation fails the original block is left
    /// untouched and `None` is returned.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn realloc(&mut self, bp: usize, size: usize) -> Option<usize> {
        if size == 0 {
            self.free(bp);
            return None;
        }
        if bp == NIL {
            return self.malloc(size);
        }

        let old_capacity = block::block_size(self.arena.bytes(), bp) - WSIZE;
        let new_bp = self.malloc(size)?;
        let copied = old_capacity.min(size);
        self.arena.bytes_mut().copy_within(bp..bp + copied, new_bp);
        debug!(new_bp, copied, "relocated");
        self.free(bp);
        Some(new_bp)
    }

    /// Allocates `count * size` bytes and zero-fills them.
    ///
    /// The multiplication wraps on overflow; this mirrors the original
    /// unchecked contract and is a documented limitation, not an oversight.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        let total = count.wrapping_mul(size);
        let bp = self.malloc(total)?;
        self.arena.bytes_mut()[bp..bp + total].fill(0);
        Some(bp)
    }

    /// Payload bytes of the allocated block at `bp`. The slice covers the
    /// full block capacity, which may exceed the requested size by the
    /// rounding slack.
    pub fn payload(&self, bp: usize) -> &[u8] {
        let heap = self.arena.bytes();
        let capacity = block::block_size(heap, bp) - WSIZE;
        &heap[bp..bp + capacity]
    }

    /// Mutable payload bytes of the allocated block at `bp`.
    pub fn payload_mut(&mut self, bp: usize) -> &mut [u8] {
        let heap = self.arena.bytes_mut();
        let capacity = block::block_size(heap, bp) - WSIZE;
        &mut heap[bp..bp + capacity]
    }

    /// Usable payload capacity of the block at `bp`.
    pub fn payload_capacity(&self, bp: usize) -> usize {
        block::block_size(self.arena.bytes(), bp) - WSIZE
    }

    /// Current high-water mark of the arena.
    pub fn heap_len(&self) -> usize {
        self.arena.len()
    }

    /// Number of free blocks, counted by walking the heap in address order.
    pub fn free_block_count(&self) -> usize {
        let heap = self.arena.bytes();
        let mut count = 0;
        let mut bp = block::next_bp(heap, self.prologue);
        while block::block_size(heap, bp) > 0 {
            if !block::header(heap, bp).is_alloc() {
                count += 1;
            }
            bp = block::next_bp(heap, bp);
        }
        count
    }

    /// Logs every block in address order and every bin chain at debug
    /// level.
    pub fn dump(&self) {
        let heap = self.arena.bytes();
        debug!(heap_len = heap.len(), "heap dump");
        let mut bp = self.prologue;
        loop {
            let word = block::header(heap, bp);
            debug!(
                bp,
                size = word.size(),
                alloc = word.is_alloc(),
                prev_alloc = word.prev_alloc(),
                "block"
            );
            if word.size() == 0 {
                break;
            }
            bp = block::next_bp(heap, bp);
        }
        for bin in 0..BIN_COUNT {
            let mut cur = self.bins.head(bin);
            while let Some(b) = cur {
                debug!(bin, bp = b, size = block::block_size(heap, b), "free block");
                cur = match freelist::succ(heap, b) {
                    NIL => None,
                    s => Some(s),
                };
            }
        }
    }

    /// First-fit search: scan the bin matching `asize`, then every larger
    /// bin, returning the first free block big enough.
    fn find_fit(&self, asize: usize) -> Option<usize> {
        let heap = self.arena.bytes();
        for bin in bin_index(asize)..BIN_COUNT {
            let mut cur = self.bins.head(bin);
            while let Some(bp) = cur {
                if block::block_size(heap, bp) >= asize {
                    debug!(bp, bin, "fit found");
                    return Some(bp);
                }
                cur = match freelist::succ(heap, bp) {
                    NIL => None,
                    s => Some(s),
                };
            }
        }
        None
    }

    /// Carves an `asize`-byte allocation out of the free block at `bp`,
    /// splitting off the remainder when it can stand as a block of its own.
    ///
    /// When the remainder classifies into the same bin as the original
    /// block, it inherits the original's list position instead of going
    /// through an unlink/insert pair.
    #[instrument(level = "debug")]
    fn place(&mut self, bp: usize, asize: usize) {
        let csize = block::block_size(self.arena.bytes(), bp);
        debug_assert!(csize >= asize);
        let rsize = csize - asize;

        if rsize >= MIN_BLOCK_SIZE {
            let old_bin = bin_index(csize);
            let same_bin = bin_index(rsize) == old_bin;
            if !same_bin {
                self.bins.remove(self.arena.bytes_mut(), bp);
            }

            let heap = self.arena.bytes_mut();
            let prev_alloc = block::header(heap, bp).prev_alloc();
            block::set_header(heap, bp, HeaderWord::new(asize, prev_alloc, true));

            let rem = bp + asize;
            block::set_header(heap, rem, HeaderWord::new(rsize, true, false));
            block::set_footer(heap, rem, HeaderWord::new(rsize, false, false));
            // The block past the remainder still follows a free block.
            block::set_prev_alloc(heap, rem + rsize, false);
            debug!(rem, rsize, same_bin, "split");

            if same_bin {
                self.bins.replace(self.arena.bytes_mut(), old_bin, bp, rem);
            } else {
                self.bins.insert(self.arena.bytes_mut(), rem);
            }
        } else {
            self.bins.remove(self.arena.bytes_mut(), bp);
            let heap = self.arena.bytes_mut();
            let word = block::header(heap, bp).with_alloc(true);
            block::set_header(heap, bp, word);
            block::set_prev_alloc(heap, bp + csize, true);
            debug!(csize, "consumed whole block");
        }
    }

    /// Merges the free block at `bp` with free physical neighbors and files
    /// the result in the bin matching its final size. Returns the merged
    /// block's offset, which moves to the left neighbor's when that side
    /// takes part.
    ///
    /// Expects `bp` to carry a free header and footer, with the next
    /// block's prev-alloc bit already cleared.
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    fn coalesce(&mut self, bp: usize) -> usize {
        let heap = self.arena.bytes();
        let word = block::header(heap, bp);
        let size = word.size();
        let prev_alloc = word.prev_alloc();
        let nbp = block::next_bp(heap, bp);
        let next_alloc = block::header(heap, nbp).is_alloc();

        match (prev_alloc, next_alloc) {
            (true, true) => {
                let heap = self.arena.bytes_mut();
                block::set_prev_alloc(heap, nbp, false);
                self.bins.insert(self.arena.bytes_mut(), bp);
                bp
            }
            (true, false) => {
                debug!(nbp, "merging with next");
                self.bins.remove(self.arena.bytes_mut(), nbp);
                let heap = self.arena.bytes_mut();
                let merged = size + block::block_size(heap, nbp);
                block::set_header(heap, bp, HeaderWord::new(merged, true, false));
                block::set_footer(heap, bp, HeaderWord::new(merged, false, false));
                block::set_prev_alloc(heap, bp + merged, false);
                self.bins.insert(self.arena.bytes_mut(), bp);
                bp
            }
            (false, true) => {
                let pbp = block::prev_bp(heap, bp);
                debug!(pbp, "merging with previous");
                self.bins.remove(self.arena.bytes_mut(), pbp);
                let heap = self.arena.bytes_mut();
                let merged = size + block::block_size(heap, pbp);
                let prev_word = block::header(heap, pbp);
                block::set_header(heap, pbp, HeaderWord::new(merged, prev_word.prev_alloc(), false));
                block::set_footer(heap, pbp, HeaderWord::new(merged, false, false));
                block::set_prev_alloc(heap, pbp + merged, false);
                self.bins.insert(self.arena.bytes_mut(), pbp);
                pbp
            }
            (false, false) => {
                let pbp = block::prev_bp(heap, bp);
                debug!(pbp, nbp, "merging both sides");
                self.bins.remove(self.arena.bytes_mut(), pbp);
                self.bins.remove(self.arena.bytes_mut(), nbp);
                let heap = self.arena.bytes_mut();
                let merged = size + block::block_size(heap, pbp) + block::block_size(heap, nbp);
                let prev_word = block::header(heap, pbp);
                block::set_header(heap, pbp, HeaderWord::new(merged, prev_word.prev_alloc(), false));
                block::set_footer(heap, pbp, HeaderWord::new(merged, false, false));
                block::set_prev_alloc(heap, pbp + merged, false);
                self.bins.insert(self.arena.bytes_mut(), pbp);
                pbp
            }
        }
    }

    /// Grows the arena by at least `n` bytes and turns the growth into one
    /// free block, reusing the old epilogue header as the new block's
    /// header. Returns the block after coalescing with a trailing free
    /// block, ready for [`place`](Self::place).
    ///
    /// Failure leaves every existing block untouched.
    #[instrument(level = "debug", err(Debug, level = Level::DEBUG))]
    fn extend_heap(&mut self, n: usize) -> Result<usize, ArenaExhausted> {
        let need = round_up(n, DSIZE).ok_or(ArenaExhausted)?;
        let old_len = self.arena.len();
        if old_len.checked_add(need).map_or(true, |end| end > MAX_HEAP) {
            return Err(ArenaExhausted);
        }

        let (old_len, grown) = self.arena.grow(need)?;
        debug_assert_eq!(grown % DSIZE, 0);
        if old_len + grown > MAX_HEAP {
            // Over-grown past the offset range; the surplus region is left
            // unmapped rather than risking links that cannot be encoded.
            return Err(ArenaExhausted);
        }

        let heap = self.arena.bytes_mut();
        let bp = old_len;
        // The old epilogue header becomes the new block's header and its
        // prev-alloc bit carries over.
        let prev_alloc = block::header(heap, bp).prev_alloc();
        block::set_header(heap, bp, HeaderWord::new(grown, prev_alloc, false));
        block::set_footer(heap, bp, HeaderWord::new(grown, false, false));
        block::set_header(heap, bp + grown, HeaderWord::new(0, false, true));
        debug!(bp, grown, "heap extended");

        Ok(self.coalesce(bp))
    }
}
