//! A segregated free-list memory allocator written in safe Rust.
//!
//! The allocator serves malloc/free/realloc/calloc-style requests out of a
//! contiguous byte arena that only ever grows. Instead of handing out raw
//! pointers it hands out byte offsets into the arena, with offset 0 playing
//! the role of the null pointer; all block metadata lives inside the arena
//! itself and is read and written through a bounds-checked word codec.
//!
//! # Usage
//! ```
//! use seg_malloc::arena::VecArena;
//! use seg_malloc::SegMalloc;
//!
//! let mut alloc = SegMalloc::init(VecArena::new(4096)).unwrap();
//! let p = alloc.malloc(100).unwrap();
//! alloc.payload_mut(p)[..100].fill(0xAB);
//! alloc.check_heap("usage");
//! alloc.free(p);
//! ```
//!
//! # Mode of operation
//! Freed blocks are filed into one of seven size-class bins, each a doubly
//! linked list threaded through the free blocks themselves:
//! - An allocation first searches the bin matching its adjusted size, then
//!   every larger bin, taking the first block big enough (first fit). A
//!   block with enough slack is split and the remainder stays free.
//! - If no bin has a fit, the arena grows by at least a fixed chunk and the
//!   new region becomes one free block.
//! - A freed block is merged with free physical neighbors on both sides
//!   before being filed back into a bin, so no two adjacent blocks are ever
//!   both free.
//!
//! ## Blocks
//! Each block starts with a 4-byte header packing the block size with two
//! flag bits: whether this block is allocated and whether the physically
//! preceding block is. Because the preceding block's status travels in the
//! header, allocated blocks need no footer; only free blocks carry one,
//! which is enough for the backward step during coalescing.
//!
//! ## Free-list links
//! A free block stores two 4-byte offsets in place of its payload: the
//! predecessor and successor in its bin, measured from the heap base. Zero
//! terminates a list. Offsets halve the link overhead of full pointers and
//! stay valid no matter where the arena's backing buffer moves.
//!
//! ## Arenas
//! The arena behind the allocator is anything implementing
//! [`Grower`](arena::Grower): a contiguous byte region that can grow at the
//! high end. [`VecArena`](arena::VecArena) is the stock implementation; a
//! capacity-capped one doubles as an exhaustion harness in the tests.
//!
//! # Diagnostics
//! [`SegMalloc::check_heap`] walks the physical heap and all seven bins
//! independently and panics on the first inconsistency it can prove, which
//! is how double frees and stray frees eventually surface. The crate logs
//! through [`tracing`]; enable a subscriber to watch placements, splits and
//! merges as they happen.

pub use crate::allocator::SegMalloc;

pub mod allocator;
pub mod arena;
mod block;
mod freelist;
mod util;
