//! The [`Grower`] trait and the [`VecArena`] that implements it.
//!
//! The [`Grower`] trait is the allocator's only view of how heap memory is
//! actually committed. Anything that behaves like a contiguous, growable
//! byte region can back the allocator: a plain `Vec` as in [`VecArena`], a
//! capacity-capped buffer for testing exhaustion, or something more exotic
//! supplied by the caller.

use std::error::Error;
use std::fmt;

use tracing::debug;

use crate::block::DSIZE;
use crate::util::round_up;

/// Error returned when the arena cannot be extended any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaExhausted;

impl fmt::Display for ArenaExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("heap arena exhausted")
    }
}

impl Error for ArenaExhausted {}

/// A contiguous byte region that grows monotonically at the high end.
///
/// Implementations must uphold:
/// * `grow(0)` does not grow the region.
/// * a failed growth leaves the region untouched, length included;
/// * a successful growth adds at least `n` bytes, in a multiple of 8, and
///   preserves all earlier contents;
/// * `bytes()` always covers offset 0 up to the current high-water mark.
pub trait Grower {
    /// Extends the region by at least `n` bytes. Returns the length before
    /// the growth and the actual number of bytes added.
    fn grow(&mut self, n: usize) -> Result<(usize, usize), ArenaExhausted>;

    /// The whole region, low address (offset 0) first.
    fn bytes(&self) -> &[u8];

    /// Mutable view of the whole region.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current high-water mark.
    #[inline]
    fn len(&self) -> usize {
        self.bytes().len()
    }
}

/// A [`Grower`] backed by an owned `Vec<u8>`, optionally capacity-capped.
///
/// Each growth is rounded up to a multiple of 8 and is at least
/// `min_increment` bytes, so frequent small extensions get batched the way
/// an sbrk-style break would.
pub struct VecArena {
    buf: Vec<u8>,
    min_increment: usize,
    limit: Option<usize>,
}

impl VecArena {
    /// An arena that grows without bound, by at least `min_increment` bytes
    /// at a time.
    pub fn new(min_increment: usize) -> Self {
        VecArena { buf: Vec::new(), min_increment, limit: None }
    }

    /// An arena that refuses to grow past `limit` bytes in total.
    pub fn with_limit(min_increment: usize, limit: usize) -> Self {
        VecArena { buf: Vec::new(), min_increment, limit: Some(limit) }
    }
}

impl fmt::Debug for VecArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecArena")
            .field("len", &self.buf.len())
            .field("min_increment", &self.min_increment)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Grower for VecArena {
    fn grow(&mut self, n: usize) -> Result<(usize, usize), ArenaExhausted> {
        let old_len = self.buf.len();
        if n == 0 {
            return Ok((old_len, 0));
        }
        let growth = round_up(n.max(self.min_increment), DSIZE).ok_or(ArenaExhausted)?;
        let new_len = old_len.checked_add(growth).ok_or(ArenaExhausted)?;
        if let Some(limit) = self.limit {
            if new_len > limit {
                debug!(requested = n, growth, limit, "arena limit reached");
                return Err(ArenaExhausted);
            }
        }
        self.buf.resize(new_len, 0);
        debug!(old_len, growth, "arena grown");
        Ok((old_len, growth))
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl<T: Grower + ?Sized> Grower for &mut T {
    fn grow(&mut self, n: usize) -> Result<(usize, usize), ArenaExhausted> {
        (**self).grow(n)
    }

    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        (**self).bytes_mut()
    }
}
