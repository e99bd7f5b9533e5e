//! Request-size adjustment.

use crate::block::{DSIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::util::round_up;

/// Maps a requested payload size to the total block size that serves it, or
/// `None` on arithmetic overflow.
///
/// Requests up to one alignment unit get the minimum block; larger requests
/// pay one header word of overhead, rounded up to the alignment unit. The
/// floor guarantees room for the two free-list links and the footer once
/// the block is freed.
#[inline]
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
    if size <= DSIZE {
        return Some(MIN_BLOCK_SIZE);
    }
    round_up(size.checked_add(WSIZE)?, DSIZE)
}
