//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

use std::mem;

/// Alignment of every block header and every payload handed to the user.
/// It is the computer's pointer size.
pub const ALIGNMENT: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` using `aligment`.
///
/// `aligment` must be a power of two. Payload sizes are aligned to [`ALIGNMENT`]
/// because memory direcctions have to be aligned.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}

/// Distance from `addr` to the next multiple of `aligment`.
pub(crate) fn padding_for(addr: usize, aligment: usize) -> usize {
    align(addr, aligment) - addr
}
