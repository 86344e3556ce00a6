use std::{mem, ptr::NonNull};

use crate::utils::{ALIGNMENT, checked_align};

/// Header size of a block. It is always a multiple of [`ALIGNMENT`], so a
/// payload that starts right after an aligned header is aligned as well.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Smallest payload ever handed out. Zero sized requests are rounded up to
/// this so every pointer returned to the user is unique.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

/// This is the structure of a block. The fields of the block are it's metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header
/// |    is_free (1b)     |        |
/// +---------------------+ <------+ <-- pointer returned to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes of addressable content
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// Blocks never move and are never given back to the OS. A block is created
/// either by growing the heap or by splitting the tail off a free block.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Header {
    /// Usable payload size, already aligned.
    pub size: usize,
    /// True while the block is tracked by the free index.
    pub is_free: bool,
}

/// Payload size actually reserved for a request of `requested` bytes.
///
/// Returns `None` when the request is so large that the block (payload plus
/// header) cannot be described by a `usize`.
pub(crate) fn payload_size(requested: usize) -> Option<usize> {
    let size = checked_align(requested.max(MIN_PAYLOAD), ALIGNMENT)?;
    size.checked_add(HEADER_SIZE)?;
    Some(size)
}

/// Writes a fresh header at `addr` and returns it.
///
/// **SAFETY**: `addr` must be aligned and valid for `HEADER_SIZE + size` bytes.
pub(crate) unsafe fn write_header(addr: NonNull<u8>, size: usize, is_free: bool) -> NonNull<Header> {
    let header = addr.cast::<Header>();
    unsafe { header.as_ptr().write(Header { size, is_free }) };
    header
}

/// Pointer handed to the user for the block at `header`.
#[inline]
pub(crate) fn payload_of(header: NonNull<Header>) -> NonNull<u8> {
    unsafe { header.cast::<u8>().add(HEADER_SIZE) }
}

/// Header that precedes a `payload` previously returned by the allocator.
///
/// **SAFETY**: `payload` must come from [`payload_of`].
#[inline]
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> NonNull<Header> {
    unsafe { payload.sub(HEADER_SIZE).cast() }
}
