use std::{alloc::Layout, ptr::NonNull};

use crate::{
    error::{Error, Result},
    utils::{ALIGNMENT, align},
};

/// Memory handed out by one [`HeapSource::grow`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// First usable byte, aligned to [`ALIGNMENT`].
    pub start: NonNull<u8>,
    /// How far the boundary moved to provide it: the requested length plus
    /// any alignment padding or bytes lost to a concurrent boundary move.
    pub consumed: usize,
}

/// This trait provides an abstraction over the place raw memory comes from.
/// The allocator, our top level view of this, has nothing to do with the
/// concrete implementations / APIs offered by each kernel.
///
/// The boundary only ever moves up: memory obtained from [`HeapSource::grow`]
/// is never given back.
///
/// # Safety
///
/// `Extent::start` must be aligned to [`ALIGNMENT`], valid for reads and
/// writes of `len` bytes, and must not overlap any memory returned before.
/// `Extent::consumed` is never less than `len`.
pub unsafe trait HeapSource {
    /// Moves the heap boundary up by at least `len` bytes. It returns the new
    /// bytes or `None` if the memory could not be obtained.
    fn grow(&mut self, len: usize) -> Option<Extent>;
}

/// Heap provided by the operating system.
///
/// On unix this is the program break, moved with `sbrk`. On windows memory is
/// reserved with `VirtualAlloc` in chunks of [`CHUNK_SIZE`] bytes and handed
/// out front to back; the tail of a chunk too small for a request is
/// abandoned.
#[derive(Debug)]
pub struct SystemHeap {
    #[cfg(windows)]
    chunk: platform::Chunk,
    _private: (),
}

/// Granularity of windows reservations.
pub const CHUNK_SIZE: usize = 1 << 20;

impl SystemHeap {
    pub const fn new() -> Self {
        Self {
            #[cfg(windows)]
            chunk: platform::Chunk::EMPTY,
            _private: (),
        }
    }
}

impl Default for SystemHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl HeapSource for SystemHeap {
    #[cfg(unix)]
    fn grow(&mut self, len: usize) -> Option<Extent> {
        platform::grow_break(len, |increment| unsafe { libc::sbrk(increment) })
    }

    #[cfg(windows)]
    fn grow(&mut self, len: usize) -> Option<Extent> {
        unsafe { self.chunk.grow(len) }
    }
}

#[cfg(unix)]
mod platform {
    use std::ptr::NonNull;

    use libc::{c_void, intptr_t};

    use super::Extent;
    use crate::utils::{ALIGNMENT, align, padding_for};

    /// Value `sbrk` returns on failure, `(void *) -1`.
    const SBRK_FAILED: *mut c_void = usize::MAX as *mut c_void;

    /// Attempts before giving up on a break that keeps moving under us.
    const ATTEMPTS: usize = 2;

    /// Grows the break through `sbrk` by `len` aligned bytes.
    ///
    /// Probing the break and moving it are two calls, so another user of the
    /// break may slip in between and leave the new bytes misaligned. Those
    /// bytes cannot be given back safely; they are counted as consumed and
    /// the growth is retried from the new break.
    pub(super) fn grow_break(
        len: usize,
        mut sbrk: impl FnMut(intptr_t) -> *mut c_void,
    ) -> Option<Extent> {
        let mut lost = 0usize;

        for _ in 0..ATTEMPTS {
            let current = sbrk(0);
            if current == SBRK_FAILED {
                return None;
            }

            // The break is not guaranteed to be aligned the first time we see it.
            let pad = padding_for(current as usize, ALIGNMENT);
            let total = len.checked_add(pad)?;

            let addr = sbrk(intptr_t::try_from(total).ok()?);
            if addr == SBRK_FAILED {
                return None;
            }

            let start = align(addr as usize, ALIGNMENT);
            if start + len <= addr as usize + total {
                return Some(Extent {
                    start: NonNull::new(start as *mut u8)?,
                    consumed: lost + total,
                });
            }

            lost += total;
        }

        None
    }

}

#[cfg(windows)]
mod platform {
    use std::ptr::NonNull;

    use windows::Win32::System::Memory;

    use super::{CHUNK_SIZE, Extent};
    use crate::utils::{ALIGNMENT, align, checked_align};

    /// Reserved memory not handed out yet: `next..end`.
    #[derive(Debug)]
    pub(super) struct Chunk {
        next: usize,
        end: usize,
    }

    impl Chunk {
        pub(super) const EMPTY: Self = Self { next: 0, end: 0 };

        pub(super) unsafe fn grow(&mut self, len: usize) -> Option<Extent> {
            let mut start = align(self.next, ALIGNMENT);

            if start.checked_add(len).is_none_or(|end| end > self.end) {
                let size = checked_align(len.max(CHUNK_SIZE), CHUNK_SIZE)?;
                let base = unsafe { reserve(size)? };

                self.next = base.as_ptr() as usize;
                self.end = self.next + size;
                start = self.next;
            }

            let end = start + len;
            let consumed = end - self.next;
            self.next = end;

            Some(Extent {
                start: NonNull::new(start as *mut u8)?,
                consumed,
            })
        }
    }

    unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;
        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }
}

/// A bounded heap boundary over one contiguous buffer.
///
/// Useful to embed the allocator somewhere without touching the process heap,
/// and to observe exactly how much the allocator grows.
///
/// ```text
///  base                      base + used            base + capacity
///   +-------------------------+------------------------+
///   |   handed out by grow    |       untouched        |
///   +-------------------------+------------------------+
/// ```
pub struct Arena {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
    /// Whether `base` was allocated by [`Arena::new`] and must be freed on drop.
    owned: bool,
}

// The arena is the only one handing out its buffer.
unsafe impl Send for Arena {}

impl Arena {
    /// Creates an arena of `capacity` bytes backed by the global allocator.
    ///
    /// Every pointer handed out by allocators running on top of the arena
    /// dangles once the arena is dropped.
    pub fn new(capacity: usize) -> Result<Self> {
        let layout = Layout::from_size_align(capacity.max(1), ALIGNMENT)
            .map_err(|_| Error::Exhausted { requested: capacity })?;

        let base = NonNull::new(unsafe { std::alloc::alloc(layout) })
            .ok_or(Error::Exhausted { requested: capacity })?;

        Ok(Self {
            base,
            capacity,
            used: 0,
            owned: true,
        })
    }

    /// Creates an arena over memory the caller already owns.
    ///
    /// **SAFETY**: `base` must be aligned to [`ALIGNMENT`], valid for
    /// `capacity` bytes and not used by anything else while the arena or any
    /// block carved from it is alive.
    pub unsafe fn from_raw(base: NonNull<u8>, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            used: 0,
            owned: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Whether `ptr` falls inside the arena.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr as usize;

        addr >= start && addr < start + self.capacity
    }
}

unsafe impl HeapSource for Arena {
    fn grow(&mut self, len: usize) -> Option<Extent> {
        let start = align(self.used, ALIGNMENT);
        let end = start.checked_add(len)?;
        if end > self.capacity {
            return None;
        }

        let consumed = end - self.used;
        self.used = end;

        Some(Extent {
            start: unsafe { self.base.add(start) },
            consumed,
        })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }

        if let Ok(layout) = Layout::from_size_align(self.capacity.max(1), ALIGNMENT) {
            unsafe { std::alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}
