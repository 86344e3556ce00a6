use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    block::{self, HEADER_SIZE, Header},
    config::Config,
    error::{Error, Result},
    index::{DEFAULT_CAPACITY, FreeIndex},
    kernel::{HeapSource, SystemHeap},
    utils::ALIGNMENT,
};

/// Counters describing what the allocator has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Total bytes the heap boundary moved, headers and any padding the heap
    /// source needed for alignment included.
    pub heap_bytes: usize,
    /// Number of times the heap source was asked to grow.
    pub growths: usize,
    /// Blocks currently tracked by the free index.
    pub free_blocks: usize,
    /// Released blocks that did not fit in the free index and are lost for reuse.
    pub untracked_blocks: usize,
    /// Allocations served from a free block.
    pub reused: usize,
    /// Free blocks that were split to serve an allocation.
    pub splits: usize,
}

/// Memory allocator over a [`HeapSource`].
///
/// Every block handed out is preceded by a [`Header`] and free blocks are
/// tracked by a [`FreeIndex`] keyed by size:
///
/// ```text
///                 FreeIndex (min-heap on size)
///                  +----+----+----+
///                  | 16 | 48 | 24 |
///                  +-|--+-|--+-|--+
///            +-------+    |    +-------------------------+
///            |            +-----------+                  |
/// +----------|------------------------|------------------|-----------+
/// | +-----+--v---+-----+-----+-----+--v---+-----+-----+--v---+-----+ |
/// | | hdr | free | hdr | use | hdr | free | hdr | use | hdr | free | | ---> grows
/// | +-----+------+-----+-----+-----+------+-----+-----+-----+------+ |
/// +------------------------------------------------------------------+
///                              Heap source
/// ```
///
/// An allocation only looks at the smallest free block. If it is big enough
/// it is used (and split when the tail can hold a block of its own),
/// otherwise it goes back to the index and the heap grows instead. Blocks are
/// never merged and the heap never shrinks, so fragmentation is unbounded on
/// long runs.
///
/// All shared state sits behind one lock. Each of [`Allocator::allocate`] and
/// [`Allocator::release`] takes it exactly once and the payload is zeroed
/// after it has been dropped.
pub struct Allocator<S = SystemHeap, const N: usize = DEFAULT_CAPACITY> {
    state: Mutex<State<S, N>>,
    config: Config,
}

/// Everything the lock protects.
struct State<S, const N: usize> {
    index: FreeIndex<N>,
    source: S,
    stats: Stats,
}

// Index nodes point into memory owned by the heap source, and only the
// thread holding the lock ever touches them.
unsafe impl<S: Send, const N: usize> Send for State<S, N> {}

/// What happened while claiming a block, reported once the lock is gone.
#[derive(Debug, Clone, Copy)]
enum Claim {
    Reused {
        header: NonNull<Header>,
        size: usize,
        /// Size of the free block split off the tail, if any.
        remainder: Option<usize>,
    },
    Grown {
        header: NonNull<Header>,
        size: usize,
        /// Size of the free block that was too small and went back to the index.
        skipped: Option<usize>,
        underflow: bool,
    },
}

impl Claim {
    fn header(&self) -> NonNull<Header> {
        match *self {
            Claim::Reused { header, .. } | Claim::Grown { header, .. } => header,
        }
    }

    fn size(&self) -> usize {
        match *self {
            Claim::Reused { size, .. } | Claim::Grown { size, .. } => size,
        }
    }
}

impl Allocator<SystemHeap, DEFAULT_CAPACITY> {
    /// Allocator over the process heap with the default index capacity.
    pub const fn new(config: Config) -> Self {
        Self::with_source(SystemHeap::new(), config)
    }
}

impl<S: HeapSource, const N: usize> Allocator<S, N> {
    /// Allocator that takes its memory from `source`.
    pub const fn with_source(source: S, config: Config) -> Self {
        Self {
            state: Mutex::new(State {
                index: FreeIndex::new(),
                source,
                stats: Stats {
                    heap_bytes: 0,
                    growths: 0,
                    free_blocks: 0,
                    untracked_blocks: 0,
                    reused: 0,
                    splits: 0,
                },
            }),
            config,
        }
    }

    /// Returns a pointer to `size` zeroed bytes aligned to [`ALIGNMENT`], or
    /// `None` if the heap cannot grow.
    ///
    /// A zero sized request gets a unique pointer to a one word block.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let claim = block::payload_size(size)
            .ok_or(Error::Exhausted { requested: size })
            .and_then(|aligned| self.state.lock().claim(aligned));

        match claim {
            Ok(claim) => {
                self.report_claim(&claim);

                let payload = block::payload_of(claim.header());
                unsafe { ptr::write_bytes(payload.as_ptr(), 0, claim.size()) };

                Some(payload)
            }
            Err(error) => {
                if self.config.diagnostics {
                    warn!(size, %error, "allocation failed");
                }
                None
            }
        }
    }

    /// Gives a block back to the allocator. `None` is a no-op.
    ///
    /// If the free index is full the block is dropped from tracking: it stays
    /// a valid block but will never be reused.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not released since.
    pub unsafe fn release(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        let header = unsafe { block::header_of(ptr) };

        let result = self.state.lock().reclaim(header);

        if let Err(error) = result {
            if self.config.diagnostics {
                warn!(block = ?header, %error, "released block is no longer tracked");
            }
        }
    }

    /// Makes the block at `ptr` able to hold `size` bytes.
    ///
    /// `None` behaves like [`Allocator::allocate`]. If the block is already
    /// big enough the same pointer comes back. Otherwise the content moves to
    /// a new block and the old one is released; if that new block cannot be
    /// obtained `None` is returned and `ptr` stays valid and untouched.
    ///
    /// This is not atomic: the new block is claimed and the old one released
    /// under two separate lock acquisitions, and other threads may run in
    /// between. The old block is only released once the copy is done.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not released since.
    pub unsafe fn resize(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        // The caller owns this header, no need for the lock.
        let old_size = unsafe { block::header_of(ptr).as_ref().size };
        if old_size >= size {
            return Some(ptr);
        }

        let new = self.allocate(size)?;

        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size.min(size));
            self.release(Some(ptr));
        }

        if self.config.diagnostics {
            trace!(from = ?ptr, to = ?new, old_size, size, "moved block");
        }

        Some(new)
    }

    /// Number of bytes usable behind `ptr`. Never less than what was requested.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not released since.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { block::header_of(ptr).as_ref().size }
    }

    pub fn stats(&self) -> Stats {
        let state = self.state.lock();

        Stats {
            free_blocks: state.index.len(),
            ..state.stats
        }
    }

    /// Checks the free index: heap order, and every node pointing at a free
    /// header of the size it records.
    pub fn validate(&self) -> Result<()> {
        let state = self.state.lock();

        state.index.check_order()?;

        for (slot, node) in state.index.as_slice().iter().enumerate() {
            let header = unsafe { node.addr.cast::<Header>().as_ref() };

            if !header.is_free {
                return Err(Error::NotFree { slot });
            }
            if header.size != node.size {
                return Err(Error::SizeMismatch {
                    slot,
                    recorded: node.size,
                    header: header.size,
                });
            }
        }

        Ok(())
    }

    fn report_claim(&self, claim: &Claim) {
        if !self.config.diagnostics {
            return;
        }

        match *claim {
            Claim::Reused {
                header,
                size,
                remainder,
            } => {
                if let Some(remainder) = remainder {
                    debug!(block = ?header, size, remainder, "split free block");
                }
                trace!(block = ?header, size, "reused free block");
            }
            Claim::Grown {
                header,
                size,
                skipped,
                underflow,
            } => {
                if underflow {
                    trace!("free index empty");
                }
                if let Some(skipped) = skipped {
                    trace!(skipped, size, "smallest free block too small, reinserted");
                }
                debug!(block = ?header, bytes = size + HEADER_SIZE, "grew heap");
            }
        }
    }
}

impl<S: HeapSource, const N: usize> State<S, N> {
    /// Finds or creates an in-use block with a payload of exactly `size`
    /// bytes (already aligned).
    fn claim(&mut self, size: usize) -> Result<Claim> {
        let (skipped, underflow) = match self.index.extract_min() {
            Ok(node) if node.size >= size => {
                let mut header = node.addr.cast::<Header>();
                let remainder = unsafe { self.split(header, size) };

                unsafe { header.as_mut().is_free = false };
                self.stats.reused += 1;

                return Ok(Claim::Reused {
                    header,
                    size: unsafe { header.as_ref().size },
                    remainder,
                });
            }
            Ok(node) => {
                // Too small. It goes back where it was; the slot it left is
                // still empty so this cannot overflow.
                self.reclaim(node.addr.cast()).ok();
                (Some(node.size), false)
            }
            Err(_) => (None, true),
        };

        let header = self.grow(size)?;

        Ok(Claim::Grown {
            header,
            size,
            skipped,
            underflow,
        })
    }

    /// Cuts the tail of the free block at `header` into a new free block when
    /// what is left after `size` bytes can hold a header and a payload.
    ///
    /// ```text
    /// +-----+--------------------------------------+
    /// | hdr |                 free                 |    before
    /// +-----+--------------------------------------+
    /// +-----+------------+-----+-------------------+
    /// | hdr |    size    | hdr |     remainder     |    after
    /// +-----+------------+-----+-------------------+
    /// ```
    ///
    /// Returns the size of the new free block. Must follow an `extract_min`,
    /// which guarantees a free slot for the remainder.
    unsafe fn split(&mut self, mut header: NonNull<Header>, size: usize) -> Option<usize> {
        let total = unsafe { header.as_ref().size };
        if total <= size + HEADER_SIZE {
            return None;
        }

        let remainder = total - size - HEADER_SIZE;

        unsafe {
            let tail = block::write_header(block::payload_of(header).add(size), remainder, true);
            self.track(tail).ok()?;
            header.as_mut().size = size;
        }
        self.stats.splits += 1;

        Some(remainder)
    }

    /// Asks the heap source for a block with a payload of `size` bytes.
    /// Nothing changes if the source refuses.
    fn grow(&mut self, size: usize) -> Result<NonNull<Header>> {
        let bytes = size
            .checked_add(HEADER_SIZE)
            .ok_or(Error::Exhausted { requested: size })?;

        let extent = self
            .source
            .grow(bytes)
            .ok_or(Error::Exhausted { requested: bytes })?;

        self.stats.heap_bytes += extent.consumed;
        self.stats.growths += 1;

        Ok(unsafe { block::write_header(extent.start, size, false) })
    }

    /// Marks the block free and adds it to the index.
    fn track(&mut self, mut header: NonNull<Header>) -> Result<()> {
        let size = unsafe {
            header.as_mut().is_free = true;
            header.as_ref().size
        };

        self.index.insert(size, header.cast())
    }

    /// Same as [`State::track`] but counts blocks the index had no room for.
    fn reclaim(&mut self, header: NonNull<Header>) -> Result<()> {
        let result = self.track(header);
        if result.is_err() {
            self.stats.untracked_blocks += 1;
        }
        result
    }
}

/// The allocator can be used as the `#[global_allocator]`.
///
/// Layouts aligned above [`ALIGNMENT`] are refused (null), every payload is
/// only pointer aligned. Use [`Config::quiet`] for a global instance.
unsafe impl<S: HeapSource, const N: usize> GlobalAlloc for Allocator<S, N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.release(NonNull::new(ptr)) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // Blocks are always zeroed.
        unsafe { self.alloc(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        unsafe { self.resize(NonNull::new(ptr), new_size) }
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}
