//! A small heap allocator.
//!
//! Every block handed out is preceded by a header with its metadata:
//!
//! ```text
//! +-------------------------------+
//! | Header   | Actual memory block |
//! +-------------------------------+
//!            ^
//!            returned pointer
//! ```
//!
//! Free blocks are kept in a size ordered min-heap ([`FreeIndex`]). When the
//! smallest free block cannot serve a request, the heap grows through a
//! [`HeapSource`] (the program break by default). Memory is never given back
//! to the OS and free blocks are never merged.
//!
//! ```no_run
//! use heapalloc::{Allocator, Config};
//!
//! let allocator = Allocator::new(Config::default());
//!
//! let ptr = allocator.allocate(16).unwrap();
//! let ptr = unsafe { allocator.resize(Some(ptr), 64) };
//! unsafe { allocator.release(ptr) };
//! ```

mod allocator;
mod block;
mod config;
mod error;
mod index;
mod kernel;
mod utils;

pub use allocator::{Allocator, Stats};
pub use block::{HEADER_SIZE, MIN_PAYLOAD};
pub use config::Config;
pub use error::{Error, Result};
pub use index::{DEFAULT_CAPACITY, FreeIndex, HeapNode};
pub use kernel::{Arena, CHUNK_SIZE, Extent, HeapSource, SystemHeap};
pub use utils::{ALIGNMENT, align, checked_align};
