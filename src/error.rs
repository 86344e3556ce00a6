//! Error types for the allocator

use thiserror::Error;

/// Allocator result type
pub type Result<T> = std::result::Result<T, Error>;

/// Allocator errors
///
/// None of these abort an operation by themselves. The public allocation
/// surface turns them into a null result or a diagnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The free index has no room left, the block is no longer tracked
    #[error("free index overflow: all {capacity} slots in use")]
    IndexOverflow { capacity: usize },

    /// Tried to take a block out of an empty free index
    #[error("free index underflow: no free block tracked")]
    IndexUnderflow,

    /// The heap source refused to grow, or the request cannot be represented
    #[error("heap exhausted: cannot grow by {requested} bytes")]
    Exhausted { requested: usize },

    /// A parent node is larger than one of its children
    #[error("heap order violated: slot {parent} is larger than slot {child}")]
    HeapOrder { parent: usize, child: usize },

    /// An index node points at a block that is owned by a caller
    #[error("slot {slot} tracks a block that is not marked free")]
    NotFree { slot: usize },

    /// An index node disagrees with the header it points at
    #[error("slot {slot} records {recorded} bytes but the header holds {header}")]
    SizeMismatch {
        slot: usize,
        recorded: usize,
        header: usize,
    },
}
