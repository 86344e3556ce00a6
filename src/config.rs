//! Runtime options of an [`crate::Allocator`].

/// Allocator configuration.
///
/// The capacity of the free index is not here: it is the const parameter of
/// [`crate::Allocator`] because the index storage lives inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Emit `tracing` events for growth, splits, reuse and index overflow.
    ///
    /// Must stay off when the allocator is the `#[global_allocator]` and a
    /// subscriber is installed, since the subscriber allocates.
    pub diagnostics: bool,
}

impl Config {
    /// Diagnostics enabled.
    pub const fn new() -> Self {
        Self { diagnostics: true }
    }

    /// No diagnostics at all.
    pub const fn quiet() -> Self {
        Self { diagnostics: false }
    }

    pub const fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
