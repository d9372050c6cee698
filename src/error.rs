use std::fmt;

/// Errors surfaced by the `Analyzer` command surface.
///
/// Follows the root crate's original convention: a hand-written `Display`
/// enum with a `source()` that chains into the engine's own error type,
/// plus `From` impls for ergonomic `?`.
#[derive(Debug)]
pub enum Error {
    /// A `search-core` engine error (out-of-range indirection level, etc.).
    Engine(search_core::Error),
    /// `select_heap_adapter` named an allocator dialect that was never
    /// registered via `register_heap_adapter`.
    UnknownHeapAdapter(String),
    /// A command that needs a heap adapter was called before one was
    /// selected.
    NoActiveHeapAdapter,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::UnknownHeapAdapter(_) | Self::NoActiveHeapAdapter => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "engine error: {}", e),
            Self::UnknownHeapAdapter(name) => write!(f, "no heap adapter registered as '{name}'"),
            Self::NoActiveHeapAdapter => write!(f, "no heap adapter is selected"),
        }
    }
}

impl From<search_core::Error> for Error {
    fn from(e: search_core::Error) -> Self {
        Self::Engine(e)
    }
}
