//! `core-analyzer`: the thin facade wiring an [`Analyzer`] context around
//! the [`search_core`] engine and exposing the command surface a debugger
//! host calls (§6).
//!
//! This crate owns no scanning logic; it owns process-lifetime state
//! (the selected heap adapter, the tunable search policy) that the engine
//! itself is deliberately kept free of.

mod analyzer;
mod error;

pub use analyzer::Analyzer;
pub use error::Error;

pub use search_core::heap::{HeapAdapter, HeapBlock, InuseBlock};
pub use search_core::segment::{Segment, SegmentKind, SegmentView};
pub use search_core::symbol::{RegisterValue, SymbolAdapter, VtableInfo};
pub use search_core::{Address, PtrWidth};
