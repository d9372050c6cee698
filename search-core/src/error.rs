//! Engine-level errors (§7).
//!
//! Follows `ptrace_dumper.rs`'s convention: a `thiserror::Error` enum with
//! one variant per distinguishable failure and `#[error("...")]` messages,
//! rather than a hand-rolled `Display` impl.

use crate::address::Address;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("indirection level {0} is out of range [1, {1}]")]
    IndirectionLevelOutOfRange(u32, u32),
    #[error("shared-object indirection level {0} is out of range [1, {1}]")]
    SharedObjectLevelOutOfRange(u32, u32),
    #[error("address {0:#x} is not in the target's address space")]
    AddressNotMapped(Address),
    #[error("thread id {0} is out of range")]
    TidOutOfRange(i32),
}
