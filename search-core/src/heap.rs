//! The Heap Adapter capability (§6), external collaborator #1.
//!
//! Grounded on `heap.h`'s `CoreAnalyzerHeapInterface`, a struct of function
//! pointers registered by name so several allocator dialects (ptmalloc,
//! tcmalloc, jemalloc, ...) can plug into the same engine without the engine
//! knowing which one is active. We model that as a trait object instead of
//! a vtable-of-fn-pointers, the idiomatic Rust equivalent.

use crate::address::Address;

/// One block of heap memory, in use or free.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapBlock {
    pub addr: Address,
    pub size: u64,
    pub inuse: bool,
}

/// An in-use-only block, as returned by [`HeapAdapter::walk_inuse_blocks`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InuseBlock {
    pub addr: Address,
    pub size: u64,
}

/// A pluggable heap allocator dialect.
///
/// Exactly one adapter is active per analyzer command (`CA_HEAP` in the
/// reference implementation); different dialects never mix in one
/// inspected process.
pub trait HeapAdapter {
    /// Human-readable allocator name/version, e.g. `"glibc ptmalloc 2.31"`.
    fn heap_version(&self) -> &str;

    /// Primes the adapter's internal view of the heap for this target.
    fn init_heap(&mut self) -> bool;

    /// Walks and validates the allocator's internal structures starting at
    /// `addr` (or the whole heap when `addr` is `0`), optionally logging
    /// each block as it goes. Returns `false` if the walk found corruption.
    fn heap_walk(&self, addr: Address, verbose: bool) -> bool;

    /// `addr` lies inside *some* heap segment; does the allocator recognize
    /// it as the start of a tracked block (free or in-use)?
    fn is_heap_block(&self, addr: Address) -> bool;

    /// Full block info (inclusive of free blocks) for a recognized block.
    fn get_heap_block_info(&self, addr: Address) -> Option<HeapBlock>;

    /// The next tracked block at or after `addr`, if any.
    fn get_next_heap_block(&self, addr: Address) -> Option<HeapBlock>;

    /// Up to `n` largest in-use blocks, descending by size.
    fn get_biggest_blocks(&self, n: usize) -> Vec<HeapBlock>;

    /// All in-use blocks known to the allocator.
    fn walk_inuse_blocks(&self) -> Vec<InuseBlock>;
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    //! A trivial in-memory [`HeapAdapter`] used by search-core's own test
    //! suite (and made available to downstream crates under the `testing`
    //! feature) — analogous to `synth-elf` supplying ELF fixtures instead of
    //! a real allocator for `breakpad-handler`'s tests.
    use super::*;

    #[derive(Default)]
    pub struct MockHeapAdapter {
        blocks: Vec<HeapBlock>,
    }

    impl MockHeapAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_block(mut self, addr: Address, size: u64, inuse: bool) -> Self {
            self.blocks.push(HeapBlock { addr, size, inuse });
            self
        }
    }

    impl HeapAdapter for MockHeapAdapter {
        fn heap_version(&self) -> &str {
            "mock-heap/1.0"
        }

        fn init_heap(&mut self) -> bool {
            true
        }

        fn heap_walk(&self, addr: Address, _verbose: bool) -> bool {
            addr == 0 || self.blocks.iter().any(|b| b.addr == addr)
        }

        fn is_heap_block(&self, addr: Address) -> bool {
            self.blocks.iter().any(|b| b.addr == addr)
        }

        /// Resolves the block *containing* `addr`, not just one starting
        /// exactly at it — a real allocator is asked to classify any
        /// in-segment address, not only block heads.
        fn get_heap_block_info(&self, addr: Address) -> Option<HeapBlock> {
            self.blocks
                .iter()
                .copied()
                .find(|b| addr >= b.addr && addr < b.addr + b.size)
        }

        fn get_next_heap_block(&self, addr: Address) -> Option<HeapBlock> {
            self.blocks
                .iter()
                .copied()
                .filter(|b| b.addr >= addr)
                .min_by_key(|b| b.addr)
        }

        fn get_biggest_blocks(&self, n: usize) -> Vec<HeapBlock> {
            let mut inuse: Vec<_> = self.blocks.iter().copied().filter(|b| b.inuse).collect();
            inuse.sort_by(|a, b| b.size.cmp(&a.size));
            inuse.truncate(n);
            inuse
        }

        fn walk_inuse_blocks(&self) -> Vec<InuseBlock> {
            self.blocks
                .iter()
                .filter(|b| b.inuse)
                .map(|b| InuseBlock {
                    addr: b.addr,
                    size: b.size,
                })
                .collect()
        }
    }
}
