//! The Symbol Adapter capability (§6), external collaborator #2.
//!
//! Grounded on `thread_info.rs`'s `ThreadInfo` (ptrace-based register
//! access) generalized into a capability trait: the engine never calls
//! `ptrace` itself, it asks whatever symbol/segment provider the host
//! plugged in.

use crate::address::Address;
use crate::reference::ObjectReference;
use crate::segment::Segment;

/// One general-purpose register's value, as read from a thread's context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterValue {
    pub reg_num: u32,
    /// Width in bytes; only registers matching the target's pointer width
    /// are ever treated as candidate pointers (§4.3, §4.7).
    pub width: u8,
    pub value: Address,
}

/// Resolves symbols, stack frames, and register files for a stack segment.
pub trait SymbolAdapter {
    /// All register values for the thread owning `segment` (a stack
    /// segment). Order and `reg_num` assignment are adapter-defined but
    /// stable within one command.
    fn read_registers(&self, segment: &Segment) -> Vec<RegisterValue>;

    /// Thread id owning `segment`.
    fn get_thread_id(&self, segment: &Segment) -> i32;

    /// Current stack pointer for the thread owning `segment`.
    fn get_rsp(&self, segment: &Segment) -> Address;

    /// Resolves `vaddr` (inside `segment`, a stack) to a frame number and
    /// offset-within-frame. Returns `(-1, 0)` if no frame could be resolved.
    fn get_frame_number(&self, segment: &Segment, vaddr: Address) -> (i32, u64);

    /// If `ref.vaddr` falls within a known global symbol, its extent.
    fn known_global_sym(&self, reference: &ObjectReference) -> Option<(Address, u64)>;

    /// If `ref.vaddr` falls within a known stack local, its extent.
    fn known_stack_sym(&self, reference: &ObjectReference) -> Option<(Address, u64)>;

    /// True if an in-use heap block is recognized by the symbol layer as
    /// having a type (typically: a known vtable at offset 0).
    fn known_heap_block(&self, reference: &ObjectReference) -> bool;

    /// True if a `ModuleText` reference is a "trivial" cross-reference
    /// (e.g. a PLT stub) rather than a meaningful global-function pointer.
    fn global_text_ref(&self, reference: &ObjectReference) -> bool;

    /// True if the in-use heap block referenced has a recognizable vtable
    /// as its first word.
    fn is_heap_object_with_vptr(&self, reference: &ObjectReference) -> bool;

    /// Resolves a debugger expression naming a C++ type to its vtable
    /// address ranges and declared size.
    fn get_vtable_from_exp(&self, expr: &str) -> Option<VtableInfo>;
}

/// Result of resolving a type expression to its vtable(s).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VtableInfo {
    pub type_name: String,
    pub type_size: u64,
    pub vtable_ranges: Vec<(Address, Address)>,
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    //! A scriptable [`SymbolAdapter`] for tests: every answer is looked up
    //! from tables the test populates, mirroring how `rstest` fixtures in
    //! `breakpad-handler`'s own suite built small canned inputs rather than
    //! driving a real `ptrace` target.
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockSymbolAdapter {
        pub registers: HashMap<i32, Vec<RegisterValue>>,
        pub rsp: HashMap<i32, Address>,
        /// Maps a stack vaddr to (frame, offset); absent = unresolved (-1).
        pub frames: HashMap<Address, (i32, u64)>,
        /// Maps a global vaddr to the (base, size) of its owning symbol.
        pub globals: HashMap<Address, (Address, u64)>,
        /// Maps a stack-local vaddr to the (base, size) of its owning symbol.
        pub stack_syms: HashMap<Address, (Address, u64)>,
        pub known_heap_blocks: std::collections::HashSet<Address>,
        pub trivial_text_refs: std::collections::HashSet<Address>,
        pub vptr_heap_blocks: std::collections::HashSet<Address>,
        pub vtables: HashMap<String, VtableInfo>,
    }

    impl MockSymbolAdapter {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl SymbolAdapter for MockSymbolAdapter {
        fn read_registers(&self, segment: &Segment) -> Vec<RegisterValue> {
            let tid = segment.thread.map(|t| t.0).unwrap_or(-1);
            self.registers.get(&tid).cloned().unwrap_or_default()
        }

        fn get_thread_id(&self, segment: &Segment) -> i32 {
            segment.thread.map(|t| t.0).unwrap_or(-1)
        }

        fn get_rsp(&self, segment: &Segment) -> Address {
            let tid = segment.thread.map(|t| t.0).unwrap_or(-1);
            self.rsp.get(&tid).copied().unwrap_or(segment.vaddr)
        }

        fn get_frame_number(&self, _segment: &Segment, vaddr: Address) -> (i32, u64) {
            self.frames.get(&vaddr).copied().unwrap_or((-1, 0))
        }

        fn known_global_sym(&self, reference: &ObjectReference) -> Option<(Address, u64)> {
            self.globals.get(&reference.vaddr).copied()
        }

        fn known_stack_sym(&self, reference: &ObjectReference) -> Option<(Address, u64)> {
            self.stack_syms.get(&reference.vaddr).copied()
        }

        fn known_heap_block(&self, reference: &ObjectReference) -> bool {
            reference
                .heap_addr()
                .map(|a| self.known_heap_blocks.contains(&a))
                .unwrap_or(false)
        }

        fn global_text_ref(&self, reference: &ObjectReference) -> bool {
            self.trivial_text_refs.contains(&reference.vaddr)
        }

        fn is_heap_object_with_vptr(&self, reference: &ObjectReference) -> bool {
            reference
                .heap_addr()
                .map(|a| self.vptr_heap_blocks.contains(&a))
                .unwrap_or(false)
        }

        fn get_vtable_from_exp(&self, expr: &str) -> Option<VtableInfo> {
            self.vtables.get(expr).cloned()
        }
    }
}
