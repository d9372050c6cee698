//! The `Analyzer` context (Design Notes §9, "Global mutable state excised").
//!
//! The reference implementation keeps `g_skip_free`, `g_skip_unknown`,
//! `g_max_indirection_level`, `g_shrobj_level`, and a registered-by-name heap
//! adapter table as module-level globals. This collects all of it into one
//! owned value passed to every command, the same way `BreakpadHandler`
//! (`breakpad-handler/src/linux/handler.rs`) bundles its installed state into
//! one struct instead of a process-wide static.

use crate::error::Error;
use search_core::address::{Address, PtrWidth};
use search_core::heap::HeapAdapter;
use search_core::pattern::{self, PatternValue};
use search_core::reference::StorageMask;
use search_core::segment::SegmentView;
use search_core::shared_object;
use search_core::symbol::SymbolAdapter;
use search_core::{classifier, cplusplus, horizontal, print, vertical, SearchConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the frozen address-space view, the active capability adapters, and
/// the tunable search policy for one inspected process. Every command method
/// here is the Rust equivalent of a `search.cpp` entry point; none of them
/// touch global state, and all per-command scratch (the shared-object table
/// built by `find_shared_objects_by_threads`) is a local, dropped on return.
pub struct Analyzer {
    view: SegmentView,
    symbols: Box<dyn SymbolAdapter>,
    heap_adapters: HashMap<String, Box<dyn HeapAdapter>>,
    current_heap: Option<String>,
    config: SearchConfig,
    cancel_requested: Arc<AtomicBool>,
}

impl Analyzer {
    pub fn new(view: SegmentView, symbols: Box<dyn SymbolAdapter>) -> Self {
        Self {
            view,
            symbols,
            heap_adapters: HashMap::new(),
            current_heap: None,
            config: SearchConfig::default(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests a cooperative abort (§5 "User abort") of whatever command is
    /// currently running — e.g. called from a Ctrl-C handler on another
    /// thread. The running command stops at its next poll point and returns
    /// its partial results; it does not error.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Relaxed);
    }

    /// Clears a prior cancel request; call before starting the next command.
    pub fn reset_cancel(&self) {
        self.cancel_requested.store(false, Ordering::Relaxed);
    }

    fn cancel_poll(&self) -> impl Fn() -> bool + '_ {
        move || self.cancel_requested.load(Ordering::Relaxed)
    }

    pub fn ptr_width(&self) -> PtrWidth {
        self.view.ptr_width
    }

    /// Registers an allocator dialect under `name` (§6's adapter registry,
    /// `CA_HEAP`). Does not select it; call [`Self::select_heap_adapter`].
    pub fn register_heap_adapter(&mut self, name: impl Into<String>, adapter: Box<dyn HeapAdapter>) {
        let name = name.into();
        let select = self.current_heap.is_none();
        self.heap_adapters.insert(name.clone(), adapter);
        if select {
            self.current_heap = Some(name);
        }
    }

    pub fn select_heap_adapter(&mut self, name: &str) -> Result<(), Error> {
        if !self.heap_adapters.contains_key(name) {
            return Err(Error::UnknownHeapAdapter(name.to_string()));
        }
        log::debug!("selected heap adapter '{name}'");
        self.current_heap = Some(name.to_string());
        Ok(())
    }

    fn heap(&self) -> Result<&dyn HeapAdapter, Error> {
        let name = self.current_heap.as_deref().ok_or(Error::NoActiveHeapAdapter)?;
        Ok(self
            .heap_adapters
            .get(name)
            .expect("current_heap always names a registered adapter")
            .as_ref())
    }

    /// `set_max_indirection_level` (§6): valid range `[1, 64]`, applies to
    /// every subsequent Horizontal/Vertical command until changed again.
    pub fn set_max_indirection_level(&mut self, level: u32) -> Result<(), Error> {
        self.config.set_max_indirection_level(level)?;
        Ok(())
    }

    /// `set_shared_objects_indirection_level` (§6): valid range `[1, 16]`.
    pub fn set_shared_objects_indirection_level(&mut self, level: u32) -> Result<(), Error> {
        self.config.set_shrobj_level(level)?;
        Ok(())
    }

    fn config_at_level(&self, level: u32) -> Result<SearchConfig, Error> {
        let mut cfg = self.config;
        cfg.set_max_indirection_level(level)?;
        Ok(cfg)
    }

    /// `find_object_refs(addr, size, level)` (§6): every reference chain
    /// into `(addr, size)`, rendered as a forest (deepest level first).
    pub fn find_object_refs(&self, addr: Address, size: u64, level: u32) -> Result<Vec<String>, Error> {
        self.find_object_refs_masked(addr, size, level, StorageMask::ALL)
    }

    /// `find_object_refs_on_threads` (§6): as above, restricted to register
    /// and stack storage — the answer to "which threads hold a pointer to
    /// this object", skipping heap/global cross-references entirely.
    pub fn find_object_refs_on_threads(
        &self,
        addr: Address,
        size: u64,
        level: u32,
    ) -> Result<Vec<String>, Error> {
        self.find_object_refs_masked(addr, size, level, StorageMask::THREADS_ONLY)
    }

    fn find_object_refs_masked(
        &self,
        addr: Address,
        size: u64,
        level: u32,
        mask: StorageMask,
    ) -> Result<Vec<String>, Error> {
        let cfg = self.config_at_level(level)?;
        let cancel = self.cancel_poll();
        let refs = horizontal::find_object_refs(
            &self.view,
            addr,
            size,
            mask,
            self.heap()?,
            self.symbols.as_ref(),
            &cfg,
            &cancel,
        );
        Ok(print::print_forest(&refs))
    }

    /// `find_object_type(addr)` (§6): walks backwards from `addr` to a
    /// recognizable anchor; returns `None` only if `addr` is a free heap
    /// block (no type can be inferred for freed memory).
    pub fn find_object_type(&self, addr: Address) -> Result<Option<vertical::VerticalSearch>, Error> {
        let cancel = self.cancel_poll();
        let result = vertical::find_object_type(
            &self.view,
            addr,
            self.heap()?,
            self.symbols.as_ref(),
            &self.config,
            &cancel,
        );
        if result.status == vertical::VerticalStatus::Free {
            log::debug!("find_object_type: {addr:#x} is a free heap block, no type inferred");
            return Ok(None);
        }
        Ok(Some(result))
    }

    /// `get_object_type_name(addr)` (§6): the formatted first anchor chain,
    /// or `None` if none was found (including the free-block case).
    pub fn get_object_type_name(&self, addr: Address) -> Result<Option<String>, Error> {
        Ok(self
            .find_object_type(addr)?
            .and_then(|result| vertical::get_object_type_name(&result)))
    }

    /// `search_cplusplus_objects_and_references` / `_with_vptr` (§6):
    /// every live instance of the type named by `expr`, each rendered with
    /// its reference forest when `search_ref` is set.
    pub fn search_cplusplus_objects_and_references(
        &self,
        expr: &str,
        search_ref: bool,
        thread_scope: bool,
    ) -> Result<Option<Vec<String>>, Error> {
        let cancel = self.cancel_poll();
        let Some(objects) = cplusplus::search_cplusplus_objects_and_references(
            &self.view,
            expr,
            search_ref,
            thread_scope,
            self.heap()?,
            self.symbols.as_ref(),
            &self.config,
            &cancel,
        ) else {
            return Ok(None);
        };

        let mut lines = Vec::new();
        for found in objects {
            lines.push(print::describe_reference(&found.object));
            for line in print::print_forest(&found.references) {
                lines.push(format!("    {line}"));
            }
        }
        Ok(Some(lines))
    }

    /// `find_shared_objects_by_threads` / `search_shared_objects_by_threads`
    /// (§6): objects reachable from `tids`' registers/stacks (all threads
    /// when `tids` is empty) owned by more than one of them.
    pub fn find_shared_objects_by_threads(&self, tids: &[i32]) -> Result<Vec<String>, Error> {
        let cancel = self.cancel_poll();
        let (repo, qualifying) = shared_object::find_shared_objects_by_threads(
            &self.view,
            tids,
            self.heap()?,
            self.symbols.as_ref(),
            &self.config,
            &cancel,
        )?;

        let mut lines = Vec::new();
        for start in qualifying {
            if let Some(obj) = repo.get(start) {
                lines.extend(print::print_shared_object(&repo, &self.view, obj));
            }
        }
        Ok(lines)
    }

    /// `print_memory_pattern(lo, hi)` (§6): per-word classification of
    /// `[lo, hi)` — pointer, embedded string, or raw data.
    pub fn print_memory_pattern(&self, lo: Address, hi: Address) -> Result<Vec<String>, Error> {
        let entries = pattern::dump_memory_pattern(&self.view, lo, hi, self.heap()?, self.symbols.as_ref());
        Ok(entries
            .iter()
            .map(|entry| match &entry.detail {
                PatternValue::Pointer(location) => format!(
                    "{:#018x}: {:#018x}  {}",
                    entry.addr,
                    entry.value,
                    print::describe_location(location)
                ),
                PatternValue::NarrowString(s) => format!("{:#018x}: \"{s}\"", entry.addr),
                PatternValue::WideString(s) => format!("{:#018x}: L\"{s}\"", entry.addr),
                PatternValue::Raw => format!("{:#018x}: {:#018x}", entry.addr, entry.value),
            })
            .collect())
    }

    /// `heap_walk(addr, verbose)` (§6): validates the active heap adapter's
    /// internal structures starting at `addr` (`0` walks the whole heap).
    pub fn validate_heap(&self, addr: Address, verbose: bool) -> Result<bool, Error> {
        Ok(self.heap()?.heap_walk(addr, verbose))
    }

    /// Exposes `fill_ref_location` directly (§4.2) for hosts that want a
    /// one-word classification without a full forest search.
    pub fn classify_word(&self, vaddr: Address) -> Option<String> {
        let segment = self.view.segment_for(vaddr, 1)?;
        let location = classifier::fill_ref_location(segment, vaddr, self.heap().ok()?, self.symbols.as_ref());
        Some(print::describe_location(&location))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use search_core::heap::mock::MockHeapAdapter;
    use search_core::segment::{Segment, SegmentKind};
    use search_core::symbol::mock::MockSymbolAdapter;

    fn word(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    fn analyzer_with(heap_bytes: Vec<u8>, stack_bytes: Vec<u8>, tid: i32) -> Analyzer {
        let heap = Segment::new(0x8000, 0x1000, heap_bytes, SegmentKind::Heap);
        let stack = Segment::new(0x2000, 0x1000, stack_bytes, SegmentKind::Stack).thread(tid);
        let view = SegmentView::new(PtrWidth::Bits64, vec![heap, stack]);
        let mut analyzer = Analyzer::new(view, Box::new(MockSymbolAdapter::new()));
        analyzer.register_heap_adapter("mock", Box::new(MockHeapAdapter::new().with_block(0x8000, 0x10, true)));
        analyzer
    }

    #[test]
    fn commands_fail_without_a_selected_heap_adapter() {
        let view = SegmentView::new(PtrWidth::Bits64, Vec::new());
        let analyzer = Analyzer::new(view, Box::new(MockSymbolAdapter::new()));
        let err = analyzer.find_object_refs(0x1000, 8, 1).unwrap_err();
        assert!(matches!(err, Error::NoActiveHeapAdapter));
    }

    #[test]
    fn set_max_indirection_level_rejects_out_of_range() {
        let view = SegmentView::new(PtrWidth::Bits64, Vec::new());
        let mut analyzer = Analyzer::new(view, Box::new(MockSymbolAdapter::new()));
        let err = analyzer.set_max_indirection_level(0).unwrap_err();
        assert!(matches!(err, Error::Engine(search_core::Error::IndirectionLevelOutOfRange(0, 64))));
    }

    #[test]
    fn find_object_refs_reports_a_heap_hit() {
        let mut heap_bytes = Vec::new();
        heap_bytes.extend_from_slice(&word(0x4242));
        let analyzer = analyzer_with(heap_bytes, Vec::new(), 1);

        let lines = analyzer.find_object_refs(0x4242, 8, 4).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("0x0000000000008000"));
    }

    #[test]
    fn find_object_type_returns_none_for_free_block() {
        let heap_bytes = vec![0u8; 0x10];
        let mut analyzer = analyzer_with(heap_bytes, Vec::new(), 1);
        analyzer.register_heap_adapter("other", Box::new(MockHeapAdapter::new().with_block(0x8000, 0x10, false)));
        analyzer.select_heap_adapter("other").unwrap();

        assert!(analyzer.find_object_type(0x8000).unwrap().is_none());
    }

    #[test]
    fn validate_heap_reports_recognized_blocks() {
        let analyzer = analyzer_with(Vec::new(), Vec::new(), 1);
        assert!(analyzer.validate_heap(0x8000, false).unwrap());
        assert!(!analyzer.validate_heap(0x9999, false).unwrap());
    }

    #[test]
    fn requested_cancel_stops_find_object_refs_early() {
        let mut heap_bytes = Vec::new();
        heap_bytes.extend_from_slice(&word(0x4242));
        let analyzer = analyzer_with(heap_bytes, Vec::new(), 1);

        analyzer.request_cancel();
        let lines = analyzer.find_object_refs(0x4242, 8, 4).unwrap();
        assert!(lines.is_empty(), "cancel before the first poll should yield no refs");

        analyzer.reset_cancel();
        let lines = analyzer.find_object_refs(0x4242, 8, 4).unwrap();
        assert_eq!(lines.len(), 1);
    }
}
