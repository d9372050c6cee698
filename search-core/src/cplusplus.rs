//! C++ Object Finder: recovering live instances of a type from its vtable
//! (§4.6).

use crate::address::ObjectRange;
use crate::classifier::search_value_internal;
use crate::config::SearchConfig;
use crate::heap::HeapAdapter;
use crate::horizontal::find_object_refs;
use crate::reference::{Location, ObjectReference, StorageMask};
use crate::segment::SegmentView;
use crate::symbol::SymbolAdapter;
use std::collections::HashSet;

/// Scans every segment for pointers into the vtable range(s) of the type
/// named by `expr`, returning one [`ObjectReference`] per distinct object
/// found (deduplicated by object base: `heap.addr` for heap hits, `vaddr`
/// otherwise). Each returned reference's `value` is zeroed to mark
/// "head-of-object" rather than "reference-to-object".
///
/// Returns `None` if the symbol adapter can't resolve `expr` to a vtable.
pub fn search_cplusplus_objects_with_vptr(
    view: &SegmentView,
    expr: &str,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> Option<Vec<ObjectReference>> {
    let vtable = symbols.get_vtable_from_exp(expr)?;
    let targets: Vec<ObjectRange> = vtable
        .vtable_ranges
        .iter()
        .map(|(lo, hi)| ObjectRange::new(*lo, *hi))
        .collect();
    if targets.is_empty() {
        return Some(Vec::new());
    }

    let hits = search_value_internal(
        view,
        &targets,
        true,
        StorageMask::ALL,
        heap,
        symbols,
        config,
        0,
        -1,
        cancel,
    );

    let mut seen = HashSet::new();
    let mut objects = Vec::new();

    for mut hit in hits {
        match &hit.location {
            // Not objects, or the vtable tables themselves.
            Location::Register { .. } | Location::ModuleText { .. } | Location::ModuleData { .. } => {
                continue;
            }
            Location::Stack { .. } => {
                if let Some((_, size)) = symbols.known_stack_sym(&hit) {
                    if size != vtable.type_size {
                        continue;
                    }
                }
            }
            _ => {}
        }

        let base = hit.location.as_heap().map(|(addr, ..)| addr).unwrap_or(hit.vaddr);
        if !seen.insert(base) {
            continue;
        }

        hit.value = 0;
        objects.push(hit);
    }

    Some(objects)
}

/// One discovered object plus whatever references point at it.
pub struct CppObjectWithRefs {
    pub object: ObjectReference,
    /// Empty unless `search_ref` was set on the call that produced this.
    pub references: Vec<ObjectReference>,
}

/// As [`search_cplusplus_objects_with_vptr`], but also runs Horizontal
/// Search against each surviving object when `search_ref` is set, scoped to
/// thread storage only when `thread_scope` is set (§4.6).
#[allow(clippy::too_many_arguments)]
pub fn search_cplusplus_objects_and_references(
    view: &SegmentView,
    expr: &str,
    search_ref: bool,
    thread_scope: bool,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> Option<Vec<CppObjectWithRefs>> {
    let objects = search_cplusplus_objects_with_vptr(view, expr, heap, symbols, config, cancel)?;
    let mask = if thread_scope {
        StorageMask::THREADS_ONLY
    } else {
        StorageMask::ALL
    };

    Some(
        objects
            .into_iter()
            .map(|object| {
                let references = if search_ref && !cancel() {
                    let (addr, size) = match object.location.as_heap() {
                        Some((addr, size, _)) => (addr, size),
                        None => (object.vaddr, 1),
                    };
                    let mut refs =
                        find_object_refs(view, addr, size, mask, heap, symbols, config, cancel);
                    refs.remove(0); // drop the synthetic root; callers only want actual references
                    refs
                } else {
                    Vec::new()
                };
                CppObjectWithRefs { object, references }
            })
            .collect(),
    )
}
