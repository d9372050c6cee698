//! Horizontal Search: the reference-to-object BFS forest (§4.4
//! `find_object_refs`).

use crate::address::{Address, ObjectRange};
use crate::classifier::search_value_internal;
use crate::config::SearchConfig;
use crate::heap::HeapAdapter;
use crate::reference::{ObjectReference, StorageMask};
use crate::segment::SegmentView;
use crate::symbol::SymbolAdapter;
use smallvec::smallvec;

/// Finds every reference chain, up to `config.max_indirection_level()`
/// levels deep, into `(obj_vaddr, obj_sz)`.
///
/// The result is a flat forest: `refs[0]` is the synthetic root
/// (`level=0`), and every later entry's `target_index` points back to the
/// index of the entry that referenced it. `mask` restricts which storage
/// kinds are searched — the `_on_threads` variant (§6) passes
/// [`StorageMask::THREADS_ONLY`]; a full walk passes [`StorageMask::ALL`].
///
/// `cancel` is polled once per BFS level (§5 "Suspension points"): a true
/// return stops the walk and returns whatever levels were already collected.
#[allow(clippy::too_many_arguments)]
pub fn find_object_refs(
    view: &SegmentView,
    obj_vaddr: Address,
    obj_sz: u64,
    mask: StorageMask,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> Vec<ObjectReference> {
    let mut refs = vec![ObjectReference::synthetic_root(obj_vaddr, obj_sz)];
    let mut level_start = 0usize;

    for n in 0..config.max_indirection_level() {
        if cancel() {
            break;
        }

        let level_end = refs.len();
        if level_start == level_end {
            break;
        }

        for i in level_start..level_end {
            if refs[i].level != n || refs[i].location.is_register() {
                continue;
            }

            // Almost always a single range; `smallvec` keeps the common case
            // off the heap.
            let (targets, addressable_only): (smallvec::SmallVec<[ObjectRange; 1]>, bool) = if i == 0 {
                (smallvec![ObjectRange::new(obj_vaddr, obj_vaddr + obj_sz)], false)
            } else if let Some((addr, size, _)) = refs[i].location.as_heap() {
                (smallvec![ObjectRange::new(addr, addr + size)], true)
            } else {
                let vaddr = refs[i].vaddr;
                (smallvec![ObjectRange::new(vaddr, vaddr + 1)], true)
            };

            let hits = search_value_internal(
                view,
                &targets,
                addressable_only,
                mask,
                heap,
                symbols,
                config,
                n + 1,
                i as i32,
                cancel,
            );

            for hit in hits {
                // Duplicate suppression (§4.4): the same heap block reached
                // through a second path is dropped, breaking cycles and
                // preventing re-exploration through the same block at a
                // different offset.
                if let Some((addr, ..)) = hit.location.as_heap() {
                    let already_seen = refs
                        .iter()
                        .any(|r| r.location.as_heap().map(|(a, ..)| a) == Some(addr));
                    if already_seen {
                        continue;
                    }
                }
                refs.push(hit);
            }
        }

        level_start = level_end;
    }

    refs
}
