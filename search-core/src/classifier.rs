//! Reference classification and the full scan pass (§4.2 `fill_ref_location`,
//! §4.3 `search_value_internal`).

use crate::address::{Address, ObjectRange};
use crate::config::SearchConfig;
use crate::heap::HeapAdapter;
use crate::reference::{Location, ObjectReference, StorageMask};
use crate::scanner::scan_segment;
use crate::segment::{Segment, SegmentKind, SegmentView};
use crate::symbol::SymbolAdapter;

/// Classifies a scan hit found at `vaddr` inside `segment` into a
/// [`Location`] (§4.2). `segment` is where the *pointer-sized word* lives,
/// not where its value points.
pub fn fill_ref_location(
    segment: &Segment,
    vaddr: Address,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
) -> Location {
    match segment.kind {
        SegmentKind::Stack => {
            let tid = symbols.get_thread_id(segment);
            let (frame, offset) = symbols.get_frame_number(segment, vaddr);
            Location::Stack { tid, frame, offset }
        }
        SegmentKind::ModuleText => Location::ModuleText {
            name: segment.module_name.clone(),
            base: segment.vaddr,
            size: segment.vsize,
        },
        SegmentKind::ModuleData => Location::ModuleData {
            name: segment.module_name.clone(),
            base: segment.vaddr,
            size: segment.vsize,
        },
        SegmentKind::Heap => match heap.get_heap_block_info(vaddr) {
            Some(block) => Location::Heap {
                addr: block.addr,
                size: block.size,
                inuse: block.inuse,
            },
            None => Location::Unknown,
        },
        SegmentKind::Unknown => Location::Unknown,
    }
}

/// The full scan pass (§4.3): finds every occurrence of a value in
/// `targets` across `view` restricted to `mask`'s storage kinds, classifies
/// each hit, and applies `config`'s `skip_free`/`skip_unknown` policy.
///
/// `addressable_only` is forwarded to [`scan_segment`]/`next_match` (§4.1):
/// callers searching for references to a known object pass `true`; a scan
/// seeded from an arbitrary byte range (the Horizontal Search root, §4.4)
/// passes `false`.
///
/// `level`/`target_index` are stamped onto every returned reference as-is;
/// callers doing BFS traversal (§4.4/§4.5) pass the current frontier node's
/// index and the next tree level, a plain scalar search passes `(0, -1)`.
///
/// `cancel` is polled once per segment (§5 "Suspension points"): when it
/// returns true the scan stops immediately and whatever was collected so
/// far is returned, mirroring `user_request_break()`'s cooperative abort.
#[allow(clippy::too_many_arguments)]
pub fn search_value_internal(
    view: &SegmentView,
    targets: &[ObjectRange],
    addressable_only: bool,
    mask: StorageMask,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    level: u32,
    target_index: i32,
    cancel: &dyn Fn() -> bool,
) -> Vec<ObjectReference> {
    let mut out = Vec::new();

    for segment in view.segments() {
        if cancel() {
            break;
        }

        if mask.contains(StorageMask::REGISTER) && segment.kind == SegmentKind::Stack {
            let tid = symbols.get_thread_id(segment);
            for reg in symbols.read_registers(segment) {
                if reg.width as usize == view.ptr_size()
                    && targets.iter().any(|r| r.contains(reg.value))
                {
                    out.push(ObjectReference {
                        level,
                        target_index,
                        vaddr: 0,
                        value: reg.value,
                        location: Location::Register {
                            tid,
                            reg_num: reg.reg_num,
                        },
                    });
                }
            }
        }

        if !mask.contains_kind(segment.kind) {
            continue;
        }

        segment.ensure_bitmap(view.ptr_width, |addr| view.resolves(addr));
        for hit in scan_segment(segment, view.ptr_width, targets, addressable_only) {
            let location = fill_ref_location(segment, hit.vaddr, heap, symbols);

            if config.skip_unknown && matches!(location, Location::Unknown) {
                continue;
            }
            if config.skip_free {
                if let Location::Heap { inuse: false, .. } = location {
                    continue;
                }
            }

            out.push(ObjectReference {
                level,
                target_index,
                vaddr: hit.vaddr,
                value: hit.value,
                location,
            });
        }
    }

    out
}
