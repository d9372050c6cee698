//! Vertical Search: recovering a type from an arbitrary address by walking
//! backwards to a recognizable anchor (§4.5 `find_object_type`,
//! `get_object_type_name`).

use crate::address::{Address, ObjectRange};
use crate::classifier::{fill_ref_location, search_value_internal};
use crate::config::SearchConfig;
use crate::heap::HeapAdapter;
use crate::reference::{Location, ObjectReference, StorageMask};
use crate::segment::SegmentView;
use crate::symbol::SymbolAdapter;
use smallvec::smallvec;

/// What [`find_object_type`] concluded about the root address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VerticalStatus {
    /// The root itself already sits in a recognizable anchor location; no
    /// walk was needed (§4.5 "Immediate terminators").
    Immediate,
    /// The root is a free heap block; no type can be inferred.
    Free,
    /// The walk found at least one anchor chain.
    Found,
    /// `max_indirection_level` was exhausted with no anchor found.
    Exhausted,
}

/// Result of a vertical search: the BFS forest built while walking
/// backwards from the root, plus which entries turned out to be anchors.
pub struct VerticalSearch {
    pub status: VerticalStatus,
    pub refs: Vec<ObjectReference>,
    pub anchors: Vec<usize>,
}

fn is_anchor(r: &ObjectReference, symbols: &dyn SymbolAdapter) -> bool {
    match &r.location {
        Location::Stack { frame, .. } => *frame >= 0,
        Location::Register { .. } => true,
        Location::ModuleData { .. } => true,
        Location::Heap { inuse: true, .. } => symbols.known_heap_block(r),
        _ => false,
    }
}

fn classify_root(
    view: &SegmentView,
    root_vaddr: Address,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
) -> Location {
    match view.segment_for(root_vaddr, 1) {
        Some(segment) => fill_ref_location(segment, root_vaddr, heap, symbols),
        None => Location::Unknown,
    }
}

/// Walks backwards from `root_vaddr` looking for a chain of references whose
/// origin is a recognizable anchor (§4.5).
///
/// `cancel` is polled once per BFS level (§5 "Suspension points"); a true
/// return stops the walk early, reporting whatever anchors were already
/// found (or [`VerticalStatus::Exhausted`] if none were).
pub fn find_object_type(
    view: &SegmentView,
    root_vaddr: Address,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> VerticalSearch {
    let root_location = classify_root(view, root_vaddr, heap, symbols);

    match &root_location {
        Location::Register { .. }
        | Location::Stack { .. }
        | Location::ModuleText { .. }
        | Location::ModuleData { .. } => {
            let root = ObjectReference {
                level: 0,
                target_index: -1,
                vaddr: root_vaddr,
                value: 0,
                location: root_location,
            };
            return VerticalSearch {
                status: VerticalStatus::Immediate,
                refs: vec![root],
                anchors: vec![0],
            };
        }
        Location::Heap { inuse: false, .. } => {
            return VerticalSearch {
                status: VerticalStatus::Free,
                refs: vec![ObjectReference::synthetic_root(root_vaddr, 0)],
                anchors: Vec::new(),
            };
        }
        Location::Heap { .. } => {
            let probe = ObjectReference {
                level: 0,
                target_index: -1,
                vaddr: root_vaddr,
                value: 0,
                location: root_location.clone(),
            };
            if symbols.is_heap_object_with_vptr(&probe) {
                return VerticalSearch {
                    status: VerticalStatus::Immediate,
                    refs: vec![probe],
                    anchors: vec![0],
                };
            }
        }
        Location::Unknown | Location::Target { .. } => {}
    }

    let mut refs = vec![ObjectReference::synthetic_root(root_vaddr, 0)];
    let mut anchors = Vec::new();
    let mut level_start = 0usize;

    for n in 0..config.max_indirection_level() {
        if cancel() {
            break;
        }

        let level_end = refs.len();
        if level_start == level_end {
            break;
        }

        let mut new_entries: Vec<ObjectReference> = Vec::new();

        for i in level_start..level_end {
            if refs[i].location.is_register() {
                continue;
            }

            let (targets, addressable_only): (smallvec::SmallVec<[ObjectRange; 1]>, bool) = if i == 0 {
                (smallvec![ObjectRange::new(root_vaddr, root_vaddr + 1)], true)
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
                StorageMask::ALL,
                heap,
                symbols,
                config,
                n + 1,
                i as i32,
                cancel,
            );

            let (anchor_hits, rest): (Vec<_>, Vec<_>) =
                hits.into_iter().partition(|h| is_anchor(h, symbols));

            if !anchor_hits.is_empty() {
                new_entries.extend(anchor_hits);
            } else {
                for hit in rest {
                    match &hit.location {
                        Location::Heap { addr, inuse: true, .. } => {
                            let already = refs
                                .iter()
                                .chain(new_entries.iter())
                                .any(|r| r.location.as_heap().map(|(a, ..)| a) == Some(*addr));
                            if !already {
                                new_entries.push(hit);
                            }
                        }
                        Location::ModuleText { .. } => {
                            if !symbols.global_text_ref(&hit) {
                                new_entries.push(hit);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let base_index = refs.len();
        for (offset, entry) in new_entries.into_iter().enumerate() {
            let idx = base_index + offset;
            if is_anchor(&entry, symbols) {
                anchors.push(idx);
            }
            refs.push(entry);
        }

        level_start = level_end;
    }

    let status = if !anchors.is_empty() {
        VerticalStatus::Found
    } else {
        VerticalStatus::Exhausted
    };
    if status == VerticalStatus::Exhausted {
        log::warn!(
            "find_object_type: exhausted max_indirection_level ({}) for {:#x} without an anchor",
            config.max_indirection_level(),
            root_vaddr
        );
    }

    VerticalSearch { status, refs, anchors }
}

/// Climbs `target_index` from `leaf` back to the synthetic root, returning
/// indices in root-to-leaf order.
fn chain_to_root(result: &VerticalSearch, leaf: usize) -> Vec<usize> {
    let mut chain = vec![leaf];
    let mut cur = leaf;
    while result.refs[cur].target_index >= 0 {
        cur = result.refs[cur].target_index as usize;
        chain.push(cur);
    }
    chain.reverse();
    chain
}

/// Renders the first anchor chain found (root first) as a single string,
/// suitable for a downstream typing heuristic to parse (§4.5).
pub fn get_object_type_name(result: &VerticalSearch) -> Option<String> {
    let anchor = *result.anchors.first()?;
    let chain = chain_to_root(result, anchor);
    Some(
        chain
            .iter()
            .map(|&i| crate::print::describe_location(&result.refs[i].location))
            .collect::<Vec<_>>()
            .join(" <- "),
    )
}
