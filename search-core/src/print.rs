//! Reference and forest presentation (§4.4 forest printing, §4.7 phase 3).
//!
//! These functions only build `String`s; the facade's command layer is
//! responsible for actually writing them to the debugger's console.

use crate::address::Address;
use crate::reference::{Location, ObjectReference};
use crate::segment::SegmentView;
use crate::shared_object::{SharedObject, SharedObjectRepo, ThreadOwner};

/// One-line description of where a reference lives.
pub fn describe_location(location: &Location) -> String {
    match location {
        Location::Register { tid, reg_num } => format!("register r{reg_num} (tid {tid})"),
        Location::Stack { tid, frame, offset } => {
            if *frame >= 0 {
                format!("stack tid {tid} frame {frame} +{offset:#x}")
            } else {
                format!("stack tid {tid} (unresolved frame) +{offset:#x}")
            }
        }
        Location::ModuleText { name, base, .. } => {
            format!("text {}+{:#x}", name.as_deref().unwrap_or("?"), base)
        }
        Location::ModuleData { name, base, .. } => {
            format!("data {}+{:#x}", name.as_deref().unwrap_or("?"), base)
        }
        Location::Heap { addr, size, inuse } => format!(
            "heap {addr:#x}..+{size:#x} ({})",
            if *inuse { "in-use" } else { "free" }
        ),
        Location::Target { size } => format!("target (size {size:#x})"),
        Location::Unknown => "unknown".to_string(),
    }
}

pub fn describe_reference(r: &ObjectReference) -> String {
    format!("{:#018x}: {:#018x}  {}", r.vaddr, r.value, describe_location(&r.location))
}

/// Renders a Horizontal/Vertical Search forest (§4.4): deepest level first,
/// entries sharing a parent grouped together with a `|-->` arrow from the
/// parent at the group head.
pub fn print_forest(refs: &[ObjectReference]) -> Vec<String> {
    if refs.is_empty() {
        return Vec::new();
    }
    let max_level = refs.iter().map(|r| r.level).max().unwrap_or(0);
    let mut lines = Vec::new();

    // Level 0 is always the synthetic root (the searched-for object
    // itself, not a reference to it); callers print that separately.
    for level in (1..=max_level).rev() {
        let mut i = 0;
        while i < refs.len() {
            if refs[i].level != level {
                i += 1;
                continue;
            }
            let parent = refs[i].target_index;
            let mut group_start = true;
            while i < refs.len() && refs[i].level == level && refs[i].target_index == parent {
                let prefix = if group_start && parent >= 0 {
                    format!("|--> (from {}) ", describe_reference(&refs[parent as usize]))
                } else {
                    "     ".to_string()
                };
                lines.push(format!("{prefix}{}", describe_reference(&refs[i])));
                group_start = false;
                i += 1;
            }
        }
    }

    lines
}

/// Renders one qualifying shared object (§4.7 phase 3): its direct thread
/// owners, then for each parent chain reaching it, the pointer word inside
/// the parent that points at it.
pub fn print_shared_object(
    repo: &SharedObjectRepo,
    view: &SegmentView,
    obj: &SharedObject,
) -> Vec<String> {
    let mut lines = vec![format!(
        "shared object {:#018x}..+{:#x}",
        obj.start, obj.size
    )];

    for owner in &obj.thread_owners {
        lines.push(match owner {
            ThreadOwner::Register { tid, reg_num } => format!("  owned by tid {tid} register r{reg_num}"),
            ThreadOwner::Stack { tid, vaddr } => format!("  owned by tid {tid} stack word {vaddr:#018x}"),
        });
    }

    for &parent_start in &obj.parent_shrobjs {
        if let Some(parent) = repo.get(parent_start) {
            if let Some(word_addr) = find_pointing_word(view, parent.start, parent.size, obj.start) {
                lines.push(format!(
                    "  reached via parent {:#018x} through word at {word_addr:#018x}",
                    parent.start
                ));
            }
        }
    }

    lines
}

fn find_pointing_word(view: &SegmentView, base: Address, size: u64, target: Address) -> Option<Address> {
    let segment = view.segment_for(base, size)?;
    let ptr_width = view.ptr_width;
    let ptr_sz = ptr_width.bytes() as u64;
    let mut offset = 0u64;
    while offset + ptr_sz <= size {
        let file_offset = (base - segment.vaddr + offset) as usize;
        if segment.read_word(ptr_width, file_offset) == Some(target) {
            return Some(base + offset);
        }
        offset += ptr_sz;
    }
    None
}
