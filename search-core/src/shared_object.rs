//! Shared-Object Detector: objects pointed at from more than one thread's
//! registers/stack (§4.7).

use crate::address::Address;
use crate::config::SearchConfig;
use crate::error::Error;
use crate::heap::HeapAdapter;
use crate::reference::{Location, ObjectReference};
use crate::segment::{SegmentKind, SegmentView};
use crate::symbol::SymbolAdapter;
use std::collections::{BTreeMap, HashSet};

/// How a thread directly references a [`SharedObject`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadOwner {
    Register { tid: i32, reg_num: u32 },
    Stack { tid: i32, vaddr: Address },
}

fn owner_tid(owner: &ThreadOwner) -> i32 {
    match owner {
        ThreadOwner::Register { tid, .. } | ThreadOwner::Stack { tid, .. } => *tid,
    }
}

/// One object reachable from thread state, keyed by its `start` address.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedObject {
    pub start: Address,
    pub size: u64,
    pub thread_owners: Vec<ThreadOwner>,
    /// Starts of objects whose own words point at this one, deduplicated.
    pub parent_shrobjs: Vec<Address>,
}

/// The object set built by one shared-object run (§5: "scoped to one
/// `Analyzer` command... cleared at the start of each run"). Ordered by
/// ascending `start` (a [`BTreeMap`]), matching §5's output ordering rule.
#[derive(Default)]
pub struct SharedObjectRepo {
    objects: BTreeMap<Address, SharedObject>,
}

impl SharedObjectRepo {
    pub fn get(&self, start: Address) -> Option<&SharedObject> {
        self.objects.get(&start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedObject> {
        self.objects.values()
    }
}

fn classify(
    view: &SegmentView,
    addr: Address,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
) -> Option<(Address, u64)> {
    if let Some(block) = heap.get_heap_block_info(addr) {
        return if block.inuse { Some((block.addr, block.size)) } else { None };
    }
    let segment = view.segment_for(addr, 1)?;
    if segment.kind != SegmentKind::ModuleData {
        return None;
    }
    let probe = ObjectReference {
        level: 0,
        target_index: -1,
        vaddr: addr,
        value: 0,
        location: Location::ModuleData {
            name: segment.module_name.clone(),
            base: segment.vaddr,
            size: segment.vsize,
        },
    };
    Some(symbols.known_global_sym(&probe).unwrap_or((addr, 1)))
}

/// Classifies `addr`, inserts (or finds) its owning object in `repo`, and
/// recurses over the object's own outgoing pointers up to `shrobj_level`
/// (§4.7 `add_one_shared_object`). Returns the object's `start` on success.
///
/// `cancel` (§5 "Suspension points") is checked before each recursive
/// descent; a true return stops expanding children but still records the
/// object classified so far.
#[allow(clippy::too_many_arguments)]
pub fn add_one_shared_object(
    repo: &mut SharedObjectRepo,
    view: &SegmentView,
    addr: Address,
    ignore_new: bool,
    level: u32,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> Option<Address> {
    if addr == 0 {
        return None;
    }
    let (start, size) = classify(view, addr, heap, symbols)?;

    if !repo.objects.contains_key(&start) {
        if ignore_new {
            return None;
        }
        repo.objects.insert(
            start,
            SharedObject {
                start,
                size,
                thread_owners: Vec::new(),
                parent_shrobjs: Vec::new(),
            },
        );
    }

    if level < config.shrobj_level() && !cancel() {
        if let Some(segment) = view.segment_for(start, size) {
            let ptr_sz = view.ptr_size() as u64;
            let mut children = Vec::new();
            let mut offset = 0u64;
            while offset + ptr_sz <= size {
                let file_offset = (start - segment.vaddr + offset) as usize;
                if let Some(value) = segment.read_word(view.ptr_width, file_offset) {
                    if value != 0 {
                        children.push(value);
                    }
                }
                offset += ptr_sz;
            }

            for child_val in children {
                if let Some(child_start) = add_one_shared_object(
                    repo,
                    view,
                    child_val,
                    ignore_new,
                    level + 1,
                    heap,
                    symbols,
                    config,
                    cancel,
                ) {
                    if let Some(child) = repo.objects.get_mut(&child_start) {
                        if !child.parent_shrobjs.contains(&start) {
                            child.parent_shrobjs.push(start);
                        }
                    }
                }
            }
        }
    }

    Some(start)
}

/// Phase 1: collects every object reachable from the selected threads'
/// registers and stack words (§4.7).
///
/// `cancel` (§5) is polled once per thread; a true return stops scanning
/// further threads and returns whatever was collected so far.
pub fn collect_shared_objects(
    view: &SegmentView,
    thread_ids: &[i32],
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> SharedObjectRepo {
    let mut repo = SharedObjectRepo::default();

    for segment in view.stacks() {
        if cancel() {
            break;
        }

        let tid = segment.thread.map(|t| t.0).unwrap_or(-1);
        if !thread_ids.is_empty() && !thread_ids.contains(&tid) {
            continue;
        }

        for reg in symbols.read_registers(segment) {
            if reg.value == 0 {
                continue;
            }
            if let Some(start) = add_one_shared_object(
                &mut repo, view, reg.value, false, 1, heap, symbols, config, cancel,
            ) {
                if let Some(obj) = repo.objects.get_mut(&start) {
                    obj.thread_owners.push(ThreadOwner::Register {
                        tid,
                        reg_num: reg.reg_num,
                    });
                }
            }
        }

        let ptr_sz = view.ptr_size() as u64;
        let end = segment.vaddr + segment.vsize;
        let rsp = symbols.get_rsp(segment);
        let mut vaddr = if rsp >= segment.vaddr && rsp < end { rsp } else { segment.vaddr };
        while vaddr + ptr_sz <= end {
            let offset = (vaddr - segment.vaddr) as usize;
            if let Some(value) = segment.read_word(view.ptr_width, offset) {
                if value != 0 {
                    if let Some(start) = add_one_shared_object(
                        &mut repo, view, value, false, 1, heap, symbols, config, cancel,
                    ) {
                        let probe = ObjectReference {
                            level: 0,
                            target_index: -1,
                            vaddr,
                            value,
                            location: Location::Stack { tid, frame: -1, offset: 0 },
                        };
                        let size_ok = match symbols.known_stack_sym(&probe) {
                            Some((_, sym_size)) => sym_size >= ptr_sz,
                            None => true,
                        };
                        if size_ok {
                            if let Some(obj) = repo.objects.get_mut(&start) {
                                obj.thread_owners.push(ThreadOwner::Stack { tid, vaddr });
                            }
                        }
                    }
                }
            }
            vaddr += ptr_sz;
        }
    }

    repo
}

/// Phase 2 qualification test (§4.7): does `start` have owners from more
/// than one thread, either directly or through its parent chain up to
/// `shrobj_level - 1` levels up?
pub fn has_multiple_thread_owners(repo: &SharedObjectRepo, start: Address, shrobj_level: u32) -> bool {
    let Some(obj) = repo.objects.get(&start) else {
        return false;
    };

    // Direct owners qualify on their own, regardless of `shrobj_level` and
    // even when there are none (an object with no direct owner can still
    // qualify purely through its ancestor chain, e.g. a common parent block
    // reached only via two separately thread-owned children).
    let mut tids: HashSet<i32> = obj.thread_owners.iter().map(owner_tid).collect();
    if tids.len() >= 2 {
        return true;
    }

    let mut visited = HashSet::new();
    visited.insert(start);
    let mut frontier = vec![start];

    for _ in 0..shrobj_level.saturating_sub(1) {
        let mut next = Vec::new();
        for cur in &frontier {
            if let Some(obj) = repo.objects.get(cur) {
                for &parent in &obj.parent_shrobjs {
                    if visited.insert(parent) {
                        next.push(parent);
                    }
                }
            }
        }
        for ancestor in next.iter().filter_map(|p| repo.objects.get(p)) {
            tids.extend(ancestor.thread_owners.iter().map(owner_tid));
        }
        if tids.len() >= 2 {
            return true;
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    false
}

/// Runs phases 1 and 2 end to end: collects the repository, then returns
/// the `start` addresses of every qualifying object in ascending order.
///
/// Validates `thread_ids` against the tids actually present among `view`'s
/// stack segments first (§7 "Invalid input"/`TidOutOfRange`), matching
/// `shared_objects_internal`'s tid-range check in the original.
pub fn find_shared_objects_by_threads(
    view: &SegmentView,
    thread_ids: &[i32],
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
    config: &SearchConfig,
    cancel: &dyn Fn() -> bool,
) -> Result<(SharedObjectRepo, Vec<Address>), Error> {
    let known_tids: HashSet<i32> = view.stacks().filter_map(|s| s.thread.map(|t| t.0)).collect();
    for &tid in thread_ids {
        if !known_tids.contains(&tid) {
            return Err(Error::TidOutOfRange(tid));
        }
    }

    let repo = collect_shared_objects(view, thread_ids, heap, symbols, config, cancel);
    let qualifying = repo
        .objects
        .keys()
        .copied()
        .filter(|&start| has_multiple_thread_owners(&repo, start, config.shrobj_level()))
        .collect();
    Ok((repo, qualifying))
}
