//! End-to-end coverage of the six canonical scenarios (§8), each built with
//! `test_assembler::Section` byte buffers standing in for segment memory
//! plus the in-memory reference adapters (the `testing` feature).

use search_core::address::PtrWidth;
use search_core::heap::mock::MockHeapAdapter;
use search_core::reference::{Location, StorageMask};
use search_core::segment::{Segment, SegmentKind, SegmentView};
use search_core::symbol::mock::MockSymbolAdapter;
use search_core::symbol::{RegisterValue, VtableInfo};
use search_core::{horizontal, shared_object, vertical};
use test_assembler::{Endian, Section};

fn words(endian: Endian, values: &[u64]) -> Vec<u8> {
    let mut section = Section::with_endian(endian);
    for &v in values {
        section = section.D64(v);
    }
    section.get_contents().unwrap()
}

// Scenario 1: an in-use heap block B, a global pointing at it, and a stack
// slot pointing at it. `find_object_refs(B, 64, 1)` should surface both.
#[test]
fn scenario_1_global_and_stack_reference_a_heap_block() {
    let b_addr: u64 = 0x1000;
    let global = Segment::new(0x400000, 0x10, words(Endian::Little, &[b_addr]), SegmentKind::ModuleData)
        .module("app");
    let mut stack_bytes = vec![0u8; 0x20];
    stack_bytes[0x10..0x18].copy_from_slice(&words(Endian::Little, &[b_addr]));
    let stack = Segment::new(0x7fff00, 0x1000, stack_bytes, SegmentKind::Stack).thread(9);

    let view = SegmentView::new(PtrWidth::Bits64, vec![global, stack]);
    let heap = MockHeapAdapter::new().with_block(b_addr, 64, true);
    let symbols = MockSymbolAdapter::new();
    let config = search_core::SearchConfig::default();

    let refs =
        horizontal::find_object_refs(&view, b_addr, 64, StorageMask::ALL, &heap, &symbols, &config, &|| false);

    assert_eq!(refs.len(), 3, "root + two level-1 refs");
    assert!(refs[1..].iter().all(|r| r.level == 1 && r.value == b_addr));
    assert!(refs.iter().any(|r| matches!(r.location, Location::ModuleData { .. })));
    assert!(refs.iter().any(|r| matches!(r.location, Location::Stack { .. })));
}

// Scenario 2: add a heap block C that itself holds a pointer to B. The
// global/stack now point at C instead; find_object_refs(B, 64, 2) should
// surface C at level 1 and the global/stack refs to C at level 2, with no
// duplicate Heap{C} node.
#[test]
fn scenario_2_two_level_chain_has_no_duplicate_heap_node() {
    let b_addr: u64 = 0x1000;
    let c_addr: u64 = 0x2000;

    let heap_seg = Segment::new(c_addr, 0x10, words(Endian::Little, &[b_addr]), SegmentKind::Heap);
    let global = Segment::new(0x400000, 0x10, words(Endian::Little, &[c_addr]), SegmentKind::ModuleData)
        .module("app");
    let mut stack_bytes = vec![0u8; 0x20];
    stack_bytes[0x10..0x18].copy_from_slice(&words(Endian::Little, &[c_addr]));
    let stack = Segment::new(0x7fff00, 0x1000, stack_bytes, SegmentKind::Stack).thread(9);

    let view = SegmentView::new(PtrWidth::Bits64, vec![heap_seg, global, stack]);
    let heap = MockHeapAdapter::new().with_block(b_addr, 64, true).with_block(c_addr, 8, true);
    let symbols = MockSymbolAdapter::new();
    let mut config = search_core::SearchConfig::default();
    config.set_max_indirection_level(2).unwrap();

    let refs =
        horizontal::find_object_refs(&view, b_addr, 64, StorageMask::ALL, &heap, &symbols, &config, &|| false);

    assert_eq!(refs.len(), 4, "root + Heap{C} at level 1 + global/stack at level 2");
    let level1: Vec<_> = refs.iter().filter(|r| r.level == 1).collect();
    assert_eq!(level1.len(), 1);
    assert_eq!(level1[0].location.as_heap().unwrap().0, c_addr);
    let level2: Vec<_> = refs.iter().filter(|r| r.level == 2).collect();
    assert_eq!(level2.len(), 2);
    assert!(level2.iter().all(|r| r.value == c_addr));
    assert_eq!(refs.iter().filter(|r| r.location.as_heap().map(|(a, ..)| a) == Some(c_addr)).count(), 1);
}

// Scenario 3: a free heap block reports VerticalStatus::Free, not a type.
#[test]
fn scenario_3_free_block_reports_free_not_a_type() {
    let addr: u64 = 0x3000;
    let heap_seg = Segment::new(addr, 0x1000, vec![0u8; 0x40], SegmentKind::Heap);
    let view = SegmentView::new(PtrWidth::Bits64, vec![heap_seg]);
    let heap = MockHeapAdapter::new().with_block(addr, 0x40, false);
    let symbols = MockSymbolAdapter::new();
    let config = search_core::SearchConfig::default();

    let result = vertical::find_object_type(&view, addr, &heap, &symbols, &config, &|| false);
    assert_eq!(result.status, vertical::VerticalStatus::Free);
}

// Scenario 4: an in-use block whose first word is a known vtable; querying
// an address inside the block (not its head) terminates immediately at the
// vtable anchor without a deeper walk.
#[test]
fn scenario_4_vtable_anchor_terminates_immediately() {
    let block_addr: u64 = 0x4000;
    let heap_seg = Segment::new(block_addr, 0x1000, vec![0u8; 0x20], SegmentKind::Heap);
    let view = SegmentView::new(PtrWidth::Bits64, vec![heap_seg]);
    let heap = MockHeapAdapter::new().with_block(block_addr, 0x20, true);
    let mut symbols = MockSymbolAdapter::new();
    symbols.vptr_heap_blocks.insert(block_addr);
    let config = search_core::SearchConfig::default();

    let result = vertical::find_object_type(&view, block_addr + 0x10, &heap, &symbols, &config, &|| false);
    assert_eq!(result.status, vertical::VerticalStatus::Immediate);
    assert_eq!(result.refs.len(), 1);
}

// Scenario 5: thread A's register and thread B's stack slot both point at
// the same in-use heap block -> one shared object with two owners.
#[test]
fn scenario_5_object_shared_via_register_and_stack() {
    let shared_addr: u64 = 0x5000;
    let heap_seg = Segment::new(shared_addr, 0x1000, vec![0u8; 0x10], SegmentKind::Heap);

    let stack_a = Segment::new(0x7000, 0x100, vec![0u8; 0x100], SegmentKind::Stack).thread(1);
    let mut stack_b_bytes = vec![0u8; 0x100];
    stack_b_bytes[0..8].copy_from_slice(&words(Endian::Little, &[shared_addr]));
    let stack_b = Segment::new(0x8000, 0x100, stack_b_bytes, SegmentKind::Stack).thread(2);

    let view = SegmentView::new(PtrWidth::Bits64, vec![heap_seg, stack_a, stack_b]);
    let heap = MockHeapAdapter::new().with_block(shared_addr, 0x10, true);
    let mut symbols = MockSymbolAdapter::new();
    symbols.registers.insert(1, vec![RegisterValue { reg_num: 0, width: 8, value: shared_addr }]);
    symbols.rsp.insert(2, 0x8000);
    let config = search_core::SearchConfig::default(); // shrobj_level defaults to 1

    let (repo, qualifying) =
        shared_object::find_shared_objects_by_threads(&view, &[], &heap, &symbols, &config, &|| false)
            .unwrap();
    assert_eq!(qualifying, vec![shared_addr]);
    assert_eq!(repo.get(shared_addr).unwrap().thread_owners.len(), 2);
}

// Scenario 6: two threads each hold a pointer to a distinct child heap
// block, and each child's own content points back at a common parent P.
// P is reported shared only once recursion is allowed to reach it
// (shrobj_level=2); with shrobj_level=1 it is never even discovered.
#[test]
fn scenario_6_common_parent_shared_only_at_deeper_indirection_level() {
    let p_addr: u64 = 0x6000;
    let child1_addr: u64 = 0x6100;
    let child2_addr: u64 = 0x6200;

    let p_seg = Segment::new(p_addr, 0x10, vec![0u8; 0x10], SegmentKind::Heap);
    let child1_seg = Segment::new(child1_addr, 0x10, words(Endian::Little, &[p_addr]), SegmentKind::Heap);
    let child2_seg = Segment::new(child2_addr, 0x10, words(Endian::Little, &[p_addr]), SegmentKind::Heap);

    let stack_a = Segment::new(0x7000, 0x100, vec![0u8; 0x100], SegmentKind::Stack).thread(1);
    let stack_b = Segment::new(0x8000, 0x100, vec![0u8; 0x100], SegmentKind::Stack).thread(2);

    let view = SegmentView::new(
        PtrWidth::Bits64,
        vec![p_seg, child1_seg, child2_seg, stack_a, stack_b],
    );
    let heap = MockHeapAdapter::new()
        .with_block(p_addr, 0x10, true)
        .with_block(child1_addr, 0x10, true)
        .with_block(child2_addr, 0x10, true);
    let mut symbols = MockSymbolAdapter::new();
    symbols.registers.insert(1, vec![RegisterValue { reg_num: 0, width: 8, value: child1_addr }]);
    symbols.registers.insert(2, vec![RegisterValue { reg_num: 0, width: 8, value: child2_addr }]);

    let mut config = search_core::SearchConfig::default();
    config.set_shrobj_level(2).unwrap();
    let (repo, qualifying) =
        shared_object::find_shared_objects_by_threads(&view, &[], &heap, &symbols, &config, &|| false)
            .unwrap();
    assert!(qualifying.contains(&p_addr), "P should be reported shared via parent_shrobjs");
    assert_eq!(repo.get(p_addr).unwrap().parent_shrobjs.len(), 2);

    config.set_shrobj_level(1).unwrap();
    let (repo, qualifying) =
        shared_object::find_shared_objects_by_threads(&view, &[], &heap, &symbols, &config, &|| false)
            .unwrap();
    assert!(!qualifying.contains(&p_addr));
    assert!(repo.get(p_addr).is_none(), "P is never reached at shrobj_level=1");
}

// A small vtable-based C++ object finder scenario, covering §4.6 alongside
// the six canonical ones.
#[test]
fn finds_cplusplus_objects_by_vtable_and_their_references() {
    let vtable_lo: u64 = 0xc000;
    let vtable_hi: u64 = 0xc100;
    let obj_addr: u64 = 0x8000;

    let heap_seg = Segment::new(obj_addr, 0x10, words(Endian::Little, &[vtable_lo + 8]), SegmentKind::Heap);
    let global = Segment::new(0x400000, 0x10, words(Endian::Little, &[obj_addr]), SegmentKind::ModuleData)
        .module("app");

    let view = SegmentView::new(PtrWidth::Bits64, vec![heap_seg, global]);
    let heap = MockHeapAdapter::new().with_block(obj_addr, 0x10, true);
    let mut symbols = MockSymbolAdapter::new();
    symbols.vtables.insert(
        "Widget".to_string(),
        VtableInfo { type_name: "Widget".to_string(), type_size: 0x10, vtable_ranges: vec![(vtable_lo, vtable_hi)] },
    );
    let config = search_core::SearchConfig::default();

    let found = search_core::cplusplus::search_cplusplus_objects_and_references(
        &view, "Widget", true, false, &heap, &symbols, &config, &|| false,
    )
    .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].object.location.as_heap().unwrap().0, obj_addr);
    assert_eq!(found[0].references.len(), 1);
    assert!(matches!(found[0].references[0].location, Location::ModuleData { .. }));
}
