//! Memory-Pattern Dump: word-by-word memory inspection with pointer
//! classification and embedded-string detection (§4.8).

use crate::address::Address;
use crate::classifier::fill_ref_location;
use crate::heap::HeapAdapter;
use crate::reference::Location;
use crate::segment::{SegmentKind, SegmentView};
use crate::symbol::SymbolAdapter;

/// What a dumped word turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum PatternValue {
    /// `value` resolves into a known segment; the classified reference.
    Pointer(Location),
    /// A printable ASCII run (≥4 chars) starting inside this word.
    NarrowString(String),
    /// A wide-character run (≥4 wchars, modeled as 4-byte glibc `wchar_t`)
    /// starting inside this word.
    WideString(String),
    /// Neither a recognizable pointer nor a string.
    Raw,
}

/// One dumped word.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternEntry {
    pub addr: Address,
    pub value: Address,
    pub detail: PatternValue,
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

fn narrow_run_len(bytes: &[u8], start: usize) -> usize {
    let mut n = 0;
    while start + n < bytes.len() && is_printable(bytes[start + n]) {
        n += 1;
    }
    n
}

/// `wchar_t` modeled as 4 bytes (glibc/Linux), masked to its low byte.
fn wide_run_len(bytes: &[u8], start: usize) -> usize {
    let mut n = 0;
    let mut i = start;
    while i + 4 <= bytes.len() && is_printable(bytes[i]) {
        n += 1;
        i += 4;
    }
    n
}

fn decode_wide(bytes: &[u8]) -> String {
    bytes.chunks(4).map(|c| c[0] as char).collect()
}

/// Finds the first string (narrow preferred over wide) of length ≥4
/// starting at any of the `ptr_sz` byte offsets within the word beginning
/// at `word_start`. Returns `(start_offset, char_count, is_wide)`.
fn find_string(bytes: &[u8], word_start: usize, ptr_sz: usize) -> Option<(usize, usize, bool)> {
    for a in word_start..(word_start + ptr_sz).min(bytes.len()) {
        if narrow_run_len(bytes, a) >= 4 {
            return Some((a, narrow_run_len(bytes, a), false));
        }
    }
    for a in word_start..(word_start + ptr_sz).min(bytes.len()) {
        if wide_run_len(bytes, a) >= 4 {
            return Some((a, wide_run_len(bytes, a), true));
        }
    }
    None
}

/// Dumps every `ptr_sz`-aligned word in `[lo, hi)`, classifying each as a
/// pointer, an embedded string, or raw data (§4.8).
pub fn dump_memory_pattern(
    view: &SegmentView,
    lo: Address,
    hi: Address,
    heap: &dyn HeapAdapter,
    symbols: &dyn SymbolAdapter,
) -> Vec<PatternEntry> {
    let ptr_sz = view.ptr_size();
    let mut entries = Vec::new();
    let mut addr = lo;

    while addr + ptr_sz as Address <= hi {
        let segment = match view.segment_for(addr, ptr_sz as u64) {
            Some(s) => s,
            None => {
                addr += ptr_sz as Address;
                continue;
            }
        };
        let offset = (addr - segment.vaddr) as usize;
        let value = match segment.read_word(view.ptr_width, offset) {
            Some(v) => v,
            None => {
                addr += ptr_sz as Address;
                continue;
            }
        };

        let pointer_location = if value != 0 {
            view.segment_for(value, 1).and_then(|target_seg| {
                let location = fill_ref_location(target_seg, value, heap, symbols);
                if matches!(location, Location::Unknown) {
                    None
                } else {
                    Some(location)
                }
            })
        } else {
            None
        };

        if let Some(location) = pointer_location {
            entries.push(PatternEntry {
                addr,
                value,
                detail: PatternValue::Pointer(location),
            });
            addr += ptr_sz as Address;
            continue;
        }

        if let Some((start_off, len, wide)) = find_string(&segment.bytes, offset, ptr_sz) {
            let total_bytes = if wide { len * 4 } else { len };
            let text = if wide {
                decode_wide(&segment.bytes[start_off..start_off + total_bytes])
            } else {
                String::from_utf8_lossy(&segment.bytes[start_off..start_off + total_bytes]).into_owned()
            };
            entries.push(PatternEntry {
                addr,
                value,
                detail: if wide {
                    PatternValue::WideString(text)
                } else {
                    PatternValue::NarrowString(text)
                },
            });

            let last_byte_offset = start_off + total_bytes - 1;
            let last_word_index = last_byte_offset / ptr_sz;
            let last_word_addr = segment.vaddr + (last_word_index * ptr_sz) as Address;
            addr = last_word_addr + ptr_sz as Address;
            continue;
        }

        entries.push(PatternEntry {
            addr,
            value,
            detail: PatternValue::Raw,
        });
        addr += ptr_sz as Address;
    }

    entries
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::PtrWidth;
    use crate::heap::mock::MockHeapAdapter;
    use crate::segment::Segment;
    use crate::symbol::mock::MockSymbolAdapter;

    fn word(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    #[test]
    fn classifies_pointer_word_into_heap() {
        let heap_target: Address = 0x8000;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&word(heap_target));
        let data_seg = Segment::new(0x4000, 0x1000, bytes, SegmentKind::ModuleData);
        let heap_seg = Segment::new(heap_target, 0x100, vec![0u8; 0x10], SegmentKind::Heap);
        let view = SegmentView::new(PtrWidth::Bits64, vec![data_seg, heap_seg]);

        let heap = MockHeapAdapter::new().with_block(heap_target, 0x10, true);
        let symbols = MockSymbolAdapter::new();

        let entries = dump_memory_pattern(&view, 0x4000, 0x4008, &heap, &symbols);
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].detail, PatternValue::Pointer(Location::Heap { .. })));
    }

    #[test]
    fn detects_embedded_narrow_string() {
        let mut bytes = vec![0u8; 16];
        bytes[0..5].copy_from_slice(b"hello");
        let seg = Segment::new(0x4000, 0x1000, bytes, SegmentKind::ModuleData);
        let view = SegmentView::new(PtrWidth::Bits64, vec![seg]);
        let heap = MockHeapAdapter::new();
        let symbols = MockSymbolAdapter::new();

        let entries = dump_memory_pattern(&view, 0x4000, 0x4010, &heap, &symbols);
        assert!(matches!(&entries[0].detail, PatternValue::NarrowString(s) if s == "hello"));
        // cursor should have skipped past the word(s) the string occupied
        assert_eq!(entries[1].addr, 0x4008);
    }

    #[test]
    fn raw_word_when_neither_pointer_nor_string() {
        let bytes = word(0x03).to_vec();
        let seg = Segment::new(0x4000, 0x1000, bytes, SegmentKind::ModuleData);
        let view = SegmentView::new(PtrWidth::Bits64, vec![seg]);
        let heap = MockHeapAdapter::new();
        let symbols = MockSymbolAdapter::new();

        let entries = dump_memory_pattern(&view, 0x4000, 0x4008, &heap, &symbols);
        assert_eq!(entries, vec![PatternEntry { addr: 0x4000, value: 0x03, detail: PatternValue::Raw }]);
    }
}
