//! The bit-vectored scan primitive (§4.1 `next_match`).
//!
//! Grounded on `search.cpp`'s `search_value_by_range`: walk a segment
//! word-by-word, skipping whole 32-word chunks whenever the addressable
//! bitmap says none of them are candidate pointers.

use crate::address::{Address, ObjectRange, PtrWidth};
use crate::segment::Segment;

/// One raw hit: a word at `vaddr` (inside some segment) whose value falls
/// in one of the scan's target ranges.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub vaddr: Address,
    pub value: Address,
}

/// Scans `segment` for every word whose value falls in `targets`.
///
/// `addressable_only` mirrors `next_match`'s flag (§4.1): when true, the
/// segment's addressable bitmap (if built) is consulted and a zero 32-word
/// chunk is skipped without being read — valid because a target can only
/// ever be "an address that resolves to some segment" in that mode. When
/// false (the target itself may not be a resolvable address, e.g. a search
/// seeded from an arbitrary byte range) every word is read regardless of
/// the bitmap.
pub fn scan_segment(
    segment: &Segment,
    ptr_width: PtrWidth,
    targets: &[ObjectRange],
    addressable_only: bool,
) -> Vec<Match> {
    let ptr_sz = ptr_width.bytes();
    let num_words = segment.fsize() as usize / ptr_sz;
    let has_bitmap = addressable_only && segment.bitmap_ready();
    let num_chunks = (num_words + 31) / 32;
    let mut hits = Vec::new();

    for chunk_index in 0..num_chunks {
        let chunk_bits = if has_bitmap {
            segment.with_bitmap(|b| b.chunk(chunk_index)).unwrap_or(0)
        } else {
            u32::MAX
        };
        if chunk_bits == 0 {
            continue;
        }

        let base_word = chunk_index * 32;
        let words_in_chunk = 32.min(num_words - base_word);
        for i in 0..words_in_chunk {
            if has_bitmap && chunk_bits & (1 << i) == 0 {
                continue;
            }
            let word_index = base_word + i;
            if let Some(value) = segment.read_word(ptr_width, word_index * ptr_sz) {
                if targets.iter().any(|r| r.contains(value)) {
                    hits.push(Match {
                        vaddr: segment.vaddr + (word_index * ptr_sz) as Address,
                        value,
                    });
                }
            }
        }
    }

    hits
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::segment::SegmentKind;
    use rstest::{self, *};
    use rstest_reuse::{self, *};

    fn word(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    fn range(low: Address, high: Address) -> Vec<ObjectRange> {
        vec![ObjectRange::new(low, high)]
    }

    #[template]
    #[rstest]
    #[case::bits32(PtrWidth::Bits32)]
    #[case::bits64(PtrWidth::Bits64)]
    fn ptr_widths(#[case] ptr_width: PtrWidth) {}

    /// A target-pointer-width-independent word, laid out for whichever
    /// `ptr_width` the case asks for.
    fn word_at(ptr_width: PtrWidth, v: u64) -> Vec<u8> {
        match ptr_width {
            PtrWidth::Bits32 => (v as u32).to_le_bytes().to_vec(),
            PtrWidth::Bits64 => v.to_le_bytes().to_vec(),
        }
    }

    #[apply(ptr_widths)]
    fn finds_hit_at_either_pointer_width(#[case] ptr_width: PtrWidth) {
        let target: Address = 0x4242;
        let mut bytes = word_at(ptr_width, 0);
        bytes.extend_from_slice(&word_at(ptr_width, target));
        let seg = Segment::new(0x1000, 0x1000, bytes, SegmentKind::Heap);

        let hits = scan_segment(&seg, ptr_width, &range(target, target + 1), false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, target);
        assert_eq!(hits[0].vaddr, 0x1000 + ptr_width.bytes() as Address);
    }

    #[test]
    fn finds_every_word_in_range_without_bitmap() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&word(0x10));
        bytes.extend_from_slice(&word(0x20));
        bytes.extend_from_slice(&word(0x10));
        let seg = Segment::new(0x1000, 0x1000, bytes, SegmentKind::Heap);

        let hits = scan_segment(&seg, PtrWidth::Bits64, &range(0x10, 0x11), false);
        assert_eq!(
            hits,
            vec![
                Match { vaddr: 0x1000, value: 0x10 },
                Match { vaddr: 0x1010, value: 0x10 },
            ]
        );
    }

    #[test]
    fn bitmap_chunk_skip_still_finds_hits_it_marked() {
        let mut bytes = Vec::new();
        for _ in 0..40 {
            bytes.extend_from_slice(&word(0));
        }
        let target: Address = 0x5000;
        bytes[35 * 8..35 * 8 + 8].copy_from_slice(&word(target));

        let seg = Segment::new(0x1000, 0x2000, bytes, SegmentKind::Heap);
        seg.ensure_bitmap(PtrWidth::Bits64, |addr| addr == target);

        let hits = scan_segment(&seg, PtrWidth::Bits64, &range(target, target + 1), true);
        assert_eq!(hits, vec![Match { vaddr: 0x1000 + 35 * 8, value: target }]);
    }

    #[test]
    fn zero_bitmap_chunk_is_skipped_entirely() {
        let bytes = vec![0u8; 8 * 40];
        let seg = Segment::new(0x1000, 0x2000, bytes, SegmentKind::Heap);
        seg.ensure_bitmap(PtrWidth::Bits64, |_| false);
        assert_eq!(scan_segment(&seg, PtrWidth::Bits64, &range(0, 1), true), Vec::new());
    }

    #[test]
    fn addressable_only_false_bypasses_bitmap_even_when_built() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&word(0x42)); // not a resolvable address
        let seg = Segment::new(0x1000, 0x1000, bytes, SegmentKind::Heap);
        seg.ensure_bitmap(PtrWidth::Bits64, |_| false); // bitmap says nothing resolves
        let hits = scan_segment(&seg, PtrWidth::Bits64, &range(0x42, 0x43), false);
        assert_eq!(hits, vec![Match { vaddr: 0x1000, value: 0x42 }]);
    }
}
