//! The read-only map of the inspected address space (§3, §4.1 bitmap).
//!
//! Grounded on `ptrace_dumper.rs`'s `MappingInfo` (a `/proc/pid/maps` row:
//! start/size/offset/exec-bit/name) and its `contains_address` helper; we
//! generalize that single-purpose struct into the segment table the search
//! engine scans, classified by storage kind instead of just "has exec bit".

use crate::address::{Address, PtrWidth};
use std::cell::RefCell;

/// What kind of storage a segment represents.
///
/// This is `OR`-able into a [`crate::reference::StorageMask`] to restrict a
/// scan to a subset of segment kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Stack,
    ModuleText,
    ModuleData,
    Heap,
    Unknown,
}

/// Identifies the thread a stack segment belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i32);

/// A per-segment lazily-built addressable-pointer bitmap (§3, §4.1).
///
/// One bit per `ptr_sz`-sized slot in `[0, fsize/ptr_sz)`; bit `i` is set iff
/// the word at offset `i*ptr_sz` is itself an address that resolves to *some*
/// segment. Stored as 32-bit chunks so the scanner can skip whole chunks at
/// once (§4.1 "addressable bitmap fast path").
#[derive(Debug, Default)]
pub struct Bitmap {
    chunks: Vec<u32>,
}

impl Bitmap {
    fn with_capacity(num_words: usize) -> Self {
        Self {
            chunks: vec![0u32; (num_words + 31) / 32],
        }
    }

    #[inline]
    fn set(&mut self, word_index: usize) {
        self.chunks[word_index >> 5] |= 1 << (word_index & 0x1f);
    }

    #[inline]
    pub fn chunk(&self, chunk_index: usize) -> u32 {
        self.chunks.get(chunk_index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

/// One mapped region of the inspected process's address space.
pub struct Segment {
    pub vaddr: Address,
    pub vsize: u64,
    /// Bytes actually backed by file/core contents; `fsize <= vsize`. The
    /// remainder of `vsize` (e.g. BSS) reads as zero and is never scanned.
    pub bytes: Vec<u8>,
    pub kind: SegmentKind,
    pub writable: bool,
    pub module_name: Option<String>,
    pub thread: Option<ThreadId>,
    bitmap: RefCell<Option<Bitmap>>,
}

impl Segment {
    pub fn new(vaddr: Address, vsize: u64, bytes: Vec<u8>, kind: SegmentKind) -> Self {
        assert!(bytes.len() as u64 <= vsize, "fsize must not exceed vsize");
        Self {
            vaddr,
            vsize,
            bytes,
            kind,
            writable: false,
            module_name: None,
            thread: None,
            bitmap: RefCell::new(None),
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    pub fn thread(mut self, tid: i32) -> Self {
        self.thread = Some(ThreadId(tid));
        self
    }

    #[inline]
    pub fn fsize(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub fn contains_address(&self, addr: Address, span: u64) -> bool {
        addr >= self.vaddr && addr + span <= self.vaddr + self.vsize
    }

    /// Reads a pointer-width word at file offset `offset` from the segment's
    /// bytes, or `None` if it falls past `fsize` (e.g. in the BSS tail).
    pub fn read_word(&self, ptr_width: PtrWidth, offset: usize) -> Option<Address> {
        if offset + ptr_width.bytes() > self.bytes.len() {
            return None;
        }
        Some(ptr_width.read_word(&self.bytes, offset))
    }

    /// Bitmap soundness (§8 invariant 2): rebuild is idempotent and derived
    /// solely from this segment's bytes plus `resolves` (a callback that
    /// answers "does this address land in some segment of the table").
    pub fn ensure_bitmap(&self, ptr_width: PtrWidth, resolves: impl Fn(Address) -> bool) {
        if self.bitmap.borrow().is_some() {
            return;
        }
        let ptr_sz = ptr_width.bytes();
        let num_words = self.bytes.len() / ptr_sz;
        let mut bitmap = Bitmap::with_capacity(num_words);
        for word_index in 0..num_words {
            let value = ptr_width.read_word(&self.bytes, word_index * ptr_sz);
            if resolves(value) {
                bitmap.set(word_index);
            }
        }
        *self.bitmap.borrow_mut() = Some(bitmap);
    }

    pub fn bitmap_ready(&self) -> bool {
        self.bitmap.borrow().is_some()
    }

    pub fn with_bitmap<R>(&self, f: impl FnOnce(&Bitmap) -> R) -> Option<R> {
        self.bitmap.borrow().as_ref().map(f)
    }

    /// Forces the bitmap to be rebuilt on next [`Segment::ensure_bitmap`]
    /// call. Used when the segment table is invalidated (target resumed,
    /// rerun).
    pub fn invalidate_bitmap(&self) {
        *self.bitmap.borrow_mut() = None;
    }
}

/// Reads a live segment's resident bytes through a caller-supplied reader,
/// reusing `scratch` instead of allocating one buffer per segment (§5: "The
/// scanner owns a reusable memory buffer ... for live-process reads").
///
/// Building the [`SegmentView`] itself is the segment/symbol provider's job
/// (§1 Non-goals: that provider is an external collaborator), but this
/// helper is offered to adapter authors so they aren't tempted to allocate
/// fresh per-segment buffers when assembling one.
///
/// Returns `None` (and leaves `scratch` untouched past its prior length) if
/// the read fails, mirroring "on failure the segment is skipped" (§4.1).
pub fn read_live_segment(
    scratch: &mut Vec<u8>,
    fsize: usize,
    mut read: impl FnMut(&mut [u8]) -> bool,
) -> Option<Vec<u8>> {
    if scratch.len() < fsize {
        scratch.resize(fsize, 0);
    }
    if !read(&mut scratch[..fsize]) {
        return None;
    }
    Some(scratch[..fsize].to_vec())
}

/// The full, ordered segment table for one frozen target.
pub struct SegmentView {
    pub ptr_width: PtrWidth,
    segments: Vec<Segment>,
}

impl SegmentView {
    pub fn new(ptr_width: PtrWidth, segments: Vec<Segment>) -> Self {
        Self { ptr_width, segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn ptr_size(&self) -> usize {
        self.ptr_width.bytes()
    }

    /// Finds the segment containing `[addr, addr+span)`, if any.
    pub fn segment_for(&self, addr: Address, span: u64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.contains_address(addr, span))
    }

    /// True iff `addr` lands inside any segment's virtual extent (used by
    /// the addressable bitmap to decide if a word "is an address").
    pub fn resolves(&self, addr: Address) -> bool {
        if addr == 0 {
            return false;
        }
        self.segments
            .iter()
            .any(|s| addr >= s.vaddr && addr < s.vaddr + s.vsize)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.kind == SegmentKind::Stack)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn word(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    #[test]
    fn bitmap_marks_only_resolvable_words() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&word(0)); // not an address
        bytes.extend_from_slice(&word(0x2000)); // resolves (inside heap segment below)
        bytes.extend_from_slice(&word(0xdead_beef)); // doesn't resolve

        let seg = Segment::new(0x1000, 0x1000, bytes, SegmentKind::Heap);
        let view = SegmentView::new(PtrWidth::Bits64, vec![seg]);
        // Build a second lookup context: a segment that spans 0x2000 so word 1 resolves.
        let resolves = |addr: Address| addr != 0 && (0x1000..0x3000).contains(&addr);
        view.segments()[0].ensure_bitmap(PtrWidth::Bits64, resolves);

        view.segments()[0]
            .with_bitmap(|b| {
                assert_eq!(b.chunk(0) & 0b111, 0b010);
            })
            .unwrap();
    }

    #[test]
    fn contains_address_respects_vsize_not_fsize() {
        let seg = Segment::new(0x1000, 0x2000, vec![0u8; 0x10], SegmentKind::ModuleData);
        assert!(seg.contains_address(0x1000, 8));
        assert!(seg.contains_address(0x2ff8, 8));
        assert!(!seg.contains_address(0x3000, 8));
    }
}
