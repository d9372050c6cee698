//! The tagged `ObjectReference` union (§3, Design Notes "Tagged location").
//!
//! The reference implementation packs this as a struct with a
//! `storage_type` discriminant plus an untagged `where` union; Design Notes
//! call this "the single largest source of bugs in the source design" (e.g.
//! `where.target.size` only valid for the synthetic root). We use a real
//! `enum` instead, so that invalid state (a `Heap` tag with `where.stack`
//! data) isn't representable.

use crate::address::Address;
use crate::segment::SegmentKind;

/// Where a located word's *value* points.
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    Register {
        tid: i32,
        reg_num: u32,
    },
    Stack {
        tid: i32,
        /// -1 if the symbol adapter couldn't resolve a frame for this address.
        frame: i32,
        offset: u64,
    },
    ModuleText {
        name: Option<String>,
        base: Address,
        size: u64,
    },
    ModuleData {
        name: Option<String>,
        base: Address,
        size: u64,
    },
    Heap {
        addr: Address,
        size: u64,
        inuse: bool,
    },
    /// Only ever used for the synthetic BFS root (§4.4/§4.5); `size` is the
    /// byte size of the object the search was seeded with.
    Target {
        size: u64,
    },
    Unknown,
}

impl Location {
    pub fn kind(&self) -> SegmentKind {
        match self {
            Location::Register { .. } => SegmentKind::Unknown, // registers have no segment
            Location::Stack { .. } => SegmentKind::Stack,
            Location::ModuleText { .. } => SegmentKind::ModuleText,
            Location::ModuleData { .. } => SegmentKind::ModuleData,
            Location::Heap { .. } => SegmentKind::Heap,
            Location::Target { .. } | Location::Unknown => SegmentKind::Unknown,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Location::Register { .. })
    }

    pub fn as_heap(&self) -> Option<(Address, u64, bool)> {
        match self {
            Location::Heap { addr, size, inuse } => Some((*addr, *size, *inuse)),
            _ => None,
        }
    }
}

/// One located, classified word in the inspected process.
///
/// `level`/`target_index` are populated only by the BFS traversals
/// (Horizontal/Vertical search, §4.4/§4.5); elsewhere they are `0`/`-1`.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectReference {
    pub level: u32,
    /// Index of the reference this one was discovered from; `-1` marks the
    /// synthetic root.
    pub target_index: i32,
    pub vaddr: Address,
    pub value: Address,
    pub location: Location,
}

impl ObjectReference {
    pub fn synthetic_root(vaddr: Address, size: u64) -> Self {
        Self {
            level: 0,
            target_index: -1,
            vaddr,
            value: 0,
            location: Location::Target { size },
        }
    }

    pub fn is_heap(&self) -> bool {
        matches!(self.location, Location::Heap { .. })
    }

    pub fn heap_addr(&self) -> Option<Address> {
        self.location.as_heap().map(|(addr, ..)| addr)
    }
}

/// Bitmask over [`SegmentKind`]-like storage classes, restricting which
/// segments [`crate::classifier::search_value_internal`] scans (§4.3).
///
/// `Register` is not a [`SegmentKind`] (registers live on the stack segment
/// but aren't memory words), so this is its own small bitmask type rather
/// than reusing `SegmentKind` directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StorageMask(u8);

impl StorageMask {
    pub const REGISTER: StorageMask = StorageMask(1 << 0);
    pub const STACK: StorageMask = StorageMask(1 << 1);
    pub const MODULE_TEXT: StorageMask = StorageMask(1 << 2);
    pub const MODULE_DATA: StorageMask = StorageMask(1 << 3);
    pub const HEAP: StorageMask = StorageMask(1 << 4);
    pub const UNKNOWN: StorageMask = StorageMask(1 << 5);

    pub const ALL: StorageMask = StorageMask(
        Self::REGISTER.0
            | Self::STACK.0
            | Self::MODULE_TEXT.0
            | Self::MODULE_DATA.0
            | Self::HEAP.0
            | Self::UNKNOWN.0,
    );

    /// Used by `find_object_refs_on_threads` (§6): registers and stacks only.
    pub const THREADS_ONLY: StorageMask = StorageMask(Self::REGISTER.0 | Self::STACK.0);

    pub const fn contains(self, other: StorageMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn contains_kind(self, kind: SegmentKind) -> bool {
        let bit = match kind {
            SegmentKind::Stack => Self::STACK.0,
            SegmentKind::ModuleText => Self::MODULE_TEXT.0,
            SegmentKind::ModuleData => Self::MODULE_DATA.0,
            SegmentKind::Heap => Self::HEAP.0,
            SegmentKind::Unknown => Self::UNKNOWN.0,
        };
        self.0 & bit != 0
    }
}

impl std::ops::BitOr for StorageMask {
    type Output = StorageMask;
    fn bitor(self, rhs: StorageMask) -> StorageMask {
        StorageMask(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn all_contains_every_kind() {
        for kind in [
            SegmentKind::Stack,
            SegmentKind::ModuleText,
            SegmentKind::ModuleData,
            SegmentKind::Heap,
            SegmentKind::Unknown,
        ] {
            assert!(StorageMask::ALL.contains_kind(kind));
        }
        assert!(StorageMask::ALL.contains(StorageMask::REGISTER));
    }

    #[test]
    fn threads_only_excludes_heap_and_modules() {
        assert!(StorageMask::THREADS_ONLY.contains_kind(SegmentKind::Stack));
        assert!(!StorageMask::THREADS_ONLY.contains_kind(SegmentKind::Heap));
        assert!(StorageMask::THREADS_ONLY.contains(StorageMask::REGISTER));
    }
}
