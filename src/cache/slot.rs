use crate::latch::SleepLock;
use std::cell::UnsafeCell;

pub(crate) type SlotId = u32;
pub(crate) const INVALID_SLOT_ID: SlotId = u32::MAX;

/// Identity placed on a freshly initialized slot. Never matches a real
/// lookup, so seeded slots cannot be mistaken for cached blocks.
pub(crate) const UNBOUND_DEV: u32 = u32::MAX;
pub(crate) const UNBOUND_BLOCK: u64 = u64::MAX;

/// Mutable slot state guarded by the owning bucket's lock.
///
/// `dev`/`block`/`valid` are additionally stable (readable without the
/// bucket lock) while the reader holds a reference obtained via the
/// cache lookup: identity cannot change while `refs > 0`.
pub(crate) struct SlotMeta {
    pub dev: u32,
    pub block: u64,
    /// Whether the slot contents reflect the device. Monotonic: once
    /// set it is only cleared by reassignment to another block.
    pub valid: bool,
    /// Pin count. Evictable only at zero.
    pub refs: u32,
    pub prev: SlotId,
    pub next: SlotId,
}

pub(crate) struct Slot {
    pub meta: UnsafeCell<SlotMeta>,
    /// Exclusive access to the slot contents, held across device I/O.
    pub lock: SleepLock,
}

unsafe impl Sync for Slot {}

impl Slot {
    #[inline]
    pub(crate) fn new() -> Self {
        Slot {
            meta: UnsafeCell::new(SlotMeta {
                dev: UNBOUND_DEV,
                block: UNBOUND_BLOCK,
                valid: false,
                refs: 0,
                prev: INVALID_SLOT_ID,
                next: INVALID_SLOT_ID,
            }),
            lock: SleepLock::new(),
        }
    }
}

/// Doubly-linked list of slots assigned to one bucket, arena-indexed.
/// Order records recency of last (re)assignment, not of access.
pub(crate) struct BucketList {
    pub head: SlotId,
    pub tail: SlotId,
}

impl BucketList {
    #[inline]
    pub(crate) const fn empty() -> Self {
        BucketList {
            head: INVALID_SLOT_ID,
            tail: INVALID_SLOT_ID,
        }
    }
}
