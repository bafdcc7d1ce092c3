use crate::cache::slot::SlotId;
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use crate::error::Result;

/// Exclusive access to one cached block.
///
/// Holds the slot's exclusive lock and one reference. Dropping the
/// guard releases the lock and then drops the reference under the
/// owning bucket's lock, on every exit path. The guard's existence is
/// the proof-of-lock that device writes require.
#[must_use = "dropping the guard releases the block"]
pub struct BlockGuard<'a, D: BlockDevice> {
    cache: &'a BlockCache<D>,
    slot: SlotId,
}

impl<'a, D: BlockDevice> BlockGuard<'a, D> {
    #[inline]
    pub(crate) fn new(cache: &'a BlockCache<D>, slot: SlotId) -> Self {
        debug_assert!(cache.slot_lock(slot).held_by_current());
        BlockGuard { cache, slot }
    }

    #[inline]
    pub(crate) fn slot(&self) -> SlotId {
        self.slot
    }

    /// Device the block belongs to. Identity is stable while the guard
    /// (or any pin) exists.
    #[inline]
    pub fn dev(&self) -> u32 {
        unsafe { (*self.cache.slot_meta(self.slot)).dev }
    }

    #[inline]
    pub fn block(&self) -> u64 {
        unsafe { (*self.cache.slot_meta(self.slot)).block }
    }

    /// Whether the slot contents reflect the device.
    #[inline]
    pub fn is_valid(&self) -> bool {
        unsafe { (*self.cache.slot_meta(self.slot)).valid }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.cache.data_ptr(self.slot), self.cache.block_size())
        }
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.cache.data_ptr(self.slot), self.cache.block_size())
        }
    }

    /// Synchronously write the slot contents to the device.
    #[inline]
    pub fn write(&self) -> Result<()> {
        self.cache.write_slot(self.slot, self.dev(), self.block())
    }

    /// Take a pin on the block: a reference independent of the
    /// exclusive lock, keeping the slot resident while the caller
    /// releases and re-acquires the lock across a multi-step
    /// operation.
    #[inline]
    pub fn pin(&self) -> PinGuard<'a, D> {
        self.cache.bump_refs(self.slot);
        PinGuard {
            cache: self.cache,
            slot: self.slot,
        }
    }
}

impl<D: BlockDevice> Drop for BlockGuard<'_, D> {
    fn drop(&mut self) {
        self.cache.slot_lock(self.slot).unlock();
        self.cache.drop_refs(self.slot);
    }
}

/// Reference to a cached block without the exclusive lock.
///
/// Keeps the slot's identity stable and the slot unevictable. Dropping
/// the pin drops the reference under the owning bucket's lock.
#[must_use = "dropping the pin makes the block evictable again"]
pub struct PinGuard<'a, D: BlockDevice> {
    cache: &'a BlockCache<D>,
    slot: SlotId,
}

impl<'a, D: BlockDevice> PinGuard<'a, D> {
    #[inline]
    pub fn dev(&self) -> u32 {
        unsafe { (*self.cache.slot_meta(self.slot)).dev }
    }

    #[inline]
    pub fn block(&self) -> u64 {
        unsafe { (*self.cache.slot_meta(self.slot)).block }
    }

    /// Block until the slot's exclusive lock is re-acquired, returning
    /// a fresh guard. The pin itself stays held.
    #[inline]
    pub fn lock(&self) -> BlockGuard<'a, D> {
        self.cache.lock_pinned(self.slot)
    }
}

impl<D: BlockDevice> Drop for PinGuard<'_, D> {
    fn drop(&mut self) {
        self.cache.drop_refs(self.slot);
    }
}
