mod guard;
mod slot;

pub use guard::{BlockGuard, PinGuard};

use crate::alloc::Arena;
use crate::config::CacheConfig;
use crate::device::BlockDevice;
use crate::error::Result;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use slot::{BucketList, Slot, SlotId, SlotMeta, INVALID_SLOT_ID};

/// Fixed-capacity cache of disk blocks.
///
/// Slots are partitioned into hash buckets by block number. Lookup,
/// refcounting and bucket-list maintenance happen under the owning
/// bucket's short-held lock; slot contents are protected by a per-slot
/// blocking exclusive lock held across device I/O. On local bucket
/// exhaustion a free slot is migrated from another bucket; the source
/// bucket's lock is fully released before the target bucket's lock is
/// taken, so no code path ever holds two bucket locks and cross-bucket
/// deadlock is structurally impossible.
pub struct BlockCache<D: BlockDevice> {
    device: D,
    block_size: usize,
    slots: Box<[Slot]>,
    data: Arena,
    buckets: Box<[CachePadded<Mutex<BucketList>>]>,
}

impl<D: BlockDevice> BlockCache<D> {
    pub fn new(config: CacheConfig, device: D) -> Result<Self> {
        config.validate()?;
        let block_size = config.block_size.as_u64() as usize;
        let data = Arena::allocate(config.slot_count * block_size)?;
        let slots: Box<[Slot]> = (0..config.slot_count).map(|_| Slot::new()).collect();
        let buckets: Box<[_]> = (0..config.bucket_count)
            .map(|_| CachePadded::new(Mutex::new(BucketList::empty())))
            .collect();
        let cache = BlockCache {
            device,
            block_size,
            slots,
            data,
            buckets,
        };
        // Seed every slot into bucket 0; eviction-migration spreads
        // them to the buckets their blocks actually hash to.
        {
            let mut bucket = cache.buckets[0].lock();
            for id in 0..cache.slots.len() as SlotId {
                unsafe {
                    cache.link_front(&mut bucket, id);
                }
            }
        }
        log::info!(
            "bcache: {} slots of {} bytes across {} buckets",
            cache.slots.len(),
            block_size,
            cache.buckets.len()
        );
        Ok(cache)
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    fn bucket_of(&self, block: u64) -> usize {
        (block % self.buckets.len() as u64) as usize
    }

    /// Return a locked slot holding `(dev, block)`, the contents of the
    /// block read from the device if not already cached.
    pub fn read(&self, dev: u32, block: u64) -> Result<BlockGuard<'_, D>> {
        let mut guard = self.get(dev, block);
        if !guard.is_valid() {
            self.device.read(dev, block, guard.data_mut())?;
            unsafe {
                // Stable under the held slot lock; monotonic until the
                // slot is reassigned.
                (*self.slots[guard.slot() as usize].meta.get()).valid = true;
            }
        }
        Ok(guard)
    }

    /// Look up `(dev, block)`, assigning a slot if absent; returns with
    /// the slot's exclusive lock held and one reference taken.
    ///
    /// Panics when every slot in every bucket is referenced: the design
    /// assumes the pool always exceeds the number of concurrently
    /// pinned blocks, and violating that is a fault, not a recoverable
    /// error.
    fn get(&self, dev: u32, block: u64) -> BlockGuard<'_, D> {
        let target = self.bucket_of(block);
        {
            let bucket = self.buckets[target].lock();
            // Cached? Take a reference before dropping the bucket lock
            // so the slot cannot be recycled, then block on the slot.
            let mut id = bucket.head;
            while id != INVALID_SLOT_ID {
                let meta = self.slots[id as usize].meta.get();
                unsafe {
                    if (*meta).dev == dev && (*meta).block == block {
                        (*meta).refs += 1;
                        drop(bucket);
                        self.slots[id as usize].lock.lock();
                        return BlockGuard::new(self, id);
                    }
                    id = (*meta).next;
                }
            }
            // Not cached: recycle the least-recently-assigned free slot
            // of this bucket.
            let mut id = bucket.tail;
            while id != INVALID_SLOT_ID {
                let meta = self.slots[id as usize].meta.get();
                unsafe {
                    if (*meta).refs == 0 {
                        (*meta).dev = dev;
                        (*meta).block = block;
                        (*meta).valid = false;
                        (*meta).refs = 1;
                        drop(bucket);
                        self.slots[id as usize].lock.lock();
                        return BlockGuard::new(self, id);
                    }
                    id = (*meta).prev;
                }
            }
        }
        // Local bucket fully referenced: migrate a free slot from
        // another bucket, one bucket lock at a time.
        for source in 0..self.buckets.len() {
            if source == target {
                continue;
            }
            let mut bucket = self.buckets[source].lock();
            let mut id = bucket.head;
            while id != INVALID_SLOT_ID {
                let meta = self.slots[id as usize].meta.get();
                unsafe {
                    if (*meta).refs == 0 {
                        self.unlink(&mut bucket, id);
                        drop(bucket);
                        // The slot is reachable from no bucket here;
                        // this thread owns it outright.
                        log::debug!(
                            "bcache: migrating slot {} from bucket {} to {}",
                            id,
                            source,
                            target
                        );
                        let mut bucket = self.buckets[target].lock();
                        (*meta).dev = dev;
                        (*meta).block = block;
                        (*meta).valid = false;
                        (*meta).refs = 1;
                        self.link_front(&mut bucket, id);
                        drop(bucket);
                        self.slots[id as usize].lock.lock();
                        return BlockGuard::new(self, id);
                    }
                    id = (*meta).next;
                }
            }
        }
        panic!("bcache: no evictable slot, cache exhausted");
    }

    /// Pin `(dev, block)` without locking it: takes a reference that
    /// keeps the slot resident across multi-step operations.
    pub fn pin(&self, dev: u32, block: u64) -> Result<PinGuard<'_, D>> {
        let guard = self.read(dev, block)?;
        Ok(guard.pin())
    }

    pub(crate) fn data_ptr(&self, slot: SlotId) -> *mut u8 {
        unsafe { self.data.frame_ptr(slot as usize * self.block_size) }
    }

    /// Bump a resident slot's refcount under its bucket lock.
    pub(crate) fn bump_refs(&self, slot: SlotId) {
        let meta = self.slots[slot as usize].meta.get();
        let bucket = self.bucket_of(unsafe { (*meta).block });
        let _g = self.buckets[bucket].lock();
        unsafe {
            (*meta).refs += 1;
        }
    }

    /// Drop one reference under the owning bucket's lock.
    pub(crate) fn drop_refs(&self, slot: SlotId) {
        let meta = self.slots[slot as usize].meta.get();
        let bucket = self.bucket_of(unsafe { (*meta).block });
        let _g = self.buckets[bucket].lock();
        unsafe {
            if (*meta).refs == 0 {
                panic!("bcache: slot {} refcount underflow", slot);
            }
            (*meta).refs -= 1;
        }
    }

    /// Re-acquire the exclusive lock of a pinned slot.
    pub(crate) fn lock_pinned(&self, slot: SlotId) -> BlockGuard<'_, D> {
        self.bump_refs(slot);
        self.slots[slot as usize].lock.lock();
        BlockGuard::new(self, slot)
    }

    pub(crate) fn slot_lock(&self, slot: SlotId) -> &crate::latch::SleepLock {
        &self.slots[slot as usize].lock
    }

    pub(crate) fn slot_meta(&self, slot: SlotId) -> *mut SlotMeta {
        self.slots[slot as usize].meta.get()
    }

    pub(crate) fn write_slot(&self, slot: SlotId, dev: u32, block: u64) -> Result<()> {
        let data = unsafe {
            std::slice::from_raw_parts(self.data_ptr(slot), self.block_size)
        };
        self.device.write(dev, block, data)
    }

    /// Link `slot` at the head of `bucket`. Caller holds the bucket
    /// lock; `slot` must not be on any list.
    unsafe fn link_front(&self, bucket: &mut BucketList, slot: SlotId) {
        let meta = self.slots[slot as usize].meta.get();
        (*meta).prev = INVALID_SLOT_ID;
        (*meta).next = bucket.head;
        if bucket.head != INVALID_SLOT_ID {
            (*self.slots[bucket.head as usize].meta.get()).prev = slot;
        } else {
            bucket.tail = slot;
        }
        bucket.head = slot;
    }

    /// Unlink `slot` from `bucket`. Caller holds the bucket lock.
    unsafe fn unlink(&self, bucket: &mut BucketList, slot: SlotId) {
        let meta = self.slots[slot as usize].meta.get();
        let prev = (*meta).prev;
        let next = (*meta).next;
        if prev != INVALID_SLOT_ID {
            (*self.slots[prev as usize].meta.get()).next = next;
        } else {
            bucket.head = next;
        }
        if next != INVALID_SLOT_ID {
            (*self.slots[next as usize].meta.get()).prev = prev;
        } else {
            bucket.tail = prev;
        }
        (*meta).prev = INVALID_SLOT_ID;
        (*meta).next = INVALID_SLOT_ID;
    }
}
