use crate::alloc::arena::{Arena, ALLOC_FILL, FREE_FILL};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

pub type FrameId = u32;
pub const INVALID_FRAME_ID: FrameId = u32::MAX;

/// Handle to one allocated frame.
///
/// Deliberately neither `Copy` nor `Clone`: the handle is the
/// capability that must be passed back to `free`, and sharing goes
/// through `add_ref` which hands out an independent handle backed by
/// the bumped refcount.
pub struct PageFrame {
    id: FrameId,
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for PageFrame {}
unsafe impl Sync for PageFrame {}

impl PageFrame {
    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the frame memory as bytes.
    ///
    /// # Safety
    ///
    /// Caller must guarantee no concurrent writer exists. The pool does
    /// not serialize access to allocated frame contents; with `add_ref`
    /// sharing, coordination is the caller's job (e.g. copy-on-write
    /// only ever reads shared frames).
    #[inline]
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Mutable view of the frame memory.
    ///
    /// # Safety
    ///
    /// Caller must guarantee exclusive access, see [`PageFrame::bytes`].
    #[inline]
    pub unsafe fn bytes_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

/// Per-frame bookkeeping, kept out of the frame memory itself so frame
/// contents stay fully owned by callers.
///
/// `next_free` is only read or written while the frame sits on exactly
/// one shard's free list, under that shard's lock, or while the frame
/// is exclusively owned in transit during a steal.
struct FrameMeta {
    refcount: AtomicU32,
    next_free: UnsafeCell<FrameId>,
}

unsafe impl Sync for FrameMeta {}

impl FrameMeta {
    #[inline]
    fn new() -> Self {
        FrameMeta {
            refcount: AtomicU32::new(0),
            next_free: UnsafeCell::new(INVALID_FRAME_ID),
        }
    }
}

/// LIFO free list, arena-indexed. `tail` is tracked so an entire list
/// can be spliced into another in O(1) during stealing.
struct FreeList {
    head: FrameId,
    tail: FrameId,
    len: usize,
}

impl FreeList {
    #[inline]
    const fn empty() -> Self {
        FreeList {
            head: INVALID_FRAME_ID,
            tail: INVALID_FRAME_ID,
            len: 0,
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.head == INVALID_FRAME_ID
    }
}

/// Fixed pool of equally sized frames partitioned into lock-sharded
/// free lists.
///
/// The fast paths (local pop, local push) touch only the calling
/// unit's shard. On local exhaustion the allocator visits every other
/// shard in index order and steals its whole free list as a single
/// head/tail exchange; no code path ever holds two shard locks at
/// once.
pub struct FramePool {
    name: &'static str,
    base: *mut u8,
    frame_size: usize,
    frame_count: usize,
    metas: Box<[FrameMeta]>,
    shards: Box<[CachePadded<Mutex<FreeList>>]>,
}

unsafe impl Send for FramePool {}
unsafe impl Sync for FramePool {}

impl FramePool {
    /// Build a pool over `frame_count` frames of `frame_size` bytes
    /// starting at `base`. All frames are seeded into shard 0; stealing
    /// redistributes them on demand.
    ///
    /// `base` must stay valid for the pool's lifetime; the owning
    /// arena is kept alive by the allocator facade.
    pub(crate) fn new(
        name: &'static str,
        arena: &Arena,
        region_offset: usize,
        frame_size: usize,
        frame_count: usize,
        shard_count: usize,
    ) -> Self {
        debug_assert!(region_offset + frame_count * frame_size <= arena.len());
        let metas: Box<[FrameMeta]> = (0..frame_count).map(|_| FrameMeta::new()).collect();
        let mut seed = FreeList::empty();
        for id in 0..frame_count as FrameId {
            unsafe {
                *metas[id as usize].next_free.get() = seed.head;
            }
            if seed.is_empty() {
                seed.tail = id;
            }
            seed.head = id;
            seed.len += 1;
        }
        let shards: Box<[_]> = (0..shard_count)
            .map(|i| {
                let list = if i == 0 {
                    std::mem::replace(&mut seed, FreeList::empty())
                } else {
                    FreeList::empty()
                };
                CachePadded::new(Mutex::new(list))
            })
            .collect();
        log::info!(
            "{}: pool initialized, {} frames of {} bytes across {} shards",
            name,
            frame_count,
            frame_size,
            shard_count
        );
        FramePool {
            name,
            base: unsafe { arena.frame_ptr(region_offset) },
            frame_size,
            frame_count,
            metas,
            shards,
        }
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total free frames across all shards. Racy by nature; intended
    /// for diagnostics and tests running in quiescent states.
    pub fn free_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len).sum()
    }

    #[cfg(test)]
    pub(crate) fn shard_len(&self, shard: usize) -> usize {
        self.shards[shard].lock().len
    }

    /// Allocate one frame on behalf of execution unit `unit`.
    ///
    /// Returns `None` when the whole pool, after stealing, is empty.
    /// Exhaustion is a normal recoverable outcome.
    pub fn allocate(&self, unit: usize) -> Option<PageFrame> {
        let local = unit % self.shards.len();
        let id = match self.pop(local) {
            Some(id) => id,
            None => self.steal_then_pop(local)?,
        };
        let meta = &self.metas[id as usize];
        debug_assert_eq!(meta.refcount.load(Ordering::Relaxed), 0);
        meta.refcount.store(1, Ordering::Release);
        unsafe {
            let ptr = self.frame_ptr(id);
            std::ptr::write_bytes(ptr, ALLOC_FILL, self.frame_size);
            Some(PageFrame {
                id,
                ptr: NonNull::new_unchecked(ptr),
                len: self.frame_size,
            })
        }
    }

    /// Drop one reference to `frame` on behalf of execution unit
    /// `unit`. When the last reference goes, the memory is junk-filled
    /// and pushed onto `unit`'s shard, wherever the frame was
    /// originally allocated from.
    ///
    /// Panics on a misaligned or out-of-range address and on a frame
    /// whose refcount is already zero (double free).
    pub fn free(&self, unit: usize, frame: PageFrame) {
        let id = self.checked_frame_id(frame.as_ptr());
        debug_assert_eq!(id, frame.id);
        let meta = &self.metas[id as usize];
        let prev = meta
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .unwrap_or_else(|_| panic!("{}: double free of frame {}", self.name, id));
        if prev == 1 {
            unsafe {
                std::ptr::write_bytes(self.frame_ptr(id), FREE_FILL, self.frame_size);
            }
            self.push(unit % self.shards.len(), id);
        }
    }

    /// Take another reference to an allocated frame, e.g. to share it
    /// copy-on-write. Returns an independent handle; each handle must
    /// eventually be passed to `free`.
    ///
    /// Panics if the frame is currently free: sharing a free frame is
    /// a caller bug.
    pub fn add_ref(&self, frame: &PageFrame) -> PageFrame {
        let id = self.checked_frame_id(frame.as_ptr());
        let meta = &self.metas[id as usize];
        meta.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v == 0 {
                    None
                } else {
                    Some(v + 1)
                }
            })
            .unwrap_or_else(|_| panic!("{}: add_ref on free frame {}", self.name, id));
        PageFrame {
            id,
            ptr: frame.ptr,
            len: frame.len,
        }
    }

    /// Current refcount of a frame, for diagnostics and tests.
    #[inline]
    pub fn ref_count(&self, frame: &PageFrame) -> u32 {
        self.metas[frame.id as usize].refcount.load(Ordering::Acquire)
    }

    #[inline]
    unsafe fn frame_ptr(&self, id: FrameId) -> *mut u8 {
        self.base.add(id as usize * self.frame_size)
    }

    /// Map an address back to its frame id, with the fatal structural
    /// checks from the free path.
    fn checked_frame_id(&self, ptr: *const u8) -> FrameId {
        let addr = ptr as usize;
        let base = self.base as usize;
        if addr < base || addr >= base + self.frame_count * self.frame_size {
            panic!("{}: frame address {:#x} out of range", self.name, addr);
        }
        let offset = addr - base;
        if offset % self.frame_size != 0 {
            panic!("{}: misaligned frame address {:#x}", self.name, addr);
        }
        (offset / self.frame_size) as FrameId
    }

    fn pop(&self, shard: usize) -> Option<FrameId> {
        let mut list = self.shards[shard].lock();
        if list.is_empty() {
            return None;
        }
        let id = list.head;
        unsafe {
            list.head = *self.metas[id as usize].next_free.get();
        }
        if list.head == INVALID_FRAME_ID {
            list.tail = INVALID_FRAME_ID;
        }
        list.len -= 1;
        Some(id)
    }

    fn push(&self, shard: usize, id: FrameId) {
        let mut list = self.shards[shard].lock();
        unsafe {
            *self.metas[id as usize].next_free.get() = list.head;
        }
        if list.is_empty() {
            list.tail = id;
        }
        list.head = id;
        list.len += 1;
    }

    /// Visit every remote shard in index order. The first one holding
    /// free frames gets its entire list taken in a single head/tail
    /// exchange. One frame is claimed for the caller straight from the
    /// stolen list; only the remainder is spliced into the local shard,
    /// where a concurrent thief could raid it again. The remote lock is
    /// fully released before the local lock is taken.
    fn steal_then_pop(&self, local: usize) -> Option<FrameId> {
        for shard in 0..self.shards.len() {
            if shard == local {
                continue;
            }
            let mut stolen = {
                let mut list = self.shards[shard].lock();
                if list.is_empty() {
                    continue;
                }
                std::mem::replace(&mut *list, FreeList::empty())
            };
            log::debug!(
                "{}: shard {} stole {} frames from shard {}",
                self.name,
                local,
                stolen.len,
                shard
            );
            // Stolen frames are unreachable from any shard, so the list
            // can be edited without holding a lock.
            let id = stolen.head;
            unsafe {
                stolen.head = *self.metas[id as usize].next_free.get();
            }
            if stolen.head == INVALID_FRAME_ID {
                stolen.tail = INVALID_FRAME_ID;
            }
            stolen.len -= 1;
            if !stolen.is_empty() {
                let mut list = self.shards[local].lock();
                if !list.is_empty() {
                    unsafe {
                        *self.metas[stolen.tail as usize].next_free.get() = list.head;
                    }
                } else {
                    list.tail = stolen.tail;
                }
                list.head = stolen.head;
                list.len += stolen.len;
            }
            return Some(id);
        }
        None
    }
}
