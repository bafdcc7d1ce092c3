mod arena;
mod pool;

pub(crate) use arena::Arena;
pub use arena::{ALLOC_FILL, FREE_FILL};
pub use pool::{FrameId, FramePool, PageFrame, INVALID_FRAME_ID};

use crate::config::AllocConfig;
use crate::error::Result;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

static UNIT_SEQ: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static UNIT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Bind the calling thread to execution unit `unit`.
///
/// The unit selects the thread's local shard. Threads that never call
/// this get a unit assigned round-robin on first allocator use, which
/// spreads unrelated threads across shards; pinning is for callers
/// that model per-core placement (and for deterministic tests).
pub fn pin_unit(unit: usize) {
    UNIT.with(|u| u.set(Some(unit)));
}

/// Execution unit of the calling thread.
#[inline]
pub fn current_unit() -> usize {
    UNIT.with(|u| match u.get() {
        Some(unit) => unit,
        None => {
            let unit = UNIT_SEQ.fetch_add(1, Ordering::Relaxed);
            u.set(Some(unit));
            unit
        }
    })
}

/// Physical page allocator: a sharded pool of pages plus an optional,
/// fully independent pool of coarser superpages carved from the tail
/// of the same arena. Exhaustion of one pool never affects the other.
pub struct PageAllocator {
    // Keeps the mapping alive; both pools point into it.
    _arena: Arena,
    pages: FramePool,
    superpages: Option<FramePool>,
}

impl PageAllocator {
    pub fn new(config: AllocConfig) -> Result<Self> {
        config.validate()?;
        let total = config.pool_size.as_u64() as usize;
        let super_mem = config.super_mem.as_u64() as usize;
        let arena = Arena::allocate(total)?;

        let page_region = total - super_mem;
        let page_count = page_region / config.page_size;
        let pages = FramePool::new(
            "kmem",
            &arena,
            0,
            config.page_size,
            page_count,
            config.shard_count,
        );
        let superpages = if super_mem > 0 {
            let super_count = super_mem / config.super_page_size;
            Some(FramePool::new(
                "kmem_super",
                &arena,
                page_region,
                config.super_page_size,
                super_count,
                config.shard_count,
            ))
        } else {
            None
        };
        Ok(PageAllocator {
            _arena: arena,
            pages,
            superpages,
        })
    }

    #[inline]
    pub fn page_pool(&self) -> &FramePool {
        &self.pages
    }

    #[inline]
    pub fn super_pool(&self) -> Option<&FramePool> {
        self.superpages.as_ref()
    }

    /// Allocate one page, `None` when the pool is exhausted.
    #[inline]
    pub fn allocate(&self) -> Option<PageFrame> {
        self.pages.allocate(current_unit())
    }

    /// Drop one reference to a page.
    #[inline]
    pub fn free(&self, frame: PageFrame) {
        self.pages.free(current_unit(), frame);
    }

    /// Take another reference to a page about to be shared.
    #[inline]
    pub fn add_ref(&self, frame: &PageFrame) -> PageFrame {
        self.pages.add_ref(frame)
    }

    /// Allocate one superpage.
    ///
    /// Panics if the allocator was built without a superpage pool.
    #[inline]
    pub fn allocate_super(&self) -> Option<PageFrame> {
        self.super_pool_or_panic().allocate(current_unit())
    }

    /// Drop one reference to a superpage.
    #[inline]
    pub fn free_super(&self, frame: PageFrame) {
        self.super_pool_or_panic().free(current_unit(), frame);
    }

    /// Take another reference to a superpage.
    #[inline]
    pub fn add_ref_super(&self, frame: &PageFrame) -> PageFrame {
        self.super_pool_or_panic().add_ref(frame)
    }

    #[inline]
    fn super_pool_or_panic(&self) -> &FramePool {
        self.superpages
            .as_ref()
            .expect("superpage pool not configured")
    }
}
