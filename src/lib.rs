pub mod alloc;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod latch;

pub mod prelude {
    pub use crate::alloc::{pin_unit, PageAllocator, PageFrame};
    pub use crate::cache::{BlockCache, BlockGuard, PinGuard};
    pub use crate::config::{AllocConfig, CacheConfig};
    pub use crate::device::{BlockDevice, MemDevice};
    pub use crate::error::{Error, Result};
}
