use crate::error::{Error, Result};
use libc::{
    c_void, madvise, mmap, munmap, MADV_DONTFORK, MADV_HUGEPAGE, MAP_ANONYMOUS, MAP_FAILED,
    MAP_PRIVATE, PROT_READ, PROT_WRITE,
};

/// Byte written over a frame when it is handed out, so code relying on
/// zeroed or residual contents fails loudly.
pub const ALLOC_FILL: u8 = 5;
/// Byte written over a frame when its last reference is dropped, so
/// dangling users read junk instead of stale data.
pub const FREE_FILL: u8 = 1;

/// Contiguous mmap-backed memory range carved into equally sized
/// frames. The arena itself knows nothing about allocation state; the
/// pool tracks that in a separate metadata table.
pub(crate) struct Arena {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub(crate) fn allocate(total_bytes: usize) -> Result<Arena> {
        let base = unsafe {
            let chunk = mmap(
                std::ptr::null_mut(),
                total_bytes,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            );
            if chunk == MAP_FAILED {
                return Err(Error::InsufficientMemory(total_bytes));
            }
            madvise(chunk, total_bytes, MADV_HUGEPAGE);
            madvise(chunk, total_bytes, MADV_DONTFORK);
            chunk as *mut u8
        };
        Ok(Arena {
            base,
            len: total_bytes,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Base pointer of the frame at `offset` bytes into the arena.
    ///
    /// Caller must guarantee `offset + frame_size <= len`.
    #[inline]
    pub(crate) unsafe fn frame_ptr(&self, offset: usize) -> *mut u8 {
        self.base.add(offset)
    }

    /// Overwrite one frame with a fill byte.
    #[inline]
    pub(crate) unsafe fn fill_frame(&self, offset: usize, frame_size: usize, fill: u8) {
        std::ptr::write_bytes(self.frame_ptr(offset), fill, frame_size);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            munmap(self.base as *mut c_void, self.len);
        }
    }
}
