use event_listener::{listener, Event, IntoNotification, Listener};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const NO_OWNER: u64 = 0;

thread_local! {
    static THREAD_TOKEN: u64 = next_thread_token();
}

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_thread_token() -> u64 {
    TOKEN_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Token identifying the current thread for lock-ownership checks.
#[inline]
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// Blocking exclusive lock held across device I/O and across a caller's
/// multi-operation use of a buffer slot.
///
/// Unlike a short-held mutex, waiters park on an event instead of
/// spinning, and the lock records its owning thread so that an unlock
/// by a non-owner is detected as a fatal caller bug.
pub struct SleepLock {
    locked: Mutex<bool>,
    event: Event,
    owner: AtomicU64,
}

impl SleepLock {
    #[inline]
    pub fn new() -> Self {
        SleepLock {
            locked: Mutex::new(false),
            event: Event::new(),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// Acquire the lock, blocking until it is free.
    pub fn lock(&self) {
        loop {
            {
                let mut locked = self.locked.lock();
                if !*locked {
                    *locked = true;
                    self.owner.store(thread_token(), Ordering::Release);
                    return;
                }
            }
            listener!(self.event => listener);
            // re-check after registering, the holder may have left.
            {
                let mut locked = self.locked.lock();
                if !*locked {
                    *locked = true;
                    self.owner.store(thread_token(), Ordering::Release);
                    return;
                }
            }
            listener.wait();
        }
    }

    /// Try to acquire the lock without blocking.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            return false;
        }
        *locked = true;
        self.owner.store(thread_token(), Ordering::Release);
        true
    }

    /// Release the lock.
    ///
    /// Panics if the calling thread does not hold it.
    pub fn unlock(&self) {
        if !self.held_by_current() {
            panic!("sleep lock released by non-owner");
        }
        self.owner.store(NO_OWNER, Ordering::Release);
        {
            let mut locked = self.locked.lock();
            *locked = false;
        }
        self.event.notify(1usize.relaxed());
    }

    /// Whether the calling thread holds the lock.
    #[inline]
    pub fn held_by_current(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

impl Default for SleepLock {
    #[inline]
    fn default() -> Self {
        SleepLock::new()
    }
}
