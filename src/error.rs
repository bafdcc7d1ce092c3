use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable error conditions.
///
/// Invariant violations (double free, refcount underflow, releasing a
/// slot lock the caller does not hold, cache exhaustion with every slot
/// pinned) are *not* represented here. They signal corruption-class
/// caller bugs and panic instead: continuing past them risks silent
/// data corruption.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("insufficient memory({0})")]
    InsufficientMemory(usize),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("IO Error")]
    IOError,
    #[error("block {1} out of range on device {0}")]
    BlockOutOfRange(u32, u64),
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(_src: std::io::Error) -> Self {
        Error::IOError
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(_src: toml::de::Error) -> Self {
        Error::InvalidConfig("malformed toml")
    }
}
