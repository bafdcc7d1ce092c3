mod sleep;

pub use sleep::SleepLock;
