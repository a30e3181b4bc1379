/// Политика повторов для циклов compare-and-swap.
pub mod backoff;

/// Спин-блокировка над словом в разделяемой памяти.
pub mod lock;

pub use backoff::Backoff;
pub use lock::{
    SharedLock,
    SharedLockGuard,
};
