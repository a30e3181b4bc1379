use core::sync::atomic::{
    AtomicU64,
    Ordering,
};

use crate::log::trace;

use super::backoff::Backoff;

/// [Спин-блокировка](https://en.wikipedia.org/wiki/Spinlock),
/// слово которой лежит в разделяемой памяти.
///
/// Сама блокировка не владеет защищаемыми данными,
/// так как они тоже лежат в разделяемой памяти.
/// Она только сериализует тех, кто её захватывает.
#[derive(Debug)]
pub struct SharedLock<'a> {
    /// Слово блокировки: [`SharedLock::FREE`] или [`SharedLock::TAKEN`].
    word: &'a AtomicU64,
}

impl<'a> SharedLock<'a> {
    /// Значение слова свободной блокировки.
    pub const FREE: u64 = 0;

    /// Значение слова захваченной блокировки.
    pub const TAKEN: u64 = 1;

    /// Создаёт блокировку над словом `word`.
    pub fn new(word: &'a AtomicU64) -> Self {
        Self { word }
    }

    /// Захватывает блокировку, ожидая её освобождения с помощью [`Backoff`].
    pub fn lock(&self) -> SharedLockGuard<'a> {
        let mut backoff = Backoff::new();

        loop {
            if let Some(guard) = self.try_lock() {
                if backoff.attempts() > 0 {
                    trace!(attempts = backoff.attempts(), "shared lock contended");
                }
                return guard;
            }

            while self.word.load(Ordering::Relaxed) != Self::FREE {
                backoff.snooze();
            }
        }
    }

    /// Пытается захватить блокировку.
    /// Если она уже захвачена, возвращает [`None`].
    pub fn try_lock(&self) -> Option<SharedLockGuard<'a>> {
        self.word
            .compare_exchange(Self::FREE, Self::TAKEN, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SharedLockGuard { word: self.word })
    }
}

/// Захваченная [`SharedLock`], освобождается в реализации типажа [`Drop`].
#[derive(Debug)]
pub struct SharedLockGuard<'a> {
    /// Слово блокировки.
    word: &'a AtomicU64,
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.word.store(SharedLock::FREE, Ordering::Release);
    }
}
