use core::hint;
use std::thread;

/// Политика повторов для циклов [compare-and-swap](https://en.wikipedia.org/wiki/Compare-and-swap).
///
/// Первые [`Backoff::SPIN_LIMIT`] неудачных попыток
/// ждёт в активном цикле с подсказкой процессору [`hint::spin_loop()`],
/// дальше каждая попытка уступает процессор другим потокам.
#[derive(Debug, Default)]
pub struct Backoff {
    /// Количество неудачных попыток.
    attempts: usize,
}

impl Backoff {
    /// Количество неудачных попыток, после которого [`Backoff::snooze()`]
    /// начинает уступать процессор.
    pub const SPIN_LIMIT: usize = 64;

    /// Создаёт политику повторов без неудачных попыток.
    pub const fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Регистрирует очередную неудачную попытку и ждёт перед следующей.
    pub fn snooze(&mut self) {
        if self.attempts < Self::SPIN_LIMIT {
            hint::spin_loop();
        } else {
            thread::yield_now();
        }

        self.attempts = self.attempts.saturating_add(1);
    }

    /// Количество неудачных попыток.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Возвращает `true`, если попытки уже уступают процессор.
    pub fn is_yielding(&self) -> bool {
        self.attempts >= Self::SPIN_LIMIT
    }
}
