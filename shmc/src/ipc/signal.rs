use core::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};
use std::{
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Instant,
};

use crate::{
    error::{
        Error::Timeout,
        Result,
    },
    time,
};

/// Объект уведомления, аналог прерывания, которое одна сторона посылает другой.
///
/// Срабатывает по фронту и не считает срабатывания:
/// несколько вызовов [`Signal::trigger()`] до очередного ожидания
/// сливаются в одно пробуждение.
/// Зато взведённый сигнал остаётся взведённым до ожидания,
/// так что срабатывание между проверкой условия и началом ожидания не теряется.
///
/// Клоны [`Signal`] ссылаются на один и тот же объект.
#[derive(Clone, Debug, Default)]
pub struct Signal(Arc<State>);

impl Signal {
    /// Создаёт невзведённый сигнал.
    pub fn new() -> Self {
        Self::default()
    }

    /// Взводит сигнал и будит ожидающий его поток.
    pub fn trigger(&self) {
        *self.pending() = true;
        self.0.triggers.fetch_add(1, Ordering::Relaxed);
        self.0.condvar.notify_all();
    }

    /// Ждёт срабатывания сигнала и сбрасывает его.
    pub fn wait(&self) {
        let mut pending = self.pending();

        while !*pending {
            pending = self.0.condvar.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }

        *pending = false;
    }

    /// Ждёт срабатывания сигнала не дольше `timeout` и сбрасывает его.
    /// Если сигнал так и не сработал, возвращает ошибку [`Error::Timeout`](crate::Error::Timeout).
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let Some(deadline) = time::deadline(timeout) else {
            self.wait();
            return Ok(());
        };

        let mut pending = self.pending();

        while !*pending {
            let now = Instant::now();
            if now >= deadline {
                return Err(Timeout);
            }

            pending = self
                .0
                .condvar
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        *pending = false;

        Ok(())
    }

    /// Сбрасывает сигнал, не дожидаясь его.
    /// Возвращает `true`, если сигнал был взведён.
    pub fn try_wait(&self) -> bool {
        let mut pending = self.pending();
        let was_pending = *pending;
        *pending = false;
        was_pending
    }

    /// Количество вызовов [`Signal::trigger()`] за всё время.
    pub fn triggers(&self) -> u64 {
        self.0.triggers.load(Ordering::Relaxed)
    }

    /// Флаг взведённости сигнала.
    fn pending(&self) -> MutexGuard<'_, bool> {
        self.0.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Общее состояние всех клонов [`Signal`].
#[derive(Debug, Default)]
struct State {
    /// Взведён ли сигнал.
    pending: Mutex<bool>,

    /// Будит ожидающих.
    condvar: Condvar,

    /// Количество срабатываний за всё время.
    triggers: AtomicU64,
}

#[cfg(test)]
mod test {
    use std::{
        thread,
        time::Duration,
    };

    use crate::error::Error;

    use super::Signal;

    #[test]
    fn coalescing() {
        let signal = Signal::new();

        signal.trigger();
        signal.trigger();
        signal.trigger();

        assert_eq!(signal.triggers(), 3);
        signal.wait();
        assert_eq!(signal.wait_timeout(Duration::from_millis(10)), Err(Error::Timeout));
        assert!(!signal.try_wait());
    }

    #[test]
    fn wakeup() {
        let signal = Signal::new();
        let peer = signal.clone();

        let waiter = thread::spawn(move || peer.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(10));
        signal.trigger();

        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
