use std::{
    sync::OnceLock,
    thread,
    time::{
        Duration,
        Instant,
    },
};

use crate::error::{
    Error::{
        NotFound,
        Timeout,
    },
    Result,
};

/// Форматирование частот.
pub mod hz;

pub use hz::Hz;

/// Монотонное время в наносекундах от первого обращения к нему внутри процесса.
///
/// Используется для меток времени записей, которые сравниваются между потоками,
/// поэтому общая точка отсчёта важнее её абсолютного значения.
pub fn timestamp() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();

    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Момент, в который истекает `timeout`, отсчитанный от текущего.
/// Для очень больших `timeout` возвращает [`None`], то есть ждать нужно бесконечно.
pub fn deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Повторяет `attempt`, пока он возвращает [`Error::NotFound`](crate::Error::NotFound),
/// засыпая между попытками на [`POLL_INTERVAL`].
/// Если за `timeout` объект так и не нашёлся, возвращает [`Error::Timeout`](crate::Error::Timeout).
pub fn poll<T>(
    timeout: Duration,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    let deadline = deadline(timeout);

    loop {
        match attempt() {
            Err(NotFound) => {
                let now = Instant::now();
                if deadline.is_some_and(|deadline| now >= deadline) {
                    return Err(Timeout);
                }
                let pause = deadline.map_or(POLL_INTERVAL, |deadline| (deadline - now).min(POLL_INTERVAL));
                thread::sleep(pause);
            },
            result => return result,
        }
    }
}

/// Пауза между попытками [`poll()`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);
