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
        mpsc::{
            self,
            RecvTimeoutError,
        },
    },
    thread::{
        self,
        JoinHandle,
    },
    time::Instant,
};

use shmc::{
    error::Result,
    log::{
        debug,
        error,
    },
};

use crate::config::TimerConfig;

/// Счётчик jiffies --- тиков с момента запуска службы таймеров.
/// Клоны ссылаются на один и тот же счётчик.
#[derive(Clone, Debug, Default)]
pub struct Jiffies(Arc<AtomicU64>);

impl Jiffies {
    /// Создаёт счётчик с нулевым значением.
    pub fn new() -> Self {
        Self::default()
    }

    /// Текущее значение счётчика.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Продвигает счётчик на `jiffies` и возвращает новое значение.
    pub fn advance(
        &self,
        jiffies: u64,
    ) -> u64 {
        self.0.fetch_add(jiffies, Ordering::AcqRel) + jiffies
    }
}

/// Поток, который продвигает [`Jiffies`] на
/// [`TimerConfig::jiffies_per_tick()`] каждые [`TimerConfig::tick_period()`].
///
/// Моменты пробуждения отсчитываются от момента запуска, а не от предыдущего пробуждения,
/// поэтому задержки отдельных пробуждений не накапливаются.
/// Поток останавливается и дожидается при удалении [`JiffiesThread`].
#[derive(Debug)]
pub struct JiffiesThread {
    /// Канал остановки потока.
    stop: Option<mpsc::Sender<()>>,

    /// Поток.
    thread: Option<JoinHandle<()>>,
}

impl JiffiesThread {
    /// Запускает поток, продвигающий `jiffies`.
    pub fn spawn(
        jiffies: Jiffies,
        config: TimerConfig,
    ) -> Result<Self> {
        let (stop, stopped) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("ddekit.jiffies".into())
            .spawn(move || run(&jiffies, config, &stopped))
            .map_err(|error| {
                error!(?error, "failed to spawn the jiffies thread");
                shmc::Error::NoMemory
            })?;

        debug!(
            hz = %config.hz(),
            jiffies_per_tick = config.jiffies_per_tick(),
            tick_period = ?config.tick_period(),
            "start jiffies thread"
        );

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for JiffiesThread {
    fn drop(&mut self) {
        // Закрытие канала будит поток.
        self.stop.take();

        if let Some(thread) = self.thread.take() &&
            thread.join().is_err()
        {
            error!("jiffies thread panicked");
        }

        debug!("stop jiffies thread");
    }
}

/// Тело потока jiffies.
fn run(
    jiffies: &Jiffies,
    config: TimerConfig,
    stopped: &mpsc::Receiver<()>,
) {
    let start = Instant::now();
    let mut ticks = 0_u32;

    loop {
        ticks = ticks.saturating_add(1);
        let deadline = start + config.tick_period().saturating_mul(ticks);
        let timeout = deadline.saturating_duration_since(Instant::now());

        match stopped.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                jiffies.advance(config.jiffies_per_tick());
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Переводит `ms` миллисекунд в jiffies частоты из `config`, округляя вверх.
pub fn ms_to_jiffies(
    config: &TimerConfig,
    ms: u64,
) -> u64 {
    config.hz().ticks(Duration::from_millis(ms))
}

/// Переводит `jiffies` в миллисекунды для частоты из `config`, округляя вниз.
pub fn jiffies_to_ms(
    config: &TimerConfig,
    jiffies: u64,
) -> u64 {
    u64::try_from(config.hz().period(jiffies).as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod test {
    use super::{
        TimerConfig,
        jiffies_to_ms,
        ms_to_jiffies,
    };

    #[test]
    fn conversions() {
        let config = TimerConfig::default();

        assert_eq!(ms_to_jiffies(&config, 1000), 250);
        assert_eq!(ms_to_jiffies(&config, 1), 1);
        assert_eq!(ms_to_jiffies(&config, 0), 0);

        assert_eq!(jiffies_to_ms(&config, 250), 1000);
        assert_eq!(jiffies_to_ms(&config, 10), 40);
        assert_eq!(jiffies_to_ms(&config, 1), 4);
    }
}
