use core::time::Duration;

use shmc::{
    error::{
        Error::Config,
        Result,
    },
    time::Hz,
};

/// Параметры счётчика jiffies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimerConfig {
    /// Частота jiffies --- количество jiffies в секунду.
    hz: Hz,

    /// На сколько jiffies продвигается счётчик за одно пробуждение его потока.
    jiffies_per_tick: u64,
}

impl TimerConfig {
    /// Частота jiffies по умолчанию.
    pub const DEFAULT_HZ: u64 = 250;

    /// Продвижение счётчика за одно пробуждение по умолчанию.
    pub const DEFAULT_JIFFIES_PER_TICK: u64 = 10;

    /// Проверяет параметры счётчика jiffies.
    pub fn new(
        hz: u64,
        jiffies_per_tick: u64,
    ) -> Result<Self> {
        let hz = Hz::new(hz).ok_or(Config("jiffies frequency must be positive"))?;

        if jiffies_per_tick == 0 {
            return Err(Config("jiffies per tick must be positive"));
        }

        Ok(Self {
            hz,
            jiffies_per_tick,
        })
    }

    /// Частота jiffies.
    pub fn hz(&self) -> Hz {
        self.hz
    }

    /// На сколько jiffies продвигается счётчик за одно пробуждение его потока.
    pub fn jiffies_per_tick(&self) -> u64 {
        self.jiffies_per_tick
    }

    /// Период пробуждений потока jiffies.
    pub fn tick_period(&self) -> Duration {
        self.hz.period(self.jiffies_per_tick)
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            hz: Hz::new(Self::DEFAULT_HZ).unwrap_or_else(|| unreachable!()),
            jiffies_per_tick: Self::DEFAULT_JIFFIES_PER_TICK,
        }
    }
}
