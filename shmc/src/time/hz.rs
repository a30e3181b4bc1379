use core::{
    fmt::{
        Display,
        Formatter,
        Result,
    },
    num::NonZeroU64,
    time::Duration,
};

use number_prefix::NumberPrefix;

/// [Частота](https://en.wikipedia.org/wiki/Hertz) периодического события,
/// например тиков счётчика jiffies.
/// Умеет форматироваться при журналировании.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct Hz(NonZeroU64);

impl Hz {
    /// Возвращает [`Some`] для ненулевой частоты
    /// `hz` [Герц](https://en.wikipedia.org/wiki/Hertz).
    pub fn new(hz: u64) -> Option<Self> {
        NonZeroU64::new(hz).map(Hz)
    }

    /// Возвращает содержащееся значение частоты в
    /// [Герцах](https://en.wikipedia.org/wiki/Hertz).
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Длительность `ticks` периодов этой частоты.
    pub fn period(
        &self,
        ticks: u64,
    ) -> Duration {
        let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(self.get());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Количество полных периодов этой частоты в `duration`, округлённое вверх.
    pub fn ticks(
        &self,
        duration: Duration,
    ) -> u64 {
        let ticks = (duration.as_nanos() * u128::from(self.get())).div_ceil(1_000_000_000);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

impl Display for Hz {
    fn fmt(
        &self,
        formatter: &mut Formatter,
    ) -> Result {
        let hz = self.get();
        match NumberPrefix::decimal(hz as f64) {
            NumberPrefix::Standalone(_) => {
                write!(formatter, "{hz} Hz")
            },
            NumberPrefix::Prefixed(prefix, value) => {
                write!(formatter, "{value:.3} {}Hz", prefix.symbol())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use core::time::Duration;

    use super::Hz;

    #[test]
    fn conversions() {
        let hz = Hz::new(250).unwrap();

        assert_eq!(hz.to_string(), "250 Hz");
        assert_eq!(Hz::new(2_500).unwrap().to_string(), "2.500 kHz");
        assert_eq!(Hz::new(0), None);

        assert_eq!(hz.period(10), Duration::from_millis(40));
        assert_eq!(hz.ticks(Duration::from_millis(40)), 10);
        assert_eq!(hz.ticks(Duration::from_millis(41)), 11);
        assert_eq!(hz.ticks(Duration::ZERO), 0);
    }
}
