use core::str::FromStr;

use derive_more::Display;

use shmc::{
    error::{
        Error::Config,
        Result,
    },
    memory::size::{
        self,
        WORD,
    },
};

use crate::list::{
    HEADER_SIZE,
    TIMESTAMP_SIZE,
};

/// Геометрия списка: размер записи и их количество.
///
/// Записывается строкой `"<element_size>:<count>"`, например `"64:1024"`.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display("{}:{}", element_size, count)]
pub struct ListConfig {
    /// Размер записи вместе с меткой времени, кратный 8 байтам.
    element_size: usize,

    /// Количество записей.
    count: usize,
}

impl ListConfig {
    /// Минимальное количество записей в списке.
    pub const MIN_COUNT: usize = 2;

    /// Максимальное количество записей в списке,
    /// номер записи должен поместиться в 16 бит.
    pub const MAX_COUNT: usize = u16::MAX as usize;

    /// Проверяет геометрию списка.
    /// Размер записи округляется вверх до кратного 8 байтам.
    pub fn new(
        element_size: usize,
        count: usize,
    ) -> Result<Self> {
        if element_size < TIMESTAMP_SIZE {
            return Err(Config("element size is smaller than its timestamp"));
        }

        if !(Self::MIN_COUNT ..= Self::MAX_COUNT).contains(&count) {
            return Err(Config("element count is out of range"));
        }

        let element_size = size::round_up(element_size);
        count
            .checked_mul(element_size + WORD)
            .and_then(|size| size.checked_add(HEADER_SIZE))
            .ok_or(Config("list is too large"))?;

        Ok(Self {
            element_size,
            count,
        })
    }

    /// Размер записи вместе с меткой времени.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Количество записей.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Размер полезной нагрузки записи.
    pub fn payload_size(&self) -> usize {
        self.element_size - TIMESTAMP_SIZE
    }

    /// Размер фрагмента, который занимает список.
    pub fn chunk_size(&self) -> usize {
        HEADER_SIZE + self.count * WORD + self.count * self.element_size
    }
}

impl FromStr for ListConfig {
    type Err = shmc::Error;

    fn from_str(config: &str) -> Result<Self> {
        let (element_size, count) = config
            .split_once(':')
            .ok_or(Config("expected \"<element_size>:<count>\""))?;

        let element_size = element_size
            .trim()
            .parse()
            .map_err(|_| Config("element size is not a number"))?;
        let count = count.trim().parse().map_err(|_| Config("element count is not a number"))?;

        Self::new(element_size, count)
    }
}

#[cfg(test)]
mod test {
    use shmc::Error;

    use super::ListConfig;

    #[test]
    fn parse() {
        let config: ListConfig = "64:1024".parse().unwrap();
        assert_eq!(config.element_size(), 64);
        assert_eq!(config.count(), 1024);
        assert_eq!(config.payload_size(), 56);
        assert_eq!(config.to_string(), "64:1024");

        let config: ListConfig = "13:2".parse().unwrap();
        assert_eq!(config.element_size(), 16);
        assert_eq!(config.chunk_size(), 64 + 2 * 8 + 2 * 16);
    }

    #[test]
    fn malformed() {
        for config in ["", "64", "64:", ":1024", "x:1024", "64:x", "4:1024", "64:1", "64:65536", "64:-1"] {
            assert!(
                matches!(config.parse::<ListConfig>(), Err(Error::Config(_))),
                "{config:?}",
            );
        }
    }
}
