use core::{
    fmt,
    mem,
};

use number_prefix::NumberPrefix;
use static_assertions::const_assert_eq;

use crate::error::{
    Error,
    Result,
};

/// [Кибибайт](https://en.wikipedia.org/wiki/kibibyte)
#[allow(non_upper_case_globals)]
pub const KiB: usize = 1 << 10;

/// [Мебибайт](https://en.wikipedia.org/wiki/mebibyte)
#[allow(non_upper_case_globals)]
pub const MiB: usize = 1 << 20;

/// Страница памяти, которой выровнены и кратны разделяемые регионы.
pub struct Page;

impl Page {
    /// Размер страницы.
    pub const SIZE: usize = 4 * KiB;

    /// Возвращает количество страниц, покрывающих `size` байт, округлённое вверх.
    pub fn count_up(size: usize) -> usize {
        size.div_ceil(Self::SIZE)
    }
}

/// Выравнивание всех смещений внутри разделяемой области:
/// размеры фрагментов, кадры кольцевых буферов и записи списков кратны ему.
pub const WORD: usize = mem::size_of::<u64>();

/// Округляет `size` вверх до кратного [`WORD`].
pub const fn round_up(size: usize) -> usize {
    size.next_multiple_of(WORD)
}

/// Преобразует [`u64`] в [`usize`],
/// проверяя что эти типы имеют одинаковый размер на этапе компиляции.
pub const fn into_usize(x: u64) -> usize {
    const_assert_eq!(mem::size_of::<u64>(), mem::size_of::<usize>());
    x as usize
}

/// Преобразует [`usize`] в [`u64`],
/// проверяя что эти типы имеют одинаковый размер на этапе компиляции.
pub const fn into_u64(x: usize) -> u64 {
    const_assert_eq!(mem::size_of::<u64>(), mem::size_of::<usize>());
    x as u64
}

/// Преобразует [`usize`] в целый тип,
/// для которого есть [`TryFrom<u64>`], например в [`u32`].
/// Возвращает ошибку [`Error::Int`], если значение `x` не помещается в выбранный тип.
pub fn try_into<T: TryFrom<u64>>(x: usize) -> Result<T>
where
    Error: From<<T as TryFrom<u64>>::Error>,
{
    Ok(T::try_from(into_u64(x))?)
}

/// Обёртка для печати размеров областей памяти.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Size(usize);

impl Size {
    /// Возвращает размер для области памяти в `bytes` байт.
    pub const fn bytes(bytes: usize) -> Self {
        Self(bytes)
    }

    /// Возвращает размер для области памяти элемента типа `T`.
    pub const fn of<T>() -> Self {
        Self(mem::size_of::<T>())
    }

    /// Возвращает размер в байтах.
    pub const fn num_bytes(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Size {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        match NumberPrefix::binary(self.num_bytes() as f64) {
            NumberPrefix::Standalone(_) => {
                write!(formatter, "{} B", self.num_bytes())
            },
            NumberPrefix::Prefixed(prefix, value) => {
                write!(formatter, "{:.3} {}B", value, prefix.symbol())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::{
        KiB,
        MiB,
        Page,
        Size,
        round_up,
    };

    #[test]
    fn display() {
        assert_eq!(Size::bytes(20).to_string(), "20 B");
        assert_eq!(Size::bytes(2 * KiB).to_string(), "2.000 KiB");
        assert_eq!(Size::bytes(3 * MiB / 2).to_string(), "1.500 MiB");
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(20), 24);
        assert_eq!(round_up(24), 24);
        assert_eq!(Page::count_up(1), 1);
        assert_eq!(Page::count_up(Page::SIZE + 1), 2);
    }
}
