use core::{
    alloc::LayoutError,
    num::TryFromIntError,
    result,
};

use super::ipc::ring;

/// Перечисление для возможных ошибок.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Фрагмент или сигнал с таким именем в области уже существует.
    AlreadyExists,

    /// Буфер вызывающей стороны меньше очередного пакета или записи.
    BufferTooSmall {
        /// Размер буфера вызывающей стороны.
        capacity: usize,

        /// Размер пакета или записи, которые не поместились.
        size: usize,
    },

    /// Некорректная строка конфигурации.
    Config(&'static str),

    /// Разделяемая структура не прошла проверку.
    /// Например, испорчено магическое число или нарушен порядок фрагментов.
    Corrupted(&'static str),

    /// На данный момент данных нет.
    Empty,

    /// Заданное целое значение не помещается в указанный тип.
    Int(TryFromIntError),

    /// Неверное выравнивание.
    InvalidAlignment,

    /// Задано недопустимое значение аргумента.
    InvalidArgument,

    /// Читатель отстал от писателей и часть записей была перезаписана.
    Lost {
        /// Количество пропущенных записей.
        count: u64,
    },

    /// Нет места для нового фрагмента или не удалось выделить память.
    NoMemory,

    /// Объект с заданным именем или идентификатором не найден.
    NotFound,

    /// Обращение за пределы региона или фрагмента.
    OutOfBounds {
        /// Смещение начала обращения.
        offset: usize,

        /// Размер обращения.
        len: usize,

        /// Размер региона или фрагмента.
        size: usize,
    },

    /// Ошибка кольцевого буфера --- [`ring::Error`].
    Ring(ring::Error),

    /// Фрагмент существует, но его размер отличается от ожидаемого.
    SizeMismatch {
        /// Ожидаемый размер.
        expected: usize,

        /// Фактический размер.
        actual: usize,
    },

    /// Истёк тайм-аут.
    Timeout,
}

impl From<LayoutError> for Error {
    fn from(_e: LayoutError) -> Self {
        Error::InvalidAlignment
    }
}

impl From<TryFromIntError> for Error {
    fn from(e: TryFromIntError) -> Self {
        Error::Int(e)
    }
}

impl From<ring::Error> for Error {
    fn from(e: ring::Error) -> Self {
        Error::Ring(e)
    }
}

/// Тип возвращаемого результата `T` или ошибки [`Error`] ---
/// мономорфизация [`result::Result`] по типу ошибки.
pub type Result<T> = result::Result<T, Error>;
