use core::{
    fmt,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

use static_assertions::const_assert_eq;

use shmc::{
    error::{
        Error::Corrupted,
        Result,
    },
    log::debug,
    memory::{
        Area,
        Chunk,
        Size,
        size::{
            self,
            WORD,
        },
    },
};

use crate::{
    config::ListConfig,
    consumer::Consumer,
    producer::Producer,
};

/// Список записей фиксированного размера в разделяемой области,
/// в который пишут несколько производителей без блокировок,
/// а читает один потребитель.
///
/// Фрагмент списка состоит из заголовка, массива индексов из `count` слов
/// и `count` буферов записей по `element_size` байт.
/// Запись номер `element` лежит в буфере `element % count`.
/// Каждый буфер начинается с 8-байтной метки времени, за которой следует полезная нагрузка.
///
/// Курсоры `head` и `tail` в заголовке и слова индексов
/// упакованы в одно 64-битное слово [`Cursor`], так что для них хватает
/// обычного 64-битного [compare-and-swap](https://en.wikipedia.org/wiki/Compare-and-swap).
///   - `tail` --- следующая запись, которую получит производитель в [`Producer::dequeue()`].
///   - `head` --- следующая ещё не опубликованная запись. Все записи до неё видны потребителю.
///   - Индекс номер `i` --- последняя запись, опубликованная в буфере `i`.
///
/// Потребитель не задерживает производителей.
/// Если он отстал больше чем на `count` записей, старые записи затираются,
/// а он узнаёт об этом из [`Error::Lost`](shmc::Error::Lost).
#[derive(Clone)]
pub struct List {
    /// Фрагмент со списком.
    chunk: Chunk,

    /// Геометрия списка.
    config: ListConfig,
}

impl List {
    /// Создаёт в области `area` список `name` с геометрией, записанной строкой `config`
    /// в виде `"<element_size>:<count>"`.
    pub fn create(
        area: &Area,
        name: &str,
        config: &str,
    ) -> Result<Self> {
        Self::create_with(area, name, config.parse()?)
    }

    /// Создаёт в области `area` список `name` с геометрией `config`.
    pub fn create_with(
        area: &Area,
        name: &str,
        config: ListConfig,
    ) -> Result<Self> {
        let chunk = area.add_chunk(name, config.chunk_size())?;
        let list = Self { chunk, config };

        let initial = Cursor::new(size::into_u64(config.count()), 0);
        list.head()?.store(initial.into(), Ordering::Relaxed);
        list.tail()?.store(initial.into(), Ordering::Relaxed);

        // Все начальные индексы старше `head`, поэтому ни один буфер не считается опубликованным.
        for buffer in 0 .. config.count() {
            let record = Cursor::new(size::into_u64(buffer), buffer);
            list.index(buffer)?.store(record.into(), Ordering::Relaxed);
        }

        list.word(header::COUNT)?.store(size::into_u64(config.count()), Ordering::Relaxed);
        list.word(header::ELEMENT_SIZE)?
            .store(size::into_u64(config.element_size()), Ordering::Relaxed);
        list.word(header::MAGIC)?.store(LIST_MAGIC, Ordering::Relaxed);
        list.chunk.publish()?;

        debug!(
            area = %area.name(),
            list = name,
            %config,
            size = %Size::bytes(config.chunk_size()),
            "create list"
        );

        Ok(list)
    }

    /// Находит в области `area` опубликованный список `name`.
    pub fn get(
        area: &Area,
        name: &str,
    ) -> Result<Self> {
        let chunk = area.find_chunk(name)?;

        if chunk.atomic_u64(header::MAGIC)?.load(Ordering::Relaxed) != LIST_MAGIC {
            return Err(Corrupted("bad list magic"));
        }

        let element_size = size::into_usize(chunk.atomic_u64(header::ELEMENT_SIZE)?.load(Ordering::Relaxed));
        let count = size::into_usize(chunk.atomic_u64(header::COUNT)?.load(Ordering::Relaxed));
        let config = ListConfig::new(element_size, count)
            .ok()
            .filter(|config| config.element_size() == element_size && config.chunk_size() == chunk.size())
            .ok_or(Corrupted("bad list geometry"))?;

        debug!(area = %area.name(), list = name, %config, "attach list");

        Ok(Self { chunk, config })
    }

    /// Геометрия списка.
    pub fn config(&self) -> ListConfig {
        self.config
    }

    /// Фрагмент, в котором лежит список.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Создаёт производителя записей списка.
    pub fn producer(&self) -> Producer {
        Producer::new(self.clone())
    }

    /// Создаёт потребителя записей списка,
    /// который начинает с самой старой записи.
    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.clone())
    }

    /// Курсор следующей неопубликованной записи.
    pub(crate) fn head(&self) -> Result<&AtomicU64> {
        self.word(header::HEAD)
    }

    /// Курсор следующей свободной записи.
    pub(crate) fn tail(&self) -> Result<&AtomicU64> {
        self.word(header::TAIL)
    }

    /// Индекс буфера номер `buffer`.
    pub(crate) fn index(
        &self,
        buffer: usize,
    ) -> Result<&AtomicU64> {
        self.word(HEADER_SIZE + buffer * WORD)
    }

    /// Смещение буфера номер `buffer` во фрагменте.
    pub(crate) fn buffer(
        &self,
        buffer: usize,
    ) -> usize {
        HEADER_SIZE + self.config.count() * WORD + buffer * self.config.element_size()
    }

    /// Номер буфера для записи номер `element`.
    pub(crate) fn buffer_of(
        &self,
        element: u64,
    ) -> usize {
        size::into_usize(element % size::into_u64(self.config.count()))
    }

    /// Слово фрагмента по смещению `offset`.
    fn word(
        &self,
        offset: usize,
    ) -> Result<&AtomicU64> {
        self.chunk.atomic_u64(offset)
    }
}

impl fmt::Debug for List {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(formatter, "List {{ {:?}, {} }}", self.chunk.name(), self.config)
    }
}

/// Упакованная в одно слово пара из номера записи и номера буфера.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Cursor {
    /// Номер записи за всё время существования списка.
    pub(crate) element: u64,

    /// Номер буфера или позиции в массиве индексов.
    pub(crate) index: usize,
}

impl Cursor {
    /// Собирает курсор.
    pub(crate) fn new(
        element: u64,
        index: usize,
    ) -> Self {
        Self { element, index }
    }

    /// Курсор следующей записи в списке из `count` записей.
    pub(crate) fn next(
        self,
        count: usize,
    ) -> Self {
        Self::new(self.element + 1, (self.index + 1) % count)
    }
}

impl From<u64> for Cursor {
    fn from(packed: u64) -> Self {
        Self::new(packed >> INDEX_BITS, size::into_usize(packed & INDEX_MASK))
    }
}

impl From<Cursor> for u64 {
    fn from(cursor: Cursor) -> Self {
        (cursor.element << INDEX_BITS) | (size::into_u64(cursor.index) & INDEX_MASK)
    }
}

/// Смещения полей заголовка списка во фрагменте.
mod header {
    /// Магическое число [`super::LIST_MAGIC`].
    pub const MAGIC: usize = 0;

    /// Курсор `head`.
    pub const HEAD: usize = 8;

    /// Курсор `tail`.
    pub const TAIL: usize = 16;

    /// Количество записей.
    pub const COUNT: usize = 24;

    /// Размер записи.
    pub const ELEMENT_SIZE: usize = 32;
}

/// Размер заголовка списка.
pub(crate) const HEADER_SIZE: usize = 64;

/// Размер метки времени в начале каждого буфера.
pub(crate) const TIMESTAMP_SIZE: usize = size_of::<u64>();

/// Количество бит под номер буфера в [`Cursor`].
const INDEX_BITS: u32 = 16;

/// Количество бит под номер записи в [`Cursor`].
const ELEMENT_BITS: u32 = 48;

const_assert_eq!(INDEX_BITS + ELEMENT_BITS, u64::BITS);

/// Маска номера буфера в [`Cursor`].
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Магическое число заголовка списка.
const LIST_MAGIC: u64 = 0x4645_5252_4C49_5354;

#[doc(hidden)]
pub mod test_scaffolding {
    use core::sync::atomic::Ordering;

    use shmc::error::Result;

    use super::{
        Cursor,
        List,
    };

    /// Номера записей в курсорах `head` и `tail`.
    pub fn cursors(list: &List) -> Result<(u64, u64)> {
        let head = Cursor::from(list.head()?.load(Ordering::Acquire));
        let tail = Cursor::from(list.tail()?.load(Ordering::Acquire));
        Ok((head.element, tail.element))
    }
}
