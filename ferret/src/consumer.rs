use core::sync::atomic::{
    self,
    Ordering,
};

use derive_getters::Getters;

use shmc::{
    error::{
        Error::{
            BufferTooSmall,
            Empty,
            Lost,
        },
        Result,
    },
    log::debug,
    memory::size,
};

use crate::list::{
    Cursor,
    List,
    TIMESTAMP_SIZE,
};

/// Потребитель записей [`List`].
///
/// Читает записи по порядку номеров, начиная с самой старой.
/// Производители его не ждут, поэтому отставший потребитель теряет записи.
/// Потерянные записи пропускаются и учитываются в [`Consumer::lost()`].
#[derive(Debug)]
pub struct Consumer {
    /// Список.
    list: List,

    /// Номер следующей записи, которую прочитает потребитель.
    next_read: u64,

    /// Количество потерянных записей.
    lost: u64,
}

impl Consumer {
    /// Создаёт потребителя, который начинает с самой старой записи списка `list`.
    pub(crate) fn new(list: List) -> Self {
        let next_read = size::into_u64(list.config().count());

        Self {
            list,
            next_read,
            lost: 0,
        }
    }

    /// Копирует полезную нагрузку очередной записи в `buf`.
    ///
    /// Возвращает ошибку:
    ///   - [`Error::Empty`](shmc::Error::Empty), если новых опубликованных записей нет;
    ///   - [`Error::Lost`](shmc::Error::Lost), если производители затёрли записи,
    ///     которые потребитель ещё не прочитал.
    ///     Потребитель пропускает их и следующим вызовом прочитает самую старую из уцелевших;
    ///   - [`Error::BufferTooSmall`](shmc::Error::BufferTooSmall),
    ///     если полезная нагрузка записи не помещается в `buf`.
    pub fn get(
        &mut self,
        buf: &mut [u8],
    ) -> Result<Entry> {
        let payload_size = self.list.config().payload_size();
        if buf.len() < payload_size {
            return Err(BufferTooSmall {
                capacity: buf.len(),
                size: payload_size,
            });
        }

        let element = self.next_read;
        let head = Cursor::from(self.list.head()?.load(Ordering::Acquire));
        if element >= head.element {
            return Err(Empty);
        }

        self.check_overrun(Ordering::Acquire)?;

        let buffer = self.list.buffer(self.list.buffer_of(element));
        let chunk = self.list.chunk();
        let timestamp = chunk.atomic_u64(buffer)?.load(Ordering::Relaxed);
        chunk.read(buffer + TIMESTAMP_SIZE, &mut buf[.. payload_size])?;

        // Если производитель следующего круга успел испортить буфер во время копирования,
        // это будет видно по курсору `tail`.
        atomic::fence(Ordering::Acquire);
        self.check_overrun(Ordering::Relaxed)?;

        self.next_read += 1;

        Ok(Entry {
            element,
            timestamp,
            len: payload_size,
        })
    }

    /// Количество записей, которые потребитель потерял за всё время.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Номер записи, которую потребитель прочитает следующей.
    pub fn next_element(&self) -> u64 {
        self.next_read
    }

    /// Список потребителя.
    pub fn list(&self) -> &List {
        &self.list
    }

    /// Проверяет, что запись `next_read` ещё не затёрта.
    /// Если затёрта, пропускает все затёртые записи.
    fn check_overrun(
        &mut self,
        ordering: Ordering,
    ) -> Result<()> {
        let count = size::into_u64(self.list.config().count());
        let tail = Cursor::from(self.list.tail()?.load(ordering));

        if tail.element - self.next_read <= count {
            return Ok(());
        }

        let skipped = tail.element - count - self.next_read;
        self.next_read += skipped;
        self.lost += skipped;

        debug!(
            list = %self.list.chunk().name(),
            skipped,
            lost = self.lost,
            next_read = self.next_read,
            "consumer is overrun"
        );

        Err(Lost { count: skipped })
    }
}

/// Описание прочитанной записи.
#[derive(Clone, Copy, Debug, Eq, Getters, PartialEq)]
pub struct Entry {
    /// Номер записи за всё время существования списка.
    #[getter(copy)]
    element: u64,

    /// Метка времени публикации записи, см. [`shmc::time::timestamp()`].
    #[getter(copy)]
    timestamp: u64,

    /// Размер полезной нагрузки.
    #[getter(copy)]
    len: usize,
}
