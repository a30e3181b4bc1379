use core::{
    cmp,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};

use derive_getters::Getters;
use derive_more::Add;

use crate::{
    error::{
        Error::{
            Corrupted,
            InvalidArgument,
        },
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
            round_up,
        },
    },
};

use super::signal::Signal;

/// Кольцевой буфер для передачи пакетов от одного отправителя одному получателю.
///
/// Лежит во фрагменте разделяемой области: заголовок размером [`HEADER_SIZE`]
/// и за ним `capacity` байт данных.
/// Курсоры записи и чтения --- количество байт, записанных и прочитанных
/// за всё время, то есть они не ограничены ёмкостью буфера.
/// В смещение внутри буфера их переводит только взятие по модулю ёмкости
/// в [`RingBuffer::frame_header()`], [`RingBuffer::copy_in()`] и [`RingBuffer::copy_out()`].
///
/// Курсор записи принадлежит отправителю [`Sender`](super::Sender),
/// курсор чтения --- получателю [`Receiver`](super::Receiver).
/// Блокировок на пути данных нет.
///
/// Каждый пакет лежит в кадре: 8-байтный заголовок `FRAME_MAGIC << 32 | size`
/// и данные, дополненные до кратного 8 размера.
/// Кадр может переходить через физический конец буфера,
/// тогда данные копируются двумя частями.
/// Заголовок кадра через конец не переходит, так как и кадры и ёмкость кратны 8.
///
/// Для пробуждения сторон буфер использует пару сигналов:
/// `<signal_name>_rx` --- в буфере появились данные,
/// `<signal_name>_tx` --- в буфере освободилось место.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    /// Фрагмент с буфером.
    chunk: Chunk,

    /// Ёмкость области данных.
    capacity: usize,

    /// Сигнал о появлении данных.
    data_signal: Signal,

    /// Сигнал об освобождении места.
    space_signal: Signal,
}

impl RingBuffer {
    /// Минимальная ёмкость области данных.
    pub const MIN_CAPACITY: usize = 2 * FRAME_HEADER_SIZE;

    /// Создаёт в области `area` кольцевой буфер `ring_name` ёмкостью `capacity` байт,
    /// округлённой вверх до 8 байт.
    /// Регистрирует сигналы `<signal_name>_rx` и `<signal_name>_tx`.
    /// Публикует фрагмент последним шагом.
    pub fn create(
        area: &Area,
        ring_name: &str,
        signal_name: &str,
        capacity: usize,
    ) -> Result<Self> {
        let capacity = round_up(capacity);
        if capacity < Self::MIN_CAPACITY {
            return Err(InvalidArgument);
        }

        // Сигналы регистрируются до фрагмента:
        // фрагмент нельзя удалить из каталога, а сигналы можно.
        let data_signal_name = data_signal_name(signal_name);
        let space_signal_name = space_signal_name(signal_name);
        let signal_names = [data_signal_name.as_str(), space_signal_name.as_str()];
        let [data_signal, space_signal] = area.add_signals(signal_names)?;

        let chunk = match area.add_chunk(ring_name, HEADER_SIZE + capacity) {
            Ok(chunk) => chunk,
            Err(error) => {
                area.remove_signals(&signal_names);
                return Err(error);
            },
        };

        chunk.atomic_u64(header::CAPACITY)?.store(size::into_u64(capacity), Ordering::Relaxed);
        chunk.atomic_u64(header::MAGIC)?.store(RING_MAGIC, Ordering::Relaxed);
        chunk.publish()?;

        debug!(
            area = %area.name(),
            ring = ring_name,
            signal = signal_name,
            capacity = %Size::bytes(capacity),
            "create ring buffer"
        );

        Ok(Self {
            chunk,
            capacity,
            data_signal,
            space_signal,
        })
    }

    /// Находит в области `area` опубликованный кольцевой буфер `ring_name`
    /// и его сигналы с базовым именем `signal_name`.
    pub fn get(
        area: &Area,
        ring_name: &str,
        signal_name: &str,
    ) -> Result<Self> {
        let chunk = area.find_chunk(ring_name)?;

        if chunk.atomic_u64(header::MAGIC)?.load(Ordering::Relaxed) != RING_MAGIC {
            return Err(Corrupted("bad ring buffer magic"));
        }

        let capacity = size::into_usize(chunk.atomic_u64(header::CAPACITY)?.load(Ordering::Relaxed));
        let consistent = capacity >= Self::MIN_CAPACITY &&
            capacity % WORD == 0 &&
            chunk.check(HEADER_SIZE, capacity).is_ok();
        if !consistent {
            return Err(Corrupted("bad ring buffer capacity"));
        }

        let data_signal = area.get_signal(&data_signal_name(signal_name))?;
        let space_signal = area.get_signal(&space_signal_name(signal_name))?;

        debug!(area = %area.name(), ring = ring_name, signal = signal_name, "attach ring buffer");

        Ok(Self {
            chunk,
            capacity,
            data_signal,
            space_signal,
        })
    }

    /// Аналогичен [`RingBuffer::get()`], но ждёт публикации буфера не дольше `timeout`.
    pub fn get_timeout(
        area: &Area,
        ring_name: &str,
        signal_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        crate::time::poll(timeout, || Self::get(area, ring_name, signal_name))
    }

    /// Ёмкость области данных буфера.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Максимальный размер пакета, который вообще может поместиться в пустой буфер.
    pub fn max_packet_size(&self) -> usize {
        self.capacity - FRAME_HEADER_SIZE
    }

    /// Фрагмент, в котором лежит буфер.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Сигнал о появлении данных.
    pub fn data_signal(&self) -> &Signal {
        &self.data_signal
    }

    /// Сигнал об освобождении места.
    pub fn space_signal(&self) -> &Signal {
        &self.space_signal
    }

    /// Размер кадра для пакета из `size` байт.
    pub const fn frame_size(size: usize) -> usize {
        FRAME_HEADER_SIZE + round_up(size)
    }

    /// Курсор записи --- количество байт, опубликованных отправителем за всё время.
    pub(super) fn write_cursor(&self) -> Result<&AtomicU64> {
        self.chunk.atomic_u64(header::WRITE_CURSOR)
    }

    /// Курсор чтения --- количество байт, освобождённых получателем за всё время.
    pub(super) fn read_cursor(&self) -> Result<&AtomicU64> {
        self.chunk.atomic_u64(header::READ_CURSOR)
    }

    /// Флаг того, что отправитель ждёт освобождения места.
    pub(super) fn sender_waits(&self) -> Result<&AtomicU64> {
        self.chunk.atomic_u64(header::SENDER_WAITS)
    }

    /// Заголовок кадра, который начинается на позиции `position`.
    pub(super) fn frame_header(
        &self,
        position: u64,
    ) -> Result<&AtomicU64> {
        self.chunk.atomic_u64(HEADER_SIZE + self.offset(position))
    }

    /// Записывает `data` в область данных, начиная с позиции `position`.
    pub(super) fn copy_in(
        &self,
        position: u64,
        data: &[u8],
    ) -> Result<()> {
        let offset = self.offset(position);
        let (head, tail) = data.split_at(cmp::min(data.len(), self.capacity - offset));

        self.chunk.write(HEADER_SIZE + offset, head)?;
        if !tail.is_empty() {
            self.chunk.write(HEADER_SIZE, tail)?;
        }

        Ok(())
    }

    /// Читает `data.len()` байт области данных, начиная с позиции `position`.
    pub(super) fn copy_out(
        &self,
        position: u64,
        data: &mut [u8],
    ) -> Result<()> {
        let offset = self.offset(position);
        let split = cmp::min(data.len(), self.capacity - offset);
        let (head, tail) = data.split_at_mut(split);

        self.chunk.read(HEADER_SIZE + offset, head)?;
        if !tail.is_empty() {
            self.chunk.read(HEADER_SIZE, tail)?;
        }

        Ok(())
    }

    /// Смещение позиции `position` внутри области данных.
    fn offset(
        &self,
        position: u64,
    ) -> usize {
        size::into_usize(position % size::into_u64(self.capacity))
    }
}

/// Упаковывает заголовок кадра для пакета из `size` байт.
pub(super) fn encode_frame_header(size: u32) -> u64 {
    (u64::from(FRAME_MAGIC) << u32::BITS) | u64::from(size)
}

/// Распаковывает заголовок кадра и возвращает размер пакета.
pub(super) fn decode_frame_header(header: u64) -> Result<usize> {
    if (header >> u32::BITS) as u32 == FRAME_MAGIC {
        Ok(size::into_usize(header & u64::from(u32::MAX)))
    } else {
        Err(Corrupted("bad ring buffer frame header"))
    }
}

/// Имя сигнала о появлении данных.
fn data_signal_name(signal_name: &str) -> String {
    format!("{signal_name}_rx")
}

/// Имя сигнала об освобождении места.
fn space_signal_name(signal_name: &str) -> String {
    format!("{signal_name}_tx")
}

/// Статистики отправителя или получателя.
#[derive(Add, Clone, Copy, Debug, Default, Eq, Getters, PartialEq)]
pub struct RingStats {
    /// Количество отправленных или полученных байт полезной нагрузки.
    bytes: usize,

    /// Количество публикаций у отправителя или подтверждений у получателя.
    commits: usize,

    /// Количество пакетов, которые не поместились в буфер.
    overflows: usize,

    /// Количество отправленных или полученных пакетов.
    packets: usize,

    /// Количество ожиданий сигнала.
    waits: usize,
}

impl RingStats {
    /// Учитывает пакет из `size` байт.
    pub(super) fn packet(
        &mut self,
        size: usize,
    ) {
        self.packets += 1;
        self.bytes += size;
    }

    /// Учитывает публикацию или подтверждение.
    pub(super) fn commit(&mut self) {
        self.commits += 1;
    }

    /// Учитывает переполнение.
    pub(super) fn overflow(&mut self) {
        self.overflows += 1;
    }

    /// Учитывает ожидание сигнала.
    pub(super) fn wait(&mut self) {
        self.waits += 1;
    }
}

/// Ошибки, которые могут возникать при работе с [`RingBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Кадр не помещается в свободное место буфера.
    /// Буфер не ждёт освобождения места сам: пакет можно отбросить
    /// или подождать с помощью [`Sender::wait_for_space()`](super::Sender::wait_for_space).
    WouldOverflow {
        /// Ёмкость области данных буфера.
        capacity: usize,

        /// Количество байт, занятых неподтверждёнными получателем кадрами.
        used: usize,

        /// Размер кадра, который не поместился.
        /// Выполняется неравенство `used + frame_size > capacity`.
        frame_size: usize,
    },
}

/// Смещения полей заголовка кольцевого буфера во фрагменте.
mod header {
    /// Магическое число [`super::RING_MAGIC`].
    pub const MAGIC: usize = 0;

    /// Ёмкость области данных.
    pub const CAPACITY: usize = 8;

    /// Курсор записи.
    pub const WRITE_CURSOR: usize = 16;

    /// Курсор чтения.
    pub const READ_CURSOR: usize = 24;

    /// Флаг ожидания отправителем свободного места.
    pub const SENDER_WAITS: usize = 32;
}

/// Размер заголовка кольцевого буфера.
/// Область данных начинается с границы линии кэша.
pub const HEADER_SIZE: usize = 64;

/// Размер заголовка кадра.
pub const FRAME_HEADER_SIZE: usize = size_of::<u64>();

/// Магическое число заголовка кольцевого буфера.
const RING_MAGIC: u64 = 0x5348_4D43_5249_4E47;

/// Магическое число в старшей половине заголовка кадра.
const FRAME_MAGIC: u32 = 0xDEAD_C0DE;

#[doc(hidden)]
pub mod test_scaffolding {
    use core::sync::atomic::Ordering;

    use crate::error::Result;

    use super::RingBuffer;

    /// Курсоры записи и чтения буфера.
    pub fn cursors(ring: &RingBuffer) -> Result<(u64, u64)> {
        Ok((
            ring.write_cursor()?.load(Ordering::Acquire),
            ring.read_cursor()?.load(Ordering::Acquire),
        ))
    }

    /// Портит заголовок кадра на позиции `position`.
    pub fn corrupt_frame(
        ring: &RingBuffer,
        position: u64,
    ) -> Result<()> {
        ring.frame_header(position)?.store(0, Ordering::Relaxed);
        Ok(())
    }
}
