use core::sync::atomic::{
    AtomicU32,
    AtomicU64,
    Ordering,
};

use num_enum::{
    IntoPrimitive,
    TryFromPrimitive,
};

use crate::{
    error::{
        Error::{
            Corrupted,
            OutOfBounds,
        },
        Result,
    },
    log::debug,
};

use super::area::{
    self,
    Area,
};

/// Состояние фрагмента в каталоге области.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u64)]
pub enum ChunkStatus {
    /// Фрагмент добавлен в каталог, но создатель ещё не закончил его инициализацию.
    Clear = 0,

    /// Фрагмент инициализирован и доступен остальным сторонам.
    Ready = 1,
}

/// Именованный фрагмент разделяемой области.
///
/// Все смещения в методах [`Chunk`] отсчитываются от начала данных фрагмента
/// и проверяются на выход за его ёмкость.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Область, в которой лежит фрагмент.
    area: Area,

    /// Имя фрагмента.
    name: String,

    /// Смещение дескриптора фрагмента от начала области.
    descriptor: usize,

    /// Смещение данных фрагмента от начала области.
    offset: usize,

    /// Ёмкость фрагмента.
    capacity: usize,

    /// Размер, запрошенный создателем фрагмента.
    size: usize,
}

impl Chunk {
    /// Создаёт дескриптор для уже заведённого в каталоге области фрагмента.
    pub(super) fn new(
        area: Area,
        name: &str,
        descriptor: usize,
        offset: usize,
        capacity: usize,
        size: usize,
    ) -> Self {
        Self {
            area,
            name: name.to_owned(),
            descriptor,
            offset,
            capacity,
            size,
        }
    }

    /// Область, в которой лежит фрагмент.
    pub fn area(&self) -> &Area {
        &self.area
    }

    /// Имя фрагмента.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Смещение данных фрагмента от начала области.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Ёмкость фрагмента --- запрошенный размер, округлённый вверх до 8 байт.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Размер, запрошенный создателем фрагмента.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Текущее состояние фрагмента.
    pub fn status(&self) -> Result<ChunkStatus> {
        let status = self.status_word()?.load(Ordering::Acquire);
        ChunkStatus::try_from(status).map_err(|_| Corrupted("bad chunk status"))
    }

    /// Возвращает `true`, если фрагмент опубликован.
    pub fn is_ready(&self) -> bool {
        self.status() == Ok(ChunkStatus::Ready)
    }

    /// Публикует фрагмент.
    /// Все записи в фрагмент, сделанные до вызова,
    /// видны стороне, которая нашла его через [`Area::get_chunk()`].
    pub fn publish(&self) -> Result<()> {
        self.status_word()?.store(ChunkStatus::Ready.into(), Ordering::Release);
        debug!(area = %self.area.name(), chunk = %self.name, "publish chunk");
        Ok(())
    }

    /// Проверяет, что `len` байт по смещению `offset` лежат внутри фрагмента.
    pub fn check(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(OutOfBounds {
                offset,
                len,
                size: self.capacity,
            }),
        }
    }

    /// Атомарное 64-битное слово фрагмента по смещению `offset`.
    pub fn atomic_u64(
        &self,
        offset: usize,
    ) -> Result<&AtomicU64> {
        self.check(offset, size_of::<u64>())?;
        self.area.region().atomic_u64(self.offset + offset)
    }

    /// Атомарное 32-битное слово фрагмента по смещению `offset`.
    pub fn atomic_u32(
        &self,
        offset: usize,
    ) -> Result<&AtomicU32> {
        self.check(offset, size_of::<u32>())?;
        self.area.region().atomic_u32(self.offset + offset)
    }

    /// Копирует байты фрагмента, начиная со смещения `offset`, в `dst`.
    pub fn read(
        &self,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        self.check(offset, dst.len())?;
        self.area.region().read(self.offset + offset, dst)
    }

    /// Копирует `src` в фрагмент, начиная со смещения `offset`.
    pub fn write(
        &self,
        offset: usize,
        src: &[u8],
    ) -> Result<()> {
        self.check(offset, src.len())?;
        self.area.region().write(self.offset + offset, src)
    }

    /// Слово состояния фрагмента в его дескрипторе.
    fn status_word(&self) -> Result<&AtomicU64> {
        self.area.region().atomic_u64(self.descriptor + area::STATUS)
    }
}
