use core::{
    fmt,
    mem,
    sync::atomic::Ordering,
    time::Duration,
};
use std::{
    collections::{
        HashMap,
        hash_map::Entry,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

use memoffset::offset_of;
use static_assertions::const_assert_eq;

use crate::{
    error::{
        Error::{
            AlreadyExists,
            Corrupted,
            InvalidArgument,
            NoMemory,
            NotFound,
            SizeMismatch,
        },
        Result,
    },
    ipc::{
        RingBuffer,
        Signal,
    },
    log::{
        debug,
        trace,
        warn,
    },
    sync::SharedLock,
    time,
};

use super::{
    chunk::{
        Chunk,
        ChunkStatus,
    },
    region::Region,
    size::{
        self,
        Size,
        round_up,
    },
};

/// Именованная область разделяемой памяти.
///
/// Область видна всем сторонам сессии с одинаковым содержимым.
/// В её начале лежит каталог: заголовок области и односвязный список
/// дескрипторов фрагментов, каждый из которых непосредственно предшествует данным фрагмента.
/// Все ссылки внутри каталога --- смещения от начала области, а не указатели,
/// так что каждая сторона может отобразить область по своему адресу.
///
/// Объекты уведомлений [`Signal`] живут вне байт области,
/// как объекты ядра, выданные внешним арбитром вместе с памятью.
///
/// [`Area`] --- разделяемый дескриптор: его клоны ссылаются на одну и ту же область.
#[derive(Clone)]
pub struct Area(Arc<Shared>);

impl Area {
    /// Размер заголовка области.
    pub const OVERHEAD: usize = HEADER_SIZE;

    /// Накладные расходы на каждый фрагмент --- размер его дескриптора.
    pub const CHUNK_OVERHEAD: usize = DESCRIPTOR_SIZE;

    /// Максимальная длина имени фрагмента в байтах.
    pub const MAX_NAME_LEN: usize = NAME_SIZE;

    /// Создаёт область с именем `name` размером не меньше `size` байт.
    pub fn new(
        name: &str,
        size: usize,
    ) -> Result<Self> {
        if size < HEADER_SIZE + DESCRIPTOR_SIZE {
            return Err(InvalidArgument);
        }

        let region = Region::new(size)?;
        region.atomic_u64(header::SIZE)?.store(size::into_u64(region.size()), Ordering::Relaxed);
        region.atomic_u64(header::MAGIC)?.store(AREA_MAGIC, Ordering::Release);

        debug!(area = name, size = %Size::bytes(region.size()), "create shared memory area");

        Ok(Self(Arc::new(Shared {
            name: name.to_owned(),
            region,
            signals: Mutex::new(HashMap::new()),
        })))
    }

    /// Имя области.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Размер области в байтах.
    pub fn size(&self) -> usize {
        self.0.region.size()
    }

    /// Регион памяти области.
    pub fn region(&self) -> &Region {
        &self.0.region
    }

    /// Проверяет заголовок области.
    pub fn validate(&self) -> Result<()> {
        let region = self.region();

        if region.atomic_u64(header::MAGIC)?.load(Ordering::Acquire) != AREA_MAGIC {
            return Err(Corrupted("bad shared memory area magic"));
        }

        if region.atomic_u64(header::SIZE)?.load(Ordering::Relaxed) != size::into_u64(self.size()) {
            return Err(Corrupted("shared memory area size does not match its header"));
        }

        Ok(())
    }

    /// Добавляет в каталог фрагмент `name` для `size` байт данных
    /// в состоянии [`ChunkStatus::Clear`].
    /// Ёмкость фрагмента округляется вверх до 8 байт.
    ///
    /// Создатель фрагмента должен инициализировать его содержимое
    /// и последним шагом вызвать [`Chunk::publish()`].
    /// До этого момента остальные стороны фрагмент не находят.
    ///
    /// Возвращает ошибку:
    ///   - [`Error::AlreadyExists`](crate::Error::AlreadyExists), если фрагмент с таким именем уже есть;
    ///   - [`Error::NoMemory`](crate::Error::NoMemory), если в области не осталось места;
    ///   - [`Error::InvalidArgument`](crate::Error::InvalidArgument) для пустого, слишком длинного
    ///     или содержащего нулевой байт имени.
    pub fn add_chunk(
        &self,
        name: &str,
        size: usize,
    ) -> Result<Chunk> {
        let encoded_name = encode_name(name)?;
        let capacity = round_up(size);
        let region = self.region();

        let _guard = SharedLock::new(region.atomic_u64(header::LOCK)?).lock();

        let mut last = None;
        for entry in self.directory()? {
            let (offset, descriptor) = entry?;
            if descriptor.name() == name.as_bytes() {
                return Err(AlreadyExists);
            }
            last = Some((offset, descriptor));
        }

        let descriptor = last.map_or(HEADER_SIZE, |(_, last)| last.end());
        let data = descriptor + DESCRIPTOR_SIZE;
        if data.checked_add(capacity).is_none_or(|end| end > region.size()) {
            warn!(
                area = %self.name(),
                chunk = name,
                capacity = %Size::bytes(capacity),
                free = %Size::bytes(self.free_size()?),
                "no space left for a chunk"
            );
            return Err(NoMemory);
        }

        let field = |field: usize| region.atomic_u64(descriptor + field);
        field(offset_of!(Descriptor, offset))?.store(size::into_u64(data), Ordering::Relaxed);
        field(offset_of!(Descriptor, next))?.store(0, Ordering::Relaxed);
        field(offset_of!(Descriptor, capacity))?.store(size::into_u64(capacity), Ordering::Relaxed);
        field(offset_of!(Descriptor, size))?.store(size::into_u64(size), Ordering::Relaxed);
        field(STATUS)?.store(ChunkStatus::Clear.into(), Ordering::Relaxed);
        region.write(descriptor + offset_of!(Descriptor, name), &encoded_name)?;
        field(offset_of!(Descriptor, magic))?.store(CHUNK_MAGIC, Ordering::Relaxed);

        let link = match last {
            Some((last, _)) => region.atomic_u64(last + offset_of!(Descriptor, next))?,
            None => region.atomic_u64(header::FIRST_CHUNK)?,
        };
        link.store(size::into_u64(descriptor), Ordering::Release);

        debug!(
            area = %self.name(),
            chunk = name,
            offset = data,
            capacity = %Size::bytes(capacity),
            "add chunk"
        );

        Ok(Chunk::new(self.clone(), name, descriptor, data, capacity, size))
    }

    /// Создаёт обнулённый фрагмент `name` для `size` байт данных
    /// и сразу же публикует его.
    pub fn create_chunk(
        &self,
        name: &str,
        size: usize,
    ) -> Result<Chunk> {
        let chunk = self.add_chunk(name, size)?;
        chunk.publish()?;
        Ok(chunk)
    }

    /// Находит опубликованный фрагмент `name` и проверяет, что он создан для `expected_size` байт.
    ///
    /// Возвращает ошибку:
    ///   - [`Error::NotFound`](crate::Error::NotFound), если фрагмента нет или он ещё не опубликован;
    ///   - [`Error::SizeMismatch`](crate::Error::SizeMismatch), если размер фрагмента другой.
    pub fn get_chunk(
        &self,
        name: &str,
        expected_size: usize,
    ) -> Result<Chunk> {
        let chunk = self.find_chunk(name)?;

        if chunk.size() == expected_size {
            Ok(chunk)
        } else {
            warn!(
                area = %self.name(),
                chunk = name,
                expected = expected_size,
                actual = chunk.size(),
                "chunk size mismatch"
            );
            Err(SizeMismatch {
                expected: expected_size,
                actual: chunk.size(),
            })
        }
    }

    /// Аналогичен [`Area::get_chunk()`], но ждёт публикации фрагмента не дольше `timeout`.
    pub fn get_chunk_timeout(
        &self,
        name: &str,
        expected_size: usize,
        timeout: Duration,
    ) -> Result<Chunk> {
        time::poll(timeout, || self.get_chunk(name, expected_size))
    }

    /// Находит опубликованный фрагмент `name` любого размера.
    pub fn find_chunk(
        &self,
        name: &str,
    ) -> Result<Chunk> {
        for entry in self.directory()? {
            let (offset, descriptor) = entry?;

            if descriptor.name() == name.as_bytes() {
                return match descriptor.status()? {
                    ChunkStatus::Ready => Ok(Chunk::new(
                        self.clone(),
                        name,
                        offset,
                        descriptor.data(),
                        size::into_usize(descriptor.capacity),
                        size::into_usize(descriptor.size),
                    )),
                    ChunkStatus::Clear => {
                        trace!(area = %self.name(), chunk = name, "chunk is not ready yet");
                        Err(NotFound)
                    },
                };
            }
        }

        Err(NotFound)
    }

    /// Аналогичен [`Area::find_chunk()`], но ждёт публикации фрагмента не дольше `timeout`.
    pub fn find_chunk_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Chunk> {
        time::poll(timeout, || self.find_chunk(name))
    }

    /// Имена всех фрагментов области в порядке их создания,
    /// включая ещё не опубликованные.
    pub fn chunk_names(&self) -> Result<Vec<String>> {
        self.directory()?
            .map(|entry| entry.map(|(_, descriptor)| String::from_utf8_lossy(descriptor.name()).into_owned()))
            .collect()
    }

    /// Максимальный размер данных ещё одного фрагмента, который поместится в область.
    pub fn free_size(&self) -> Result<usize> {
        let mut end = HEADER_SIZE;
        for entry in self.directory()? {
            end = entry?.1.end();
        }

        Ok(self.size().saturating_sub(end).saturating_sub(DESCRIPTOR_SIZE))
    }

    /// Создаёт в области кольцевой буфер `ring_name` ёмкостью `capacity` байт
    /// и пару его сигналов с базовым именем `signal_name`.
    /// См. [`RingBuffer::create()`].
    pub fn create_ring(
        &self,
        ring_name: &str,
        signal_name: &str,
        capacity: usize,
    ) -> Result<RingBuffer> {
        RingBuffer::create(self, ring_name, signal_name, capacity)
    }

    /// Регистрирует в области сигнал `name`.
    pub fn add_signal(
        &self,
        name: &str,
    ) -> Result<Signal> {
        match self.signals().entry(name.to_owned()) {
            Entry::Occupied(_) => Err(AlreadyExists),
            Entry::Vacant(entry) => {
                debug!(area = %self.name(), signal = name, "add signal");
                Ok(entry.insert(Signal::new()).clone())
            },
        }
    }

    /// Регистрирует в области сразу все сигналы `names`.
    /// Если хотя бы одно имя занято или повторяется, не регистрирует ни одного.
    pub fn add_signals<const N: usize>(
        &self,
        names: [&str; N],
    ) -> Result<[Signal; N]> {
        let mut signals = self.signals();

        for (i, name) in names.iter().enumerate() {
            if signals.contains_key(*name) || names[.. i].contains(name) {
                return Err(AlreadyExists);
            }
        }

        debug!(area = %self.name(), signals = ?names, "add signals");

        Ok(names.map(|name| signals.entry(name.to_owned()).or_insert_with(Signal::new).clone()))
    }

    /// Удаляет из области сигналы `names`.
    pub(crate) fn remove_signals(
        &self,
        names: &[&str],
    ) {
        let mut signals = self.signals();
        for name in names {
            signals.remove(*name);
        }
    }

    /// Находит зарегистрированный в области сигнал `name`.
    pub fn get_signal(
        &self,
        name: &str,
    ) -> Result<Signal> {
        self.signals().get(name).cloned().ok_or(NotFound)
    }

    /// Аналогичен [`Area::get_signal()`], но ждёт регистрации сигнала не дольше `timeout`.
    pub fn get_signal_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Signal> {
        time::poll(timeout, || self.get_signal(name))
    }

    /// Итератор по каталогу фрагментов.
    fn directory(&self) -> Result<Directory<'_>> {
        Ok(Directory {
            region: self.region(),
            next: self.region().atomic_u64(header::FIRST_CHUNK)?.load(Ordering::Acquire),
            floor: HEADER_SIZE,
        })
    }

    /// Таблица сигналов области.
    fn signals(&self) -> MutexGuard<'_, HashMap<String, Signal>> {
        self.0.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Area {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter
            .debug_struct("Area")
            .field("name", &self.name())
            .field("region", self.region())
            .finish()
    }
}

/// Общее состояние всех клонов [`Area`].
struct Shared {
    /// Имя области.
    name: String,

    /// Память области.
    region: Region,

    /// Сигналы, зарегистрированные в области.
    signals: Mutex<HashMap<String, Signal>>,
}

/// Дескриптор фрагмента в каталоге области.
/// Каждое поле читается и пишется отдельной атомарной операцией.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct Descriptor {
    /// Должно быть равно [`CHUNK_MAGIC`].
    magic: u64,

    /// Смещение данных фрагмента от начала области.
    offset: u64,

    /// Смещение следующего дескриптора или `0` для последнего.
    next: u64,

    /// Ёмкость фрагмента, кратная 8 байтам.
    capacity: u64,

    /// Размер, запрошенный создателем фрагмента.
    size: u64,

    /// Состояние фрагмента --- [`ChunkStatus`].
    status: u64,

    /// Имя фрагмента, дополненное нулями.
    name: [u8; NAME_SIZE],
}

const_assert_eq!(mem::size_of::<Descriptor>(), DESCRIPTOR_SIZE);

impl Descriptor {
    /// Читает дескриптор по смещению `offset`,
    /// проверяя что он лежит не раньше `floor`.
    fn read(
        region: &Region,
        offset: usize,
        floor: usize,
    ) -> Result<Self> {
        if offset < floor {
            return Err(Corrupted("chunk descriptors are out of order"));
        }

        let field = |field: usize| region.atomic_u64(offset + field);

        let magic = field(offset_of!(Descriptor, magic))?.load(Ordering::Relaxed);
        if magic != CHUNK_MAGIC {
            return Err(Corrupted("bad chunk descriptor magic"));
        }

        let mut name = [0; NAME_SIZE];
        region.read(offset + offset_of!(Descriptor, name), &mut name)?;

        let descriptor = Self {
            magic,
            offset: field(offset_of!(Descriptor, offset))?.load(Ordering::Relaxed),
            next: field(offset_of!(Descriptor, next))?.load(Ordering::Acquire),
            capacity: field(offset_of!(Descriptor, capacity))?.load(Ordering::Relaxed),
            size: field(offset_of!(Descriptor, size))?.load(Ordering::Relaxed),
            status: field(STATUS)?.load(Ordering::Acquire),
            name,
        };

        let consistent = descriptor.data() == offset + DESCRIPTOR_SIZE &&
            descriptor.size <= descriptor.capacity &&
            region.check(descriptor.data(), size::into_usize(descriptor.capacity)).is_ok();
        if consistent {
            Ok(descriptor)
        } else {
            Err(Corrupted("inconsistent chunk descriptor"))
        }
    }

    /// Имя фрагмента без дополняющих нулей.
    fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&byte| byte == 0).unwrap_or(NAME_SIZE);
        &self.name[.. len]
    }

    /// Смещение данных фрагмента.
    fn data(&self) -> usize {
        size::into_usize(self.offset)
    }

    /// Смещение первого байта после данных фрагмента.
    fn end(&self) -> usize {
        self.data() + size::into_usize(self.capacity)
    }

    /// Состояние фрагмента.
    fn status(&self) -> Result<ChunkStatus> {
        ChunkStatus::try_from(self.status).map_err(|_| Corrupted("bad chunk status"))
    }
}

/// Итератор по каталогу фрагментов области.
/// Выдаёт пары из смещения дескриптора и самого дескриптора.
struct Directory<'a> {
    /// Регион области.
    region: &'a Region,

    /// Смещение следующего дескриптора или `0`.
    next: u64,

    /// Минимальное допустимое смещение следующего дескриптора.
    /// Строго растёт, поэтому испорченный каталог не зацикливает обход.
    floor: usize,
}

impl Iterator for Directory<'_> {
    type Item = Result<(usize, Descriptor)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }

        let offset = size::into_usize(self.next);
        let descriptor = Descriptor::read(self.region, offset, self.floor);

        match &descriptor {
            Ok(descriptor) => {
                self.next = descriptor.next;
                self.floor = descriptor.end();
            },
            Err(error) => {
                warn!(?error, offset, "corrupted chunk directory");
                self.next = 0;
            },
        }

        Some(descriptor.map(|descriptor| (offset, descriptor)))
    }
}

/// Проверяет имя фрагмента и дополняет его нулями до [`NAME_SIZE`] байт.
fn encode_name(name: &str) -> Result<[u8; NAME_SIZE]> {
    let bytes = name.as_bytes();

    if bytes.is_empty() || bytes.len() > NAME_SIZE || bytes.contains(&0) {
        return Err(InvalidArgument);
    }

    let mut encoded = [0; NAME_SIZE];
    encoded[.. bytes.len()].copy_from_slice(bytes);

    Ok(encoded)
}

/// Смещения полей заголовка области.
mod header {
    /// Магическое число [`super::AREA_MAGIC`].
    pub const MAGIC: usize = 0;

    /// Слово блокировки каталога.
    pub const LOCK: usize = 8;

    /// Смещение первого дескриптора фрагмента или `0`.
    pub const FIRST_CHUNK: usize = 16;

    /// Размер области.
    pub const SIZE: usize = 24;
}

/// Размер заголовка области.
const HEADER_SIZE: usize = 32;

/// Размер дескриптора фрагмента.
const DESCRIPTOR_SIZE: usize = 80;

/// Размер поля имени в дескрипторе фрагмента.
const NAME_SIZE: usize = 32;

/// Смещение поля состояния в дескрипторе фрагмента.
pub(super) const STATUS: usize = offset_of!(Descriptor, status);

/// Магическое число заголовка области.
const AREA_MAGIC: u64 = 0x5348_4D43_4152_4541;

/// Магическое число дескриптора фрагмента.
const CHUNK_MAGIC: u64 = 0x5348_4D43_4348_4E4B;

#[doc(hidden)]
pub mod test_scaffolding {
    use crate::error::Result;

    use super::{
        Area,
        header,
    };

    pub const DESCRIPTOR_SIZE: usize = super::DESCRIPTOR_SIZE;
    pub const HEADER_SIZE: usize = super::HEADER_SIZE;

    /// Портит слово области по смещению `offset`.
    pub fn corrupt(
        area: &Area,
        offset: usize,
        value: u64,
    ) -> Result<()> {
        area.region().atomic_u64(offset)?.store(value, core::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    pub const FIRST_CHUNK: usize = header::FIRST_CHUNK;
}
