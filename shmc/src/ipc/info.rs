use core::{
    fmt,
    mem,
    sync::atomic::Ordering,
    time::Duration,
};

use memoffset::offset_of;
use static_assertions::const_assert_eq;

use crate::{
    error::Result,
    log::debug,
    memory::{
        Area,
        Chunk,
    },
};

/// Описание сессии, которое выдающая сторона записывает
/// во фрагмент `info`, а противоположная читает.
///
/// Раскладка совпадает с раскладкой C--структуры с полями
/// `{ mac[6], mtu: u32, num_rx, rx_dropped, num_tx, tx_dropped, rx_bytes, tx_bytes: u64 }`,
/// поле версии в ней не предусмотрено.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct SessionDescriptor {
    /// [MAC--адрес](https://en.wikipedia.org/wiki/MAC_address), назначенный сессии.
    pub mac: [u8; 6],

    /// Выравнивание, которое C--компилятор вставляет перед `mtu`.
    _padding_mtu: [u8; 2],

    /// [Maximum transmission unit](https://en.wikipedia.org/wiki/Maximum_transmission_unit).
    pub mtu: u32,

    /// Выравнивание, которое C--компилятор вставляет перед счётчиками.
    _padding_counters: u32,

    /// Количество пакетов, доставленных клиенту.
    pub num_rx: u64,

    /// Количество пакетов, которые не удалось доставить клиенту.
    pub rx_dropped: u64,

    /// Количество пакетов, отправленных клиентом.
    pub num_tx: u64,

    /// Количество отброшенных пакетов клиента.
    pub tx_dropped: u64,

    /// Количество байт, доставленных клиенту.
    pub rx_bytes: u64,

    /// Количество байт, отправленных клиентом.
    pub tx_bytes: u64,
}

const_assert_eq!(mem::size_of::<SessionDescriptor>(), 64);
const_assert_eq!(offset_of!(SessionDescriptor, mtu), 8);
const_assert_eq!(offset_of!(SessionDescriptor, num_rx), 16);
const_assert_eq!(offset_of!(SessionDescriptor, tx_bytes), 56);

impl fmt::Display for SessionDescriptor {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(
            formatter,
            "{} MTU {}, \
             RX packets: {} dropped: {}, TX packets: {} dropped: {}, \
             RX bytes: {}, TX bytes: {}",
            format_mac(self.mac),
            self.mtu,
            self.num_rx,
            self.rx_dropped,
            self.num_tx,
            self.tx_dropped,
            self.rx_bytes,
            self.tx_bytes,
        )
    }
}

/// Форматирует MAC--адрес в виде `04:EA:01:02:03:04`.
pub fn format_mac(mac: [u8; 6]) -> String {
    let [a, b, c, d, e, f] = mac;
    format!("{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{f:02X}")
}

/// Счётчики [`SessionDescriptor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Counter {
    /// [`SessionDescriptor::num_rx`].
    NumRx,

    /// [`SessionDescriptor::rx_dropped`].
    RxDropped,

    /// [`SessionDescriptor::num_tx`].
    NumTx,

    /// [`SessionDescriptor::tx_dropped`].
    TxDropped,

    /// [`SessionDescriptor::rx_bytes`].
    RxBytes,

    /// [`SessionDescriptor::tx_bytes`].
    TxBytes,
}

impl Counter {
    /// Смещение счётчика в [`SessionDescriptor`].
    fn offset(self) -> usize {
        match self {
            Counter::NumRx => offset_of!(SessionDescriptor, num_rx),
            Counter::RxDropped => offset_of!(SessionDescriptor, rx_dropped),
            Counter::NumTx => offset_of!(SessionDescriptor, num_tx),
            Counter::TxDropped => offset_of!(SessionDescriptor, tx_dropped),
            Counter::RxBytes => offset_of!(SessionDescriptor, rx_bytes),
            Counter::TxBytes => offset_of!(SessionDescriptor, tx_bytes),
        }
    }
}

/// Фрагмент с [`SessionDescriptor`].
///
/// Каждое поле читается и пишется одной атомарной операцией,
/// поэтому читатель никогда не видит частично записанное поле.
/// Но разные поля обновляются независимо,
/// и [`SessionInfo::snapshot()`] не является согласованным срезом всей структуры.
/// Для статистик этого достаточно.
/// Значения не кешируются: каждый вызов заново читает разделяемую память.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Фрагмент с описанием сессии.
    chunk: Chunk,
}

impl SessionInfo {
    /// Размер фрагмента с описанием сессии.
    pub const SIZE: usize = mem::size_of::<SessionDescriptor>();

    /// Создаёт в области `area` обнулённый фрагмент `name` с описанием сессии.
    pub fn create(
        area: &Area,
        name: &str,
    ) -> Result<Self> {
        let chunk = area.create_chunk(name, Self::SIZE)?;
        debug!(area = %area.name(), chunk = name, "create session info");
        Ok(Self { chunk })
    }

    /// Находит в области `area` фрагмент `name` с описанием сессии.
    /// Если размер фрагмента не совпадает с [`SessionInfo::SIZE`], возвращает ошибку
    /// [`Error::SizeMismatch`](crate::Error::SizeMismatch).
    pub fn get(
        area: &Area,
        name: &str,
    ) -> Result<Self> {
        Ok(Self {
            chunk: area.get_chunk(name, Self::SIZE)?,
        })
    }

    /// Аналогичен [`SessionInfo::get()`], но ждёт публикации фрагмента не дольше `timeout`.
    pub fn get_timeout(
        area: &Area,
        name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            chunk: area.get_chunk_timeout(name, Self::SIZE, timeout)?,
        })
    }

    /// MAC--адрес сессии.
    pub fn mac(&self) -> Result<[u8; 6]> {
        let word = self.mac_word()?.load(Ordering::Relaxed).to_ne_bytes();
        let mut mac = [0; 6];
        mac.copy_from_slice(&word[.. 6]);
        Ok(mac)
    }

    /// Записывает MAC--адрес сессии.
    /// Адрес и следующее за ним выравнивание занимают одно 64-битное слово,
    /// которое записывается целиком.
    pub fn set_mac(
        &self,
        mac: [u8; 6],
    ) -> Result<()> {
        let mut word = [0; 8];
        word[.. 6].copy_from_slice(&mac);
        self.mac_word()?.store(u64::from_ne_bytes(word), Ordering::Relaxed);
        Ok(())
    }

    /// MTU сессии.
    pub fn mtu(&self) -> Result<u32> {
        Ok(self.chunk.atomic_u32(offset_of!(SessionDescriptor, mtu))?.load(Ordering::Relaxed))
    }

    /// Записывает MTU сессии.
    pub fn set_mtu(
        &self,
        mtu: u32,
    ) -> Result<()> {
        self.chunk.atomic_u32(offset_of!(SessionDescriptor, mtu))?.store(mtu, Ordering::Relaxed);
        Ok(())
    }

    /// Текущее значение счётчика `counter`.
    pub fn counter(
        &self,
        counter: Counter,
    ) -> Result<u64> {
        Ok(self.chunk.atomic_u64(counter.offset())?.load(Ordering::Relaxed))
    }

    /// Увеличивает счётчик `counter` на `value`.
    pub fn add(
        &self,
        counter: Counter,
        value: u64,
    ) -> Result<()> {
        self.chunk.atomic_u64(counter.offset())?.fetch_add(value, Ordering::Relaxed);
        Ok(())
    }

    /// Читает все поля описания сессии, каждое по отдельности.
    pub fn snapshot(&self) -> Result<SessionDescriptor> {
        Ok(SessionDescriptor {
            mac: self.mac()?,
            mtu: self.mtu()?,
            num_rx: self.counter(Counter::NumRx)?,
            rx_dropped: self.counter(Counter::RxDropped)?,
            num_tx: self.counter(Counter::NumTx)?,
            tx_dropped: self.counter(Counter::TxDropped)?,
            rx_bytes: self.counter(Counter::RxBytes)?,
            tx_bytes: self.counter(Counter::TxBytes)?,
            ..SessionDescriptor::default()
        })
    }

    /// Фрагмент с описанием сессии.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Слово, в котором лежит MAC--адрес.
    fn mac_word(&self) -> Result<&core::sync::atomic::AtomicU64> {
        self.chunk.atomic_u64(offset_of!(SessionDescriptor, mac))
    }
}
