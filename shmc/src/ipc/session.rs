use core::time::Duration;

use crate::{
    error::{
        Error::BufferTooSmall,
        Result,
    },
    log::{
        info,
        warn,
    },
    memory::{
        Area,
        size,
    },
};

use super::{
    info::{
        Counter,
        SessionInfo,
    },
    receiver::Receiver,
    ring::RingBuffer,
    sender::Sender,
};

/// Имя кольцевого буфера пакетов от клиента к серверу.
pub const TX_RING: &str = "tx_ring";

/// Базовое имя сигналов кольцевого буфера [`TX_RING`].
pub const TX_SIGNAL: &str = "tx_signal";

/// Имя кольцевого буфера пакетов от сервера к клиенту.
pub const RX_RING: &str = "rx_ring";

/// Базовое имя сигналов кольцевого буфера [`RX_RING`].
pub const RX_SIGNAL: &str = "rx_signal";

/// Имя фрагмента с [`SessionDescriptor`](super::SessionDescriptor).
pub const INFO: &str = "info";

/// Параметры сессии.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    /// Ёмкость каждого из двух кольцевых буферов.
    pub buffer_size: usize,

    /// MTU, который сервер назначает сессии.
    pub mtu: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            mtu: 1500,
        }
    }
}

/// Клиентская сторона сессии.
///
/// Создаёт в области оба кольцевых буфера и фрагмент с описанием сессии,
/// отправляет пакеты в [`TX_RING`] и получает их из [`RX_RING`].
#[derive(Debug)]
pub struct ClientSession {
    /// Отправитель в [`TX_RING`].
    sender: Sender,

    /// Получатель из [`RX_RING`].
    receiver: Receiver,

    /// Описание сессии.
    info: SessionInfo,
}

impl ClientSession {
    /// Создаёт в области `area` кольцевые буферы и описание сессии.
    pub fn create(
        area: &Area,
        config: &SessionConfig,
    ) -> Result<Self> {
        let tx_ring = RingBuffer::create(area, TX_RING, TX_SIGNAL, config.buffer_size)?;
        let rx_ring = RingBuffer::create(area, RX_RING, RX_SIGNAL, config.buffer_size)?;
        let info = SessionInfo::create(area, INFO)?;

        info!(area = %area.name(), buffer_size = config.buffer_size, "create client session");

        Ok(Self {
            sender: Sender::from_ring(tx_ring)?,
            receiver: Receiver::from_ring(rx_ring)?,
            info,
        })
    }

    /// Отправляет пакет серверу.
    pub fn send(
        &mut self,
        packet: &[u8],
    ) -> Result<()> {
        self.sender.send(packet)
    }

    /// Ждёт пакетов от сервера.
    pub fn wait_for_data(&mut self) -> Result<()> {
        self.receiver.wait_for_data()
    }

    /// Ждёт пакетов от сервера не дольше `timeout`.
    pub fn wait_for_data_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<()> {
        self.receiver.wait_for_data_timeout(timeout)
    }

    /// Получает очередной пакет от сервера.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.receiver.receive(buf)
    }

    /// Описание сессии.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Отправитель в [`TX_RING`].
    pub fn sender(&mut self) -> &mut Sender {
        &mut self.sender
    }

    /// Получатель из [`RX_RING`].
    pub fn receiver(&mut self) -> &mut Receiver {
        &mut self.receiver
    }
}

/// Серверная сторона сессии.
///
/// Находит созданные клиентом буферы, назначает сессии MAC--адрес и MTU,
/// доставляет пакеты клиенту в [`RX_RING`] и забирает его пакеты из [`TX_RING`],
/// ведя счётчики в описании сессии.
#[derive(Debug)]
pub struct ServerSession {
    /// Получатель из [`TX_RING`].
    receiver: Receiver,

    /// Отправитель в [`RX_RING`].
    sender: Sender,

    /// Описание сессии.
    info: SessionInfo,

    /// MAC--адрес сессии.
    mac: [u8; 6],
}

impl ServerSession {
    /// Подключается к сессии в области `area`,
    /// ожидая создания клиентом её фрагментов не дольше `timeout`.
    ///
    /// MAC--адрес сессии вычисляется функцией [`generate_mac()`]
    /// из аппаратного адреса `hw_addr` и номера сессии `session_number`.
    pub fn attach(
        area: &Area,
        config: &SessionConfig,
        hw_addr: [u8; 6],
        session_number: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let tx_ring = RingBuffer::get_timeout(area, TX_RING, TX_SIGNAL, timeout)?;
        let rx_ring = RingBuffer::get_timeout(area, RX_RING, RX_SIGNAL, timeout)?;
        let info = SessionInfo::get_timeout(area, INFO, timeout)?;

        let mac = generate_mac(hw_addr, session_number);
        info.set_mac(mac)?;
        info.set_mtu(config.mtu)?;

        info!(
            area = %area.name(),
            mac = %super::info::format_mac(mac),
            mtu = config.mtu,
            "attach server session"
        );

        Ok(Self {
            receiver: Receiver::from_ring(tx_ring)?,
            sender: Sender::from_ring(rx_ring)?,
            info,
            mac,
        })
    }

    /// MAC--адрес сессии.
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Описание сессии.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Доставляет пакет клиенту.
    /// Если пакет не помещается в буфер, учитывает его в `rx_dropped` и возвращает ошибку.
    pub fn deliver(
        &mut self,
        packet: &[u8],
    ) -> Result<()> {
        match self.sender.next_copy_in(packet) {
            Ok(()) => {
                self.info.add(Counter::NumRx, 1)?;
                self.info.add(Counter::RxBytes, size::into_u64(packet.len()))?;
                self.sender.commit_packet()
            },
            Err(error) => {
                self.info.add(Counter::RxDropped, 1)?;
                Err(error)
            },
        }
    }

    /// Ждёт пакетов от клиента.
    pub fn wait_for_data(&mut self) -> Result<()> {
        self.receiver.wait_for_data()
    }

    /// Ждёт пакетов от клиента не дольше `timeout`.
    pub fn wait_for_data_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<()> {
        self.receiver.wait_for_data_timeout(timeout)
    }

    /// Забирает очередной пакет клиента в `buf`.
    ///
    /// Пакет, который не помещается в `buf`, отбрасывается и учитывается в `tx_dropped`,
    /// а вызывающей стороне возвращается ошибка
    /// [`Error::BufferTooSmall`](crate::Error::BufferTooSmall).
    pub fn transmit(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize> {
        match self.receiver.next_copy_out(buf) {
            Ok(size) => {
                self.receiver.notify_done()?;
                self.info.add(Counter::NumTx, 1)?;
                self.info.add(Counter::TxBytes, size::into_u64(size))?;
                Ok(size)
            },
            Err(error @ BufferTooSmall { .. }) => {
                let size = self.receiver.skip_packet()?;
                self.receiver.notify_done()?;
                self.info.add(Counter::TxDropped, 1)?;
                warn!(size, capacity = buf.len(), "drop an oversized packet");
                Err(error)
            },
            Err(error) => Err(error),
        }
    }
}

/// Вычисляет MAC--адрес сессии номер `session_number` на устройстве с адресом `hw_addr`:
/// `04:EA` и четыре байта контрольной суммы
/// [Adler-32](https://en.wikipedia.org/wiki/Adler-32)
/// от `hw_addr` и номера сессии в порядке little-endian.
pub fn generate_mac(
    hw_addr: [u8; 6],
    session_number: u32,
) -> [u8; 6] {
    let mut data = [0; 10];
    data[.. 6].copy_from_slice(&hw_addr);
    data[6 ..].copy_from_slice(&session_number.to_le_bytes());

    let mut mac = [0x04, 0xEA, 0, 0, 0, 0];
    mac[2 ..].copy_from_slice(&adler32(&data).to_le_bytes());
    mac
}

/// Контрольная сумма [Adler-32](https://en.wikipedia.org/wiki/Adler-32).
fn adler32(data: &[u8]) -> u32 {
    const MODULUS: u32 = 65521;

    let (a, b) = data.iter().fold((1, 0), |(a, b), &byte| {
        let a = (a + u32::from(byte)) % MODULUS;
        (a, (b + a) % MODULUS)
    });

    (b << 16) | a
}

#[cfg(test)]
mod test {
    use super::{
        adler32,
        generate_mac,
    };

    #[test]
    fn checksum() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn mac() {
        let hw_addr = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

        let first = generate_mac(hw_addr, 0);
        let second = generate_mac(hw_addr, 1);

        assert_eq!(first[.. 2], [0x04, 0xEA]);
        assert_eq!(second[.. 2], [0x04, 0xEA]);
        assert_ne!(first, second);
    }
}
