use core::{
    sync::atomic::Ordering,
    time::Duration,
};
use std::time::Instant;

use crate::{
    error::{
        Error::{
            BufferTooSmall,
            Corrupted,
            Empty,
            Timeout,
        },
        Result,
    },
    log::{
        debug,
        error,
        trace,
    },
    memory::{
        Area,
        size,
    },
    time,
};

use super::ring::{
    self,
    RingBuffer,
    RingStats,
};

/// Принимающая сторона [`RingBuffer`].
///
/// [`Receiver::next_copy_out()`] читает пакеты один за другим,
/// продвигая локальную позицию чтения.
/// Место в буфере освобождается для отправителя только
/// после [`Receiver::notify_done()`], который публикует эту позицию как курсор чтения.
#[derive(Debug)]
pub struct Receiver {
    /// Кольцевой буфер.
    ring: RingBuffer,

    /// Позиция следующего непрочитанного кадра.
    position: u64,

    /// Статистики приёма.
    stats: RingStats,
}

impl Receiver {
    /// Привязывает получателя к буферу `ring_name` с сигналами `signal_name` в области `area`.
    pub fn new(
        area: &Area,
        ring_name: &str,
        signal_name: &str,
    ) -> Result<Self> {
        Self::from_ring(RingBuffer::get(area, ring_name, signal_name)?)
    }

    /// Привязывает получателя к уже найденному буферу `ring`.
    pub fn from_ring(ring: RingBuffer) -> Result<Self> {
        let position = ring.read_cursor()?.load(Ordering::Acquire);

        debug!(ring = %ring.chunk().name(), position, "bind receiver");

        Ok(Self {
            ring,
            position,
            stats: RingStats::default(),
        })
    }

    /// Кольцевой буфер получателя.
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Статистики приёма.
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Возвращает `true`, если есть опубликованные и ещё не прочитанные пакеты.
    pub fn has_data(&self) -> Result<bool> {
        Ok(self.ring.write_cursor()?.load(Ordering::Acquire) != self.position)
    }

    /// Размер следующего пакета, не извлекая его из буфера.
    /// Если пакетов нет, возвращает [`None`].
    pub fn next_packet_size(&self) -> Result<Option<usize>> {
        if self.has_data()? {
            self.frame().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Ждёт появления в буфере данных.
    /// Если они уже есть, возвращается сразу.
    ///
    /// Несколько публикаций отправителя могут слиться в одно пробуждение,
    /// поэтому после возврата нужно вычитывать пакеты
    /// [`Receiver::next_copy_out()`] до [`Error::Empty`](crate::Error::Empty).
    pub fn wait_for_data(&mut self) -> Result<()> {
        // Сигнал остаётся взведённым до ожидания,
        // поэтому публикация между проверкой курсора и ожиданием не теряется.
        while !self.has_data()? {
            self.stats.wait();
            self.ring.data_signal().wait();
        }

        Ok(())
    }

    /// Аналогичен [`Receiver::wait_for_data()`], но ждёт не дольше `timeout`.
    pub fn wait_for_data_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = time::deadline(timeout);

        while !self.has_data()? {
            self.stats.wait();

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Timeout);
                    }
                    self.ring.data_signal().wait_timeout(deadline - now)?;
                },
                None => self.ring.data_signal().wait(),
            }
        }

        Ok(())
    }

    /// Копирует очередной пакет в `buf` и возвращает его размер.
    ///
    /// Возвращает ошибку:
    ///   - [`Error::Empty`](crate::Error::Empty), если непрочитанных пакетов нет;
    ///   - [`Error::BufferTooSmall`](crate::Error::BufferTooSmall), если пакет не помещается в `buf`.
    ///     Пакет при этом остаётся в буфере.
    pub fn next_copy_out(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize> {
        if !self.has_data()? {
            return Err(Empty);
        }

        let size = self.frame()?;
        if size > buf.len() {
            return Err(BufferTooSmall {
                capacity: buf.len(),
                size,
            });
        }

        self.ring.copy_out(self.position + size::into_u64(ring::FRAME_HEADER_SIZE), &mut buf[.. size])?;
        self.position += size::into_u64(RingBuffer::frame_size(size));
        self.stats.packet(size);

        trace!(ring = %self.ring.chunk().name(), size, position = self.position, "copy out");

        Ok(size)
    }

    /// Пропускает очередной пакет, не копируя его.
    /// Возвращает размер пропущенного пакета.
    pub fn skip_packet(&mut self) -> Result<usize> {
        if !self.has_data()? {
            return Err(Empty);
        }

        let size = self.frame()?;
        self.position += size::into_u64(RingBuffer::frame_size(size));

        debug!(ring = %self.ring.chunk().name(), size, "skip packet");

        Ok(size)
    }

    /// Освобождает для отправителя место, занятое прочитанными пакетами.
    /// Если отправитель ждёт места, будит его.
    pub fn notify_done(&mut self) -> Result<()> {
        self.ring.read_cursor()?.store(self.position, Ordering::SeqCst);
        self.stats.commit();

        if self.ring.sender_waits()?.load(Ordering::SeqCst) != 0 {
            self.ring.space_signal().trigger();
        }

        Ok(())
    }

    /// Копирует очередной пакет в `buf` и сразу освобождает его место.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize> {
        let size = self.next_copy_out(buf)?;
        self.notify_done()?;
        Ok(size)
    }

    /// Проверяет заголовок кадра на текущей позиции и возвращает размер пакета.
    /// Вызывающая сторона должна убедиться, что кадр опубликован.
    fn frame(&self) -> Result<usize> {
        let header = self.ring.frame_header(self.position)?.load(Ordering::Relaxed);
        let size = ring::decode_frame_header(header)?;

        let write_cursor = self.ring.write_cursor()?.load(Ordering::Acquire);
        let end = self.position + size::into_u64(RingBuffer::frame_size(size));
        if end > write_cursor {
            error!(
                ring = %self.ring.chunk().name(),
                position = self.position,
                size,
                write_cursor,
                "ring buffer frame exceeds the write cursor"
            );
            return Err(Corrupted("ring buffer frame exceeds the write cursor"));
        }

        Ok(size)
    }
}
