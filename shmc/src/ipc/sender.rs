use core::{
    sync::atomic::Ordering,
    time::Duration,
};
use std::time::Instant;

use scopeguard::defer;

use crate::{
    error::{
        Error::{
            Corrupted,
            Timeout,
        },
        Result,
    },
    log::{
        debug,
        trace,
        warn,
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

/// Отправляющая сторона [`RingBuffer`].
///
/// Пакеты сначала копируются в буфер методом [`Sender::next_copy_in()`]
/// за локальным курсором `staged`, и только [`Sender::commit_packet()`]
/// публикует их получателю одним обновлением курсора записи.
/// Отправитель никогда не блокируется сам:
/// если места нет, он возвращает [`ring::Error::WouldOverflow`].
#[derive(Debug)]
pub struct Sender {
    /// Кольцевой буфер.
    ring: RingBuffer,

    /// Позиция, до которой записаны ещё не опубликованные кадры.
    staged: u64,

    /// Статистики отправки.
    stats: RingStats,
}

impl Sender {
    /// Привязывает отправителя к буферу `ring_name` с сигналами `signal_name` в области `area`.
    pub fn new(
        area: &Area,
        ring_name: &str,
        signal_name: &str,
    ) -> Result<Self> {
        Self::from_ring(RingBuffer::get(area, ring_name, signal_name)?)
    }

    /// Привязывает отправителя к уже найденному буферу `ring`.
    pub fn from_ring(ring: RingBuffer) -> Result<Self> {
        let staged = ring.write_cursor()?.load(Ordering::Acquire);

        debug!(ring = %ring.chunk().name(), staged, "bind sender");

        Ok(Self {
            ring,
            staged,
            stats: RingStats::default(),
        })
    }

    /// Кольцевой буфер отправителя.
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Статистики отправки.
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Количество байт, которое сейчас можно занять кадрами.
    pub fn free_space(&self) -> Result<usize> {
        Ok(self.ring.capacity() - self.used()?)
    }

    /// Копирует `packet` в буфер за ранее скопированными, но не опубликованными пакетами.
    /// Получатель не увидит пакет до вызова [`Sender::commit_packet()`].
    ///
    /// Если кадр пакета не помещается в свободное место, возвращает
    /// [`ring::Error::WouldOverflow`] и ничего не меняет в буфере.
    pub fn next_copy_in(
        &mut self,
        packet: &[u8],
    ) -> Result<()> {
        let frame_size = RingBuffer::frame_size(packet.len());
        let used = self.used()?;

        let packet_size = match u32::try_from(packet.len()) {
            Ok(packet_size) if used + frame_size <= self.ring.capacity() => packet_size,
            _ => {
                self.stats.overflow();
                warn!(
                    ring = %self.ring.chunk().name(),
                    used,
                    frame_size,
                    capacity = self.ring.capacity(),
                    "ring buffer overflow"
                );
                return Err(ring::Error::WouldOverflow {
                    capacity: self.ring.capacity(),
                    used,
                    frame_size,
                }
                .into());
            },
        };

        self.ring.copy_in(self.staged + size::into_u64(ring::FRAME_HEADER_SIZE), packet)?;
        self.ring
            .frame_header(self.staged)?
            .store(ring::encode_frame_header(packet_size), Ordering::Relaxed);

        self.staged += size::into_u64(frame_size);
        self.stats.packet(packet.len());

        trace!(ring = %self.ring.chunk().name(), size = packet.len(), staged = self.staged, "copy in");

        Ok(())
    }

    /// Публикует все скопированные пакеты и будит получателя.
    ///
    /// Получатель, увидевший новый курсор записи,
    /// видит и все байты опубликованных кадров.
    pub fn commit_packet(&mut self) -> Result<()> {
        self.ring.write_cursor()?.store(self.staged, Ordering::Release);
        self.stats.commit();
        self.ring.data_signal().trigger();

        trace!(ring = %self.ring.chunk().name(), write_cursor = self.staged, "commit");

        Ok(())
    }

    /// Копирует и сразу же публикует пакет `packet`.
    pub fn send(
        &mut self,
        packet: &[u8],
    ) -> Result<()> {
        self.next_copy_in(packet)?;
        self.commit_packet()
    }

    /// Ждёт не дольше `timeout`, пока в буфере освободится место для пакета из `size` байт.
    ///
    /// Если такой пакет не поместится даже в пустой буфер,
    /// сразу возвращает [`ring::Error::WouldOverflow`].
    pub fn wait_for_space(
        &mut self,
        size: usize,
        timeout: Duration,
    ) -> Result<()> {
        let frame_size = RingBuffer::frame_size(size);
        if frame_size > self.ring.capacity() {
            return Err(ring::Error::WouldOverflow {
                capacity: self.ring.capacity(),
                used: 0,
                frame_size,
            }
            .into());
        }

        let sender_waits = self.ring.sender_waits()?;
        sender_waits.store(1, Ordering::SeqCst);
        defer! {
            sender_waits.store(0, Ordering::SeqCst);
        }

        let deadline = time::deadline(timeout);

        loop {
            if self.used()? + frame_size <= self.ring.capacity() {
                return Ok(());
            }

            self.stats.wait();

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Timeout);
                    }
                    self.ring.space_signal().wait_timeout(deadline - now)?;
                },
                None => self.ring.space_signal().wait(),
            }
        }
    }

    /// Количество байт, занятых кадрами, которые получатель ещё не подтвердил.
    fn used(&self) -> Result<usize> {
        let read_cursor = self.ring.read_cursor()?.load(Ordering::SeqCst);
        let used = self
            .staged
            .checked_sub(read_cursor)
            .map(size::into_usize)
            .filter(|&used| used <= self.ring.capacity())
            .ok_or(Corrupted("ring buffer read cursor is ahead of the write cursor"))?;

        Ok(used)
    }
}
