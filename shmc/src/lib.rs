//! Транспорт поверх разделяемой памяти.
//! shmc --- **sh**ared **m**emory **c**hannels.
//!
//! Две стороны, которым внешний арбитр уже выдал общую область памяти и
//! объекты уведомлений, обмениваются через неё пакетами без участия ядра
//! на пути данных.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(missing_docs)]

/// Перечисление для возможных ошибок [`Error`] и соответствующий [`Result`].
pub mod error;

/// [Межпроцессное взаимодействие (Inter-process communication, IPC)](https://en.wikipedia.org/wiki/Inter-process_communication)
/// через разделяемую память:
/// кольцевые буферы, их отправители и получатели, уведомления и сессии.
pub mod ipc;

/// Поддержка журналирования макросами библиотеки [`tracing`].
pub mod log;

/// Разделяемая память: страничные регионы, именованные области и фрагменты в них.
pub mod memory;

/// Примитивы синхронизации над разделяемой памятью.
pub mod sync;

/// Монотонное время и форматирование частот.
pub mod time;

pub use error::{
    Error,
    Result,
};
pub use ipc::{
    ClientSession,
    Counter,
    Receiver,
    RingBuffer,
    RingStats,
    Sender,
    ServerSession,
    SessionConfig,
    SessionDescriptor,
    SessionInfo,
    Signal,
};
pub use memory::{
    Area,
    Chunk,
    ChunkStatus,
    KiB,
    MiB,
    Namespace,
    Size,
};
