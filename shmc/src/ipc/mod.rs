/// Фрагмент с описанием сессии.
pub mod info;

/// Принимающая сторона кольцевого буфера.
pub mod receiver;

/// Кольцевой буфер пакетов переменной длины в разделяемой памяти.
pub mod ring;

/// Отправляющая сторона кольцевого буфера.
pub mod sender;

/// Сессия из пары кольцевых буферов и описания сессии.
pub mod session;

/// Объекты уведомлений.
pub mod signal;

pub use info::{
    Counter,
    SessionDescriptor,
    SessionInfo,
};
pub use receiver::Receiver;
pub use ring::{
    RingBuffer,
    RingStats,
};
pub use sender::Sender;
pub use session::{
    ClientSession,
    ServerSession,
    SessionConfig,
};
pub use signal::Signal;
