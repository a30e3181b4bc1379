//! Кооперативные таймеры драйверного окружения.
//!
//! Время измеряется в jiffies --- грубых тиках, которые отдельный поток
//! продвигает через фиксированные промежутки.
//! Ещё один поток спит до ближайшего таймера и вызывает обработчики сработавших таймеров.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(missing_docs)]

/// Параметры счётчика jiffies.
pub mod config;

/// Счётчик jiffies и продвигающий его поток.
pub mod jiffies;

/// Упорядоченный список ожидающих таймеров.
mod list;

/// Служба таймеров.
pub mod timer;

pub use config::TimerConfig;
pub use jiffies::{
    Jiffies,
    JiffiesThread,
};
pub use timer::{
    TimerHandle,
    TimerId,
    TimerService,
};
