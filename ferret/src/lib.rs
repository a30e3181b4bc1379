//! Датчик-список для трассировки событий.
//!
//! Несколько производителей без блокировок пишут записи фиксированного размера
//! в кольцевой список в разделяемой памяти, а потребитель читает их,
//! никогда не задерживая производителей.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(missing_docs)]

/// Геометрия списка и её разбор из строки `"<element_size>:<count>"`.
pub mod config;

/// Потребитель записей списка.
pub mod consumer;

/// Раскладка списка в разделяемой памяти.
pub mod list;

/// Производители записей списка.
pub mod producer;

pub use config::ListConfig;
pub use consumer::{
    Consumer,
    Entry,
};
pub use list::List;
pub use producer::{
    Claim,
    Producer,
};
