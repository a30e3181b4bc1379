//! Все крейты рабочего пространства журналируют через этот модуль,
//! а подписчика [`tracing`] устанавливают исполняемые файлы и тесты.

pub use tracing::{
    Level,
    debug,
    error,
    event,
    info,
    trace,
    warn,
};
