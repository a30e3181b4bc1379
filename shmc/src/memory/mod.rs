/// Именованная разделяемая область с каталогом фрагментов.
pub mod area;

/// Именованный фрагмент области.
pub mod chunk;

/// Внешний арбитр, который выдаёт области по именам.
pub mod namespace;

/// Страничный регион разделяемой памяти с доступом по смещениям.
pub mod region;

/// Размеры, их печать и преобразования.
pub mod size;

pub use area::Area;
pub use chunk::{
    Chunk,
    ChunkStatus,
};
pub use namespace::Namespace;
pub use region::Region;
pub use size::{
    KiB,
    MiB,
    Page,
    Size,
};
