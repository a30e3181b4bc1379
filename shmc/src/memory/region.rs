use core::{
    alloc::Layout,
    fmt,
    mem,
    ptr::NonNull,
    sync::atomic::{
        AtomicU32,
        AtomicU64,
        Ordering,
    },
};
use std::alloc;

use crate::error::{
    Error::{
        InvalidAlignment,
        InvalidArgument,
        NoMemory,
        OutOfBounds,
    },
    Result,
};

use super::size::Page;

/// Непрерывный регион памяти, который разделяют несколько сторон.
///
/// Регион выровнен на границу страницы и заполнен нулями при создании.
/// Доступ к нему возможен только по смещению от начала региона и только через
/// атомарные операции, поэтому одновременная работа сторон с одними и теми же байтами
/// не является гонкой данных.
/// Указатели внутрь региона наружу не выдаются.
pub struct Region {
    /// Начало региона.
    ptr: NonNull<u8>,

    /// Размер и выравнивание региона.
    layout: Layout,
}

impl Region {
    /// Выделяет обнулённый регион, округляя `size` вверх до целого числа страниц.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(InvalidArgument);
        }

        let size = Page::count_up(size)
            .checked_mul(Page::SIZE)
            .ok_or(NoMemory)?;
        let layout = Layout::from_size_align(size, Page::SIZE)?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(NoMemory)?;

        Ok(Self { ptr, layout })
    }

    /// Размер региона в байтах.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Проверяет, что `len` байт по смещению `offset` лежат внутри региона.
    pub fn check(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(OutOfBounds {
                offset,
                len,
                size: self.size(),
            }),
        }
    }

    /// Возвращает атомарное 64-битное слово по смещению `offset`.
    pub fn atomic_u64(
        &self,
        offset: usize,
    ) -> Result<&AtomicU64> {
        self.check_aligned::<AtomicU64>(offset)?;
        Ok(unsafe { AtomicU64::from_ptr(self.at(offset).cast()) })
    }

    /// Возвращает атомарное 32-битное слово по смещению `offset`.
    pub fn atomic_u32(
        &self,
        offset: usize,
    ) -> Result<&AtomicU32> {
        self.check_aligned::<AtomicU32>(offset)?;
        Ok(unsafe { AtomicU32::from_ptr(self.at(offset).cast()) })
    }

    /// Копирует байты региона, начиная со смещения `offset`, в `dst`.
    pub fn read(
        &self,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        self.check(offset, dst.len())?;

        let mut position = offset;
        let mut blocks = dst.chunks_exact_mut(BLOCK);

        for block in &mut blocks {
            let value =
                unsafe { atomic_memcpy::atomic_load(self.at(position).cast::<[u8; BLOCK]>(), Ordering::Relaxed) };
            // Регион обнуляется при создании и в него пишутся только инициализированные байты.
            let value = unsafe { value.assume_init() };
            block.copy_from_slice(&value);
            position += BLOCK;
        }

        for byte in blocks.into_remainder() {
            let value = unsafe { atomic_memcpy::atomic_load(self.at(position), Ordering::Relaxed) };
            *byte = unsafe { value.assume_init() };
            position += 1;
        }

        Ok(())
    }

    /// Копирует `src` в регион, начиная со смещения `offset`.
    pub fn write(
        &self,
        offset: usize,
        src: &[u8],
    ) -> Result<()> {
        self.check(offset, src.len())?;

        let mut position = offset;
        let blocks = src.chunks_exact(BLOCK);
        let remainder = blocks.remainder();

        for block in blocks {
            let mut value = [0; BLOCK];
            value.copy_from_slice(block);
            unsafe {
                atomic_memcpy::atomic_store(self.at(position).cast::<[u8; BLOCK]>(), value, Ordering::Relaxed);
            }
            position += BLOCK;
        }

        for byte in remainder {
            unsafe {
                atomic_memcpy::atomic_store(self.at(position), *byte, Ordering::Relaxed);
            }
            position += 1;
        }

        Ok(())
    }

    /// Проверяет границы и выравнивание для значения типа `T` по смещению `offset`.
    fn check_aligned<T>(
        &self,
        offset: usize,
    ) -> Result<()> {
        self.check(offset, mem::size_of::<T>())?;

        if offset % mem::align_of::<T>() == 0 {
            Ok(())
        } else {
            Err(InvalidAlignment)
        }
    }

    /// Адрес байта со смещением `offset`.
    /// Вызывающая сторона должна предварительно проверить границы.
    fn at(
        &self,
        offset: usize,
    ) -> *mut u8 {
        self.ptr.as_ptr().wrapping_add(offset)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(formatter, "Region {{ {:p}, size: {} }}", self.ptr, self.size())
    }
}

// Все обращения к региону атомарны.
unsafe impl Send for Region {
}

unsafe impl Sync for Region {
}

/// Размер блока, который [`Region::read()`] и [`Region::write()`]
/// копируют за одно обращение к [`atomic_memcpy`].
const BLOCK: usize = 64;

#[cfg(test)]
mod test {
    use core::sync::atomic::Ordering;

    use crate::error::Error;

    use super::{
        Page,
        Region,
    };

    #[test]
    fn bounds() {
        let region = Region::new(100).unwrap();

        assert_eq!(region.size(), Page::SIZE);
        assert!(region.check(Page::SIZE - 8, 8).is_ok());
        assert!(matches!(region.check(Page::SIZE - 7, 8), Err(Error::OutOfBounds { .. })));
        assert!(matches!(region.check(usize::MAX, 2), Err(Error::OutOfBounds { .. })));
        assert_eq!(region.atomic_u64(4).err(), Some(Error::InvalidAlignment));
        assert_eq!(Region::new(0).err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn copy() {
        let region = Region::new(Page::SIZE).unwrap();
        let src = (0 .. 200).map(|x| x as u8).collect::<Vec<_>>();
        let mut dst = vec![0; src.len()];

        region.write(3, &src).unwrap();
        region.read(3, &mut dst).unwrap();

        assert_eq!(src, dst);
        assert_eq!(region.atomic_u64(Page::SIZE - 8).unwrap().load(Ordering::Relaxed), 0);
    }
}
