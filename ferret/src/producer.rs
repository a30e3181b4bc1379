use core::sync::atomic::{
    self,
    Ordering,
};

use derive_getters::Getters;

use shmc::{
    error::{
        Error::BufferTooSmall,
        Result,
    },
    log::trace,
    sync::backoff::Backoff,
    time,
};

use crate::list::{
    Cursor,
    List,
    TIMESTAMP_SIZE,
};

/// Производитель записей [`List`].
///
/// Производителей может быть сколько угодно, в том числе в разных потоках.
/// Запись проходит три шага:
///   - [`Producer::dequeue()`] выдаёт производителю очередную запись в исключительное пользование;
///   - [`Producer::write()`] заполняет её полезную нагрузку;
///   - [`Producer::commit()`] ставит метку времени и публикует запись потребителю.
///
/// [`Producer::post()`] выполняет все три шага.
#[derive(Clone, Debug)]
pub struct Producer {
    /// Список.
    list: List,
}

impl Producer {
    /// Создаёт производителя записей списка `list`.
    pub(crate) fn new(list: List) -> Self {
        Self { list }
    }

    /// Список производителя.
    pub fn list(&self) -> &List {
        &self.list
    }

    /// Забирает очередную запись списка.
    ///
    /// Буфер записи остаётся за вызывающим до [`Producer::commit()`],
    /// если только другие производители не обгонят его на целый круг списка.
    pub fn dequeue(&self) -> Result<Claim> {
        let tail = self.list.tail()?;
        let count = self.list.config().count();
        let mut backoff = Backoff::new();

        loop {
            let old = Cursor::from(tail.load(Ordering::Relaxed));
            let new = old.next(count);

            if tail
                .compare_exchange_weak(old.into(), new.into(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Потребитель, увидевший данные этой записи,
                // увидит и продвинутый курсор `tail`.
                atomic::fence(Ordering::Release);

                return Ok(Claim {
                    element: old.element,
                    buffer: old.index,
                });
            }

            backoff.snooze();
        }
    }

    /// Записывает `payload` в полезную нагрузку записи `claim`,
    /// дополняя её нулями до [`ListConfig::payload_size()`](crate::ListConfig::payload_size).
    /// Если `payload` не помещается в запись, возвращает ошибку
    /// [`Error::BufferTooSmall`](shmc::Error::BufferTooSmall).
    pub fn write(
        &self,
        claim: &Claim,
        payload: &[u8],
    ) -> Result<()> {
        let payload_size = self.check_size(payload)?;

        let offset = self.list.buffer(claim.buffer) + TIMESTAMP_SIZE;
        let chunk = self.list.chunk();
        chunk.write(offset, payload)?;

        const ZEROES: [u8; 64] = [0; 64];
        let mut padding = offset + payload.len();
        let end = offset + payload_size;
        while padding < end {
            let len = (end - padding).min(ZEROES.len());
            chunk.write(padding, &ZEROES[.. len])?;
            padding += len;
        }

        Ok(())
    }

    /// Ставит записи `claim` метку времени и публикует её.
    ///
    /// Записи публикуются строго по порядку номеров.
    /// Если более ранняя запись ещё не опубликована, `claim` станет видна потребителю
    /// тогда, когда её производитель продвинет `head` через обе записи.
    /// Поэтому каждый вызов не только публикует свою запись,
    /// но и продвигает `head` через все уже опубликованные записи за ней.
    pub fn commit(
        &self,
        claim: Claim,
    ) -> Result<()> {
        let index = self.list.index(claim.buffer)?;
        let timestamp = self.list.chunk().atomic_u64(self.list.buffer(claim.buffer))?;
        let mut backoff = Backoff::new();

        loop {
            timestamp.store(time::timestamp(), Ordering::Relaxed);

            let old = index.load(Ordering::Relaxed);
            if Cursor::from(old).element >= claim.element {
                // Буфер уже занят записью, которая обогнала эту на круг.
                break;
            }

            let new = Cursor::new(claim.element, claim.buffer);
            if index
                .compare_exchange_weak(old, new.into(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }

            backoff.snooze();
        }

        self.advance_head()?;

        trace!(element = claim.element, buffer = claim.buffer, "commit");

        Ok(())
    }

    /// Забирает запись, заполняет её `payload` и публикует.
    /// Возвращает номер записи.
    ///
    /// Слишком длинный `payload` отвергается до того, как запись забрана,
    /// поэтому в списке не появляется записи с прежним содержимым.
    pub fn post(
        &self,
        payload: &[u8],
    ) -> Result<u64> {
        self.check_size(payload)?;

        let claim = self.dequeue()?;
        let element = claim.element;

        // Забранную запись нужно опубликовать в любом случае,
        // иначе `head` не сможет пройти через неё.
        let written = self.write(&claim, payload);
        self.commit(claim)?;
        written?;

        Ok(element)
    }

    /// Проверяет, что `payload` помещается в запись, и возвращает размер полезной нагрузки записи.
    fn check_size(
        &self,
        payload: &[u8],
    ) -> Result<usize> {
        let payload_size = self.list.config().payload_size();
        if payload.len() > payload_size {
            return Err(BufferTooSmall {
                capacity: payload_size,
                size: payload.len(),
            });
        }

        Ok(payload_size)
    }

    /// Продвигает `head` через все опубликованные записи,
    /// пока не упрётся в ещё не опубликованную.
    ///
    /// Поздняя запись, опубликованная раньше ранней, не может продвинуть `head` сама.
    /// Её продвигает производитель ранней записи, поэтому он
    /// не останавливается на своей записи.
    fn advance_head(&self) -> Result<()> {
        let head = self.list.head()?;
        let count = self.list.config().count();
        let mut backoff = Backoff::new();

        loop {
            let old = head.load(Ordering::Acquire);
            let cursor = Cursor::from(old);

            let record = Cursor::from(self.list.index(cursor.index)?.load(Ordering::Acquire));
            if record.element < cursor.element {
                // Производитель записи `cursor.element` ещё не опубликовал её
                // и сам продвинет `head` дальше.
                return Ok(());
            }

            // Запись опубликована или уже затёрта записью следующего круга.
            let new = cursor.next(count);
            if head
                .compare_exchange_weak(old, new.into(), Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                backoff.snooze();
            }
        }
    }
}

/// Запись, которую [`Producer::dequeue()`] выдал производителю.
/// Должна быть опубликована методом [`Producer::commit()`].
#[derive(Debug, Eq, Getters, PartialEq)]
#[must_use]
pub struct Claim {
    /// Номер записи за всё время существования списка.
    #[getter(copy)]
    element: u64,

    /// Номер буфера записи.
    #[getter(copy)]
    buffer: usize,
}
