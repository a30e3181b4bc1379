use core::fmt;

use crate::timer::TimerId;

/// Обработчик срабатывания таймера.
pub(crate) type Callback = Box<dyn FnMut() + Send>;

/// Таймер, ожидающий срабатывания.
pub(crate) struct Timer {
    /// Идентификатор таймера.
    pub(crate) id: TimerId,

    /// Значение jiffies, начиная с которого таймер должен сработать.
    pub(crate) expires: u64,

    /// Период в jiffies для периодического таймера.
    pub(crate) period: Option<u64>,

    /// Обработчик.
    pub(crate) callback: Callback,
}

impl fmt::Debug for Timer {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter
            .debug_struct("Timer")
            .field("id", &self.id)
            .field("expires", &self.expires)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Список таймеров, упорядоченный по возрастанию момента срабатывания.
/// Таймеры с одинаковым моментом срабатывания хранятся в порядке добавления.
#[derive(Debug, Default)]
pub(crate) struct TimerList(Vec<Timer>);

impl TimerList {
    /// Вставляет `timer` на его место.
    /// Возвращает `true`, если он стал ближайшим к срабатыванию.
    pub(crate) fn insert(
        &mut self,
        timer: Timer,
    ) -> bool {
        let position = self.0.partition_point(|other| other.expires <= timer.expires);
        self.0.insert(position, timer);
        position == 0
    }

    /// Удаляет таймер `id`, если он есть в списке.
    pub(crate) fn remove(
        &mut self,
        id: TimerId,
    ) -> Option<Timer> {
        let position = self.0.iter().position(|timer| timer.id == id)?;
        Some(self.0.remove(position))
    }

    /// Возвращает `true`, если таймер `id` есть в списке.
    pub(crate) fn contains(
        &self,
        id: TimerId,
    ) -> bool {
        self.0.iter().any(|timer| timer.id == id)
    }

    /// Момент срабатывания ближайшего таймера.
    pub(crate) fn next_expires(&self) -> Option<u64> {
        self.0.first().map(|timer| timer.expires)
    }

    /// Извлекает ближайший таймер, если к моменту `now` ему пора сработать.
    pub(crate) fn pop_expired(
        &mut self,
        now: u64,
    ) -> Option<Timer> {
        if self.next_expires()? <= now {
            Some(self.0.remove(0))
        } else {
            None
        }
    }

    /// Количество таймеров в списке.
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Удаляет все таймеры.
    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod test {
    use super::{
        Timer,
        TimerList,
    };
    use crate::timer::TimerId;

    fn timer(
        id: u64,
        expires: u64,
    ) -> Timer {
        Timer {
            id: TimerId::from(id),
            expires,
            period: None,
            callback: Box::new(|| {}),
        }
    }

    #[test]
    fn order() {
        let mut list = TimerList::default();

        assert!(list.insert(timer(1, 30)));
        assert!(!list.insert(timer(2, 50)));
        assert!(list.insert(timer(3, 10)));
        assert!(!list.insert(timer(4, 30)));
        assert!(!list.insert(timer(5, 10)));

        assert_eq!(list.len(), 5);
        assert_eq!(list.next_expires(), Some(10));
        assert!(list.pop_expired(9).is_none());

        let fired = [30, 30, 30, 30, 60]
            .into_iter()
            .filter_map(|now| list.pop_expired(now))
            .map(|timer| u64::from(timer.id))
            .collect::<Vec<_>>();
        assert_eq!(fired, [3, 5, 1, 4, 2]);
        assert_eq!(list.next_expires(), None);
    }

    #[test]
    fn remove() {
        let mut list = TimerList::default();
        list.insert(timer(1, 10));
        list.insert(timer(2, 20));

        assert!(list.contains(TimerId::from(2)));
        assert_eq!(list.remove(TimerId::from(2)).map(|timer| timer.expires), Some(20));
        assert!(!list.contains(TimerId::from(2)));
        assert!(list.remove(TimerId::from(2)).is_none());

        list.clear();
        assert_eq!(list.len(), 0);
    }
}
