use core::{
    fmt,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};
use std::{
    panic::{
        self,
        AssertUnwindSafe,
    },
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread::{
        self,
        JoinHandle,
    },
};

use derive_more::{
    Display,
    From,
    Into,
};

use shmc::{
    error::{
        Error::{
            InvalidArgument,
            NoMemory,
            NotFound,
        },
        Result,
    },
    log::{
        debug,
        error,
        trace,
        warn,
    },
    time::Hz,
};

use crate::{
    config::TimerConfig,
    jiffies::{
        self,
        Jiffies,
        JiffiesThread,
    },
    list::{
        Callback,
        Timer,
        TimerList,
    },
};

/// Идентификатор таймера.
/// Идентификаторы выдаются по возрастанию и не переиспользуются.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
#[display("timer#{}", _0)]
pub struct TimerId(u64);

/// Служба таймеров.
///
/// Владеет двумя потоками:
///   - `ddekit.jiffies` продвигает счётчик [`Jiffies`];
///   - `ddekit.timer` вызывает обработчики сработавших таймеров.
///
/// Обработчики вызываются без удержания блокировки списка таймеров,
/// поэтому могут сами добавлять и удалять таймеры через [`TimerHandle`].
/// Паника обработчика не останавливает поток таймеров,
/// но таймер с таким обработчиком удаляется, даже если он периодический.
/// При удалении службы оба потока останавливаются,
/// а ещё не сработавшие таймеры отбрасываются.
pub struct TimerService {
    /// Разделяемая с потоком таймеров часть службы.
    handle: TimerHandle,

    /// Поток таймеров.
    timer_thread: Option<JoinHandle<()>>,

    /// Поток jiffies.
    jiffies_thread: Option<JiffiesThread>,
}

impl TimerService {
    /// Запускает службу таймеров с параметрами `config`.
    pub fn new(config: TimerConfig) -> Result<Self> {
        let jiffies = Jiffies::new();
        let jiffies_thread = JiffiesThread::spawn(jiffies.clone(), config)?;

        let handle = TimerHandle(Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            jiffies,
            config,
            next_id: AtomicU64::new(0),
        }));

        let shared = handle.0.clone();
        let timer_thread = thread::Builder::new()
            .name("ddekit.timer".into())
            .spawn(move || run(&shared))
            .map_err(|error| {
                error!(?error, "failed to spawn the timer thread");
                NoMemory
            })?;

        debug!(hz = %config.hz(), "start timer service");

        Ok(Self {
            handle,
            timer_thread: Some(timer_thread),
            jiffies_thread: Some(jiffies_thread),
        })
    }

    /// Ссылка на службу, которую можно передать в обработчики таймеров.
    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// См. [`TimerHandle::add_timer()`].
    pub fn add_timer(
        &self,
        callback: impl FnMut() + Send + 'static,
        expires: u64,
    ) -> TimerId {
        self.handle.add_timer(callback, expires)
    }

    /// См. [`TimerHandle::add_periodic()`].
    pub fn add_periodic(
        &self,
        callback: impl FnMut() + Send + 'static,
        expires: u64,
        period: u64,
    ) -> Result<TimerId> {
        self.handle.add_periodic(callback, expires, period)
    }

    /// См. [`TimerHandle::del_timer()`].
    pub fn del_timer(
        &self,
        id: TimerId,
    ) -> Result<()> {
        self.handle.del_timer(id)
    }

    /// См. [`TimerHandle::timer_pending()`].
    pub fn timer_pending(
        &self,
        id: TimerId,
    ) -> bool {
        self.handle.timer_pending(id)
    }

    /// См. [`TimerHandle::jiffies()`].
    pub fn jiffies(&self) -> u64 {
        self.handle.jiffies()
    }

    /// См. [`TimerHandle::hz()`].
    pub fn hz(&self) -> Hz {
        self.handle.hz()
    }

    /// См. [`TimerHandle::ms_to_jiffies()`].
    pub fn ms_to_jiffies(
        &self,
        ms: u64,
    ) -> u64 {
        self.handle.ms_to_jiffies(ms)
    }

    /// См. [`TimerHandle::jiffies_to_ms()`].
    pub fn jiffies_to_ms(
        &self,
        jiffies: u64,
    ) -> u64 {
        self.handle.jiffies_to_ms(jiffies)
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        {
            let mut state = self.handle.0.lock();
            state.stopped = true;
            let discarded = state.timers.len();
            state.timers.clear();
            if discarded > 0 {
                debug!(discarded, "discard pending timers");
            }
        }
        self.handle.0.changed.notify_all();

        if let Some(thread) = self.timer_thread.take() &&
            thread.join().is_err()
        {
            error!("timer thread panicked");
        }

        self.jiffies_thread.take();

        debug!("stop timer service");
    }
}

impl fmt::Debug for TimerService {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter.debug_struct("TimerService").field("handle", &self.handle).finish_non_exhaustive()
    }
}

/// Ссылка на [`TimerService`].
///
/// Не продлевает жизнь потокам службы:
/// после удаления [`TimerService`] добавленные через неё таймеры не сработают.
#[derive(Clone)]
pub struct TimerHandle(Arc<Shared>);

impl TimerHandle {
    /// Добавляет таймер, который однократно вызовет `callback`,
    /// когда счётчик jiffies достигнет `expires`.
    /// Таймер с уже прошедшим `expires` сработает при ближайшем пробуждении потока таймеров.
    pub fn add_timer(
        &self,
        callback: impl FnMut() + Send + 'static,
        expires: u64,
    ) -> TimerId {
        self.add(Box::new(callback), expires, None)
    }

    /// Добавляет периодический таймер.
    /// Он впервые сработает на `expires`, а затем будет срабатывать каждые `period` jiffies,
    /// пока не будет удалён [`TimerHandle::del_timer()`].
    /// Нулевой `period` недопустим.
    pub fn add_periodic(
        &self,
        callback: impl FnMut() + Send + 'static,
        expires: u64,
        period: u64,
    ) -> Result<TimerId> {
        if period == 0 {
            return Err(InvalidArgument);
        }

        Ok(self.add(Box::new(callback), expires, Some(period)))
    }

    /// Удаляет таймер `id`.
    ///
    /// Периодический таймер можно удалить и из его собственного обработчика,
    /// тогда он больше не сработает.
    /// Если таймер уже сработал или никогда не существовал,
    /// возвращает ошибку [`Error::NotFound`](shmc::Error::NotFound).
    pub fn del_timer(
        &self,
        id: TimerId,
    ) -> Result<()> {
        let mut state = self.0.lock();

        if state.timers.remove(id).is_some() {
            trace!(%id, "delete timer");
            return Ok(());
        }

        if let Some(running) = state.running.as_mut() &&
            running.id == id &&
            running.periodic &&
            !running.cancelled
        {
            running.cancelled = true;
            trace!(%id, "cancel running periodic timer");
            return Ok(());
        }

        warn!(%id, "timer not found");

        Err(NotFound)
    }

    /// Возвращает `true`, если таймер `id` ещё сработает.
    pub fn timer_pending(
        &self,
        id: TimerId,
    ) -> bool {
        let state = self.0.lock();

        state.timers.contains(id) ||
            state.running.as_ref().is_some_and(|running| {
                running.id == id && running.periodic && !running.cancelled
            })
    }

    /// Текущее значение счётчика jiffies.
    pub fn jiffies(&self) -> u64 {
        self.0.jiffies.get()
    }

    /// Частота jiffies.
    pub fn hz(&self) -> Hz {
        self.0.config.hz()
    }

    /// Переводит `ms` миллисекунд в jiffies, округляя вверх.
    pub fn ms_to_jiffies(
        &self,
        ms: u64,
    ) -> u64 {
        jiffies::ms_to_jiffies(&self.0.config, ms)
    }

    /// Переводит `jiffies` в миллисекунды, округляя вниз.
    pub fn jiffies_to_ms(
        &self,
        jiffies: u64,
    ) -> u64 {
        jiffies::jiffies_to_ms(&self.0.config, jiffies)
    }

    /// Добавляет таймер и будит поток таймеров, если тот стал ближайшим.
    fn add(
        &self,
        callback: Callback,
        expires: u64,
        period: Option<u64>,
    ) -> TimerId {
        let id = TimerId(self.0.next_id.fetch_add(1, Ordering::Relaxed));

        let is_first = self.0.lock().timers.insert(Timer {
            id,
            expires,
            period,
            callback,
        });

        // Поток таймеров спит до прежнего ближайшего срабатывания.
        if is_first {
            self.0.changed.notify_one();
        }

        trace!(%id, expires, ?period, is_first, "add timer");

        id
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        let state = self.0.lock();

        formatter
            .debug_struct("TimerHandle")
            .field("jiffies", &self.0.jiffies.get())
            .field("config", &self.0.config)
            .field("timers", &state.timers.len())
            .field("running", &state.running)
            .finish()
    }
}

/// Общее состояние службы таймеров.
struct Shared {
    /// Таймеры и состояние потока таймеров.
    state: Mutex<State>,

    /// Будит поток таймеров при появлении нового ближайшего таймера или при остановке.
    changed: Condvar,

    /// Счётчик jiffies.
    jiffies: Jiffies,

    /// Параметры службы.
    config: TimerConfig,

    /// Следующий идентификатор таймера.
    next_id: AtomicU64,
}

impl Shared {
    /// Захватывает состояние.
    /// Обработчики таймеров вызываются без блокировки, поэтому их паника её не отравляет.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Состояние под блокировкой [`Shared::state`].
#[derive(Debug, Default)]
struct State {
    /// Ожидающие таймеры.
    timers: TimerList,

    /// Таймер, обработчик которого выполняется прямо сейчас.
    running: Option<Running>,

    /// Служба останавливается.
    stopped: bool,
}

/// Таймер, обработчик которого выполняется.
#[derive(Debug)]
struct Running {
    /// Идентификатор таймера.
    id: TimerId,

    /// Таймер периодический.
    periodic: bool,

    /// Периодический таймер удалён во время выполнения обработчика.
    cancelled: bool,
}

/// Тело потока таймеров.
fn run(shared: &Shared) {
    let mut state = shared.lock();

    while !state.stopped {
        let now = shared.jiffies.get();

        if let Some(mut timer) = state.timers.pop_expired(now) {
            state.running = Some(Running {
                id: timer.id,
                periodic: timer.period.is_some(),
                cancelled: false,
            });
            drop(state);

            trace!(id = %timer.id, expires = timer.expires, now, "fire timer");
            let panicked = panic::catch_unwind(AssertUnwindSafe(|| (timer.callback)())).is_err();

            state = shared.lock();
            let cancelled = state.running.take().is_some_and(|running| running.cancelled);

            // Таймер с паникующим обработчиком больше не срабатывает.
            if panicked {
                error!(id = %timer.id, "timer callback panicked");
            }

            if let Some(period) = timer.period &&
                !panicked &&
                !cancelled &&
                !state.stopped
            {
                timer.expires = timer.expires.saturating_add(period);
                state.timers.insert(timer);
            }

            continue;
        }

        let next_expires = state.timers.next_expires();
        state = match next_expires {
            Some(expires) => {
                // Не меньше одного jiffy, так как `expires > now`.
                let timeout = shared.config.hz().period(expires - now);
                shared
                    .changed
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            },
            None => shared.changed.wait(state).unwrap_or_else(PoisonError::into_inner),
        };
    }
}
