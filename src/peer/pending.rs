use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use routex_error::PendingError;
use tokio::{sync::oneshot, time::Instant};

struct Slot<T> {
    token: u64,
    tx: oneshot::Sender<T>,
}

/// Реестр ожидающих ответов, адресуемых по ID корреляции.
///
/// Каждая запись срабатывает не более одного раза. Ожидание удаляется из
/// реестра при получении значения, по таймауту или при drop [`Pending`].
pub struct PendingMap<T> {
    slots: Arc<DashMap<String, Slot<T>>>,
    next_token: AtomicU64,
}

/// Одноразовое ожидание значения из [`PendingMap`].
pub struct Pending<T> {
    id: String,
    token: u64,
    rx: oneshot::Receiver<T>,
    deadline: Option<Instant>,
    done: bool,
    slots: Arc<DashMap<String, Slot<T>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T: Send + 'static> PendingMap<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Открывает ожидание для `id`.
    ///
    /// `None` означает ожидание без таймаута. Повторное открытие того же `id`
    /// вытесняет предыдущее ожидание, оно получит [`PendingError::Discarded`].
    pub fn open(
        &self,
        id: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Pending<T> {
        let id = id.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id.clone(), Slot { token, tx });
        Pending {
            id,
            token,
            rx,
            deadline: timeout.map(|t| Instant::now() + t),
            done: false,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Передаёт значение ожидающему. Возвращает `false`, если ожидания нет.
    pub fn resolve(
        &self,
        id: &str,
        value: T,
    ) -> bool {
        match self.slots.remove(id) {
            Some((_, slot)) => slot.tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Отменяет ожидание; получатель увидит [`PendingError::Discarded`].
    pub fn discard(
        &self,
        id: &str,
    ) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Отменяет все ожидания.
    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Pending<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Переустанавливает таймаут относительно текущего момента.
    pub fn set_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) {
        self.deadline = timeout.map(|t| Instant::now() + t);
    }

    /// Ждёт значение.
    ///
    /// Безопасен для использования в `tokio::select!`: если future отброшен
    /// до готовности, ожидание остаётся открытым.
    pub async fn recv(&mut self) -> Result<T, PendingError> {
        if self.done {
            return Err(PendingError::Discarded);
        }
        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.rx).await {
                Ok(received) => received.map_err(|_| PendingError::Discarded),
                Err(_) => Err(PendingError::TimedOut),
            },
            None => (&mut self.rx).await.map_err(|_| PendingError::Discarded),
        };
        self.done = true;
        self.forget();
        result
    }

    fn forget(&self) {
        self.slots
            .remove_if(&self.id, |_, slot| slot.token == self.token);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<T: Send + 'static> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.forget();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
