use async_trait::async_trait;
use parking_lot::Mutex;
use routex_error::TransportError;
use tokio::sync::mpsc;

use crate::protocol::Event;

/// Входящий поток событий пира.
pub type Inbound = mpsc::Receiver<Event>;

/// Исходящая половина соединения с пиром.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        event: Event,
    ) -> Result<(), TransportError>;

    /// Закрывает исходящую сторону; повторный вызов ничего не делает.
    async fn close(&self);
}

/// Внутрипроцессный транспорт на каналах tokio.
pub struct LocalTransport {
    tx: Mutex<Option<mpsc::Sender<Event>>>,
}

/// Создаёт связанную пару транспортов.
///
/// События, отправленные через первый транспорт, читаются из второго
/// `Inbound`, и наоборот.
pub fn duplex(capacity: usize) -> ((LocalTransport, Inbound), (LocalTransport, Inbound)) {
    let (left_tx, right_rx) = mpsc::channel(capacity);
    let (right_tx, left_rx) = mpsc::channel(capacity);
    (
        (LocalTransport::new(left_tx), left_rx),
        (LocalTransport::new(right_tx), right_rx),
    )
}

impl LocalTransport {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        event: Event,
    ) -> Result<(), TransportError> {
        let tx = self.tx.lock().clone().ok_or(TransportError::Closed)?;
        tx.send(event).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}
