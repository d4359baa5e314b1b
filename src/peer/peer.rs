use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::{Inbound, Pending, PendingMap, Transport};
use crate::protocol::{CallEvent, CancelEvent, Event, NextEvent, PublishEvent, ReplyEvent};

/// Таймаут одной попытки отправки события.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Лимит ресурсов на пира, если он не задан явно.
pub const DEFAULT_RESOURCE_LIMIT: usize = 1000;

/// Квоты пира, выданные при подключении.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub registrations_limit: usize,
    pub subscriptions_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDetails {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub offer: Offer,
}

/// Входящий вызов вместе с уже открытым ожиданием его отмены.
///
/// Ожидание открывается в момент приёма, поэтому cancel, пришедший сразу за
/// вызовом, не теряется.
pub struct InboundCall {
    pub event: CallEvent,
    pub cancel: Pending<CancelEvent>,
}

/// Подключённый пир.
///
/// Входящие события разбираются фоновой задачей: publish и call уходят в
/// потоки (каждый можно забрать один раз), ответы, next и cancel разрешают
/// соответствующие ожидания.
pub struct Peer {
    details: PeerDetails,
    transport: Arc<dyn Transport>,
    /// Ответы (reply/error/yield) по `invocation_id`.
    pub pending_replies: PendingMap<ReplyEvent>,
    /// Отмены вызовов и остановки генераторов по `invocation_id`.
    pub pending_cancels: PendingMap<CancelEvent>,
    /// Запросы следующего шага генератора по `yield_id`.
    pub pending_nexts: PendingMap<NextEvent>,
    publish_stream: Mutex<Option<mpsc::UnboundedReceiver<PublishEvent>>>,
    call_stream: Mutex<Option<mpsc::UnboundedReceiver<InboundCall>>>,
    alive: watch::Sender<bool>,
    send_timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PeerDetails {
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            offer: Offer::default(),
        }
    }

    pub fn with_offer(
        mut self,
        offer: Offer,
    ) -> Self {
        self.offer = offer;
        self
    }
}

impl Offer {
    pub fn new(
        registrations_limit: usize,
        subscriptions_limit: usize,
    ) -> Self {
        Self {
            registrations_limit,
            subscriptions_limit,
        }
    }
}

impl Peer {
    /// Создаёт пира и запускает разбор входящих событий.
    ///
    /// Должен вызываться внутри runtime tokio.
    pub fn spawn(
        details: PeerDetails,
        transport: impl Transport,
        inbound: Inbound,
    ) -> Arc<Self> {
        Self::spawn_with_timeout(details, transport, inbound, DEFAULT_SEND_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        details: PeerDetails,
        transport: impl Transport,
        inbound: Inbound,
        send_timeout: Duration,
    ) -> Arc<Self> {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (alive, _) = watch::channel(true);

        let peer = Arc::new(Self {
            details,
            transport: Arc::new(transport),
            pending_replies: PendingMap::new(),
            pending_cancels: PendingMap::new(),
            pending_nexts: PendingMap::new(),
            publish_stream: Mutex::new(Some(publish_rx)),
            call_stream: Mutex::new(Some(call_rx)),
            alive,
            send_timeout,
        });

        tokio::spawn(Arc::clone(&peer).pump(inbound, publish_tx, call_tx));
        peer
    }

    pub fn id(&self) -> &str {
        &self.details.id
    }

    pub fn role(&self) -> &str {
        &self.details.role
    }

    pub fn offer(&self) -> Offer {
        self.details.offer
    }

    pub fn details(&self) -> &PeerDetails {
        &self.details
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Забирает поток входящих publish-событий. Повторно возвращает `None`.
    pub fn take_publish_stream(&self) -> Option<mpsc::UnboundedReceiver<PublishEvent>> {
        self.publish_stream.lock().take()
    }

    /// Забирает поток входящих вызовов. Повторно возвращает `None`.
    pub fn take_call_stream(&self) -> Option<mpsc::UnboundedReceiver<InboundCall>> {
        self.call_stream.lock().take()
    }

    /// Отправляет событие, повторяя попытку до `resend_count` раз при
    /// таймауте. Закрытый транспорт повторно не опрашивается.
    pub async fn send(
        &self,
        event: impl Into<Event>,
        resend_count: u32,
    ) -> bool {
        let event = event.into();
        if !self.is_alive() {
            debug!(
                target: "routex::peer",
                peer_id = %self.id(),
                event_id = %event.id(),
                "peer is gone, event dropped"
            );
            return false;
        }

        for attempt in 0..=resend_count {
            match tokio::time::timeout(self.send_timeout, self.transport.send(event.clone())).await
            {
                Ok(Ok(())) => {
                    trace!(
                        target: "routex::peer",
                        peer_id = %self.id(),
                        event_id = %event.id(),
                        kind = event.kind_name(),
                        "event sent"
                    );
                    return true;
                }
                Ok(Err(e)) => {
                    debug!(
                        target: "routex::peer",
                        peer_id = %self.id(),
                        event_id = %event.id(),
                        error = %e,
                        "send failed"
                    );
                    return false;
                }
                Err(_) => {
                    debug!(
                        target: "routex::peer",
                        peer_id = %self.id(),
                        event_id = %event.id(),
                        attempt,
                        "send timed out"
                    );
                }
            }
        }

        warn!(
            target: "routex::peer",
            peer_id = %self.id(),
            event_id = %event.id(),
            resend_count,
            "event not delivered"
        );
        false
    }

    /// Закрывает соединение. Ожидающие получат `Discarded`.
    pub async fn close(&self) {
        self.alive.send_replace(false);
        self.transport.close().await;
    }

    /// Завершается, когда пир отключился.
    pub async fn closed(&self) {
        let mut rx = self.alive.subscribe();
        let _ = rx.wait_for(|alive| !*alive).await;
    }

    async fn pump(
        self: Arc<Self>,
        mut inbound: Inbound,
        publish_tx: mpsc::UnboundedSender<PublishEvent>,
        call_tx: mpsc::UnboundedSender<InboundCall>,
    ) {
        let mut alive = self.alive.subscribe();
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.dispatch(event, &publish_tx, &call_tx),
                    None => break,
                },
                _ = alive.wait_for(|alive| !*alive) => break,
            }
        }

        self.alive.send_replace(false);
        self.transport.close().await;
        self.pending_replies.clear();
        self.pending_cancels.clear();
        self.pending_nexts.clear();
        debug!(target: "routex::peer", peer_id = %self.id(), "peer detached");
    }

    fn dispatch(
        &self,
        event: Event,
        publish_tx: &mpsc::UnboundedSender<PublishEvent>,
        call_tx: &mpsc::UnboundedSender<InboundCall>,
    ) {
        trace!(
            target: "routex::peer",
            peer_id = %self.id(),
            event_id = %event.id(),
            kind = event.kind_name(),
            "event received"
        );
        let delivered = match event {
            Event::Publish(event) => publish_tx.send(event).is_ok(),
            Event::Call(event) => {
                let cancel = self.pending_cancels.open(event.id.clone(), None);
                call_tx.send(InboundCall { event, cancel }).is_ok()
            }
            Event::Reply(event) => {
                let id = event.features.invocation_id.clone();
                self.pending_replies.resolve(&id, event)
            }
            Event::Next(event) => {
                let id = event.features.yield_id.clone();
                self.pending_nexts.resolve(&id, event)
            }
            Event::Cancel(event) => {
                let id = event.features.invocation_id.clone();
                self.pending_cancels.resolve(&id, event)
            }
        };
        if !delivered {
            debug!(
                target: "routex::peer",
                peer_id = %self.id(),
                "unexpected event dropped"
            );
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for Offer {
    fn default() -> Self {
        Self::new(DEFAULT_RESOURCE_LIMIT, DEFAULT_RESOURCE_LIMIT)
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("details", &self.details)
            .field("alive", &self.is_alive())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
