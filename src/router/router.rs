use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use routex_error::RouterError;
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    meta::{self, NOTIFICATION_ROLE, REGISTRATION_GONE, ROUTER_ROLE, SUBSCRIPTION_GONE},
    Broker, Dealer, PeerEvent,
};
use crate::{
    peer::{duplex, Offer, Peer, PeerDetails, DEFAULT_SEND_TIMEOUT},
    protocol::{
        new_id, PublishFeatures, DEFAULT_GENERATOR_LIFETIME, DEFAULT_RESEND_COUNT, DEFAULT_TIMEOUT,
    },
    session::Session,
    storage::Storage,
};

/// Ёмкость канала событий жизненного цикла пиров.
const PEER_EVENTS_CAPACITY: usize = 1024;
/// Ёмкость внутреннего канала между маршрутизатором и его сессией.
const META_CHANNEL_CAPACITY: usize = 256;

/// Параметры маршрутизатора, общие для всех компонентов.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub id: String,
    pub default_timeout: Duration,
    pub generator_lifetime: Duration,
    pub resend_count: u32,
    pub peer_send_timeout: Duration,
    /// Квоты собственного пира маршрутизатора.
    pub meta_offer: Offer,
}

/// Маршрутизатор: брокер, дилер и мета-процедуры над общим хранилищем.
///
/// Подключение и отключение пиров рассылается через `broadcast`; брокер,
/// дилер и сам маршрутизатор обрабатывают эти события независимо.
pub struct Router {
    config: RouterConfig,
    broker: Arc<Broker>,
    dealer: Arc<Dealer>,
    peers: DashMap<String, Arc<Peer>>,
    events: broadcast::Sender<PeerEvent>,
    meta: OnceCell<Arc<Session>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Router {
    pub fn new(
        config: RouterConfig,
        storage: Arc<dyn Storage>,
    ) -> Arc<Self> {
        let broker = Broker::new(config.id.clone(), Arc::clone(&storage), config.resend_count);
        let dealer = Dealer::new(
            config.id.clone(),
            storage,
            config.default_timeout,
            config.generator_lifetime,
            config.resend_count,
        );
        let (events, _) = broadcast::channel(PEER_EVENTS_CAPACITY);

        Arc::new(Self {
            config,
            broker: Arc::new(broker),
            dealer: Arc::new(dealer),
            peers: DashMap::new(),
            events,
            meta: OnceCell::new(),
            tasks: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn dealer(&self) -> &Arc<Dealer> {
        &self.dealer
    }

    /// Подключённые пиры, включая собственного пира маршрутизатора.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn peer(
        &self,
        peer_id: &str,
    ) -> Option<Arc<Peer>> {
        self.peers
            .get(peer_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Подписка на события жизненного цикла пиров.
    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Запускает брокер, дилер и мета-процедуры.
    ///
    /// Повторный вызов ничего не делает.
    pub async fn serve(self: &Arc<Self>) -> Result<(), RouterError> {
        if self.meta.get().is_some() {
            return Ok(());
        }

        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(
                Arc::clone(&self.broker).serve(self.events.subscribe()),
            ));
            tasks.push(tokio::spawn(
                Arc::clone(&self.dealer).serve(self.events.subscribe()),
            ));
            tasks.push(tokio::spawn(
                Arc::clone(self).watch_peers(self.events.subscribe()),
            ));
        }

        // Ресурсы маршрутизатора от предыдущего запуска с тем же ID.
        let stale = self.dealer.unregister(self.id(), None)?.len()
            + self.broker.unsubscribe(self.id(), None)?.len();
        if stale > 0 {
            debug!(target: "routex::router", stale, "stale router resources removed");
        }

        let ((router_side, router_inbound), (client_side, client_inbound)) =
            duplex(META_CHANNEL_CAPACITY);
        let details =
            PeerDetails::new(self.id(), ROUTER_ROLE).with_offer(self.config.meta_offer);
        let router_peer = Peer::spawn_with_timeout(
            details.clone(),
            router_side,
            router_inbound,
            self.config.peer_send_timeout,
        );
        let client_peer = Peer::spawn_with_timeout(
            details,
            client_side,
            client_inbound,
            self.config.peer_send_timeout,
        );
        let session = Session::with_timeouts(
            client_peer,
            self.config.default_timeout,
            self.config.generator_lifetime,
        );
        if self.meta.set(Arc::clone(&session)).is_err() {
            session.leave().await;
            return Ok(());
        }

        self.join(router_peer).await?;
        meta::mount(self, &session)?;

        info!(target: "routex::router", router_id = %self.id(), "up...");
        Ok(())
    }

    /// Подключает пира.
    ///
    /// Сохранённые ресурсы пира возвращаются в индексы, после чего пир
    /// становится виден брокеру и дилеру. ID должен быть уникален среди
    /// подключённых пиров.
    pub async fn join(
        &self,
        peer: Arc<Peer>,
    ) -> Result<(), RouterError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(RouterError::Internal);
        }

        let peer_id = peer.id().to_string();
        match self.peers.entry(peer_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(target: "routex::router", peer_id = %peer_id, "peer already joined");
                return Err(RouterError::Denied);
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&peer));
            }
        }

        let registrations = self.dealer.registrations().restore_author(&peer_id);
        let subscriptions = self.broker.subscriptions().restore_author(&peer_id);
        match (registrations, subscriptions) {
            (Ok(registrations), Ok(subscriptions)) => {
                if registrations + subscriptions > 0 {
                    debug!(
                        target: "routex::router",
                        peer_id = %peer_id,
                        registrations,
                        subscriptions,
                        "resources restored"
                    );
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                self.peers.remove(&peer_id);
                error!(target: "routex::router", peer_id = %peer_id, error = %e, "restore failed");
                return Err(e.into());
            }
        }

        let mut broker_attached = self.broker.watch_attached();
        let mut dealer_attached = self.dealer.watch_attached();
        if self.events.send(PeerEvent::Joined(Arc::clone(&peer))).is_err() {
            self.peers.remove(&peer_id);
            return Err(RouterError::Internal);
        }

        let attached = async {
            let _ = broker_attached
                .wait_for(|_| self.broker.is_attached(&peer_id))
                .await;
            let _ = dealer_attached
                .wait_for(|_| self.dealer.is_attached(&peer_id))
                .await;
        };
        if tokio::time::timeout(self.config.default_timeout, attached)
            .await
            .is_err()
        {
            warn!(target: "routex::router", peer_id = %peer_id, "peer attach timed out");
            self.peers.remove(&peer_id);
            return Err(RouterError::TimedOut);
        }

        info!(
            target: "routex::router",
            peer_id = %peer_id,
            role = %peer.role(),
            "peer joined"
        );
        Ok(())
    }

    /// Останавливает маршрутизатор и отключает всех пиров.
    ///
    /// Сохранённые ресурсы пиров не удаляются и восстанавливаются при
    /// следующем подключении.
    pub async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(session) = self.meta.get() {
            session.leave().await;
        }
        for peer in self.peers() {
            peer.close().await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(target: "routex::router", router_id = %self.id(), "down...");
    }

    /// Публикует уведомление для пиров с ролью `router`, кроме автора.
    pub(crate) async fn notify<T: Serialize + ?Sized>(
        &self,
        uri: &str,
        author_id: &str,
        resource: &T,
    ) {
        let Some(session) = self.meta.get() else {
            return;
        };
        let payload = match serde_json::to_value(resource) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: "routex::router", uri, error = %e, "notification not encoded");
                return;
            }
        };

        let mut features = PublishFeatures::new(uri);
        features.include_roles = vec![NOTIFICATION_ROLE.to_string()];
        features.exclude_subscribers = vec![author_id.to_string()];
        if !session.publish(features, payload).await {
            debug!(target: "routex::router", uri, "notification not published");
        }
    }

    async fn watch_peers(
        self: Arc<Self>,
        mut events: broadcast::Receiver<PeerEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(PeerEvent::Joined(peer)) => {
                    tokio::spawn(Arc::clone(&self).watch_peer(peer));
                }
                Ok(PeerEvent::Left(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "routex::router", skipped, "peer events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn watch_peer(
        self: Arc<Self>,
        peer: Arc<Peer>,
    ) {
        peer.closed().await;
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        self.leave(&peer).await;
    }

    /// Удаляет все ресурсы отключившегося пира и рассылает уведомления.
    async fn leave(
        &self,
        peer: &Arc<Peer>,
    ) {
        let peer_id = peer.id();

        let registrations = self
            .dealer
            .unregister(peer_id, None)
            .unwrap_or_else(|e| {
                error!(target: "routex::router", peer_id, error = %e, "registrations not removed");
                Vec::new()
            });
        let subscriptions = self
            .broker
            .unsubscribe(peer_id, None)
            .unwrap_or_else(|e| {
                error!(target: "routex::router", peer_id, error = %e, "subscriptions not removed");
                Vec::new()
            });

        for registration in &registrations {
            self.notify(REGISTRATION_GONE, peer_id, registration.as_ref())
                .await;
        }
        for subscription in &subscriptions {
            self.notify(SUBSCRIPTION_GONE, peer_id, subscription.as_ref())
                .await;
        }

        self.peers
            .remove_if(peer_id, |_, joined| Arc::ptr_eq(joined, peer));
        let _ = self.events.send(PeerEvent::Left(peer_id.to_string()));

        info!(
            target: "routex::router",
            peer_id,
            registrations = registrations.len(),
            subscriptions = subscriptions.len(),
            "peer left"
        );
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для RouterConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: new_id(),
            default_timeout: DEFAULT_TIMEOUT,
            generator_lifetime: DEFAULT_GENERATOR_LIFETIME,
            resend_count: DEFAULT_RESEND_COUNT,
            peer_send_timeout: DEFAULT_SEND_TIMEOUT,
            meta_offer: Offer::default(),
        }
    }
}
