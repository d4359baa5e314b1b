use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use routex_error::RouterError;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::PeerEvent;
use crate::{
    peer::Peer,
    protocol::{PublishEvent, Resource, RolePolicy, SubscribeOptions, Subscription},
    storage::Storage,
    urim::{Urim, SUBSCRIPTIONS_BUCKET},
};

/// Брокер publish/subscribe.
///
/// Каждое опубликованное событие сопоставляется с подписками и
/// рассылается всем подходящим подписчикам.
pub struct Broker {
    router_id: String,
    subscriptions: Urim<SubscribeOptions>,
    peers: DashMap<String, Arc<Peer>>,
    attached: watch::Sender<u64>,
    resend_count: u32,
}

impl Broker {
    pub fn new(
        router_id: impl Into<String>,
        storage: Arc<dyn Storage>,
        resend_count: u32,
    ) -> Self {
        let (attached, _) = watch::channel(0);
        Self {
            router_id: router_id.into(),
            subscriptions: Urim::new(storage, SUBSCRIPTIONS_BUCKET),
            peers: DashMap::new(),
            attached,
            resend_count,
        }
    }

    pub fn subscriptions(&self) -> &Urim<SubscribeOptions> {
        &self.subscriptions
    }

    /// Известен ли брокеру пир с таким ID.
    pub fn is_attached(
        &self,
        peer_id: &str,
    ) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Меняется при каждом подключении и отключении пира.
    pub fn watch_attached(&self) -> watch::Receiver<u64> {
        self.attached.subscribe()
    }

    /// Создаёт подписку от имени `author_id`.
    pub fn subscribe(
        &self,
        uri: &str,
        author_id: &str,
        options: SubscribeOptions,
    ) -> Result<Arc<Subscription>, RouterError> {
        self.subscribe_within(uri, author_id, options, None)
    }

    /// То же, что [`Self::subscribe`], но отказывает с `Denied`, если у автора
    /// уже `limit` ресурсов.
    pub fn subscribe_within(
        &self,
        uri: &str,
        author_id: &str,
        mut options: SubscribeOptions,
        limit: Option<usize>,
    ) -> Result<Arc<Subscription>, RouterError> {
        options.policy.validate()?;
        options.route.push(self.router_id.clone());
        let subscription = self
            .subscriptions
            .add_within(Resource::new(uri, author_id, options), limit)?;
        info!(
            target: "routex::broker",
            uri,
            author_id,
            subscription_id = %subscription.id,
            "new subscription"
        );
        Ok(subscription)
    }

    /// Удаляет одну подписку автора или все при `None`.
    pub fn unsubscribe(
        &self,
        author_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<Vec<Arc<Subscription>>, RouterError> {
        let removed = self
            .subscriptions
            .delete_by_author(author_id, subscription_id)?;
        for subscription in &removed {
            info!(
                target: "routex::broker",
                uri = %subscription.uri,
                author_id,
                subscription_id = %subscription.id,
                "subscription gone"
            );
        }
        Ok(removed)
    }

    pub fn match_subscriptions(
        &self,
        uri: &str,
    ) -> Vec<Arc<Subscription>> {
        self.subscriptions.match_uri(uri)
    }

    /// Рассылает событие подписчикам.
    ///
    /// Отправки разным подписчикам идут параллельно; следующее событие
    /// того же издателя обрабатывается после завершения всех отправок, так
    /// что порядок для каждого подписчика сохраняется.
    pub async fn on_publish(
        &self,
        publisher: &Peer,
        mut event: PublishEvent,
    ) {
        event.route.publisher_id = publisher.id().to_string();
        event.route.visited_routers.push(self.router_id.clone());

        let features = &event.features;
        debug!(
            target: "routex::broker",
            publisher_id = %publisher.id(),
            uri = %features.uri,
            event_id = %event.id,
            "publish"
        );

        let include: HashSet<&str> = features
            .include_subscribers
            .iter()
            .map(String::as_str)
            .collect();
        let exclude: HashSet<&str> = features
            .exclude_subscribers
            .iter()
            .map(String::as_str)
            .collect();
        let roles = RolePolicy::new(features.include_roles.clone(), features.exclude_roles.clone());

        let mut deliveries = JoinSet::new();
        for subscription in self.match_subscriptions(&features.uri) {
            let subscriber_id = subscription.author_id.as_str();
            if exclude.contains(subscriber_id)
                || (!include.is_empty() && !include.contains(subscriber_id))
            {
                continue;
            }

            let Some(subscriber) = self
                .peers
                .get(subscriber_id)
                .map(|entry| Arc::clone(entry.value()))
            else {
                debug!(
                    target: "routex::broker",
                    uri = %features.uri,
                    subscriber_id,
                    subscription_id = %subscription.id,
                    "subscriber not found"
                );
                continue;
            };

            if !roles.allows(subscriber.role())
                || !subscription.options.policy.allows(publisher.role())
            {
                continue;
            }

            let mut delivery = event.clone();
            delivery.route.subscriber_id = subscriber.id().to_string();
            delivery.route.endpoint_id = subscription.id.clone();
            let resend_count = self.resend_count;
            let subscription_id = subscription.id.clone();
            deliveries.spawn(async move {
                let delivered = subscriber.send(delivery, resend_count).await;
                (subscriber, subscription_id, delivered)
            });
        }

        while let Some(result) = deliveries.join_next().await {
            match result {
                Ok((subscriber, subscription_id, true)) => debug!(
                    target: "routex::broker",
                    subscriber_id = %subscriber.id(),
                    subscription_id = %subscription_id,
                    "publication sent"
                ),
                Ok((subscriber, subscription_id, false)) => warn!(
                    target: "routex::broker",
                    subscriber_id = %subscriber.id(),
                    subscription_id = %subscription_id,
                    "subscriber did not accept publication"
                ),
                Err(e) => warn!(target: "routex::broker", error = %e, "delivery task failed"),
            }
        }
    }

    pub fn on_join(
        self: &Arc<Self>,
        peer: Arc<Peer>,
    ) {
        self.peers.insert(peer.id().to_string(), Arc::clone(&peer));
        self.attached.send_modify(|generation| *generation += 1);
        debug!(target: "routex::broker", peer_id = %peer.id(), "attach peer");

        if let Some(publishes) = peer.take_publish_stream() {
            tokio::spawn(Arc::clone(self).consume(peer, publishes));
        }
    }

    /// Забывает пира. Живой пир с тем же ID, подключившийся повторно, не
    /// затрагивается.
    pub fn on_leave(
        &self,
        peer_id: &str,
    ) {
        if self
            .peers
            .remove_if(peer_id, |_, peer| !peer.is_alive())
            .is_some()
        {
            self.attached.send_modify(|generation| *generation += 1);
            debug!(target: "routex::broker", peer_id, "detach peer");
        }
    }

    /// Обрабатывает события подключения и отключения пиров.
    pub async fn serve(
        self: Arc<Self>,
        mut events: broadcast::Receiver<PeerEvent>,
    ) {
        info!(target: "routex::broker", "up...");
        loop {
            match events.recv().await {
                Ok(PeerEvent::Joined(peer)) => self.on_join(peer),
                Ok(PeerEvent::Left(peer_id)) => self.on_leave(&peer_id),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "routex::broker", skipped, "peer events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!(target: "routex::broker", "down...");
    }

    async fn consume(
        self: Arc<Self>,
        peer: Arc<Peer>,
        mut publishes: mpsc::UnboundedReceiver<PublishEvent>,
    ) {
        while let Some(event) = publishes.recv().await {
            self.on_publish(&peer, event).await;
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
