use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use routex_error::RouterError;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    generator::serve_generator, CallEndpoint, Outcome, PublishEndpoint, RemoteGenerator,
};
use crate::{
    peer::{InboundCall, Peer, Pending},
    protocol::{
        CallEvent, CallFeatures, CancelEvent, NewResourcePayload, Payload, PublishEvent,
        PublishFeatures, RegisterOptions, Registration, ReplyEvent, ReplyKind, SubscribeOptions,
        Subscription, DEFAULT_GENERATOR_LIFETIME, DEFAULT_RESEND_COUNT, DEFAULT_TIMEOUT,
    },
    router::meta,
};

/// Клиентская сессия поверх [`Peer`].
///
/// Принимает входящие вызовы и публикации и направляет их в локальные
/// обработчики по `route.endpoint_id`; исходящие операции оформляет как
/// вызовы мета-процедур маршрутизатора.
pub struct Session {
    peer: Arc<Peer>,
    registrations: DashMap<String, Arc<dyn CallEndpoint>>,
    subscriptions: DashMap<String, Arc<dyn PublishEndpoint>>,
    active_generators: AtomicUsize,
    default_timeout: Duration,
    generator_lifetime: Duration,
    resend_count: u32,
}

/// Вызов, который можно отменить до получения ответа.
pub struct PendingCall {
    peer: Arc<Peer>,
    call_id: String,
    response: Pending<ReplyEvent>,
    resend_count: u32,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Session {
    /// Создаёт сессию и запускает обработку входящих событий пира.
    pub fn new(peer: Arc<Peer>) -> Arc<Self> {
        Self::with_timeouts(peer, DEFAULT_TIMEOUT, DEFAULT_GENERATOR_LIFETIME)
    }

    pub fn with_timeouts(
        peer: Arc<Peer>,
        default_timeout: Duration,
        generator_lifetime: Duration,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            peer,
            registrations: DashMap::new(),
            subscriptions: DashMap::new(),
            active_generators: AtomicUsize::new(0),
            default_timeout,
            generator_lifetime,
            resend_count: DEFAULT_RESEND_COUNT,
        });

        if let Some(calls) = session.peer.take_call_stream() {
            tokio::spawn(Arc::clone(&session).consume_calls(calls));
        }
        if let Some(publishes) = session.peer.take_publish_stream() {
            tokio::spawn(Arc::clone(&session).consume_publishes(publishes));
        }
        session
    }

    pub fn id(&self) -> &str {
        self.peer.id()
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Количество генераторов, которые сейчас обслуживает эта сессия.
    pub fn active_generators(&self) -> usize {
        self.active_generators.load(Ordering::Acquire)
    }

    /// Привязывает обработчик к уже созданной регистрации.
    pub fn mount_procedure(
        &self,
        registration_id: impl Into<String>,
        endpoint: Arc<dyn CallEndpoint>,
    ) {
        self.registrations.insert(registration_id.into(), endpoint);
    }

    /// Привязывает обработчик к уже созданной подписке.
    pub fn mount_subscriber(
        &self,
        subscription_id: impl Into<String>,
        endpoint: Arc<dyn PublishEndpoint>,
    ) {
        self.subscriptions.insert(subscription_id.into(), endpoint);
    }

    /// Регистрирует процедуру через `wamp.router.register`.
    pub async fn register(
        &self,
        uri: &str,
        options: RegisterOptions,
        endpoint: Arc<dyn CallEndpoint>,
    ) -> Result<Registration, RouterError> {
        let registration: Registration = self
            .call_meta(meta::REGISTER, &NewResourcePayload {
                uri: uri.to_string(),
                options,
            })
            .await?;
        self.mount_procedure(registration.id.clone(), endpoint);
        Ok(registration)
    }

    pub async fn unregister(
        &self,
        registration_id: &str,
    ) -> Result<(), RouterError> {
        let _: Payload = self.call_meta(meta::UNREGISTER, &registration_id).await?;
        self.registrations.remove(registration_id);
        Ok(())
    }

    /// Подписывается через `wamp.router.subscribe`.
    pub async fn subscribe(
        &self,
        uri: &str,
        options: SubscribeOptions,
        endpoint: Arc<dyn PublishEndpoint>,
    ) -> Result<Subscription, RouterError> {
        let subscription: Subscription = self
            .call_meta(meta::SUBSCRIBE, &NewResourcePayload {
                uri: uri.to_string(),
                options,
            })
            .await?;
        self.mount_subscriber(subscription.id.clone(), endpoint);
        Ok(subscription)
    }

    pub async fn unsubscribe(
        &self,
        subscription_id: &str,
    ) -> Result<(), RouterError> {
        let _: Payload = self
            .call_meta(meta::UNSUBSCRIBE, &subscription_id)
            .await?;
        self.subscriptions.remove(subscription_id);
        Ok(())
    }

    /// Публикует событие. Ответа не бывает; `false` означает, что событие
    /// не удалось передать маршрутизатору.
    pub async fn publish(
        &self,
        features: PublishFeatures,
        payload: Payload,
    ) -> bool {
        self.peer
            .send(PublishEvent::new(features, payload), self.resend_count)
            .await
    }

    /// Вызывает процедуру и ждёт терминальный ответ.
    pub async fn call(
        &self,
        features: CallFeatures,
        payload: Payload,
    ) -> Result<Payload, RouterError> {
        self.call_with_cancel(features, payload).await?.result().await
    }

    /// Отправляет вызов и возвращает handle для ожидания или отмены.
    pub async fn call_with_cancel(
        &self,
        features: CallFeatures,
        payload: Payload,
    ) -> Result<PendingCall, RouterError> {
        let timeout = features.timeout_or(self.default_timeout);
        let call = CallEvent::new(features, payload);
        let response = self
            .peer
            .pending_replies
            .open(call.id.clone(), Some(timeout));
        let call_id = call.id.clone();
        if !self.peer.send(call, self.resend_count).await {
            return Err(RouterError::Internal);
        }
        Ok(PendingCall {
            peer: Arc::clone(&self.peer),
            call_id,
            response,
            resend_count: self.resend_count,
        })
    }

    /// Открывает удалённый генератор.
    pub async fn generator(
        &self,
        features: CallFeatures,
        payload: Payload,
    ) -> Result<RemoteGenerator, RouterError> {
        let mut pending = self.call_with_cancel(features, payload).await?;
        let handshake = pending.response().await?;
        match handshake.kind {
            ReplyKind::Yield => Ok(RemoteGenerator::new(
                Arc::clone(&self.peer),
                &handshake,
                self.resend_count,
            )),
            ReplyKind::Error => Err(handshake.error_kind().unwrap_or(RouterError::Internal)),
            ReplyKind::Reply => Err(RouterError::Protocol),
        }
    }

    /// Отключается от маршрутизатора.
    pub async fn leave(&self) {
        self.peer.close().await;
    }

    async fn call_meta<P, R>(
        &self,
        uri: &str,
        payload: &P,
    ) -> Result<R, RouterError>
    where
        P: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let reply = self.call(CallFeatures::new(uri), payload).await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn consume_publishes(
        self: Arc<Self>,
        mut publishes: mpsc::UnboundedReceiver<PublishEvent>,
    ) {
        while let Some(event) = publishes.recv().await {
            let endpoint = self
                .subscriptions
                .get(&event.route.endpoint_id)
                .map(|entry| Arc::clone(entry.value()));
            match endpoint {
                Some(endpoint) => endpoint.deliver(event).await,
                None => debug!(
                    target: "routex::session",
                    session_id = %self.id(),
                    subscription_id = %event.route.endpoint_id,
                    "publication for unknown subscription"
                ),
            }
        }
    }

    async fn consume_calls(
        self: Arc<Self>,
        mut calls: mpsc::UnboundedReceiver<InboundCall>,
    ) {
        while let Some(inbound) = calls.recv().await {
            let endpoint = self
                .registrations
                .get(&inbound.event.route.endpoint_id)
                .map(|entry| Arc::clone(entry.value()));
            match endpoint {
                Some(endpoint) => {
                    tokio::spawn(Arc::clone(&self).invoke(endpoint, inbound));
                }
                None => {
                    warn!(
                        target: "routex::session",
                        session_id = %self.id(),
                        registration_id = %inbound.event.route.endpoint_id,
                        "call for unknown registration"
                    );
                    let reply =
                        ReplyEvent::error(&inbound.event.id, &RouterError::ProcedureNotFound);
                    self.peer.send(reply, self.resend_count).await;
                }
            }
        }
    }

    async fn invoke(
        self: Arc<Self>,
        endpoint: Arc<dyn CallEndpoint>,
        inbound: InboundCall,
    ) {
        let InboundCall { event, mut cancel } = inbound;
        let outcome = tokio::select! {
            outcome = endpoint.invoke(event.clone()) => outcome,
            _ = cancel.recv() => {
                debug!(
                    target: "routex::session",
                    session_id = %self.id(),
                    call_id = %event.id,
                    "invocation cancelled"
                );
                return;
            }
        };

        let reply = match outcome {
            Outcome::Reply(payload) => ReplyEvent::reply(&event.id, payload),
            Outcome::Error(e) => ReplyEvent::error(&event.id, &e),
            Outcome::Generator(source) => {
                self.active_generators.fetch_add(1, Ordering::AcqRel);
                serve_generator(
                    Arc::clone(&self.peer),
                    &event,
                    source,
                    cancel,
                    self.generator_lifetime,
                    self.resend_count,
                )
                .await;
                self.active_generators.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        };
        self.peer.send(reply, self.resend_count).await;
    }
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.call_id
    }

    /// Отменяет вызов. Ответ на отменённый вызов не приходит.
    pub async fn cancel(&self) -> bool {
        self.peer
            .send(CancelEvent::new(&self.call_id), self.resend_count)
            .await
    }

    /// Ждёт терминальный ответ.
    ///
    /// Если процедура оказалась генератором, он останавливается, а вызов
    /// завершается ошибкой протокола.
    pub async fn result(mut self) -> Result<Payload, RouterError> {
        let reply = self.response().await?;
        match reply.kind {
            ReplyKind::Reply => Ok(reply.payload),
            ReplyKind::Error => Err(reply.error_kind().unwrap_or(RouterError::Internal)),
            ReplyKind::Yield => {
                let generator_id = reply
                    .features
                    .generator_id
                    .unwrap_or_else(|| self.call_id.clone());
                self.peer
                    .send(CancelEvent::new(&generator_id), self.resend_count)
                    .await;
                Err(RouterError::Protocol)
            }
        }
    }

    async fn response(&mut self) -> Result<ReplyEvent, RouterError> {
        Ok(self.response.recv().await?)
    }
}
