use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use routex_error::{PendingError, RouterError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::{referee::Referee, PeerEvent};
use crate::{
    peer::{InboundCall, Peer},
    protocol::{CancelEvent, RegisterOptions, Registration, ReplyEvent, Resource},
    storage::Storage,
    urim::{Urim, REGISTRATIONS_BUCKET},
};

/// Дилер RPC.
///
/// Выбирает исполнителя для каждого вызова, передаёт ему вызов и
/// возвращает ответ вызывающему. Для генераторов управление передаётся
/// [`Referee`].
pub struct Dealer {
    router_id: String,
    registrations: Urim<RegisterOptions>,
    peers: DashMap<String, Arc<Peer>>,
    counters: DashMap<String, u64>,
    attached: watch::Sender<u64>,
    generator_lifetime: Duration,
    default_timeout: Duration,
    resend_count: u32,
}

impl Dealer {
    pub fn new(
        router_id: impl Into<String>,
        storage: Arc<dyn Storage>,
        default_timeout: Duration,
        generator_lifetime: Duration,
        resend_count: u32,
    ) -> Self {
        let (attached, _) = watch::channel(0);
        Self {
            router_id: router_id.into(),
            registrations: Urim::new(storage, REGISTRATIONS_BUCKET),
            peers: DashMap::new(),
            counters: DashMap::new(),
            attached,
            generator_lifetime,
            default_timeout,
            resend_count,
        }
    }

    pub fn registrations(&self) -> &Urim<RegisterOptions> {
        &self.registrations
    }

    pub fn is_attached(
        &self,
        peer_id: &str,
    ) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn watch_attached(&self) -> watch::Receiver<u64> {
        self.attached.subscribe()
    }

    /// Регистрирует процедуру от имени `author_id`.
    pub fn register(
        &self,
        uri: &str,
        author_id: &str,
        options: RegisterOptions,
    ) -> Result<Arc<Registration>, RouterError> {
        self.register_within(uri, author_id, options, None)
    }

    /// То же, что [`Self::register`], но отказывает с `Denied`, если у автора
    /// уже `limit` ресурсов.
    pub fn register_within(
        &self,
        uri: &str,
        author_id: &str,
        mut options: RegisterOptions,
        limit: Option<usize>,
    ) -> Result<Arc<Registration>, RouterError> {
        options.policy.validate()?;
        options.route.push(self.router_id.clone());
        let registration = self
            .registrations
            .add_within(Resource::new(uri, author_id, options), limit)?;
        info!(
            target: "routex::dealer",
            uri,
            author_id,
            registration_id = %registration.id,
            "new registration"
        );
        Ok(registration)
    }

    /// Удаляет одну регистрацию автора или все при `None`.
    pub fn unregister(
        &self,
        author_id: &str,
        registration_id: Option<&str>,
    ) -> Result<Vec<Arc<Registration>>, RouterError> {
        let removed = self
            .registrations
            .delete_by_author(author_id, registration_id)?;
        for registration in &removed {
            info!(
                target: "routex::dealer",
                uri = %registration.uri,
                author_id,
                registration_id = %registration.id,
                "registration gone"
            );
        }
        Ok(removed)
    }

    /// Кандидаты на исполнение вызова в порядке попыток.
    ///
    /// Сначала более удалённые регистрации, при равенстве более старые.
    /// Затем список сдвигается по кругу на счётчик вызовов этого URI, так
    /// что N подряд идущих вызовов начинаются с N разных исполнителей.
    pub fn match_registrations(
        &self,
        uri: &str,
    ) -> Vec<Arc<Registration>> {
        let mut list = self.registrations.match_uri(uri);
        if list.is_empty() {
            return list;
        }

        list.sort_by(|a, b| {
            b.distance()
                .cmp(&a.distance())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let offset = {
            let mut counter = self.counters.entry(uri.to_string()).or_insert(0);
            let offset = *counter;
            *counter = counter.wrapping_add(1);
            offset
        };
        let len = list.len();
        list.rotate_left((offset % len as u64) as usize);
        list
    }

    /// Доставляет вызов одному исполнителю и возвращает результат.
    pub async fn on_call(
        self: Arc<Self>,
        caller: Arc<Peer>,
        inbound: InboundCall,
    ) {
        let InboundCall {
            event: mut call,
            mut cancel,
        } = inbound;
        let timeout = call.features.timeout_or(self.default_timeout);
        cancel.set_timeout(Some(timeout));
        call.route.caller_id = caller.id().to_string();
        call.route.visited_routers.push(self.router_id.clone());

        debug!(
            target: "routex::dealer",
            caller_id = %caller.id(),
            uri = %call.features.uri,
            call_id = %call.id,
            "call"
        );

        for registration in self.match_registrations(&call.features.uri) {
            if registration.author_id == caller.id() {
                continue;
            }
            let Some(executor) = self
                .peers
                .get(&registration.author_id)
                .map(|entry| Arc::clone(entry.value()))
            else {
                debug!(
                    target: "routex::dealer",
                    registration_id = %registration.id,
                    executor_id = %registration.author_id,
                    "executor not found"
                );
                continue;
            };
            if !executor.is_alive() || !registration.options.policy.allows(caller.role()) {
                continue;
            }

            let mut request = call.clone();
            request.route.executor_id = executor.id().to_string();
            request.route.endpoint_id = registration.id.clone();

            let mut response = executor.pending_replies.open(call.id.clone(), None);
            if !executor.send(request, self.resend_count).await {
                debug!(
                    target: "routex::dealer",
                    call_id = %call.id,
                    executor_id = %executor.id(),
                    "executor did not accept call, trying next"
                );
                continue;
            }

            tokio::select! {
                cancelled = cancel.recv() => {
                    drop(response);
                    self.on_cancelled(&caller, &executor, &call.id, cancelled).await;
                }
                reply = response.recv() => {
                    drop(cancel);
                    self.on_reply(caller, executor, &call.id, reply).await;
                }
            }
            return;
        }

        debug!(
            target: "routex::dealer",
            caller_id = %caller.id(),
            uri = %call.features.uri,
            "no executor for call"
        );
        caller
            .send(
                ReplyEvent::error(&call.id, &RouterError::ProcedureNotFound),
                self.resend_count,
            )
            .await;
    }

    async fn on_cancelled(
        &self,
        caller: &Peer,
        executor: &Peer,
        call_id: &str,
        cancelled: Result<CancelEvent, PendingError>,
    ) {
        let mut cancel = match cancelled {
            Ok(cancel) => {
                debug!(target: "routex::dealer", call_id, "call cancelled by caller");
                cancel
            }
            Err(PendingError::TimedOut) => {
                debug!(target: "routex::dealer", call_id, "call timed out");
                caller
                    .send(
                        ReplyEvent::error(call_id, &RouterError::TimedOut),
                        self.resend_count,
                    )
                    .await;
                CancelEvent::new(call_id)
            }
            Err(PendingError::Discarded) => {
                debug!(target: "routex::dealer", call_id, "caller gone");
                CancelEvent::new(call_id)
            }
        };
        cancel.features.visited_routers.push(self.router_id.clone());
        executor.send(cancel, self.resend_count).await;
    }

    async fn on_reply(
        &self,
        caller: Arc<Peer>,
        executor: Arc<Peer>,
        call_id: &str,
        reply: Result<ReplyEvent, PendingError>,
    ) {
        let mut reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    target: "routex::dealer",
                    call_id,
                    executor_id = %executor.id(),
                    error = %e,
                    "executor gone before reply"
                );
                caller
                    .send(
                        ReplyEvent::error(call_id, &RouterError::Internal),
                        self.resend_count,
                    )
                    .await;
                return;
            }
        };

        if reply.is_yield() {
            Referee::new(
                &self.router_id,
                caller,
                executor,
                self.default_timeout,
                self.generator_lifetime,
                self.resend_count,
            )
            .run(reply)
            .await;
            return;
        }

        reply.features.visited_routers.push(self.router_id.clone());
        if !caller.send(reply, self.resend_count).await {
            debug!(target: "routex::dealer", call_id, "reply not delivered to caller");
        }
    }

    pub fn on_join(
        self: &Arc<Self>,
        peer: Arc<Peer>,
    ) {
        self.peers.insert(peer.id().to_string(), Arc::clone(&peer));
        self.attached.send_modify(|generation| *generation += 1);
        debug!(target: "routex::dealer", peer_id = %peer.id(), "attach peer");

        if let Some(calls) = peer.take_call_stream() {
            tokio::spawn(Arc::clone(self).consume(peer, calls));
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
            debug!(target: "routex::dealer", peer_id, "detach peer");
        }
    }

    pub async fn serve(
        self: Arc<Self>,
        mut events: broadcast::Receiver<PeerEvent>,
    ) {
        info!(target: "routex::dealer", "up...");
        loop {
            match events.recv().await {
                Ok(PeerEvent::Joined(peer)) => self.on_join(peer),
                Ok(PeerEvent::Left(peer_id)) => self.on_leave(&peer_id),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "routex::dealer", skipped, "peer events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!(target: "routex::dealer", "down...");
    }

    async fn consume(
        self: Arc<Self>,
        peer: Arc<Peer>,
        mut calls: mpsc::UnboundedReceiver<InboundCall>,
    ) {
        while let Some(inbound) = calls.recv().await {
            tokio::spawn(Arc::clone(&self).on_call(Arc::clone(&peer), inbound));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
