use std::{sync::Arc, time::Duration};

use routex_error::RouterError;
use serde_json::json;
use tracing::debug;

use super::GeneratorSource;
use crate::{
    peer::{Peer, Pending},
    protocol::{new_id, CallEvent, CancelEvent, NextEvent, Payload, ReplyEvent, ReplyKind},
};

/// Очередной результат удалённого генератора.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorStep {
    /// Промежуточное значение; генератор продолжает работу.
    Yield(Payload),
    /// Финальный ответ; генератор завершён.
    Done(Payload),
}

/// Сторона вызывающего в протоколе генератора.
///
/// Каждый [`RemoteGenerator::next`] отправляет ровно один `next` и ждёт
/// ответа на него, поэтому в полёте всегда не больше одного шага.
pub struct RemoteGenerator {
    peer: Arc<Peer>,
    id: String,
    last_yield_id: String,
    resend_count: u32,
    active: bool,
}

impl RemoteGenerator {
    pub(crate) fn new(
        peer: Arc<Peer>,
        handshake: &ReplyEvent,
        resend_count: u32,
    ) -> Self {
        let id = handshake
            .features
            .generator_id
            .clone()
            .unwrap_or_else(|| handshake.features.invocation_id.clone());
        Self {
            peer,
            id,
            last_yield_id: handshake.id.clone(),
            resend_count,
            active: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Запрашивает следующий шаг.
    pub async fn next(
        &mut self,
        timeout: Duration,
    ) -> Result<GeneratorStep, RouterError> {
        if !self.active {
            return Err(RouterError::Protocol);
        }

        let next = NextEvent::new(&self.last_yield_id, timeout);
        let mut response = self
            .peer
            .pending_replies
            .open(next.id.clone(), Some(timeout));
        if !self.peer.send(next, self.resend_count).await {
            self.active = false;
            return Err(RouterError::Internal);
        }

        let reply = match response.recv().await {
            Ok(reply) => reply,
            Err(e) => {
                self.active = false;
                return Err(e.into());
            }
        };

        match reply.kind {
            ReplyKind::Yield => {
                self.last_yield_id = reply.id;
                Ok(GeneratorStep::Yield(reply.payload))
            }
            ReplyKind::Reply => {
                self.active = false;
                Ok(GeneratorStep::Done(reply.payload))
            }
            ReplyKind::Error => {
                self.active = false;
                Err(reply.error_kind().unwrap_or(RouterError::Internal))
            }
        }
    }

    /// Останавливает генератор. Исполнитель не присылает финальный ответ.
    pub async fn stop(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.peer
            .send(CancelEvent::new(&self.id), self.resend_count)
            .await
    }
}

/// Сторона исполнителя: handshake, затем по одному значению на каждый
/// `next`, затем финальный ответ. Stop завершает цикл без ответа.
pub(crate) async fn serve_generator(
    peer: Arc<Peer>,
    call: &CallEvent,
    mut source: GeneratorSource,
    mut cancel: Pending<CancelEvent>,
    lifetime: Duration,
    resend_count: u32,
) {
    let generator_id = new_id();
    let mut stop = peer
        .pending_cancels
        .open(generator_id.clone(), Some(lifetime));
    let mut outgoing = ReplyEvent::yield_value(&call.id, &generator_id, json!({ "id": generator_id }));

    loop {
        let mut next_wait = peer
            .pending_nexts
            .open(outgoing.id.clone(), Some(lifetime));
        if !peer.send(outgoing, resend_count).await {
            debug!(
                target: "routex::session",
                generator_id = %generator_id,
                "generator yield not delivered"
            );
            return;
        }

        let next = tokio::select! {
            next = next_wait.recv() => match next {
                Ok(next) => next,
                Err(_) => {
                    debug!(
                        target: "routex::session",
                        generator_id = %generator_id,
                        "generator abandoned"
                    );
                    return;
                }
            },
            _ = stop.recv() => {
                debug!(target: "routex::session", generator_id = %generator_id, "generator stopped");
                return;
            }
            _ = cancel.recv() => {
                debug!(target: "routex::session", generator_id = %generator_id, "generator cancelled");
                return;
            }
        };

        let value = tokio::select! {
            value = source.next() => value,
            _ = stop.recv() => {
                debug!(target: "routex::session", generator_id = %generator_id, "generator stopped");
                return;
            }
            _ = cancel.recv() => return,
        };
        outgoing = match value {
            Some(value) => ReplyEvent::yield_value(&next.id, &generator_id, value),
            None => {
                peer.send(ReplyEvent::reply(&next.id, source.into_final_reply()), resend_count)
                    .await;
                return;
            }
        };
    }
}
