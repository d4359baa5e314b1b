use std::{sync::Arc, time::Duration};

use routex_error::{PendingError, RouterError};
use tracing::debug;

use crate::{
    peer::Peer,
    protocol::{CancelEvent, ReplyEvent},
};

/// Посредник генератора между вызывающим и исполнителем.
///
/// Запускается дилером на первый `yield` исполнителя. Дальше каждый `next`
/// вызывающего передаётся исполнителю, а его ответ возвращается обратно,
/// пока не придёт финальный ответ, stop или не истечёт время жизни.
pub struct Referee {
    router_id: String,
    caller: Arc<Peer>,
    executor: Arc<Peer>,
    step_timeout: Duration,
    lifetime: Duration,
    resend_count: u32,
}

impl Referee {
    pub fn new(
        router_id: &str,
        caller: Arc<Peer>,
        executor: Arc<Peer>,
        step_timeout: Duration,
        lifetime: Duration,
        resend_count: u32,
    ) -> Self {
        Self {
            router_id: router_id.to_string(),
            caller,
            executor,
            step_timeout,
            lifetime,
            resend_count,
        }
    }

    pub async fn run(
        self,
        handshake: ReplyEvent,
    ) {
        let generator_id = handshake
            .features
            .generator_id
            .clone()
            .unwrap_or_else(|| handshake.features.invocation_id.clone());
        let mut stop = self
            .caller
            .pending_cancels
            .open(generator_id.clone(), Some(self.lifetime));

        debug!(
            target: "routex::referee",
            generator_id = %generator_id,
            caller_id = %self.caller.id(),
            executor_id = %self.executor.id(),
            "generator opened"
        );

        let mut outgoing = handshake;
        loop {
            let mut next_wait = self
                .caller
                .pending_nexts
                .open(outgoing.id.clone(), Some(self.lifetime));
            outgoing.features.visited_routers.push(self.router_id.clone());
            if !self.caller.send(outgoing, self.resend_count).await {
                self.stop_executor(&generator_id, "caller unreachable").await;
                return;
            }

            let mut next = tokio::select! {
                next = next_wait.recv() => match next {
                    Ok(next) => next,
                    Err(PendingError::TimedOut) => {
                        self.stop_executor(&generator_id, "lifetime expired").await;
                        return;
                    }
                    Err(PendingError::Discarded) => {
                        self.stop_executor(&generator_id, "caller gone").await;
                        return;
                    }
                },
                _ = stop.recv() => {
                    self.stop_executor(&generator_id, "stopped").await;
                    return;
                }
            };

            let step_timeout = next.timeout_or(self.step_timeout);
            let next_id = next.id.clone();
            let mut response = self
                .executor
                .pending_replies
                .open(next_id.clone(), Some(step_timeout));
            next.features.visited_routers.push(self.router_id.clone());
            if !self.executor.send(next, self.resend_count).await {
                self.fail_step(&next_id, RouterError::Internal).await;
                return;
            }

            let reply = tokio::select! {
                reply = response.recv() => reply,
                _ = stop.recv() => {
                    self.stop_executor(&generator_id, "stopped").await;
                    return;
                }
            };

            match reply {
                Ok(reply) if reply.is_yield() => outgoing = reply,
                Ok(mut reply) => {
                    reply.features.visited_routers.push(self.router_id.clone());
                    self.caller.send(reply, self.resend_count).await;
                    debug!(target: "routex::referee", generator_id = %generator_id, "generator done");
                    return;
                }
                Err(PendingError::TimedOut) => {
                    self.fail_step(&next_id, RouterError::TimedOut).await;
                    self.stop_executor(&generator_id, "step timed out").await;
                    return;
                }
                Err(PendingError::Discarded) => {
                    self.fail_step(&next_id, RouterError::Internal).await;
                    return;
                }
            }
        }
    }

    async fn fail_step(
        &self,
        next_id: &str,
        error: RouterError,
    ) {
        self.caller
            .send(ReplyEvent::error(next_id, &error), self.resend_count)
            .await;
    }

    async fn stop_executor(
        &self,
        generator_id: &str,
        reason: &str,
    ) {
        debug!(
            target: "routex::referee",
            generator_id,
            executor_id = %self.executor.id(),
            reason,
            "stop generator"
        );
        let mut stop = CancelEvent::new(generator_id);
        stop.features.visited_routers.push(self.router_id.clone());
        self.executor.send(stop, self.resend_count).await;
    }
}
