use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use routex_error::RouterError;
use tokio::sync::mpsc;

use crate::protocol::{CallEvent, Payload, PublishEvent};

/// Результат обработки вызова исполнителем.
pub enum Outcome {
    Reply(Payload),
    Error(RouterError),
    /// Вызов превращается в генератор: значения отдаются по одному на
    /// каждый `next` вызывающего.
    Generator(GeneratorSource),
}

/// Процедура, доступная по регистрации.
#[async_trait]
pub trait CallEndpoint: Send + Sync + 'static {
    async fn invoke(
        &self,
        call: CallEvent,
    ) -> Outcome;
}

/// Обработчик событий подписки.
#[async_trait]
pub trait PublishEndpoint: Send + Sync + 'static {
    async fn deliver(
        &self,
        event: PublishEvent,
    );
}

/// Источник значений генератора и финальный ответ.
pub struct GeneratorSource {
    values: SourceValues,
    final_reply: Payload,
}

enum SourceValues {
    Iter(Box<dyn Iterator<Item = Payload> + Send>),
    Channel(mpsc::Receiver<Payload>),
}

struct FnCallEndpoint<F>(F);

struct FnPublishEndpoint<F>(F);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Outcome {
    /// Ответ из сериализуемого значения.
    pub fn reply<T: serde::Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(payload) => Self::Reply(payload),
            Err(e) => Self::Error(e.into()),
        }
    }
}

impl GeneratorSource {
    /// Ленивый генератор поверх итератора.
    pub fn from_iter<I>(
        values: I,
        final_reply: Payload,
    ) -> Self
    where
        I: IntoIterator<Item = Payload>,
        I::IntoIter: Send + 'static,
    {
        Self {
            values: SourceValues::Iter(Box::new(values.into_iter())),
            final_reply,
        }
    }

    /// Генератор, значения которого производит другая задача.
    pub fn from_channel(
        values: mpsc::Receiver<Payload>,
        final_reply: Payload,
    ) -> Self {
        Self {
            values: SourceValues::Channel(values),
            final_reply,
        }
    }

    /// Следующее значение; `None`, когда источник исчерпан.
    pub async fn next(&mut self) -> Option<Payload> {
        match &mut self.values {
            SourceValues::Iter(iter) => iter.next(),
            SourceValues::Channel(rx) => rx.recv().await,
        }
    }

    pub fn into_final_reply(self) -> Payload {
        self.final_reply
    }
}

/// Оборачивает замыкание в [`CallEndpoint`].
pub fn call_endpoint<F, Fut>(f: F) -> Arc<dyn CallEndpoint>
where
    F: Fn(CallEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    Arc::new(FnCallEndpoint(f))
}

/// Оборачивает замыкание в [`PublishEndpoint`].
pub fn publish_endpoint<F, Fut>(f: F) -> Arc<dyn PublishEndpoint>
where
    F: Fn(PublishEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnPublishEndpoint(f))
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl<F, Fut> CallEndpoint for FnCallEndpoint<F>
where
    F: Fn(CallEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn invoke(
        &self,
        call: CallEvent,
    ) -> Outcome {
        (self.0)(call).await
    }
}

#[async_trait]
impl<F, Fut> PublishEndpoint for FnPublishEndpoint<F>
where
    F: Fn(PublishEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn deliver(
        &self,
        event: PublishEvent,
    ) {
        (self.0)(event).await
    }
}
