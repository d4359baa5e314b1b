//! Мета-процедуры маршрутизатора и топики уведомлений.
//!
//! Процедуры регистрируются в дилере от имени самого маршрутизатора и
//! вызываются как обычный RPC.

use std::{future::Future, sync::Arc};

use routex_error::RouterError;
use serde_json::json;

use super::Router;
use crate::{
    protocol::{
        CallEvent, NewResourcePayload, Payload, RegisterOptions, Resource, ResourceOptions,
        SubscribeOptions,
    },
    session::{call_endpoint, CallEndpoint, GeneratorSource, Outcome, Session},
};

pub const REGISTER: &str = "wamp.router.register";
pub const UNREGISTER: &str = "wamp.router.unregister";
pub const SUBSCRIBE: &str = "wamp.router.subscribe";
pub const UNSUBSCRIBE: &str = "wamp.router.unsubscribe";
pub const REGISTRATION_LIST: &str = "wamp.router.registration.list";
pub const SUBSCRIPTION_LIST: &str = "wamp.router.subscription.list";

pub const REGISTRATION_NEW: &str = "wamp.registration.new";
pub const REGISTRATION_GONE: &str = "wamp.registration.gone";
pub const SUBSCRIPTION_NEW: &str = "wamp.subscription.new";
pub const SUBSCRIPTION_GONE: &str = "wamp.subscription.gone";

/// Роль, которой доставляются уведомления.
pub const NOTIFICATION_ROLE: &str = "router";
/// Роль собственного пира маршрутизатора.
pub const ROUTER_ROLE: &str = "root";

/// Регистрирует мета-процедуры и привязывает их к сессии маршрутизатора.
pub(super) fn mount(
    router: &Arc<Router>,
    session: &Session,
) -> Result<(), RouterError> {
    let procedures: [(&str, Arc<dyn CallEndpoint>); 6] = [
        (REGISTER, procedure(router, register)),
        (UNREGISTER, procedure(router, unregister)),
        (SUBSCRIBE, procedure(router, subscribe)),
        (UNSUBSCRIBE, procedure(router, unsubscribe)),
        (REGISTRATION_LIST, procedure(router, registration_list)),
        (SUBSCRIPTION_LIST, procedure(router, subscription_list)),
    ];

    for (uri, endpoint) in procedures {
        let registration =
            router
                .dealer()
                .register(uri, router.id(), RegisterOptions::default())?;
        session.mount_procedure(registration.id.clone(), endpoint);
    }
    Ok(())
}

/// Обработчик держит слабую ссылку, чтобы сессия не продлевала жизнь
/// маршрутизатора.
fn procedure<F, Fut>(
    router: &Arc<Router>,
    handler: F,
) -> Arc<dyn CallEndpoint>
where
    F: Fn(Arc<Router>, CallEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, RouterError>> + Send + 'static,
{
    let router = Arc::downgrade(router);
    call_endpoint(move |call| {
        let pending = router.upgrade().map(|router| handler(router, call));
        async move {
            match pending {
                Some(pending) => pending.await.unwrap_or_else(Outcome::Error),
                None => Outcome::Error(RouterError::Internal),
            }
        }
    })
}

async fn register(
    router: Arc<Router>,
    call: CallEvent,
) -> Result<Outcome, RouterError> {
    let request: NewResourcePayload<RegisterOptions> = call.payload_as()?;
    let author_id = call.route.caller_id.as_str();
    let offer = router
        .peer(author_id)
        .map(|peer| peer.offer())
        .ok_or(RouterError::Denied)?;
    let registration = router.dealer().register_within(
        &request.uri,
        author_id,
        request.options,
        Some(offer.registrations_limit),
    )?;
    router
        .notify(REGISTRATION_NEW, author_id, registration.as_ref())
        .await;
    Ok(Outcome::reply(registration.as_ref()))
}

async fn unregister(
    router: Arc<Router>,
    call: CallEvent,
) -> Result<Outcome, RouterError> {
    let registration_id = resource_id(&call)?;
    let author_id = call.route.caller_id.as_str();
    let removed = router
        .dealer()
        .unregister(author_id, Some(&registration_id))?;
    for registration in &removed {
        router
            .notify(REGISTRATION_GONE, author_id, registration.as_ref())
            .await;
    }
    Ok(Outcome::reply(json!({ "removed": removed.len() })))
}

async fn subscribe(
    router: Arc<Router>,
    call: CallEvent,
) -> Result<Outcome, RouterError> {
    let request: NewResourcePayload<SubscribeOptions> = call.payload_as()?;
    let author_id = call.route.caller_id.as_str();
    let offer = router
        .peer(author_id)
        .map(|peer| peer.offer())
        .ok_or(RouterError::Denied)?;
    let subscription = router.broker().subscribe_within(
        &request.uri,
        author_id,
        request.options,
        Some(offer.subscriptions_limit),
    )?;
    router
        .notify(SUBSCRIPTION_NEW, author_id, subscription.as_ref())
        .await;
    Ok(Outcome::reply(subscription.as_ref()))
}

async fn unsubscribe(
    router: Arc<Router>,
    call: CallEvent,
) -> Result<Outcome, RouterError> {
    let subscription_id = resource_id(&call)?;
    let author_id = call.route.caller_id.as_str();
    let removed = router
        .broker()
        .unsubscribe(author_id, Some(&subscription_id))?;
    for subscription in &removed {
        router
            .notify(SUBSCRIPTION_GONE, author_id, subscription.as_ref())
            .await;
    }
    Ok(Outcome::reply(json!({ "removed": removed.len() })))
}

async fn registration_list(
    router: Arc<Router>,
    _call: CallEvent,
) -> Result<Outcome, RouterError> {
    let dealer = Arc::clone(router.dealer());
    let uris = dealer.registrations().dump_uri_list();
    Ok(resource_list(uris, move |uri| {
        dealer.registrations().get_exact(uri)
    }))
}

async fn subscription_list(
    router: Arc<Router>,
    _call: CallEvent,
) -> Result<Outcome, RouterError> {
    let broker = Arc::clone(router.broker());
    let uris = broker.subscriptions().dump_uri_list();
    Ok(resource_list(uris, move |uri| {
        broker.subscriptions().get_exact(uri)
    }))
}

/// Генератор `{uri, resources}` по каждому URI снимка. Ресурсы читаются в
/// момент выдачи очередного значения.
fn resource_list<O, F>(
    uris: Vec<String>,
    lookup: F,
) -> Outcome
where
    O: ResourceOptions,
    F: Fn(&str) -> Vec<Arc<Resource<O>>> + Send + 'static,
{
    let values = uris.into_iter().map(move |uri| {
        let resources: Vec<Resource<O>> = lookup(&uri)
            .iter()
            .map(|resource| resource.as_ref().clone())
            .collect();
        json!({ "uri": uri, "resources": resources })
    });
    Outcome::Generator(GeneratorSource::from_iter(values, Payload::Null))
}

fn resource_id(call: &CallEvent) -> Result<String, RouterError> {
    let id: String = call.payload_as()?;
    if id.is_empty() {
        return Err(RouterError::InvalidPayload("empty resource id".into()));
    }
    Ok(id)
}
