#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use routex::{
    duplex, publish_endpoint, session::PublishEndpoint, storage::Storage, InMemoryStorage, Offer,
    Peer, PeerDetails, PublishEvent, Router, RouterConfig, Session,
};
use tokio::sync::mpsc;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(2);
pub const GENERATOR_LIFETIME: Duration = Duration::from_secs(10);

pub fn config(id: &str) -> RouterConfig {
    RouterConfig {
        id: id.to_string(),
        default_timeout: CALL_TIMEOUT,
        generator_lifetime: GENERATOR_LIFETIME,
        resend_count: 1,
        peer_send_timeout: Duration::from_millis(500),
        meta_offer: Offer::default(),
    }
}

/// Маршрутизатор поверх in-memory хранилища, уже запущенный.
pub async fn start_router() -> Arc<Router> {
    start_router_with(Arc::new(InMemoryStorage::new()), "router").await
}

pub async fn start_router_with(
    storage: Arc<dyn Storage>,
    id: &str,
) -> Arc<Router> {
    let router = Router::new(config(id), storage);
    router.serve().await.unwrap();
    router
}

/// Подключает клиента с ролью `role` и возвращает его сессию.
pub async fn join(
    router: &Arc<Router>,
    id: &str,
    role: &str,
) -> Arc<Session> {
    join_with_offer(router, id, role, Offer::default()).await
}

pub async fn join_with_offer(
    router: &Arc<Router>,
    id: &str,
    role: &str,
    offer: Offer,
) -> Arc<Session> {
    let ((router_side, router_inbound), (client_side, client_inbound)) = duplex(64);
    let details = PeerDetails::new(id, role).with_offer(offer);
    let router_peer = Peer::spawn(details.clone(), router_side, router_inbound);
    let client_peer = Peer::spawn(details, client_side, client_inbound);
    router.join(router_peer).await.unwrap();
    Session::with_timeouts(client_peer, CALL_TIMEOUT, GENERATOR_LIFETIME)
}

/// Ждёт выполнения условия, проверяя его раз в 10 мс.
pub async fn eventually<F>(
    what: &str,
    mut condition: F,
) where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Обработчик подписки, складывающий события в канал.
pub fn collector() -> (Arc<dyn PublishEndpoint>, mpsc::UnboundedReceiver<PublishEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let endpoint = publish_endpoint(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    (endpoint, rx)
}

/// Следующее событие из канала или паника по таймауту.
pub async fn recv_event(rx: &mut mpsc::UnboundedReceiver<PublishEvent>) -> PublishEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event within 2s")
        .expect("collector closed")
}
