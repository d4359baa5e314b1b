mod common;

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{collector, eventually, join, join_with_offer, recv_event, start_router};
use routex::{
    call_endpoint, router::meta, CallEvent, CallFeatures, Offer, Outcome, RegisterOptions,
    RolePolicy, RouterError, SubscribeOptions,
};
use serde_json::json;
use tokio::sync::mpsc;

fn greeter() -> Arc<dyn routex::session::CallEndpoint> {
    call_endpoint(|call: CallEvent| async move {
        match call.payload_as::<String>() {
            Ok(name) => Outcome::reply(format!("Hello, {name}!")),
            Err(e) => Outcome::Error(e),
        }
    })
}

/// Тест проверяет вызов процедуры другого пира.
#[tokio::test]
async fn test_call_returns_reply() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register("net.example.greeting", RegisterOptions::default(), greeter())
        .await
        .unwrap();

    let reply = beta
        .call(CallFeatures::new("net.example.greeting"), json!("beta"))
        .await
        .unwrap();
    assert_eq!(reply, json!("Hello, beta!"));
}

/// Тест проверяет ошибку для URI без регистраций.
#[tokio::test]
async fn test_call_unknown_procedure() {
    let router = start_router().await;
    let beta = join(&router, "beta", "guest").await;

    let err = beta
        .call(CallFeatures::new("net.example.missing"), json!(null))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::ProcedureNotFound);
}

/// Тест проверяет, что ошибка исполнителя доходит до вызывающего по имени.
#[tokio::test]
async fn test_executor_error_is_forwarded() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register(
            "net.example.fail",
            RegisterOptions::default(),
            call_endpoint(|_| async { Outcome::Error(RouterError::Remote("NotToday".into())) }),
        )
        .await
        .unwrap();

    let err = beta
        .call(CallFeatures::new("net.example.fail"), json!(null))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Remote("NotToday".into()));
}

/// Тест проверяет отказ в регистрации с некорректным URI.
#[tokio::test]
async fn test_register_invalid_uri() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;

    let err = alpha
        .register("Net..Example", RegisterOptions::default(), greeter())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::InvalidUri(_)));
}

/// Тест проверяет круговой обход исполнителей: первые N вызовов попадают к
/// N разным исполнителям, начиная с самого удалённого, а следующие N
/// повторяют тот же порядок.
#[tokio::test]
async fn test_round_robin_between_executors() {
    let router = start_router().await;
    let caller = join(&router, "caller", "guest").await;

    let mut executors = Vec::new();
    for (id, route) in [
        ("alpha", vec![]),
        ("beta", vec![]),
        ("gamma", vec!["upstream".to_string()]),
    ] {
        let session = join(&router, id, "guest").await;
        let name = id.to_string();
        session
            .register(
                "net.example.work",
                RegisterOptions {
                    route,
                    policy: RolePolicy::default(),
                },
                call_endpoint(move |_| {
                    let name = name.clone();
                    async move { Outcome::reply(name) }
                }),
            )
            .await
            .unwrap();
        executors.push(session);
    }

    let mut served = Vec::new();
    for _ in 0..6 {
        let reply = caller
            .call(CallFeatures::new("net.example.work"), json!(null))
            .await
            .unwrap();
        served.push(reply.as_str().unwrap().to_string());
    }

    assert_eq!(served[0], "gamma");
    assert_eq!(served[..3].iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(served[..3], served[3..]);
}

/// Тест проверяет, что каждый вызов исполняется ровно один раз.
#[tokio::test]
async fn test_each_call_executed_once() {
    let router = start_router().await;
    let caller = join(&router, "caller", "guest").await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut executors = Vec::new();
    for id in ["alpha", "beta"] {
        let session = join(&router, id, "guest").await;
        let counter = Arc::clone(&invocations);
        session
            .register(
                "net.example.count",
                RegisterOptions::default(),
                call_endpoint(move |call: CallEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Outcome::Reply(call.payload) }
                }),
            )
            .await
            .unwrap();
        executors.push(session);
    }

    for i in 0..20 {
        let reply = caller
            .call(CallFeatures::new("net.example.count"), json!(i))
            .await
            .unwrap();
        assert_eq!(reply, json!(i));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 20);
}

/// Тест проверяет отмену вызова: исполнитель прерывается, ответа нет.
#[tokio::test]
async fn test_cancel_interrupts_executor() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (dropped_tx, mut dropped) = mpsc::unbounded_channel();
    alpha
        .register(
            "net.example.slow",
            RegisterOptions::default(),
            call_endpoint(move |_| {
                let started_tx = started_tx.clone();
                let guard = DropSignal(dropped_tx.clone());
                async move {
                    let _guard = guard;
                    let _ = started_tx.send(());
                    std::future::pending::<Outcome>().await
                }
            }),
        )
        .await
        .unwrap();

    let pending = beta
        .call_with_cancel(CallFeatures::new("net.example.slow"), json!(null))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), started.recv())
        .await
        .unwrap();

    assert!(pending.cancel().await);
    tokio::time::timeout(Duration::from_secs(2), dropped.recv())
        .await
        .unwrap();
}

/// Тест проверяет таймаут вызова.
#[tokio::test]
async fn test_call_timeout() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register(
            "net.example.hang",
            RegisterOptions::default(),
            call_endpoint(|_| std::future::pending::<Outcome>()),
        )
        .await
        .unwrap();

    let err = beta
        .call(
            CallFeatures::new("net.example.hang").with_timeout(Duration::from_millis(100)),
            json!(null),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::TimedOut);
}

/// Тест проверяет политику регистрации по роли вызывающего.
#[tokio::test]
async fn test_registration_policy() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "service").await;
    let guest = join(&router, "guest", "guest").await;
    let admin = join(&router, "admin", "admin").await;

    alpha
        .register(
            "net.example.admin",
            RegisterOptions {
                route: Vec::new(),
                policy: RolePolicy::only(["admin"]),
            },
            greeter(),
        )
        .await
        .unwrap();

    assert_eq!(
        guest
            .call(CallFeatures::new("net.example.admin"), json!("guest"))
            .await
            .unwrap_err(),
        RouterError::ProcedureNotFound
    );
    assert_eq!(
        admin
            .call(CallFeatures::new("net.example.admin"), json!("admin"))
            .await
            .unwrap(),
        json!("Hello, admin!")
    );
}

/// Тест проверяет квоту регистраций из offer пира.
#[tokio::test]
async fn test_registration_quota() {
    let router = start_router().await;
    let alpha = join_with_offer(&router, "alpha", "guest", Offer::new(1, 1)).await;

    alpha
        .register("net.example.one", RegisterOptions::default(), greeter())
        .await
        .unwrap();
    let err = alpha
        .register("net.example.two", RegisterOptions::default(), greeter())
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Denied);

    let (endpoint, _events) = collector();
    alpha
        .subscribe("net.example", SubscribeOptions::default(), endpoint)
        .await
        .unwrap();
    let (endpoint, _events) = collector();
    let err = alpha
        .subscribe("net.other", SubscribeOptions::default(), endpoint)
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Denied);
}

/// Тест проверяет, что параллельные регистрации одного пира не превышают
/// квоту.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_registration_quota_concurrent() {
    let router = start_router().await;
    let alpha = join_with_offer(&router, "alpha", "guest", Offer::new(1, 1)).await;

    let mut registrations = tokio::task::JoinSet::new();
    for i in 0..16 {
        let alpha = Arc::clone(&alpha);
        registrations.spawn(async move {
            alpha
                .register(&format!("net.example.n{i}"), RegisterOptions::default(), greeter())
                .await
        });
    }

    let mut accepted = 0;
    while let Some(result) = registrations.join_next().await {
        match result.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert_eq!(err, RouterError::Denied),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(
        router
            .dealer()
            .registrations()
            .count_by_author("alpha")
            .unwrap(),
        1
    );
}

/// Тест проверяет снятие регистрации и её влияние на вызовы.
#[tokio::test]
async fn test_unregister() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let registration = alpha
        .register("net.example.greeting", RegisterOptions::default(), greeter())
        .await
        .unwrap();

    beta.unregister(&registration.id).await.unwrap();
    assert_eq!(
        router
            .dealer()
            .registrations()
            .count("net.example.greeting"),
        1
    );

    alpha.unregister(&registration.id).await.unwrap();
    assert_eq!(
        beta.call(CallFeatures::new("net.example.greeting"), json!("beta"))
            .await
            .unwrap_err(),
        RouterError::ProcedureNotFound
    );
}

/// Тест проверяет очистку регистраций при отключении исполнителя и
/// уведомление `registration.gone`.
#[tokio::test]
async fn test_registrations_removed_on_leave() {
    let router = start_router().await;
    let observer = join(&router, "observer", "router").await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let (endpoint, mut gone) = collector();
    observer
        .subscribe(meta::REGISTRATION_GONE, SubscribeOptions::default(), endpoint)
        .await
        .unwrap();

    let registration = alpha
        .register("net.example.greeting", RegisterOptions::default(), greeter())
        .await
        .unwrap();

    alpha.leave().await;
    let event = recv_event(&mut gone).await;
    assert_eq!(event.payload["id"], json!(registration.id));
    assert_eq!(event.payload["author_id"], json!("alpha"));

    eventually("alpha detached", || router.peer("alpha").is_none()).await;
    assert_eq!(
        beta.call(CallFeatures::new("net.example.greeting"), json!("beta"))
            .await
            .unwrap_err(),
        RouterError::ProcedureNotFound
    );
}

/// Тест проверяет, что повторное подключение с занятым ID отклоняется.
#[tokio::test]
async fn test_duplicate_peer_id_rejected() {
    let router = start_router().await;
    let _alpha = join(&router, "alpha", "guest").await;

    let ((router_side, router_inbound), _client) = routex::duplex(4);
    let peer = routex::Peer::spawn(
        routex::PeerDetails::new("alpha", "guest"),
        router_side,
        router_inbound,
    );
    assert_eq!(router.join(peer).await.unwrap_err(), RouterError::Denied);
}

/// Сигнал о том, что future обработчика было уничтожено.
struct DropSignal(mpsc::UnboundedSender<()>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}
