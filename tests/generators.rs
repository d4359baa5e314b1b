mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{eventually, join, start_router};
use routex::{
    call_endpoint, router::meta, CallFeatures, GeneratorSource, GeneratorStep, Outcome,
    RegisterOptions, RouterError,
};
use serde_json::json;
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_secs(2);

fn counter(limit: u64) -> Arc<dyn routex::session::CallEndpoint> {
    call_endpoint(move |_| async move {
        Outcome::Generator(GeneratorSource::from_iter(
            (0..limit).map(|i| json!(i)),
            json!("done"),
        ))
    })
}

/// Тест проверяет полный цикл генератора: n значений, затем финальный ответ.
#[tokio::test]
async fn test_generator_yields_then_done() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register("net.example.counter", RegisterOptions::default(), counter(3))
        .await
        .unwrap();

    let mut generator = beta
        .generator(CallFeatures::new("net.example.counter"), json!(null))
        .await
        .unwrap();
    assert!(generator.is_active());

    for i in 0..3 {
        assert_eq!(
            generator.next(STEP).await.unwrap(),
            GeneratorStep::Yield(json!(i))
        );
    }
    assert_eq!(
        generator.next(STEP).await.unwrap(),
        GeneratorStep::Done(json!("done"))
    );
    assert!(!generator.is_active());
    assert_eq!(generator.next(STEP).await.unwrap_err(), RouterError::Protocol);

    eventually("executor released generator", || alpha.active_generators() == 0).await;
}

/// Тест проверяет остановку генератора вызывающим: исполнитель освобождает
/// генератор без финального ответа и больше не получает запросов `next`.
#[tokio::test]
async fn test_generator_stop() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let pulled = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&pulled);
    alpha
        .register(
            "net.example.counter",
            RegisterOptions::default(),
            call_endpoint(move |_| {
                let seen = Arc::clone(&seen);
                async move {
                    Outcome::Generator(GeneratorSource::from_iter(
                        (0..100u64).map(move |i| {
                            seen.fetch_add(1, Ordering::SeqCst);
                            json!(i)
                        }),
                        json!("done"),
                    ))
                }
            }),
        )
        .await
        .unwrap();

    let mut generator = beta
        .generator(CallFeatures::new("net.example.counter"), json!(null))
        .await
        .unwrap();
    for i in 0..2 {
        assert_eq!(
            generator.next(STEP).await.unwrap(),
            GeneratorStep::Yield(json!(i))
        );
    }
    assert_eq!(alpha.active_generators(), 1);
    assert_eq!(pulled.load(Ordering::SeqCst), 2);

    assert!(generator.stop().await);
    assert!(!generator.stop().await);
    assert_eq!(generator.next(STEP).await.unwrap_err(), RouterError::Protocol);
    eventually("executor released generator", || alpha.active_generators() == 0).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), 2);
}

/// Тест проверяет таймаут шага: исполнитель не успевает выдать значение.
#[tokio::test]
async fn test_generator_step_timeout() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let (producers_tx, mut producers) = mpsc::unbounded_channel();
    alpha
        .register(
            "net.example.slow",
            RegisterOptions::default(),
            call_endpoint(move |_| {
                let (tx, rx) = mpsc::channel(1);
                let _ = producers_tx.send(tx);
                async move { Outcome::Generator(GeneratorSource::from_channel(rx, json!(null))) }
            }),
        )
        .await
        .unwrap();

    let mut generator = beta
        .generator(CallFeatures::new("net.example.slow"), json!(null))
        .await
        .unwrap();
    let producer = producers.recv().await.unwrap();

    let err = generator
        .next(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::TimedOut);
    assert!(!generator.is_active());

    eventually("executor stopped", || alpha.active_generators() == 0).await;
    drop(producer);
}

/// Тест проверяет, что значения, пришедшие из канала, доставляются по
/// одному на каждый `next`.
#[tokio::test]
async fn test_generator_from_channel() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register(
            "net.example.feed",
            RegisterOptions::default(),
            call_endpoint(|_| async {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    for word in ["a", "b"] {
                        if tx.send(json!(word)).await.is_err() {
                            return;
                        }
                    }
                });
                Outcome::Generator(GeneratorSource::from_channel(rx, json!(2)))
            }),
        )
        .await
        .unwrap();

    let mut generator = beta
        .generator(CallFeatures::new("net.example.feed"), json!(null))
        .await
        .unwrap();
    assert_eq!(
        generator.next(STEP).await.unwrap(),
        GeneratorStep::Yield(json!("a"))
    );
    assert_eq!(
        generator.next(STEP).await.unwrap(),
        GeneratorStep::Yield(json!("b"))
    );
    assert_eq!(
        generator.next(STEP).await.unwrap(),
        GeneratorStep::Done(json!(2))
    );
}

/// Тест проверяет, что обычный вызов генератора через `call` завершается
/// ошибкой протокола, а генератор останавливается.
#[tokio::test]
async fn test_plain_call_to_generator() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    alpha
        .register("net.example.counter", RegisterOptions::default(), counter(5))
        .await
        .unwrap();

    let err = beta
        .call(CallFeatures::new("net.example.counter"), json!(null))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Protocol);
    eventually("executor released generator", || alpha.active_generators() == 0).await;
}

/// Тест проверяет мета-процедуру списка регистраций.
#[tokio::test]
async fn test_registration_list() {
    let router = start_router().await;
    let alpha = join(&router, "alpha", "guest").await;
    let beta = join(&router, "beta", "guest").await;

    let registration = alpha
        .register("net.example.counter", RegisterOptions::default(), counter(1))
        .await
        .unwrap();

    let mut generator = beta
        .generator(CallFeatures::new(meta::REGISTRATION_LIST), json!(null))
        .await
        .unwrap();

    let mut found = None;
    loop {
        match generator.next(STEP).await.unwrap() {
            GeneratorStep::Yield(entry) => {
                if entry["uri"] == json!("net.example.counter") {
                    found = Some(entry);
                }
            }
            GeneratorStep::Done(last) => {
                assert_eq!(last, json!(null));
                break;
            }
        }
    }

    let entry = found.expect("registration listed");
    assert_eq!(entry["resources"][0]["id"], json!(registration.id));
    assert_eq!(entry["resources"][0]["author_id"], json!("alpha"));
}
