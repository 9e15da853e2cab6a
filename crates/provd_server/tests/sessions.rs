//! Session scenarios against scripted adapters.

use provd_core::{ProvError, Registry};
use provd_server::{Broker, Call, ClientId, Reply, ServerConfig};
use provd_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn broker(registry: Arc<Registry>) -> Broker {
    Broker::spawn(ServerConfig::default(), registry).expect("broker")
}

/// Lets spawned tasks run up to their next suspension point.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn end_to_end_session() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let client = broker.handle().connect();

    client.start("").await.unwrap();
    client.set("/tel/contexts/op1/apn", "internet").await.unwrap();
    assert_eq!(client.get("/tel/contexts/op1/apn").await.unwrap(), "internet");
    // nothing reaches the backend before End
    assert!(tel.backend().is_empty());
    client.end().await.unwrap();

    // a new Start from the same client waits for the sync-out
    client.start("").await.unwrap();
    let calls = tel.sync_out_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].get("/tel/contexts/op1/apn").map(String::as_str),
        Some("internet")
    );
    assert_eq!(client.get("/tel/contexts/op1/apn").await.unwrap(), "internet");
    client.end().await.unwrap();

    client.start("").await.unwrap();
    assert_eq!(tel.sync_out_calls().len(), 2);
    assert!(tel.diffs()[1].is_empty());
    client.end().await.unwrap();
}

#[tokio::test]
async fn waiting_clients_are_served_in_order() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();
    let (order_tx, mut order_rx) = mpsc::unbounded_channel();

    let a = handle.connect();
    a.start("").await.unwrap();

    let mut waiters = Vec::new();
    for name in ["b", "c"] {
        let client = handle.connect();
        let order = order_tx.clone();
        waiters.push(tokio::spawn(async move {
            client.start("").await.unwrap();
            order.send(name).unwrap();
            client.end().await.unwrap();
        }));
        settle().await;
    }

    // a round trip through the coordinator; both starts are queued by now
    a.set("/tel/x/y", "1").await.unwrap();
    assert!(order_rx.try_recv().is_err());
    assert!(waiters.iter().all(|w| !w.is_finished()));

    a.end().await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(order_rx.recv().await, Some("b"));
    assert_eq!(order_rx.recv().await, Some("c"));
    // one sync-in per session
    assert_eq!(tel.sync_in_calls().len(), 3);
}

#[tokio::test]
async fn calls_outside_a_session_are_unexpected() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let holder = broker.handle().connect();
    let other = broker.handle().connect();

    assert!(matches!(other.get("/tel/x").await, Err(ProvError::Unexpected)));
    assert!(matches!(other.end().await, Err(ProvError::Unexpected)));

    holder.start("").await.unwrap();
    assert!(matches!(holder.start("").await, Err(ProvError::Unexpected)));
    assert!(matches!(
        other.set("/tel/x/y", "1").await,
        Err(ProvError::Unexpected)
    ));
    holder.end().await.unwrap();
    assert!(matches!(holder.get("/tel/x/y").await, Err(ProvError::Unexpected)));
}

#[tokio::test]
async fn lost_holder_ends_session() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();

    let a = handle.connect();
    a.start("").await.unwrap();
    a.set("/tel/x/y", "1").await.unwrap();

    let b = handle.connect();
    let waiting = tokio::spawn(async move {
        b.start("").await.unwrap();
        let value = b.get("/tel/x/y").await.unwrap();
        b.end().await.unwrap();
        value
    });
    settle().await;

    drop(a);
    assert_eq!(waiting.await.unwrap(), "1");
    assert_eq!(
        tel.backend().get("/tel/x/y").map(String::as_str),
        Some("1")
    );
}

#[tokio::test]
async fn lost_waiter_leaves_queue() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();

    let a = handle.connect();
    a.start("").await.unwrap();

    let b = handle.connect();
    let abandoned = tokio::spawn(async move { b.start("").await });
    settle().await;
    abandoned.abort();
    let _ = abandoned.await;

    let c = handle.connect();
    let waiting = tokio::spawn(async move {
        c.start("").await.unwrap();
        c.end().await.unwrap();
    });
    settle().await;

    a.end().await.unwrap();
    waiting.await.unwrap();
    // a, then c; b never got a session
    assert_eq!(tel.sync_in_calls().len(), 2);
}

#[tokio::test]
async fn waiter_is_promoted_once_sync_out_finishes() {
    let tel = ScriptHandle::new("/tel/");
    tel.set_sync_out(Behavior::Hold);
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();

    let a = handle.connect();
    a.start("").await.unwrap();
    a.set("/tel/x/y", "1").await.unwrap();

    let b = handle.connect();
    let script = tel.clone();
    let waiting = tokio::spawn(async move {
        b.start("").await.unwrap();
        let flushing = script.holding_sync_out();
        let value = b.get("/tel/x/y").await.unwrap();
        (flushing, value)
    });
    settle().await;

    a.end().await.unwrap();
    settle().await;
    assert!(tel.holding_sync_out());
    // the ending session accepts nothing but a new Start
    assert!(matches!(a.get("/tel/x/y").await, Err(ProvError::Unexpected)));
    assert!(!waiting.is_finished());
    assert_eq!(tel.sync_in_calls().len(), 1);

    tel.set_sync_out(Behavior::Complete);
    assert!(tel.release_sync_out());
    let (flushing, value) = waiting.await.unwrap();
    assert!(!flushing);
    // the waiter reads what the previous session flushed
    assert_eq!(value, "1");
    assert_eq!(tel.sync_in_calls().len(), 2);
}

#[tokio::test]
async fn holder_lost_during_sync_in() {
    let tel = ScriptHandle::new("/tel/");
    tel.seed("/tel/x/y", "1");
    tel.set_sync_in(Behavior::Hold);
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();

    let a = handle.connect();
    a.start("").await.unwrap();
    let b = handle.connect();
    let waiting = tokio::spawn(async move {
        b.start("").await.unwrap();
        b.get("/tel/x/y").await.unwrap()
    });
    settle().await;
    assert!(tel.holding_sync_in());

    drop(a);
    settle().await;
    // the sync-in still has to finish before the session can be flushed
    assert!(!waiting.is_finished());
    assert!(tel.sync_out_calls().is_empty());

    tel.set_sync_in(Behavior::Complete);
    assert!(tel.release_sync_in());
    assert_eq!(waiting.await.unwrap(), "1");

    assert_eq!(tel.sync_out_calls(), vec![settings(&[("/tel/x/y", "1")])]);
    assert_eq!(tel.sync_in_calls().len(), 2);
    assert_eq!(tel.cancels(), 0);
}

#[tokio::test]
async fn context_id_reaches_adapters() {
    let tel = ScriptHandle::new("/tel/");
    let broker = broker(registry_of(&[("tel", &tel)]));
    let client = broker.handle().connect_as(ClientId::new(":1.42"));

    client.start("310150123456789").await.unwrap();
    client.end().await.unwrap();
    client.start("").await.unwrap();

    assert_eq!(
        tel.sync_in_calls(),
        vec!["310150123456789".to_string(), String::new()]
    );
}

#[tokio::test]
async fn cache_operations_through_the_interface() {
    let apps = ScriptHandle::new("/applications/");
    let foo = ScriptHandle::new("/applicationsFoo/");
    apps.seed("/applications/x", "1");
    foo.seed("/applicationsFoo/x", "2");
    apps.deny("/applications/locked");
    apps.set_leaf_depth(1);
    let broker = broker(registry_of(&[("apps", &apps), ("foo", &foo)]));
    let client = broker.handle().connect();
    client.start("").await.unwrap();

    let all = client.get_all("/applications").await.unwrap();
    assert_eq!(all, settings(&[("/applications/x", "1")]));

    let failed = client
        .set_all(settings(&[
            ("/applications/a", "1"),
            ("/applications/locked", "2"),
            ("/applications/b", "3"),
        ]))
        .await
        .unwrap();
    assert_eq!(failed, vec!["/applications/locked".to_string()]);
    assert_eq!(client.get("/applications/a").await.unwrap(), "1");
    assert_eq!(client.get("/applications/b").await.unwrap(), "3");

    client.delete("/applications/a").await.unwrap();
    assert!(matches!(
        client.delete("/applications/a").await,
        Err(ProvError::NotFound(_))
    ));
    assert!(matches!(
        client.get("relative").await,
        Err(ProvError::BadArgs(_))
    ));

    let reply = client
        .call(Call::GetAll {
            key: "/applicationsFoo".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        reply,
        Reply::Settings(settings(&[("/applicationsFoo/x", "2")]))
    );
    client.end().await.unwrap();
}

#[tokio::test]
async fn shutdown_cancels_in_flight_sync() {
    let tel = ScriptHandle::new("/tel/");
    tel.set_sync_in(Behavior::Hold);
    let broker = broker(registry_of(&[("tel", &tel)]));
    let handle = broker.handle();

    let a = handle.connect();
    a.start("").await.unwrap();
    let pending_get = tokio::spawn(async move { a.get("/tel/x").await });

    let b = handle.connect();
    let queued = tokio::spawn(async move { b.start("").await });
    settle().await;
    assert!(tel.holding_sync_in());

    handle.shutdown();
    broker.wait().await.unwrap();

    assert!(pending_get.await.unwrap().unwrap_err().is_cancelled());
    assert!(queued.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(tel.cancels(), 1);
    assert!(tel.destroyed());
}

#[tokio::test]
async fn idle_broker_exits() {
    let tel = ScriptHandle::new("/tel/");
    let config = ServerConfig::default().with_idle_timeout(Duration::from_millis(50));
    let broker = Broker::spawn(config, registry_of(&[("tel", &tel)])).unwrap();
    let handle = broker.handle();

    tokio::time::timeout(Duration::from_secs(5), broker.wait())
        .await
        .expect("broker should stop when idle")
        .unwrap();

    let late = handle.connect();
    assert!(late.start("").await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn open_session_keeps_broker_alive() {
    let tel = ScriptHandle::new("/tel/");
    let config = ServerConfig::default().with_idle_timeout(Duration::from_millis(30));
    let broker = Broker::spawn(config, registry_of(&[("tel", &tel)])).unwrap();
    let client = broker.handle().connect();

    client.start("").await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!broker.is_finished());
    client.set("/tel/x/y", "1").await.unwrap();
    client.end().await.unwrap();
}
