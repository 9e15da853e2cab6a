//! Adapters driven through their completion handles.

use provd_adapters::*;
use provd_core::{event_channel, Adapter, Completion, EngineEvent, MapFile, ProvError, Settings};
use provd_testkit::prelude as kit;
use std::sync::Arc;
use std::time::Duration;

async fn sync_in(adapter: &mut dyn Adapter, context_id: &str) -> Result<Settings, ProvError> {
    let (tx, mut rx) = event_channel();
    adapter.sync_in(context_id, Completion::sync_in(1, 0, tx))?;
    match rx.recv().await {
        Some(EngineEvent::SyncIn { result, .. }) => result,
        other => panic!("unexpected event {other:?}"),
    }
}

async fn sync_out(adapter: &mut dyn Adapter, settings: Settings) -> Result<(), ProvError> {
    let (tx, mut rx) = event_channel();
    adapter.sync_out(settings, Completion::sync_out(1, 0, tx))?;
    match rx.recv().await {
        Some(EngineEvent::SyncOut { result, .. }) => result,
        other => panic!("unexpected event {other:?}"),
    }
}

fn modem() -> InMemoryConnectionManager {
    let manager = InMemoryConnectionManager::new().with_modem("/modem0", "001");
    manager
        .seed_context(
            "/modem0",
            ContextKind::Internet,
            &[(PROP_NAME, "Web"), (PROP_APN, "internet")],
        )
        .unwrap();
    manager
        .seed_context(
            "/modem0",
            ContextKind::Mms,
            &[(PROP_APN, "mms"), (PROP_MMSC, "http://mmsc")],
        )
        .unwrap();
    manager
}

#[tokio::test]
async fn telephony_sync_in_translates_contexts() {
    let dir = kit::temp_data_dir();
    let map_path = dir.path().join("telephony-mapfile.json");
    let manager = modem();
    let descriptor = TelephonyAdapter::descriptor(Arc::new(manager), &map_path);
    let mut adapter = descriptor.create().unwrap();

    let settings = sync_in(adapter.as_mut(), "001").await.unwrap();

    assert_eq!(
        settings,
        kit::settings(&[
            ("/telephony/contexts/context1/apn", "internet"),
            ("/telephony/contexts/context1/name", "Web"),
            ("/telephony/mms/apn", "mms"),
            ("/telephony/mms/mmsc", "http://mmsc"),
        ])
    );
    assert_eq!(
        MapFile::open(&map_path).find_backend_id("001", "context1"),
        Some("/modem0/context1")
    );
}

#[tokio::test]
async fn telephony_unknown_imsi_is_not_found() {
    let mut adapter = TelephonyAdapter::new(Arc::new(modem()), MapFile::in_memory());
    assert!(matches!(
        sync_in(&mut adapter, "999").await,
        Err(ProvError::NotFound(_))
    ));
    // nothing to write back to
    let (tx, _rx) = event_channel();
    assert!(matches!(
        adapter.sync_out(Settings::new(), Completion::sync_out(1, 0, tx)),
        Err(ProvError::NotFound(_))
    ));
}

#[tokio::test]
async fn telephony_sync_out_replays_diff() {
    let dir = kit::temp_data_dir();
    let map_path = dir.path().join("telephony-mapfile.json");
    let manager = modem();
    let descriptor = TelephonyAdapter::descriptor(Arc::new(manager.clone()), &map_path);
    let mut adapter = descriptor.create().unwrap();

    let mut cache = sync_in(adapter.as_mut(), "").await.unwrap();
    cache.retain(|key, _| !key.starts_with("/telephony/contexts/context1/"));
    cache.insert("/telephony/contexts/op2/apn".into(), "fast".into());
    cache.insert("/telephony/mms/mmsc".into(), "http://other".into());
    sync_out(adapter.as_mut(), cache).await.unwrap();

    assert_eq!(
        manager.calls(),
        vec![
            "remove /modem0/context1".to_string(),
            "add internet".to_string(),
            "set /modem0/context3 AccessPointName".to_string(),
            "set /modem0/context2 MessageCenter".to_string(),
        ]
    );

    // a fresh instance finds the new context under its client id
    let mut reopened = descriptor.create().unwrap();
    let settings = sync_in(reopened.as_mut(), "001").await.unwrap();
    assert_eq!(
        settings.get("/telephony/contexts/op2/apn").map(String::as_str),
        Some("fast")
    );
    assert_eq!(
        settings.get("/telephony/mms/mmsc").map(String::as_str),
        Some("http://other")
    );
    assert!(!settings.contains_key("/telephony/contexts/context1/apn"));
}

#[tokio::test]
async fn telephony_cancel_interrupts_sync_in() {
    let manager = modem().with_latency(Duration::from_secs(30));
    let mut adapter = TelephonyAdapter::new(Arc::new(manager), MapFile::in_memory());
    let (tx, mut rx) = event_channel();

    adapter
        .sync_in("001", Completion::sync_in(1, 0, tx))
        .unwrap();
    adapter.cancel_sync_in();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("cancellation should complete promptly");
    match event {
        Some(EngineEvent::SyncIn { result, .. }) => assert!(result.unwrap_err().is_cancelled()),
        other => panic!("unexpected event {other:?}"),
    }
}

fn work_account() -> Account {
    let mut account = Account::new("uid-work");
    account.name = Some("Work".into());
    account.incoming.protocol = Some("imap".into());
    account.incoming.host = Some("imap.example.com".into());
    account.outgoing.port = Some(587);
    account
}

#[tokio::test]
async fn email_sync_in_exports_accounts() {
    let store = InMemoryAccountStore::new().with_account(work_account());
    let mut adapter = EmailAdapter::new(Box::new(store), MapFile::in_memory());

    let settings = sync_in(&mut adapter, "").await.unwrap();
    assert_eq!(
        settings,
        kit::settings(&[
            ("/applications/email/uid-work/incoming/host", "imap.example.com"),
            ("/applications/email/uid-work/incoming/type", "imap"),
            ("/applications/email/uid-work/name", "Work"),
            ("/applications/email/uid-work/outgoing/port", "587"),
        ])
    );
}

#[tokio::test]
async fn email_sync_out_adds_updates_and_removes() {
    let dir = kit::temp_data_dir();
    let map_path = dir.path().join("email-mapfile.json");
    let store = InMemoryAccountStore::new().with_account(work_account());
    let descriptor = EmailAdapter::descriptor(store.clone(), &map_path);
    let mut adapter = descriptor.create().unwrap();

    let mut cache = sync_in(adapter.as_mut(), "").await.unwrap();
    cache.insert(
        "/applications/email/uid-work/incoming/host".into(),
        "mail.example.com".into(),
    );
    cache.insert("/applications/email/home/name".into(), "Home".into());
    cache.insert("/applications/email/home/outgoing/type".into(), "smtp".into());
    sync_out(adapter.as_mut(), cache.clone()).await.unwrap();

    let accounts = store.accounts();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].incoming.host.as_deref(), Some("mail.example.com"));
    let home = &accounts[1];
    assert_eq!(home.name.as_deref(), Some("Home"));
    assert_eq!(home.outgoing.protocol.as_deref(), Some("smtp"));
    assert!(home.enabled);
    assert_eq!(
        MapFile::open(&map_path).find_backend_id("Default", "home"),
        Some(home.uid.as_str())
    );

    // the next session starts from what was written
    assert_eq!(sync_in(adapter.as_mut(), "").await.unwrap(), cache);

    cache.retain(|key, _| !key.starts_with("/applications/email/uid-work/"));
    sync_out(adapter.as_mut(), cache).await.unwrap();
    let accounts = store.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].name.as_deref(), Some("Home"));
}

#[tokio::test]
async fn email_json_store_survives_restart() {
    let dir = kit::temp_data_dir();
    let store_path = dir.path().join("email-accounts.json");
    let map_path = dir.path().join("email-mapfile.json");
    let descriptor = EmailAdapter::descriptor(JsonAccountStore::new(&store_path), &map_path);

    let mut adapter = descriptor.create().unwrap();
    let mut cache = sync_in(adapter.as_mut(), "").await.unwrap();
    assert!(cache.is_empty());
    cache.insert("/applications/email/work/address".into(), "me@example.com".into());
    sync_out(adapter.as_mut(), cache.clone()).await.unwrap();
    drop(adapter);

    let mut restarted = descriptor.create().unwrap();
    assert_eq!(sync_in(restarted.as_mut(), "").await.unwrap(), cache);
}

#[tokio::test]
async fn sync_configs_round_trip_through_json_store() {
    let dir = kit::temp_data_dir();
    let store_path = dir.path().join("sync-configs.json");
    let seed = SyncConfig::new("peer")
        .with_general("syncURL", "http://sync.example.com")
        .with_source("todo", PROP_BACKEND, "ActiveSync Todos")
        .with_source("todo", "uri", "tasks");
    JsonSyncConfigStore::new(&store_path).save(&[seed]).unwrap();
    let descriptor = SyncAdapter::descriptor(JsonSyncConfigStore::new(&store_path));

    let mut adapter = descriptor.create().unwrap();
    let mut cache = sync_in(adapter.as_mut(), "").await.unwrap();
    assert_eq!(
        cache,
        kit::settings(&[
            ("/applications/sync/peer/eas-todo/uri", "tasks"),
            ("/applications/sync/peer/url", "http://sync.example.com"),
        ])
    );

    cache.insert("/applications/sync/peer/eas-todo/sync".into(), "two-way".into());
    cache.insert("/applications/sync/phone/client".into(), "1".into());
    sync_out(adapter.as_mut(), cache.clone()).await.unwrap();
    drop(adapter);

    let mut restarted = descriptor.create().unwrap();
    assert_eq!(sync_in(restarted.as_mut(), "").await.unwrap(), cache);

    let names: Vec<String> = JsonSyncConfigStore::new(&store_path)
        .load()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["peer", "phone"]);
}
