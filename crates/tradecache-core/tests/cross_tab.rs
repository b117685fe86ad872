mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use common::{init_tracing, open_tab, MockPreferences, T0};
use tradecache_core::clock::ManualClock;
use tradecache_core::models::WidgetSession;
use tradecache_core::store::StorageHub;
use tradecache_core::widget::SESSION_KEY;

/// Wait for the next session change `tab` reports.
async fn next_change(rx: &mut mpsc::UnboundedReceiver<WidgetSession>) -> WidgetSession {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no session change within 5s")
        .expect("subscription closed")
}

#[tokio::test]
async fn test_symbol_change_reaches_other_tab_with_same_timestamp() {
    init_tracing();
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let preferences = MockPreferences::new();
    let tab1 = open_tab(&hub, &clock, preferences.clone());
    let tab2 = open_tab(&hub, &clock, preferences);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = tab2.coordinator.subscribe(move |session| {
        let _ = tx.send(session.clone());
    });
    tab2.coordinator.start();

    let t1 = T0 + 42_000;
    clock.set(t1);
    assert!(tab1.coordinator.change_symbol("ETHUSDT", "BYBIT:ETHUSDT"));

    let seen = next_change(&mut rx).await;
    assert_eq!(seen.symbol, "ETHUSDT");
    assert_eq!(tab2.coordinator.get_state().last_updated, t1);
    assert_eq!(tab2.coordinator.get_state().display_symbol, "BYBIT:ETHUSDT");

    tab1.coordinator.shutdown();
    tab2.coordinator.shutdown();
}

#[tokio::test]
async fn test_other_tab_updates_its_embed_in_place() {
    init_tracing();
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let preferences = MockPreferences::new();
    let tab_a = open_tab(&hub, &clock, preferences.clone());
    let tab_b = open_tab(&hub, &clock, preferences);

    tab_a.coordinator.acquire("markets").await.unwrap();
    tab_b.coordinator.acquire("markets").await.unwrap();
    assert_eq!(tab_b.coordinator.get_state().symbol, "BTCUSDT");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = tab_b.coordinator.subscribe(move |session| {
        let _ = tx.send(session.clone());
    });
    tab_b.coordinator.start();

    clock.advance(Duration::from_secs(1));
    tab_a.coordinator.change_symbol("SOLUSDT", "BYBIT:SOLUSDT");

    let seen = next_change(&mut rx).await;
    assert_eq!(seen.symbol, "SOLUSDT");
    assert_eq!(tab_b.coordinator.init_count(), 1);
    assert_eq!(tab_b.host.constructions(), 1);
    let embed = tab_b.host.children("markets")[0];
    assert_eq!(
        tab_b.host.embed_config(embed).unwrap().display_symbol,
        "BYBIT:SOLUSDT"
    );
    // Tab B's own mount flags survive the merge
    assert!(seen.is_mounted);
    assert!(seen.is_visible);

    tab_a.coordinator.shutdown();
    tab_b.coordinator.shutdown();
}

#[tokio::test]
async fn test_events_never_echo_to_the_writer() {
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let tab = open_tab(&hub, &clock, MockPreferences::new());
    let mut events = tab.storage.subscribe();

    tab.coordinator.change_symbol("ETHUSDT", "BYBIT:ETHUSDT");
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_clear_in_one_tab_resets_the_other() {
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let preferences = MockPreferences::new();
    let tab1 = open_tab(&hub, &clock, preferences.clone());
    let tab2 = open_tab(&hub, &clock, preferences);
    let mut events = tab2.storage.subscribe();

    tab1.coordinator.change_symbol("ETHUSDT", "BYBIT:ETHUSDT");
    let write = events.recv().await.unwrap();
    assert!(tab2.coordinator.handle_storage_event(&write));
    assert_eq!(tab2.coordinator.get_state().symbol, "ETHUSDT");

    tab1.coordinator.clear().await;
    let removal = events.recv().await.unwrap();
    assert_eq!(removal.key, SESSION_KEY);
    assert!(removal.new_value.is_none());
    assert!(tab2.coordinator.handle_storage_event(&removal));
    assert_eq!(tab2.coordinator.get_state(), WidgetSession::default());
}

#[tokio::test]
async fn test_unrelated_keys_are_ignored() {
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let preferences = MockPreferences::new();
    let tab1 = open_tab(&hub, &clock, preferences.clone());
    let tab2 = open_tab(&hub, &clock, preferences);
    let mut events = tab2.storage.subscribe();

    tab1.store.set("news", &vec!["headline"], None);
    let event = events.recv().await.unwrap();
    assert!(!tab2.coordinator.handle_storage_event(&event));
    assert_eq!(tab2.coordinator.get_state(), WidgetSession::default());
}

#[tokio::test]
async fn test_mount_flags_never_roll_back_a_newer_session() {
    init_tracing();
    let hub = StorageHub::in_memory();
    let clock = ManualClock::new(T0);
    let preferences = MockPreferences::new();
    let tab1 = open_tab(&hub, &clock, preferences.clone());
    let tab2 = open_tab(&hub, &clock, preferences.clone());

    clock.set(T0 + 5_000);
    assert!(tab1.coordinator.change_symbol("ETHUSDT", "BYBIT:ETHUSDT"));
    // Tab 2 isn't listening yet, so the write hasn't reached it
    tab2.coordinator.acquire("markets").await.unwrap();

    let stored: WidgetSession = tab2.store.get(SESSION_KEY).unwrap();
    assert_eq!(stored.symbol, "ETHUSDT");
    assert_eq!(stored.last_updated, T0 + 5_000);
    assert!(stored.is_mounted);
    assert_eq!(tab2.coordinator.get_state().symbol, "ETHUSDT");
    let embed = tab2.host.children("markets")[0];
    assert_eq!(tab2.host.embed_config(embed).unwrap().display_symbol, "BYBIT:ETHUSDT");

    tab2.coordinator.release();
    let stored: WidgetSession = tab2.store.get(SESSION_KEY).unwrap();
    assert_eq!(stored.symbol, "ETHUSDT");

    let fresh = open_tab(&hub, &clock, preferences);
    assert_eq!(fresh.coordinator.get_state().symbol, "ETHUSDT");
    assert_eq!(fresh.coordinator.get_state().last_updated, T0 + 5_000);
}
