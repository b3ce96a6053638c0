//! Integration tests for the connection orchestrator
//!
//! Drive `VpnManager` end to end with the in-memory provider, a scripted
//! configuration loader and a recording sink.

mod common;

use common::{fast_policy, start, Harness, ScriptedLoader, SinkEvent, WAIT};
use std::time::{Duration, Instant};
use vpnbar_core::config::ConnectionPolicy;
use vpnbar_core::error::VpnError;
use vpnbar_core::native::MemoryProvider;
use vpnbar_core::types::{ConnectionStatus, NativeStatus};
use vpnbar_core::vpn::ManagerState;

fn office() -> ScriptedLoader {
    ScriptedLoader::new().respond(&[("a", "Office")])
}

fn status(state: &ManagerState, id: &str) -> Option<ConnectionStatus> {
    state.status_of(id)
}

fn assert_active_flag(state: &ManagerState) {
    let any_active = state.connections.iter().any(|c| c.status.is_active());
    assert_eq!(state.has_active_connection, any_active);
}

/// Poll a condition that is not visible through the published state
async fn until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn connected(h: &Harness, id: &str) -> ManagerState {
    h.manager.connect(id, 3).unwrap();
    h.wait_for(|s| status(s, id) == Some(ConnectionStatus::Connected))
        .await
}

fn quick_tunnels(provider: &MemoryProvider) {
    provider.set_connect_delay(Some(Duration::from_millis(10)));
    provider.set_disconnect_delay(Some(Duration::from_millis(10)));
}

#[tokio::test]
async fn test_empty_configuration_reports_no_configurations() {
    let h = start(MemoryProvider::new(), ScriptedLoader::new().respond(&[]), fast_policy());

    let state = h.load().await;
    assert!(state.connections.is_empty());
    assert_eq!(state.loading_error, Some(VpnError::NoConfigurations));
    assert!(!state.has_active_connection);
}

#[tokio::test]
async fn test_load_sorts_dedups_and_seeds_from_native_status() {
    let provider = MemoryProvider::new();
    provider.set_status_silently("b", NativeStatus::Connected);
    let loader = ScriptedLoader::new().respond(&[("b", "Zulu"), ("a", "Alpha"), ("b", "Zulu again")]);
    let h = start(provider, loader, fast_policy());

    let state = h.load().await;
    let ids: Vec<&str> = state.connections.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(status(&state, "a"), Some(ConnectionStatus::Disconnected));
    assert_eq!(status(&state, "b"), Some(ConnectionStatus::Connected));
    assert!(state.has_active_connection);
    assert_eq!(state.loading_error, None);

    // Seeding is not a transition
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_loader_failure_clears_registry() {
    let loader = office().fail_with(VpnError::SharedManagerUnavailable);
    let h = start(MemoryProvider::new(), loader, fast_policy());

    assert_eq!(h.load().await.connections.len(), 1);

    h.manager.load_connections(true);
    let state = h
        .wait_for(|s| s.loading_error == Some(VpnError::SharedManagerUnavailable))
        .await;
    assert!(state.connections.is_empty());
}

#[tokio::test]
async fn test_second_forced_load_supersedes_first() {
    let loader = ScriptedLoader::new()
        .respond_after(Duration::from_millis(200), &[("a", "Alpha")])
        .respond_after(Duration::from_millis(10), &[("b", "Beta")]);
    let h = start(MemoryProvider::new(), loader, fast_policy());

    h.manager.load_connections(true);
    until(|| h.loader.calls() == 1).await;
    h.manager.load_connections(true);

    let state = h.wait_for(|s| s.loaded).await;
    assert_eq!(state.connections.len(), 1);
    assert_eq!(state.connections[0].id, "b");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = h.manager.state();
    assert_eq!(state.connections.len(), 1);
    assert_eq!(state.connections[0].id, "b");
    assert_eq!(h.loader.calls(), 2);
}

#[tokio::test]
async fn test_unforced_load_within_reload_interval_skips_loader() {
    let h = start(MemoryProvider::new(), office(), fast_policy());
    h.load().await;

    h.manager.load_connections(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.loader.calls(), 1);

    h.manager.load_connections(true);
    until(|| h.loader.calls() == 2).await;
}

#[tokio::test]
async fn test_connect_succeeds_after_two_failures() {
    let provider = MemoryProvider::new();
    provider.fail_start("a", 2);
    provider.set_connect_delay(Some(Duration::from_millis(100)));
    let h = start(provider, office(), fast_policy());
    h.load().await;

    let started = Instant::now();
    h.manager.connect("a", 3).unwrap();

    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Connecting))
        .await;
    assert_active_flag(&state);

    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Connected))
        .await;
    assert_active_flag(&state);

    // 50ms after attempt 1, 100ms after attempt 2
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(h.provider.start_calls("a"), 3);
    assert_eq!(h.sink.connected("a"), 1);
    assert_eq!(state.loading_error, None);
}

#[tokio::test]
async fn test_connect_gives_up_after_retry_count_attempts() {
    let provider = MemoryProvider::new();
    provider.fail_start("a", 10);
    let h = start(provider, office(), fast_policy());
    h.load().await;

    let started = Instant::now();
    h.manager.connect("a", 3).unwrap();

    let state = h.wait_for(|s| s.loading_error.is_some()).await;
    assert!(matches!(
        state.loading_error,
        Some(VpnError::ConnectionFailed { .. })
    ));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(status(&state, "a"), Some(ConnectionStatus::Disconnected));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.provider.start_calls("a"), 3);
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_zero_retry_count_still_attempts_once() {
    let provider = MemoryProvider::new();
    provider.fail_start("a", 10);
    let h = start(provider, office(), fast_policy());
    h.load().await;

    h.manager.connect("a", 0).unwrap();
    h.wait_for(|s| s.loading_error.is_some()).await;
    assert_eq!(h.provider.start_calls("a"), 1);
}

#[tokio::test]
async fn test_session_creation_failure_consumes_attempts() {
    let provider = MemoryProvider::new();
    provider.fail_session_creation("a", 100);
    let h = start(provider, office(), fast_policy());
    h.load().await;

    h.manager.connect("a", 2).unwrap();
    let state = h.wait_for(|s| s.loading_error.is_some()).await;
    assert_eq!(
        state.loading_error,
        Some(VpnError::SessionCreationFailed { id: "a".to_string() })
    );
    assert_eq!(status(&state, "a"), Some(ConnectionStatus::Disconnected));
    assert_eq!(h.provider.start_calls("a"), 0);

    assert_eq!(
        h.manager.disconnect("a"),
        Err(VpnError::SessionNotFound { id: "a".to_string() })
    );
}

#[tokio::test]
async fn test_retries_stop_when_connection_disappears() {
    let provider = MemoryProvider::new();
    provider.fail_start("a", 10);
    let loader = ScriptedLoader::new()
        .respond(&[("a", "Alpha"), ("b", "Beta")])
        .respond(&[("b", "Beta")]);
    let policy = ConnectionPolicy {
        retry_base_delay_ms: 200,
        ..fast_policy()
    };
    let h = start(provider, loader, policy);
    h.load().await;

    h.manager.connect("a", 5).unwrap();
    until(|| h.provider.start_calls("a") == 1).await;

    h.manager.load_connections(true);
    h.wait_for(|s| s.connection("a").is_none()).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.provider.start_calls("a"), 1);
    assert_eq!(h.manager.state().loading_error, None);
}

#[tokio::test]
async fn test_connect_unknown_id_is_rejected() {
    let h = start(MemoryProvider::new(), office(), fast_policy());
    h.load().await;

    assert_eq!(
        h.manager.connect("zz", 3),
        Err(VpnError::ConnectionNotFound { id: "zz".to_string() })
    );
    let state = h.wait_for(|s| s.loading_error.is_some()).await;
    assert_eq!(
        state.loading_error,
        Some(VpnError::ConnectionNotFound { id: "zz".to_string() })
    );
}

#[tokio::test]
async fn test_confirmed_disconnect_fires_side_effect_once() {
    let provider = MemoryProvider::new();
    provider.set_connect_delay(Some(Duration::from_millis(10)));
    provider.set_disconnect_delay(Some(Duration::from_millis(200)));
    let h = start(provider, office(), fast_policy());
    h.load().await;
    connected(&h, "a").await;

    h.manager.disconnect("a").unwrap();
    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnecting))
        .await;
    assert!(!state.has_active_connection);

    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnected))
        .await;
    assert_eq!(state.loading_error, None);
    assert_eq!(h.sink.disconnected("a"), 1);

    // Past the timeout window: the guard must have been cancelled
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.manager.state().loading_error, None);
    assert_eq!(
        h.sink.events(),
        vec![
            SinkEvent::Connected("a".to_string()),
            SinkEvent::Disconnected("a".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unconfirmed_disconnect_times_out_without_side_effect() {
    let provider = MemoryProvider::new();
    provider.set_connect_delay(Some(Duration::from_millis(10)));
    provider.set_disconnect_delay(None);
    let policy = ConnectionPolicy {
        disconnect_timeout_ms: 300,
        ..fast_policy()
    };
    let h = start(provider, office(), policy);
    h.load().await;
    connected(&h, "a").await;

    let started = Instant::now();
    h.manager.disconnect("a").unwrap();
    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnected))
        .await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(state.loading_error.as_ref().is_some_and(VpnError::is_timeout));
    assert!(!state.has_active_connection);
    assert_eq!(h.sink.connected("a"), 1);
    assert_eq!(h.sink.disconnected("a"), 0);

    // The registry and the native layer now disagree
    assert_eq!(h.provider.status_of("a"), NativeStatus::Disconnecting);
}

#[tokio::test]
async fn test_reconnect_cancels_pending_disconnect_timeout() {
    let provider = MemoryProvider::new();
    provider.set_connect_delay(Some(Duration::from_millis(10)));
    provider.set_disconnect_delay(None);
    let policy = ConnectionPolicy {
        disconnect_timeout_ms: 600,
        ..fast_policy()
    };
    let h = start(provider, office(), policy);
    h.load().await;
    connected(&h, "a").await;

    h.manager.disconnect("a").unwrap();
    h.wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnecting))
        .await;
    connected(&h, "a").await;

    // Well past the original timeout window
    tokio::time::sleep(Duration::from_millis(900)).await;
    let state = h.manager.state();
    assert_eq!(status(&state, "a"), Some(ConnectionStatus::Connected));
    assert_eq!(h.provider.status_of("a"), NativeStatus::Connected);
    assert!(state.has_active_connection);
    assert!(state.loading_error.is_none());
    assert_active_flag(&state);
}

#[tokio::test]
async fn test_repeated_connected_reports_fire_once() {
    let provider = MemoryProvider::new();
    quick_tunnels(&provider);
    let h = start(provider, office(), fast_policy());
    h.load().await;
    connected(&h, "a").await;

    h.provider.set_status("a", NativeStatus::Connected);
    h.provider.set_status("a", NativeStatus::Connecting);
    h.wait_for(|s| status(s, "a") == Some(ConnectionStatus::Connecting))
        .await;
    h.provider.set_status("a", NativeStatus::Connected);
    h.wait_for(|s| status(s, "a") == Some(ConnectionStatus::Connected))
        .await;

    assert_eq!(h.sink.connected("a"), 1);
    assert_eq!(h.sink.disconnected("a"), 0);
}

#[tokio::test]
async fn test_poller_catches_silent_teardown() {
    let provider = MemoryProvider::new();
    quick_tunnels(&provider);
    let h = start(provider, office(), fast_policy());
    h.load().await;
    connected(&h, "a").await;

    h.provider.set_status_silently("a", NativeStatus::Disconnected);
    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnected))
        .await;

    assert_active_flag(&state);
    assert_eq!(h.sink.disconnected("a"), 1);
}

#[tokio::test]
async fn test_toggle_routes_and_remembers_last_used() {
    let provider = MemoryProvider::new();
    quick_tunnels(&provider);
    let h = start(provider, office(), fast_policy());
    h.load().await;

    h.manager.toggle_connection("a").unwrap();
    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Connected))
        .await;
    assert_eq!(state.last_used_connection_id.as_deref(), Some("a"));
    assert_eq!(h.settings.last_used_connection().as_deref(), Some("a"));

    h.manager.toggle_connection("a").unwrap();
    let state = h
        .wait_for(|s| status(s, "a") == Some(ConnectionStatus::Disconnected))
        .await;
    assert_active_flag(&state);
    assert_eq!(
        h.sink.events(),
        vec![
            SinkEvent::Connected("a".to_string()),
            SinkEvent::Disconnected("a".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_toggle_unknown_id_records_error() {
    let h = start(MemoryProvider::new(), office(), fast_policy());
    h.load().await;

    assert_eq!(
        h.manager.toggle_connection("c"),
        Err(VpnError::ConnectionNotFound { id: "c".to_string() })
    );
    let state = h.wait_for(|s| s.loading_error.is_some()).await;
    assert_eq!(
        state.loading_error,
        Some(VpnError::ConnectionNotFound { id: "c".to_string() })
    );
    assert_eq!(state.connections.len(), 1);
}

#[tokio::test]
async fn test_disconnect_all_stops_every_active_connection() {
    let provider = MemoryProvider::new();
    quick_tunnels(&provider);
    let loader = ScriptedLoader::new().respond(&[("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")]);
    let h = start(provider, loader, fast_policy());
    h.load().await;
    connected(&h, "a").await;
    connected(&h, "b").await;

    h.manager.disconnect_all();
    let state = h.wait_for(|s| !s.has_active_connection).await;
    assert!(state
        .connections
        .iter()
        .all(|c| c.status == ConnectionStatus::Disconnected));
    assert_eq!(h.sink.disconnected("a"), 1);
    assert_eq!(h.sink.disconnected("b"), 1);
    assert_eq!(h.provider.stop_calls("c"), 0);
}

#[tokio::test]
async fn test_update_interval_is_clamped_and_timer_restarted() {
    let h = start(MemoryProvider::new(), office(), fast_policy());
    assert_eq!(h.manager.update_interval(), Duration::from_secs(15));

    let applied = h.manager.set_update_interval(Duration::from_secs(1));
    assert_eq!(applied, Duration::from_secs(5));
    h.wait_for(|s| s.update_interval == Duration::from_secs(5))
        .await;
    assert_eq!(h.settings.update_interval(), Duration::from_secs(5));

    let applied = h.manager.set_update_interval(Duration::from_secs(500));
    assert_eq!(applied, Duration::from_secs(120));
    h.wait_for(|s| s.update_interval == Duration::from_secs(120))
        .await;
}

#[tokio::test]
async fn test_reload_ticks_follow_new_interval() {
    let policy = ConnectionPolicy {
        reload_interval_ms: 1_000,
        ..fast_policy()
    };
    let h = start(MemoryProvider::new(), office(), policy);
    h.load().await;
    assert_eq!(h.loader.calls(), 1);

    // Down from the 15s default; the first tick lands one period later
    let restarted = Instant::now();
    h.manager.set_update_interval(Duration::from_secs(5));
    h.wait_for(|s| s.update_interval == Duration::from_secs(5))
        .await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.loader.calls(), 1, "no reload before the new period");

    let loader = h.loader.clone();
    tokio::time::timeout(Duration::from_secs(4), async {
        while loader.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("reload tick did not follow the new interval");
    let elapsed = restarted.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(8));
}

#[tokio::test]
async fn test_status_refresh_publishes_batch() {
    let h = start(MemoryProvider::new(), office(), fast_policy());
    h.load().await;
    let mut batches = h.manager.status_updates();

    h.provider.set_status_silently("a", NativeStatus::Connecting);
    assert_eq!(h.manager.refresh_status("a").await, NativeStatus::Connecting);

    let batch = tokio::time::timeout(WAIT, batches.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(batch.contains_key("a"));
}

#[tokio::test]
async fn test_shutdown_releases_sessions() {
    let loader = ScriptedLoader::new().respond(&[("a", "Alpha"), ("b", "Beta")]);
    let h = start(MemoryProvider::new(), loader, fast_policy());
    h.load().await;
    assert_eq!(h.provider.live_sessions(), 2);

    h.manager.shutdown().await;
    assert_eq!(h.provider.live_sessions(), 0);
}
