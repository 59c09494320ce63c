//! Connection registry behaviour against the scripted mock backend

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cachelink::{
    CacheError, ConfigProvider, ConnectStage, ConnectionRegistry, ConnectionState, ErrorKind,
    TomlConfigProvider,
};
use cachelink_testing::MockConnector;
use rstest::{fixture, rstest};

const CONFIG: &str = r#"
    [default]
    hostname = "cache.internal"
    password = "right"

    [open]
    hostname = "cache.internal"

    [wrong-password]
    hostname = "cache.internal"
    password = "wrong"

    [slow]
    hostname = "slow.internal"
"#;

const SHORT_INTERVAL: Duration = Duration::from_millis(10);

fn config() -> Arc<dyn ConfigProvider> {
    Arc::new(TomlConfigProvider::from_toml_str(CONFIG).unwrap())
}

fn registry(backend: &MockConnector) -> ConnectionRegistry<MockConnector> {
    ConnectionRegistry::new(backend.clone(), config())
}

/// Sleep until a connection verified now is past `SHORT_INTERVAL`
fn let_go_stale() {
    thread::sleep(SHORT_INTERVAL * 4);
}

/// Route registry logs to the test harness; enable with `RUST_LOG=cachelink=debug`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[fixture]
fn backend() -> MockConnector {
    init_tracing();
    MockConnector::new().with_password("right")
}

#[rstest]
fn repeated_acquire_within_window_reuses_handle_without_probing(backend: MockConnector) {
    let registry = registry(&backend);

    let first = registry.acquire("default", 9).unwrap();
    let second = registry.acquire("default", 9).unwrap();

    assert!(first.same_connection(&second));
    let calls = backend.calls();
    assert_eq!(calls.connects, 1);
    assert_eq!(calls.pings, 0);
    assert_eq!(calls.authentications, vec![None]);
    assert_eq!(calls.selects, vec![9]);
    assert_eq!(registry.state("default", 9), ConnectionState::Fresh);
}

#[rstest]
fn fresh_connection_is_returned_even_if_backend_went_away(backend: MockConnector) {
    let registry = registry(&backend);
    let first = registry.acquire("default", 0).unwrap();

    backend.set_healthy(false);
    let second = registry.acquire("default", 0).unwrap();

    assert!(first.same_connection(&second));
    assert_eq!(backend.calls().pings, 0);
}

#[rstest]
fn stale_connection_is_probed_once_and_kept(backend: MockConnector) {
    let registry = registry(&backend).with_health_check_interval(SHORT_INTERVAL);
    let first = registry.acquire("default", 2).unwrap();

    let_go_stale();
    assert_eq!(registry.state("default", 2), ConnectionState::Stale);

    let second = registry.acquire("default", 2).unwrap();
    let third = registry.acquire("default", 2).unwrap();

    assert!(first.same_connection(&second));
    assert!(second.same_connection(&third));
    let calls = backend.calls();
    assert_eq!(calls.pings, 1);
    assert_eq!(calls.connects, 1);
    assert_eq!(registry.state("default", 2), ConnectionState::Fresh);
}

#[rstest]
fn failed_probe_triggers_exactly_one_recreation(backend: MockConnector) {
    let registry = registry(&backend).with_health_check_interval(SHORT_INTERVAL);
    let first = registry.acquire("default", 1).unwrap();

    backend.set_healthy(false);
    let_go_stale();
    let replacement = registry.acquire("default", 1).unwrap();

    assert!(!first.same_connection(&replacement));
    let calls = backend.calls();
    assert_eq!(calls.pings, 1);
    assert_eq!(calls.connects, 2);
    assert_eq!(calls.closes, 1, "stale connection is closed before reconnecting");
    assert_eq!(calls.selects, vec![1, 1]);
    assert_eq!(registry.len(), 1);
}

#[rstest]
fn failed_reconnect_leaves_slot_empty(backend: MockConnector) {
    let registry = registry(&backend).with_health_check_interval(SHORT_INTERVAL);
    registry.acquire("default", 4).unwrap();

    backend.set_healthy(false);
    backend.fail_next_connects(1);
    let_go_stale();

    let err = registry.acquire("default", 4).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Connection {
            stage: ConnectStage::Connect,
            ..
        }
    ));
    assert_eq!(registry.state("default", 4), ConnectionState::Absent);
    assert!(registry.is_empty());
    assert_eq!(backend.calls().connects, 2);

    // The next caller starts from scratch
    backend.set_healthy(true);
    registry.acquire("default", 4).unwrap();
    assert_eq!(backend.calls().connects, 3);
    assert_eq!(registry.state("default", 4), ConnectionState::Fresh);
}

#[rstest]
fn authentication_failure_registers_nothing(backend: MockConnector) {
    let registry = registry(&backend);

    let err = registry.acquire("wrong-password", 0).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(matches!(
        err,
        CacheError::Connection {
            stage: ConnectStage::Authenticate,
            ..
        }
    ));
    assert_eq!(registry.state("wrong-password", 0), ConnectionState::Absent);
    let calls = backend.calls();
    assert_eq!(calls.closes, 1, "half-open connection is released");
    assert!(calls.selects.is_empty());
}

#[test]
fn select_failure_registers_nothing() {
    let backend = MockConnector::new().with_rejected_select();
    let registry = registry(&backend);

    let err = registry.acquire("open", 99).unwrap_err();

    assert!(matches!(
        err,
        CacheError::Connection {
            stage: ConnectStage::SelectNamespace,
            ref key,
            ..
        } if key.index == 99 && key.store == "open"
    ));
    assert!(registry.is_empty());
}

#[rstest]
fn store_without_password_skips_auth(backend: MockConnector) {
    let registry = registry(&backend);
    registry.acquire("open", 0).unwrap();
    assert!(backend.calls().authentications.is_empty());
}

#[rstest]
fn unknown_store_is_a_config_error(backend: MockConnector) {
    let registry = registry(&backend);

    let err = registry.acquire("missing", 0).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(backend.calls().connects, 0);
}

#[rstest]
fn each_database_index_gets_its_own_connection(backend: MockConnector) {
    let registry = registry(&backend);

    let db0 = registry.acquire("default", 0).unwrap();
    let db1 = registry.acquire("default", 1).unwrap();
    let open0 = registry.acquire("open", 0).unwrap();

    assert!(!db0.same_connection(&db1));
    assert!(!db0.same_connection(&open0));
    assert_eq!(registry.len(), 3);
    assert_eq!(backend.calls().selects, vec![0, 1, 0]);
}

#[rstest]
fn concurrent_callers_share_one_connection(backend: MockConnector) {
    let registry = registry(&backend);

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| registry.acquire("default", 5).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(backend.calls().connects, 1);
    assert!(handles.windows(2).all(|w| w[0].same_connection(&w[1])));
}

#[test]
fn slow_connect_does_not_block_other_keys() {
    let backend = MockConnector::new().with_gated_host("slow.internal");
    let registry = registry(&backend);

    thread::scope(|scope| {
        let slow = scope.spawn(|| registry.acquire("slow", 0));

        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.waiting_connects() == 0 {
            assert!(Instant::now() < deadline, "slow connect never started");
            thread::sleep(Duration::from_millis(1));
        }

        // Completes while the slow store is still mid-connect
        registry.acquire("open", 0).unwrap();
        assert_eq!(registry.state("open", 0), ConnectionState::Fresh);

        backend.release_connects();
        slow.join().unwrap().unwrap();
    });

    assert_eq!(registry.len(), 2);
}

#[rstest]
fn remove_closes_and_forgets(backend: MockConnector) {
    let registry = registry(&backend);
    let handle = registry.acquire("default", 3).unwrap();

    assert!(registry.remove("default", 3).unwrap());
    assert!(!registry.remove("default", 3).unwrap());
    assert_eq!(registry.state("default", 3), ConnectionState::Absent);
    assert!(handle.ping().is_err(), "removed handle is closed");

    let again = registry.acquire("default", 3).unwrap();
    assert!(!again.same_connection(&handle));
}

#[rstest]
fn close_all_releases_every_connection(backend: MockConnector) {
    let registry = registry(&backend);
    registry.acquire("default", 0).unwrap();
    registry.acquire("default", 1).unwrap();
    registry.acquire("open", 0).unwrap();

    registry.close_all();

    assert!(registry.is_empty());
    assert_eq!(backend.calls().closes, 3);
}
