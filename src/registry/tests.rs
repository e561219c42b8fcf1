//! Registry tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::*;

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[test]
fn test_connect_assigns_unique_ids() {
    let registry = Registry::new();
    let a = registry.connect(peer(1));
    let b = registry.connect(peer(1));

    assert_ne!(a.id(), b.id());
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_disconnect_removes_exactly_one() {
    let registry = Registry::new();
    let a = registry.connect(peer(1));
    let b = registry.connect(peer(2));

    assert!(registry.disconnect(a.id()));
    let remaining: Vec<_> = registry.enumerate().iter().map(|h| h.id()).collect();
    assert_eq!(remaining, vec![b.id()]);
}

#[test]
fn test_duplicate_disconnect_is_noop() {
    let registry = Registry::new();
    let a = registry.connect(peer(1));
    let _b = registry.connect(peer(2));

    assert!(registry.disconnect(a.id()));
    assert!(!registry.disconnect(a.id()));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registration_guard_deregisters_on_drop() {
    let registry = Arc::new(Registry::new());
    let registration = registry.register(peer(1));
    let id = registration.id();
    assert!(registry.contains(id));

    drop(registration);
    assert!(!registry.contains(id));
    assert!(registry.is_empty());
}

#[test]
fn test_registration_guard_deregisters_on_panic() {
    let registry = Arc::new(Registry::new());
    let inner = registry.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _registration = inner.register(peer(1));
        panic!("session body failed");
    }));

    assert!(result.is_err());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_close_all_signals_every_session() {
    let registry = Registry::new();
    let handles: Vec<_> = (0..3).map(|i| registry.connect(peer(i))).collect();

    assert_eq!(registry.close_all(), 3);

    // The permit is stored, so waiting after the signal returns immediately
    for handle in &handles {
        tokio::time::timeout(Duration::from_millis(100), handle.closed())
            .await
            .expect("close signal lost");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_disconnect_leaves_registry_empty() {
    const SESSIONS: u16 = 64;
    const ROUNDS: usize = 50;
    let registry = Arc::new(Registry::new());

    let mut tasks = Vec::new();
    for i in 0..SESSIONS {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..ROUNDS {
                let handle = registry.connect(peer(i));
                tokio::task::yield_now().await;
                assert!(registry.disconnect(handle.id()));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.len(), 0);
    assert!(registry.enumerate().is_empty());
}

#[tokio::test]
async fn test_wait_empty() {
    let registry = Arc::new(Registry::new());
    let registration = registry.register(peer(1));

    assert!(!registry.wait_empty(Duration::from_millis(20)).await);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(registration);
    });
    assert!(registry.wait_empty(Duration::from_secs(1)).await);
}
