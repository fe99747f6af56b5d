//! Admission control through the HTTP surface.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::net::TcpListener;

use queue_sidecar::admin::setup_admin_router;
use queue_sidecar::config::SidecarConfig;

mod common;

use common::{client, wait_until, GatedBackend, Sidecar};

fn config(container_concurrency: usize, queue_depth: usize) -> SidecarConfig {
    let mut config = SidecarConfig::default();
    config.admission.container_concurrency = container_concurrency;
    config.admission.queue_depth = Some(queue_depth);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturated_breaker_sheds_with_503() {
    let backend = GatedBackend::start().await;
    let sidecar = Sidecar::start(config(1, 1), backend.addr, None, None).await;
    let client = client();

    let first = tokio::spawn(client.get(sidecar.url("/block/1")).send());
    wait_until(|| sidecar.breaker().in_flight() == 1).await;

    let second = tokio::spawn(client.get(sidecar.url("/block/2")).send());
    wait_until(|| sidecar.breaker().pending() == 1).await;

    let third = client.get(sidecar.url("/block/3")).send().await.unwrap();
    assert_eq!(third.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(third.text().await.unwrap(), "pending request queue full");
    assert_eq!(backend.arrivals.load(Ordering::SeqCst), 1);

    backend.open();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.text().await.unwrap(), "served /block/2");
    assert_eq!(backend.arrivals.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_timeout_sheds_waiter() {
    let backend = GatedBackend::start().await;
    let mut config = config(1, 4);
    config.admission.queue_timeout_ms = Some(100);
    let sidecar = Sidecar::start(config, backend.addr, None, None).await;
    let client = client();

    let first = tokio::spawn(client.get(sidecar.url("/block")).send());
    wait_until(|| sidecar.breaker().in_flight() == 1).await;

    let started = Instant::now();
    let second = client.get(sidecar.url("/quick")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(sidecar.breaker().pending(), 0);
    assert_eq!(sidecar.breaker().in_flight(), 1);

    backend.open();
    assert_eq!(first.await.unwrap().unwrap().status(), StatusCode::OK);
    wait_until(|| sidecar.breaker().in_flight() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unbounded_sidecar_never_sheds() {
    let backend = GatedBackend::start().await;
    let sidecar = Sidecar::start(config(0, 0), backend.addr, None, None).await;
    assert!(sidecar.breaker.is_none());
    let client = client();

    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(tokio::spawn(client.get(sidecar.url(&format!("/block/{}", i))).send()));
    }
    wait_until(|| backend.arrivals.load(Ordering::SeqCst) == 16).await;

    backend.open();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status(), StatusCode::OK);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admin_capacity_update_admits_waiters() {
    let backend = GatedBackend::start().await;
    let mut config = config(3, 4);
    config.admission.initial_capacity = Some(1);
    config.admin.api_key = "test-key".into();
    let sidecar = Sidecar::start(config, backend.addr, None, None).await;

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin = setup_admin_router(sidecar.admin.clone());
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin).await;
    });

    let client = client();
    let first = tokio::spawn(client.get(sidecar.url("/block/1")).send());
    wait_until(|| sidecar.breaker().in_flight() == 1).await;
    let second = tokio::spawn(client.get(sidecar.url("/block/2")).send());
    let third = tokio::spawn(client.get(sidecar.url("/block/3")).send());
    wait_until(|| sidecar.breaker().pending() == 2).await;

    let unauthorized = client
        .put(format!("http://{}/admin/concurrency", admin_addr))
        .json(&serde_json::json!({ "capacity": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let updated: serde_json::Value = client
        .put(format!("http://{}/admin/concurrency", admin_addr))
        .bearer_auth("test-key")
        .json(&serde_json::json!({ "capacity": 2 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["capacity"], 2);
    assert_eq!(updated["in_flight"], 2);
    assert_eq!(updated["pending"], 1);

    // The oldest waiter reaches the backend without any new request.
    wait_until(|| backend.arrivals.load(Ordering::SeqCst) == 2).await;

    let status: serde_json::Value = client
        .get(format!("http://{}/admin/status", admin_addr))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["breaker"]["max_concurrency"], 3);
    assert_eq!(status["active_requests"], 2);

    backend.open();
    for handle in [first, second, third] {
        assert_eq!(handle.await.unwrap().unwrap().status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_request_id_is_assigned_and_echoed() {
    let backend = GatedBackend::start().await;
    let sidecar = Sidecar::start(config(0, 0), backend.addr, None, None).await;
    let client = client();

    let generated = client.get(sidecar.url("/")).send().await.unwrap();
    let id = generated.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(id.len(), 36);

    let echoed = client
        .get(sidecar.url("/"))
        .header("x-request-id", "caller-supplied")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.headers()["x-request-id"], "caller-supplied");
}
