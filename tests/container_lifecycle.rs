//! End-to-end lifecycle tests against the in-memory runtime.
//!
//! These exercise the public API the way an adapter crate would, without a
//! Docker daemon.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use testbox::testing::FakeRuntime;
use testbox::{Container, ContainerError, ContainerState, WaitStrategy, wait_for_log_line};

// ── Scenario: configure, start, inspect, stop ──────────────────────────────

#[tokio::test]
async fn configure_start_inspect_stop() {
    testbox::logging::init_test_logs();
    let runtime = Arc::new(FakeRuntime::new());

    let mut container = Container::new("X", runtime.clone());
    container
        .with_exposed_ports([9042])
        .unwrap()
        .with_env("A", "1")
        .unwrap();

    container.start().await.unwrap();
    assert_eq!(container.state(), ContainerState::Running);
    assert!(!container.get_host().is_empty());
    assert!(container.get_exposed_port(9042).unwrap() > 0);

    let id = container.runtime_id().cloned().unwrap();
    let seen = runtime.container(&id).unwrap();
    assert_eq!(seen.spec.env.get("A").map(String::as_str), Some("1"));
    assert_eq!(seen.spec.image, "X");

    container.stop().await.unwrap();
    assert_eq!(container.state(), ContainerState::Removed);
    assert_eq!(
        runtime.calls(),
        vec!["create", "start", "resolve_port", "stop", "remove"]
    );
}

// ── Ports stay stable for the life of the handle ───────────────────────────

#[tokio::test]
async fn exposed_ports_are_stable() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut container = Container::new("X", runtime);
    container.with_exposed_ports([80, 443, 9042]).unwrap();
    container.start().await.unwrap();

    for port in [80, 443, 9042] {
        let first = container.get_exposed_port(port).unwrap();
        assert!((49152..=65535).contains(&first));
        for _ in 0..3 {
            assert_eq!(container.get_exposed_port(port).unwrap(), first);
        }
    }

    container.stop().await.unwrap();
}

// ── Readiness ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn readiness_waits_for_late_line() {
    let runtime = Arc::new(
        FakeRuntime::new()
            .with_logs(["booting", "loading schema", "ready for connections"])
            .with_log_delay(Duration::from_millis(20)),
    );
    let mut container = Container::new("X", runtime);
    container
        .with_wait_strategy(WaitStrategy::log_contains(
            "ready for connections",
            Duration::from_secs(2),
        ))
        .unwrap();

    container.start().await.unwrap();
    assert_eq!(container.state(), ContainerState::Running);
    container.stop().await.unwrap();
}

#[tokio::test]
async fn wait_can_be_repeated_on_a_running_container() {
    let runtime = Arc::new(FakeRuntime::new().with_logs(["ready"]));
    let mut container = Container::new("X", runtime);
    container.start().await.unwrap();

    // every wait reads from the first line again
    for _ in 0..3 {
        wait_for_log_line(&container, |l| l == "ready", Duration::from_secs(1))
            .await
            .unwrap();
    }
    container.stop().await.unwrap();
}

#[tokio::test]
async fn container_dying_mid_wait_is_reported() {
    let runtime = Arc::new(FakeRuntime::new().with_logs(["starting"]));
    let mut container = Container::new("X", runtime.clone());
    container.with_exposed_ports([5432]).unwrap();
    container.start().await.unwrap();

    let id = container.runtime_id().cloned().unwrap();
    runtime.kill(&id);

    let err = WaitStrategy::tcp_port(5432, Duration::from_secs(5))
        .wait_until_ready(&container)
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::ContainerExited { .. }));

    container.stop().await.unwrap();
}

// ── Engine failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn unavailable_engine_surfaces_unchanged() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_unavailable(true);

    let mut container = Container::new("X", runtime);
    let err = container.start().await.unwrap_err();
    assert!(matches!(err, ContainerError::EngineUnavailable { .. }));
    assert_eq!(container.state(), ContainerState::Unstarted);
}

// ── Many handles on one runtime ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_handles_run_concurrently() {
    let runtime = Arc::new(FakeRuntime::new());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                let mut container = Container::new("X", runtime);
                container.with_exposed_ports([6379]).unwrap();
                container.start().await.unwrap();
                let port = container.get_exposed_port(6379).unwrap();
                container.stop().await.unwrap();
                port
            })
        })
        .collect();

    let mut ports = HashSet::new();
    for task in tasks {
        ports.insert(task.await.unwrap());
    }

    assert_eq!(ports.len(), 8, "each container gets its own host port");
    assert_eq!(runtime.live_containers(), 0);
    assert_eq!(runtime.created_count(), 8);
}
