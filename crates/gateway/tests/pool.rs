//! Integration tests: the worker pool supervising real stub subprocesses
//! over their rendezvous sockets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::Registry;

use iskoces_gateway_engine::{
    EngineKind, GatewayMetrics, PoolConfig, TranslateError, WorkerPool,
};

fn stub_config(dir: &Path, mode: &str, workers: usize) -> PoolConfig {
    PoolConfig {
        engine: EngineKind::Argos,
        max_workers: workers,
        rendezvous_dir: dir.to_path_buf(),
        worker_command: env!("CARGO_BIN_EXE_iskoces-worker-stub").to_string(),
        worker_script: Some(PathBuf::from(mode)),
    }
}

/// Sum of all samples of `prefix` in the registry's text exposition.
fn metric_value(registry: &Registry, prefix: &str) -> f64 {
    let text = prometheus::TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap();
    text.lines()
        .filter(|line| !line.starts_with('#') && line.starts_with(prefix))
        .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
        .sum()
}

#[tokio::test]
async fn translates_through_a_real_worker_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        stub_config(dir.path(), "upper", 2),
        GatewayMetrics::new_for_tests(),
    )
    .unwrap();

    let out = pool.translate("hello world", "en", "fr", None).await.unwrap();
    assert_eq!(out, "HELLO WORLD");

    pool.check_health(None).await.unwrap();
    pool.shutdown().await;
}

#[tokio::test]
async fn concurrent_requests_share_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(
        WorkerPool::new(
            stub_config(dir.path(), "upper", 2),
            GatewayMetrics::new_for_tests(),
        )
        .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.translate(&format!("text {i}"), "en", "fr", None).await
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), format!("TEXT {i}"));
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn worker_reported_failures_carry_the_worker_message() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        stub_config(dir.path(), "fail", 1),
        GatewayMetrics::new_for_tests(),
    )
    .unwrap();

    let err = pool.translate("hello", "en", "fr", None).await.unwrap_err();
    match err {
        TranslateError::Worker(msg) => assert!(msg.contains("stub failure"), "{msg}"),
        other => panic!("expected Worker error, got {other:?}"),
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn a_crashed_worker_is_restarted_and_serves_again() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let metrics = GatewayMetrics::new(&registry);
    // "once" serves a single request and then exits nonzero.
    let pool = WorkerPool::new(stub_config(dir.path(), "once", 1), metrics).unwrap();

    let out = pool.translate("first", "en", "fr", None).await.unwrap();
    assert_eq!(out, "FIRST");

    // Watcher backoff is one second; the replacement is up well within two.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(metric_value(&registry, "iskoces_worker_restarts_total") >= 1.0);

    let out = pool.translate("second", "en", "fr", None).await.unwrap();
    assert_eq!(out, "SECOND");

    pool.shutdown().await;
}

#[tokio::test]
async fn a_zero_deadline_cancels_before_any_worker_is_touched() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let metrics = GatewayMetrics::new(&registry);
    let pool = WorkerPool::new(stub_config(dir.path(), "upper", 1), metrics).unwrap();

    let err = pool
        .translate("hello", "en", "fr", Some(Instant::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::DeadlineExceeded), "{err:?}");
    assert_eq!(
        metric_value(&registry, "iskoces_worker_connections_total"),
        0.0
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn a_worker_dead_at_connect_fails_once_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let metrics = GatewayMetrics::new(&registry);
    // "die-once" binds its socket but never accepts and exits shortly
    // after; the restarted replacement serves normally.
    let pool = WorkerPool::new(stub_config(dir.path(), "die-once", 1), metrics).unwrap();

    // The subprocess is still alive when the worker is acquired, so the
    // failure surfaces on the connection, not in acquisition.
    let err = pool.translate("hello", "en", "fr", None).await.unwrap_err();
    match err {
        TranslateError::Transport(msg) => assert!(msg.contains("connect"), "{msg}"),
        other => panic!("expected Transport error, got {other:?}"),
    }

    // The stub exits at two seconds and the restart backoff is one; the
    // replacement is serving well within five.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let out = pool.translate("hello again", "en", "fr", None).await.unwrap();
    assert_eq!(out, "HELLO AGAIN");

    // Exactly one request failed on transport, and only the one worker
    // restart happened.
    assert_eq!(
        metric_value(
            &registry,
            "iskoces_translate_requests_total{engine=\"argos\",outcome=\"transport\"}",
        ),
        1.0
    );
    assert_eq!(
        metric_value(&registry, "iskoces_worker_restarts_total"),
        1.0
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn a_worker_that_never_binds_keeps_the_pool_alive() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        stub_config(dir.path(), "never-bind", 1),
        GatewayMetrics::new_for_tests(),
    )
    .unwrap();

    let err = pool
        .translate(
            "hello",
            "en",
            "fr",
            Some(Instant::now() + Duration::from_millis(700)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::DeadlineExceeded), "{err:?}");

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_unlinks_the_rendezvous_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        stub_config(dir.path(), "upper", 2),
        GatewayMetrics::new_for_tests(),
    )
    .unwrap();

    pool.translate("hello", "en", "fr", None).await.unwrap();
    pool.shutdown().await;

    assert!(!dir.path().join("worker-0.sock").exists());
    assert!(!dir.path().join("worker-1.sock").exists());
}

#[tokio::test]
#[ignore = "slow: exercises the full 10s acquisition timeout"]
async fn saturation_converts_into_acquisition_timeouts() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let metrics = GatewayMetrics::new(&registry);
    // One worker, and the stub holds it for 15 seconds.
    let pool = Arc::new(WorkerPool::new(stub_config(dir.path(), "slow", 1), metrics).unwrap());

    let occupier = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.translate("occupy", "en", "fr", None).await })
    };
    // Let the first caller take the only worker.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let started = Instant::now();
    let err = pool.translate("starved", "en", "fr", None).await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, TranslateError::AcquireTimeout(_)), "{err:?}");
    assert!(
        waited >= Duration::from_secs(10) && waited < Duration::from_secs(11),
        "waited {waited:?}"
    );
    let wait_sum = metric_value(&registry, "iskoces_queue_wait_seconds_sum");
    assert!((10.0..12.0).contains(&wait_sum), "queue wait sum {wait_sum}");

    assert_eq!(occupier.await.unwrap().unwrap(), "OCCUPY");
    pool.shutdown().await;
}
