//! Exercises the HTTP surface's error-handling rules (`spec.md` §7: 400 for
//! client-input errors, 500 for everything else) and config loading from a
//! file on disk.

use cloud_client::{CloudClient, PollConfig};
use device_pool::Pool;
use device_retry::{RetryBudget, RetryController};
use device_transport::{DeviceHandle, Serializer, Transport, TransportTimings};
use gateway_mediator::config;
use gateway_mediator::http;
use gateway_mediator::jobs::{JobRequest, JobResponse};
use gateway_mediator::orchestrator::{Credentials, Orchestrator};
use job_queue::Queue;
use mediator_test_support::{identity_wire, spawn_mock_cloud, MockCloudScript};
use std::sync::Arc;
use std::time::Duration;

fn fast_timings() -> TransportTimings {
    TransportTimings {
        quiet_period: Duration::from_millis(1),
        settle: Duration::ZERO,
        read_timeout: Duration::from_millis(100),
        inter_byte_stall: Duration::from_millis(20),
        cooldown: Duration::ZERO,
        ghost_read_limit: 5,
    }
}

async fn spawn_server() -> String {
    let wire = identity_wire(&[0u8; 16], &[0u8; 16]);
    let device = DeviceHandle::Mock {
        id: "d0".into(),
        exchange: mediator_test_support::always_ok(wire),
    };
    let pool = Arc::new(Pool::new(5));
    pool.register(device);

    let serializer = Arc::new(Serializer::new(Transport::new(fast_timings())));
    let retry = Arc::new(RetryController::new(RetryBudget::default()));
    let mock_cloud = spawn_mock_cloud(MockCloudScript::default()).await;
    let cloud = CloudClient::with_urls(mock_cloud.urls);

    let orchestrator = Arc::new(Orchestrator::new(
        serializer,
        Arc::clone(&pool),
        retry,
        cloud,
        Credentials {
            username: "u".into(),
            password: "p".into(),
        },
        PollConfig {
            interval: Duration::from_millis(1),
            max_attempts: 5,
        },
        status_led::StatusLed::init(),
    ));

    let (queue, worker) = Queue::<JobRequest, JobResponse>::new(16);
    let worker_orchestrator = Arc::clone(&orchestrator);
    tokio::spawn(worker.run(move |req| {
        let orchestrator = Arc::clone(&worker_orchestrator);
        async move { gateway_mediator::jobs::dispatch(&orchestrator, req).await }
    }));

    let state = http::AppState::new(queue, pool);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, http::router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn get_cw_with_empty_identity_is_a_client_error() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/get-cw"))
        .json(&serde_json::json!({"identity": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: JobResponse = resp.json().await.unwrap();
    assert!(!body.success);
    assert!(body.error.is_some());
}

#[tokio::test]
async fn authenticate_missing_fields_is_a_client_error() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/authenticate"))
        .json(&serde_json::json!({"identity": "abc", "cw": "", "rw": "", "transactionId": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn health_reports_registered_device_and_queue_depth() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"].as_array().unwrap().len(), 1);
    assert_eq!(body["devices"][0]["id"], "d0");
}

#[tokio::test]
async fn loads_config_from_a_real_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let creds_path = dir.path().join("creds.txt");
    std::fs::write(&creds_path, "alice\nhunter2\n").unwrap();

    let config_path = dir.path().join("gateway-mediator.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
schema_version = 1

[cloud]
environment = "SANDBOX"

[auth]
credentials_file = "{}"

[device]
endpoints = ["/dev/ttyUSB0"]
"#,
            creds_path.to_string_lossy()
        ),
    )
    .unwrap();

    let loaded = config::load_config_from_path(&config_path).unwrap();
    assert_eq!(loaded.username, "alice");
    assert_eq!(loaded.device.endpoints, vec!["/dev/ttyUSB0".to_owned()]);
}
