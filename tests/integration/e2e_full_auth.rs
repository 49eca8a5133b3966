//! End-to-end scenarios 1-4 from `spec.md` §8, driven over the real HTTP
//! surface: status probe, identity read, happy-path authentication, and
//! the claim-id branch.

use cloud_client::{CloudClient, PollConfig};
use device_pool::Pool;
use device_retry::{RetryBudget, RetryController};
use device_transport::{DeviceHandle, Serializer, Transport, TransportTimings};
use gateway_mediator::http;
use gateway_mediator::jobs::{JobRequest, JobResponse};
use gateway_mediator::orchestrator::{Credentials, Orchestrator};
use job_queue::Queue;
use mediator_test_support::{
    challenge_response_wire, identity_then_cw_mapped_device, identity_wire, spawn_mock_cloud,
    MockCloudScript,
};
use std::collections::HashMap;
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

fn fast_budget() -> RetryBudget {
    RetryBudget {
        max_attempts: 2,
        base_backoff: Duration::from_millis(1),
        backoff_multiplier: 2,
        backoff_cap: Duration::from_millis(5),
        reset_after_failures: 2,
    }
}

/// Wires an axum server with a mocked device and a scripted cloud, bound to
/// an ephemeral port. Returns the base URL a `reqwest` client can hit.
async fn spawn_server(identity_reply: String, cw_to_rw: HashMap<[u8; 16], String>, script: MockCloudScript) -> String {
    let device = DeviceHandle::Mock {
        id: "d0".into(),
        exchange: identity_then_cw_mapped_device(identity_reply, cw_to_rw),
    };
    let pool = Arc::new(Pool::new(5));
    pool.register(device);

    let serializer = Arc::new(Serializer::new(Transport::new(fast_timings())));
    let retry = Arc::new(RetryController::new(fast_budget()));
    let mock_cloud = spawn_mock_cloud(script).await;
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
            max_attempts: 10,
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

fn pcc_id_bytes() -> ([u8; 16], [u8; 16], String) {
    let mut pcc = [0u8; 16];
    let mut id = [0u8; 16];
    for i in 0..16u8 {
        pcc[i as usize] = i;
        id[i as usize] = 0x10 + i;
    }
    let expected_identity =
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_owned();
    (pcc, id, expected_identity)
}

#[tokio::test]
async fn status_probe_reports_ok_without_touching_hardware() {
    let base = spawn_server(
        identity_wire(&[0u8; 16], &[0u8; 16]),
        HashMap::new(),
        MockCloudScript::default(),
    )
    .await;
    let client = reqwest::Client::new();
    let resp = tokio::time::timeout(
        Duration::from_secs(10),
        client.get(format!("{base}/api/status")).send(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn identity_read_returns_expected_pccid() {
    let (pcc, id, expected_identity) = pcc_id_bytes();
    let base = spawn_server(identity_wire(&pcc, &id), HashMap::new(), MockCloudScript::default()).await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/get-identity")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: JobResponse = resp.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.identity.unwrap(), expected_identity);
}

#[tokio::test]
async fn happy_path_full_auth_returns_auth_ok() {
    let (pcc, id, _) = pcc_id_bytes();
    let cw = "aa".repeat(16);
    let mut table = HashMap::new();
    table.insert([0xaau8; 16], challenge_response_wire(&[0xbb; 16]));

    let script = MockCloudScript {
        cw: cw.clone(),
        transaction_id: "T1".to_owned(),
        status_sequence: vec![serde_json::json!({"status": "AUTH_OK"})],
    };
    let base = spawn_server(identity_wire(&pcc, &id), table, script).await;

    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/full-auth")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: JobResponse = resp.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.auth_result.unwrap(), "AUTH_OK");
    assert_eq!(body.cw.unwrap(), cw);
}

#[tokio::test]
async fn claim_id_branch_surfaces_claim_id_and_succeeds() {
    let (pcc, id, _) = pcc_id_bytes();
    let mut table = HashMap::new();
    table.insert([0xaau8; 16], challenge_response_wire(&[0xbb; 16]));

    let script = MockCloudScript {
        cw: "aa".repeat(16),
        transaction_id: "T1".to_owned(),
        status_sequence: vec![serde_json::json!({"status": "CLAIM_ID", "claimId": "C42"})],
    };
    let base = spawn_server(identity_wire(&pcc, &id), table, script).await;

    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/full-auth")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: JobResponse = resp.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.claim_id.unwrap(), "C42");
}
