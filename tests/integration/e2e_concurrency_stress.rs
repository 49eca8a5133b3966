//! End-to-end scenario 6 from `spec.md` §8: 20 concurrent `get-identity`
//! calls against a single mocked device must never overlap in time, and
//! every caller must get back a valid identity.

use cloud_client::{CloudClient, PollConfig};
use device_pool::Pool;
use device_retry::{RetryBudget, RetryController};
use device_transport::{DeviceHandle, Serializer, Transport, TransportTimings};
use gateway_mediator::orchestrator::{Credentials, Orchestrator};
use mediator_test_support::{identity_wire, recording_device, spawn_mock_cloud, CallLog, MockCloudScript};
use std::sync::Arc;
use std::time::Duration;

fn fast_timings() -> TransportTimings {
    TransportTimings {
        quiet_period: Duration::from_millis(1),
        settle: Duration::ZERO,
        read_timeout: Duration::from_millis(200),
        inter_byte_stall: Duration::from_millis(50),
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
        reset_after_failures: 5,
    }
}

#[tokio::test]
async fn twenty_concurrent_identity_reads_never_overlap() {
    let mut id = [0u8; 16];
    id[0] = 0x10;
    let wire = identity_wire(&[0u8; 16], &id);

    let log = CallLog::new();
    let device = DeviceHandle::Mock {
        id: "d0".into(),
        exchange: recording_device(wire, Duration::from_millis(5), Arc::clone(&log)),
    };
    let pool = Arc::new(Pool::new(5));
    pool.register(device);

    let serializer = Arc::new(Serializer::new(Transport::new(fast_timings())));
    let retry = Arc::new(RetryController::new(fast_budget()));
    let mock_cloud = spawn_mock_cloud(MockCloudScript::default()).await;
    let cloud = CloudClient::with_urls(mock_cloud.urls);

    let orchestrator = Arc::new(Orchestrator::new(
        serializer,
        pool,
        retry,
        cloud,
        Credentials {
            username: "u".into(),
            password: "p".into(),
        },
        PollConfig::default(),
        status_led::StatusLed::init(),
    ));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move { orchestrator.get_identity().await }));
    }

    for h in handles {
        let identity = h.await.unwrap().unwrap();
        assert_eq!(identity.len(), 64);
    }

    assert_eq!(log.call_count(), 20);
    assert!(log.all_disjoint(), "two device exchanges overlapped in time");
}
