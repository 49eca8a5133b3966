//! End-to-end scenario 5 from `spec.md` §8: a device that fails twice with
//! `NoData` then recovers must still succeed under a retry budget of 3, and
//! leave `consecutive_failures` at 0 afterward.

use cloud_client::{CloudClient, PollConfig};
use device_pool::Pool;
use device_retry::{RetryBudget, RetryController};
use device_transport::{DeviceHandle, Serializer, Transport, TransportTimings};
use gateway_mediator::orchestrator::{Credentials, Orchestrator};
use mediator_test_support::{fail_n_times_then, identity_wire, spawn_mock_cloud, MockCloudScript, SimFailure};
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

fn budget_max_three() -> RetryBudget {
    RetryBudget {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        backoff_multiplier: 2,
        backoff_cap: Duration::from_millis(5),
        reset_after_failures: 5,
    }
}

#[tokio::test]
async fn transient_failures_recover_within_budget_and_clear_health() {
    let mut id = [0u8; 16];
    id[0] = 0x20;
    let wire = identity_wire(&[0u8; 16], &id);

    let device = DeviceHandle::Mock {
        id: "d0".into(),
        exchange: fail_n_times_then(2, SimFailure::NoData, wire),
    };
    let pool = Arc::new(Pool::new(5));
    pool.register(device);

    let serializer = Arc::new(Serializer::new(Transport::new(fast_timings())));
    let retry = Arc::new(RetryController::new(budget_max_three()));
    let mock_cloud = spawn_mock_cloud(MockCloudScript::default()).await;
    let cloud = CloudClient::with_urls(mock_cloud.urls);

    let orchestrator = Orchestrator::new(
        serializer,
        Arc::clone(&pool),
        retry,
        cloud,
        Credentials {
            username: "u".into(),
            password: "p".into(),
        },
        PollConfig::default(),
        status_led::StatusLed::init(),
    );

    let identity = orchestrator.get_identity().await.unwrap();
    assert_eq!(identity.len(), 64);

    let snapshot = pool.health_snapshot();
    let (_, health) = snapshot.iter().find(|(id, _)| id == "d0").unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.total_ops, 3);
    assert_eq!(health.successful_ops, 1);
}
