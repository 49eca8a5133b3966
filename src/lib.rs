//! gateway-mediator: the edge authentication mediator.
//!
//! Each front-end (HTTP, pub/sub, hub registration) is handed values owned
//! by one [`RuntimeContext`] built at startup — there is no ambient global
//! state for device access, the job queue, or the cloud client.

pub mod config;
pub mod hub_register;
pub mod http;
pub mod jobs;
pub mod orchestrator;
pub mod pubsub;

use cloud_client::{CloudClient, PollConfig};
use config::GatewayConfig;
use device_pool::Pool;
use device_retry::{RetryBudget, RetryController};
use device_transport::{DeviceHandle, Serializer, Transport, TransportTimings};
use jobs::{dispatch, JobRequest, JobResponse};
use job_queue::{Queue, Worker};
use orchestrator::{Credentials, Orchestrator};
use status_led::StatusLed;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the rest of the process is built from. Constructed once in
/// `main`, then split apart: the HTTP router gets an [`http::AppState`],
/// the pub/sub bridge gets the same `Queue` clone, hub registration gets
/// just its own config.
pub struct RuntimeContext {
    pub queue: Queue<JobRequest, JobResponse>,
    pub pool: Arc<Pool>,
    pub config: GatewayConfig,
}

/// Default job queue depth — bounds how many requests may be in flight
/// across every front-end before a new one blocks at enqueue time.
const QUEUE_CAPACITY: usize = 32;

/// Build every collaborator described in `spec.md` §9 and spawn the single
/// Worker that drains the Job Queue. Registers configured device endpoints
/// (and runs discovery if requested) before returning.
pub fn build_runtime(config: GatewayConfig) -> RuntimeContext {
    let pool = Arc::new(Pool::new(config.device.reset_threshold));
    for endpoint in &config.device.endpoints {
        pool.register(DeviceHandle::RealSerial {
            path: endpoint.clone(),
        });
    }
    if config.device.discover {
        match pool.discover(
            Path::new(&config.device.discover_dir),
            &config.device.discover_prefix,
        ) {
            Ok(n) => info!(found = n, "device discovery complete"),
            Err(e) => warn!(error = %e, "device discovery failed"),
        }
    }

    let serializer = Arc::new(Serializer::new(Transport::new(TransportTimings::default())));
    let retry = Arc::new(RetryController::new(RetryBudget::default()));
    let cloud = CloudClient::new(config.cloud_environment);
    let led = StatusLed::init();

    let orchestrator = Arc::new(Orchestrator::new(
        serializer,
        Arc::clone(&pool),
        retry,
        cloud,
        Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
        },
        PollConfig::default(),
        led,
    ));

    let (queue, worker) = Queue::new(QUEUE_CAPACITY);
    let dispatch_orchestrator = Arc::clone(&orchestrator);
    tokio::spawn(run_worker(worker, dispatch_orchestrator));

    RuntimeContext { queue, pool, config }
}

async fn run_worker(worker: Worker<JobRequest, JobResponse>, orchestrator: Arc<Orchestrator>) {
    worker
        .run(|req| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { dispatch(&orchestrator, req).await }
        })
        .await;
}
