//! Retry Controller: bounded retries with exponential backoff and
//! transport-level device reset. Deliberately finite — `spec.md` §9 calls
//! out the source's "retry forever" / "ZERO FAILURE MODE" as an
//! anti-pattern this repository does not reproduce.

use device_pool::Pool;
use device_transport::{DeviceHandle, Serializer, TransportError};
use std::time::Duration;
use tracing::{error, warn};

/// Budget parameters from `spec.md` §4.5.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_multiplier: u32,
    pub backoff_cap: Duration,
    pub reset_after_failures: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget {
            max_attempts: 4,
            base_backoff: Duration::from_millis(400),
            backoff_multiplier: 2,
            backoff_cap: Duration::from_secs(3),
            reset_after_failures: 3,
        }
    }
}

/// `ShortFrame`/`InvalidHex` signal protocol drift rather than a transient
/// hardware hiccup, so they're retriable under a stricter cap than
/// `PortOpen`/`NoData`.
fn stricter_cap(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::ShortFrame(_) | TransportError::InvalidHex { .. }
    )
}

/// Surfaced once the budget is exhausted, carrying the last cause.
#[derive(Debug, thiserror::Error)]
#[error("device unavailable after retries: {cause}")]
pub struct DeviceUnavailable {
    #[source]
    pub cause: TransportError,
}

pub struct RetryController {
    budget: RetryBudget,
}

impl RetryController {
    pub fn new(budget: RetryBudget) -> Self {
        RetryController { budget }
    }

    /// Run `op` against `device` through `serializer`, retrying on
    /// retriable failures up to the configured budget. `pool` is updated
    /// with success/failure counters and is consulted to decide whether a
    /// transport-level reset is due.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        serializer: &Serializer,
        pool: &Pool,
        device: &DeviceHandle,
        mut op: F,
    ) -> Result<T, DeviceUnavailable>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        let device_id = device.id().to_owned();
        let mut short_frame_attempts = 0u32;
        let mut last_err: Option<TransportError> = None;

        for attempt in 1..=self.budget.max_attempts {
            match op().await {
                Ok(value) => {
                    pool.mark_success(&device_id);
                    return Ok(value);
                }
                Err(err) => {
                    if stricter_cap(&err) {
                        short_frame_attempts += 1;
                    }
                    pool.mark_failure(&device_id);
                    warn!(device = %device_id, attempt, error = %err, "device operation failed");

                    let stricter_exhausted =
                        stricter_cap(&err) && short_frame_attempts >= self.budget.max_attempts.min(2);
                    last_err = Some(err);

                    if attempt == self.budget.max_attempts || stricter_exhausted {
                        break;
                    }

                    if self.should_reset(pool, &device_id) {
                        if let Err(reset_err) = serializer.reset_device(device).await {
                            warn!(device = %device_id, error = %reset_err, "device reset failed");
                        } else {
                            pool.note_reset(&device_id);
                        }
                    }

                    let backoff = self.backoff_for(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let cause = last_err.expect("loop always runs at least once and records a failure");
        error!(device = %device_id, cause = %cause, "device unavailable after retries");
        Err(DeviceUnavailable { cause })
    }

    fn should_reset(&self, pool: &Pool, device_id: &str) -> bool {
        pool.health_snapshot()
            .into_iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, health)| health.consecutive_failures >= self.budget.reset_after_failures)
            .unwrap_or(false)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.budget.base_backoff
            * self.budget.backoff_multiplier.saturating_pow(attempt.saturating_sub(1));
        scaled.min(self.budget.backoff_cap)
    }
}
