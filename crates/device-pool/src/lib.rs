//! Device Pool: endpoint discovery and per-device health accounting.
//!
//! Kept independent of the Serializer's lock — `/api/health` (see
//! `gateway_mediator::http`) must be able to read counters while an
//! exchange is in flight.

use device_transport::DeviceHandle;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Per-device health counters, updated by `mark_success`/`mark_failure`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceHealth {
    pub consecutive_failures: u32,
    pub total_ops: u64,
    pub successful_ops: u64,
}

struct Slot {
    handle: DeviceHandle,
    health: DeviceHealth,
}

/// Registered devices plus a stable selection policy.
///
/// Selection is least-unhealthy-first: the device with the smallest
/// `consecutive_failures`, ties broken by registration order (device id
/// order). A device at or above `reset_threshold` consecutive failures is
/// skipped until `note_reset` clears it.
pub struct Pool {
    slots: Mutex<Vec<Slot>>,
    reset_threshold: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no registered device is currently eligible (all at or above the reset threshold)")]
    NoneAvailable,
    #[error("device '{0}' is not registered in this pool")]
    UnknownDevice(String),
}

impl Pool {
    pub fn new(reset_threshold: u32) -> Self {
        Pool {
            slots: Mutex::new(Vec::new()),
            reset_threshold,
        }
    }

    /// Register a device explicitly (used for `device.endpoints` config and
    /// for tests/mocks).
    pub fn register(&self, handle: DeviceHandle) {
        let mut slots = self.slots.lock().unwrap();
        info!(device_id = handle.id(), "device registered");
        slots.push(Slot {
            handle,
            health: DeviceHealth::default(),
        });
    }

    /// Discover character-device candidates under `dir` matching `prefix`
    /// (e.g. `/dev`, `"ttyUSB"`), opening and closing each briefly to
    /// confirm it's a live serial device before registering it.
    ///
    /// Candidates that fail the open/close probe are skipped with a
    /// warning rather than failing discovery outright — a single
    /// disconnected reader should not prevent the others from registering.
    pub fn discover(&self, dir: &Path, prefix: &str) -> std::io::Result<usize> {
        let mut found = 0;
        let entries = std::fs::read_dir(dir)?;
        let mut candidates: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix))
            .collect();
        candidates.sort();

        for name in candidates {
            let path = dir.join(&name).to_string_lossy().into_owned();
            match tokio_serial_probe(&path) {
                Ok(()) => {
                    self.register(DeviceHandle::RealSerial { path });
                    found += 1;
                }
                Err(e) => warn!(path, error = %e, "candidate device failed open probe, skipping"),
            }
        }
        Ok(found)
    }

    /// Pick the least-unhealthy eligible device. Stable across calls: the
    /// same inputs always yield the same choice.
    pub fn acquire(&self) -> Result<DeviceHandle, PoolError> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .filter(|s| s.health.consecutive_failures < self.reset_threshold)
            .min_by_key(|s| s.health.consecutive_failures)
            .map(|s| s.handle.clone())
            .ok_or(PoolError::NoneAvailable)
    }

    pub fn mark_success(&self, device_id: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.handle.id() == device_id) {
            slot.health.total_ops += 1;
            slot.health.successful_ops += 1;
            slot.health.consecutive_failures = 0;
        }
    }

    pub fn mark_failure(&self, device_id: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.handle.id() == device_id) {
            slot.health.total_ops += 1;
            slot.health.consecutive_failures += 1;
        }
    }

    /// Called by the Retry Controller after performing a transport-level
    /// device reset (DTR/RTS toggle + settle).
    pub fn note_reset(&self, device_id: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.handle.id() == device_id) {
            slot.health.consecutive_failures = 0;
        }
    }

    /// Snapshot of every registered device's health, for `/api/health`.
    pub fn health_snapshot(&self) -> Vec<(String, DeviceHealth)> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|s| (s.handle.id().to_owned(), s.health))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tokio_serial_probe(path: &str) -> std::io::Result<()> {
    let port = serialport::new(path, device_transport::BAUD_RATE)
        .timeout(std::time::Duration::from_millis(200))
        .open()
        .map_err(std::io::Error::other)?;
    drop(port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NeverCalled;
    impl device_transport::MockExchange for NeverCalled {
        fn exchange(
            &self,
            _outbound: &[u8],
        ) -> Result<String, device_transport::TransportError> {
            unreachable!("pool tests don't exchange")
        }
    }

    fn mock(id: &str) -> DeviceHandle {
        DeviceHandle::Mock {
            id: id.to_owned(),
            exchange: Arc::new(NeverCalled),
        }
    }

    #[test]
    fn acquire_picks_least_unhealthy_first() {
        let pool = Pool::new(3);
        pool.register(mock("a"));
        pool.register(mock("b"));
        pool.mark_failure("a");
        pool.mark_failure("a");
        let picked = pool.acquire().unwrap();
        assert_eq!(picked.id(), "b");
    }

    #[test]
    fn acquire_skips_devices_at_reset_threshold() {
        let pool = Pool::new(2);
        pool.register(mock("a"));
        pool.mark_failure("a");
        pool.mark_failure("a");
        assert!(matches!(pool.acquire(), Err(PoolError::NoneAvailable)));
        pool.note_reset("a");
        assert_eq!(pool.acquire().unwrap().id(), "a");
    }

    #[test]
    fn mark_success_resets_consecutive_failures() {
        let pool = Pool::new(5);
        pool.register(mock("a"));
        pool.mark_failure("a");
        pool.mark_success("a");
        let snapshot = pool.health_snapshot();
        let (_, health) = snapshot.iter().find(|(id, _)| id == "a").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.total_ops, 2);
        assert_eq!(health.successful_ops, 1);
    }
}
