//! Shared test doubles for the device mediation core and the cloud client.
//!
//! Mirrors the teacher's `rt-test-utils` crate (a `MockWsServer` plus wire
//! fixtures shared across `services/server`'s integration tests): one crate
//! that every other crate's `tests/` and `#[cfg(test)]` modules can depend
//! on instead of hand-rolling the same mock twice.

use device_protocol::CodecError;
use device_transport::{MockExchange, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Wire fixtures
// ---------------------------------------------------------------------------

/// Build a well-formed Identify reply wire: PCC/ID at their fixed offsets.
pub fn identity_wire(pcc: &[u8; 16], id: &[u8; 16]) -> String {
    let mut bytes = vec![0u8; 88];
    bytes[5..21].copy_from_slice(pcc);
    bytes[21..37].copy_from_slice(id);
    to_hex(&bytes)
}

/// Build a well-formed challenge-response reply wire carrying `rw` at its
/// fixed offset.
pub fn challenge_response_wire(rw: &[u8; 16]) -> String {
    let mut bytes = vec![0u8; 88];
    bytes[71..87].copy_from_slice(rw);
    to_hex(&bytes)
}

/// Build a BIST reply wire; `passed` controls the pass byte at offset 71.
pub fn bist_wire(passed: bool) -> String {
    let mut bytes = vec![0u8; 72];
    bytes[71] = if passed { 0x50 } else { 0x00 };
    to_hex(&bytes)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Closure-backed MockExchange
// ---------------------------------------------------------------------------

struct ClosureExchange<F>(F)
where
    F: Fn(&[u8]) -> Result<String, TransportError> + Send + Sync;

impl<F> MockExchange for ClosureExchange<F>
where
    F: Fn(&[u8]) -> Result<String, TransportError> + Send + Sync,
{
    fn exchange(&self, outbound: &[u8]) -> Result<String, TransportError> {
        (self.0)(outbound)
    }
}

/// Wrap an arbitrary closure as a [`MockExchange`].
pub fn closure_exchange<F>(f: F) -> Arc<dyn MockExchange>
where
    F: Fn(&[u8]) -> Result<String, TransportError> + Send + Sync + 'static,
{
    Arc::new(ClosureExchange(f))
}

/// A `TransportError` a mock can be asked to produce, without needing
/// `TransportError` itself to be `Clone`.
#[derive(Debug, Clone, Copy)]
pub enum SimFailure {
    NoData,
    InvalidHex,
    ShortFrame,
}

impl SimFailure {
    fn into_error(self) -> TransportError {
        match self {
            SimFailure::NoData => TransportError::NoData {
                path: "mock".into(),
            },
            SimFailure::InvalidHex => TransportError::InvalidHex {
                path: "mock".into(),
            },
            SimFailure::ShortFrame => {
                TransportError::ShortFrame(CodecError::ShortFrame { needed: 87, got: 0 })
            }
        }
    }
}

/// A mock that always returns `wire`, regardless of the outbound frame.
pub fn always_ok(wire: String) -> Arc<dyn MockExchange> {
    closure_exchange(move |_outbound| Ok(wire.clone()))
}

/// A mock that fails with `failure` on the first `n` calls, then always
/// succeeds with `wire` — the transient-failure-with-recovery scenario
/// (`spec.md` §8 scenario 5).
pub fn fail_n_times_then(n: u32, failure: SimFailure, wire: String) -> Arc<dyn MockExchange> {
    let remaining = AtomicU32::new(n);
    closure_exchange(move |_outbound| {
        if remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(failure.into_error())
        } else {
            Ok(wire.clone())
        }
    })
}

/// A mock that dispatches on the outbound opcode (byte 0): Identify
/// (`0x01`) returns `identity`, a challenge-response (`0x03`/`0x07`) looks
/// up the 16-byte challenge field (offset 5..21) in `cw_to_rw` and returns
/// the matching reply wire, or `NoData` if the challenge isn't recognized.
///
/// This is the one mock shape a `full_auth` end-to-end test actually
/// needs: the CW the Orchestrator poses to the device is only known once
/// the cloud mock hands it out, so the device mock must answer based on
/// what it's asked rather than a fixed script.
pub fn identity_then_cw_mapped_device(
    identity: String,
    cw_to_rw: HashMap<[u8; 16], String>,
) -> Arc<dyn MockExchange> {
    closure_exchange(move |outbound| match outbound.first() {
        Some(0x01) => Ok(identity.clone()),
        Some(0x03) | Some(0x07) => {
            let mut challenge = [0u8; 16];
            challenge.copy_from_slice(&outbound[5..21]);
            cw_to_rw.get(&challenge).cloned().ok_or(TransportError::NoData {
                path: "mock".into(),
            })
        }
        _ => Err(TransportError::NoData {
            path: "mock".into(),
        }),
    })
}

/// Records the wall-clock entry/exit instant of every call — used by the
/// concurrency stress scenario (`spec.md` §8 scenario 6) to assert no two
/// exchanges overlapped. `work` is an artificial per-call delay (kept
/// short, a few milliseconds) so overlapping calls actually have a chance
/// to collide if the Serializer weren't enforcing exclusivity.
pub struct CallLog {
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(CallLog {
            spans: Mutex::new(Vec::new()),
        })
    }

    /// True iff no two recorded spans overlap in time.
    pub fn all_disjoint(&self) -> bool {
        let mut spans = self.spans.lock().unwrap().clone();
        spans.sort_by_key(|(start, _)| *start);
        spans.windows(2).all(|w| w[0].1 <= w[1].0)
    }

    pub fn call_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

pub fn recording_device(
    wire: String,
    work: std::time::Duration,
    log: Arc<CallLog>,
) -> Arc<dyn MockExchange> {
    closure_exchange(move |_outbound| {
        let start = Instant::now();
        std::thread::sleep(work);
        let end = Instant::now();
        log.spans.lock().unwrap().push((start, end));
        Ok(wire.clone())
    })
}

// ---------------------------------------------------------------------------
// Mock cloud HTTP server
// ---------------------------------------------------------------------------

/// Canned cloud behavior for one `full_auth` run: a fixed CW/transaction id
/// from `requestCW`, and a sequence of `checkAuthStatus` bodies (the last
/// one repeats once exhausted) so callers can script `NOT_READY` a few
/// times before a verdict, per scenario 3/4.
#[derive(Debug, Clone)]
pub struct MockCloudScript {
    pub cw: String,
    pub transaction_id: String,
    pub status_sequence: Vec<serde_json::Value>,
}

impl Default for MockCloudScript {
    fn default() -> Self {
        MockCloudScript {
            cw: "aa".repeat(16),
            transaction_id: "T1".to_owned(),
            status_sequence: vec![serde_json::json!({"status": "AUTH_OK"})],
        }
    }
}

/// A running mock cloud server bound to an ephemeral local port, serving
/// `iotLogin` / `requestCW` / `replyRW` / `checkAuthStatus` with canned
/// responses. Mirrors the teacher's `MockWsServer` — spawn once per test,
/// point a `CloudClient` at `.urls`.
pub struct MockCloud {
    pub urls: cloud_client::CloudUrls,
}

pub async fn spawn_mock_cloud(script: MockCloudScript) -> MockCloud {
    use axum::{routing::get, routing::post, Json, Router};

    struct Shared {
        script: MockCloudScript,
        status_calls: std::sync::atomic::AtomicUsize,
    }
    let shared = Arc::new(Shared {
        script,
        status_calls: std::sync::atomic::AtomicUsize::new(0),
    });

    let cw_state = Arc::clone(&shared);
    let rw_state = Arc::clone(&shared);
    let status_state = Arc::clone(&shared);

    let router = Router::new()
        .route(
            "/login",
            post(|| async { Json(serde_json::json!({"accessToken": "mock-token"})) }),
        )
        .route(
            "/requestCW",
            post(move || {
                let state = Arc::clone(&cw_state);
                async move {
                    Json(serde_json::json!({
                        "CW": state.script.cw,
                        "transactionId": state.script.transaction_id,
                    }))
                }
            }),
        )
        .route(
            "/replyRW",
            post(move || {
                let state = Arc::clone(&rw_state);
                async move {
                    Json(serde_json::json!({"transactionId": state.script.transaction_id}))
                }
            }),
        )
        .route(
            "/status",
            get(move || {
                let state = Arc::clone(&status_state);
                async move {
                    let i = state.status_calls.fetch_add(1, Ordering::SeqCst);
                    let body = state
                        .script
                        .status_sequence
                        .get(i)
                        .or_else(|| state.script.status_sequence.last())
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({"status": "NOT_READY"}));
                    Json(body)
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let base = format!("http://{addr}");

    MockCloud {
        urls: cloud_client::CloudUrls {
            login: format!("{base}/login"),
            request_cw: format!("{base}/requestCW"),
            reply_rw: format!("{base}/replyRW"),
            check_status: format!("{base}/status"),
        },
    }
}
