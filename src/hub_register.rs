//! Hub registration: `examples/original_source/register.py`'s
//! `register()` loop, ported to a WebSocket client task.
//!
//! Connects to `hub.url`, sends a `register` envelope, then re-sends the
//! same envelope every 30s as a keepalive. `spec.md` §9 tightens the
//! source's unbounded retry-forever loop everywhere it guards a hardware
//! resource — this task guards none, so reconnect-forever with a capped
//! backoff between attempts is kept (see `DESIGN.md`).

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::UdpSocket;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_BASE: Duration = Duration::from_secs(2);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    device_id: &'a str,
    device_name: &'a str,
    local_ip: &'a str,
    port: u16,
}

/// Run the registration loop forever. Never propagates an error to the
/// caller — a hub outage degrades to "this device isn't discoverable",
/// not a crashed process.
pub async fn run(hub_url: String, device_name: String, local_port: u16) {
    let device_id = Uuid::new_v4().to_string();
    let local_ip = local_ip().unwrap_or_else(|| "0.0.0.0".to_owned());

    let mut backoff = RECONNECT_BASE;
    loop {
        match register_once(&hub_url, &device_id, &device_name, &local_ip, local_port).await {
            Ok(()) => {
                info!("hub connection closed, reconnecting");
                backoff = RECONNECT_BASE;
            }
            Err(e) => {
                warn!(error = %e, delay = ?backoff, "hub registration failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_CAP);
            }
        }
    }
}

async fn register_once(
    hub_url: &str,
    device_id: &str,
    device_name: &str,
    local_ip: &str,
    local_port: u16,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (mut stream, _response) = tokio_tungstenite::connect_async(hub_url).await?;
    info!(hub_url, device_id, "connected to hub");

    let envelope = RegisterEnvelope {
        kind: "register",
        device_id,
        device_name,
        local_ip,
        port: local_port,
    };
    let body = serde_json::to_string(&envelope).expect("register envelope always serializes");
    stream.send(Message::text(body.clone())).await?;

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // first tick fires immediately; we already sent once above

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                stream.send(Message::text(body.clone())).await?;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "hub websocket error");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Mirrors `register.py`'s `get_local_ip()`: connect a UDP socket to a
/// public address (no packet is actually sent) and read back the local
/// address the OS picked for that route.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
