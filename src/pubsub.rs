//! Pub/sub front-end: `spec.md` §6's MQTT bridge, same Job Queue as HTTP.
//!
//! Subscribes to `pi/<device-id>/command`, decodes
//! `{functionName, args: [payload]}` envelopes, dispatches the matching job,
//! and publishes the JSON reply to `pi/<device-id>/response`. `status` is
//! answered directly — it never touches a device or the cloud, so it
//! doesn't need to go through the queue either.

use crate::jobs::{JobRequest, JobResponse};
use job_queue::Queue;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct PubSubBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    queue: Queue<JobRequest, JobResponse>,
    command_topic: String,
    response_topic: String,
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    #[serde(rename = "functionName")]
    function_name: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

impl PubSubBridge {
    pub fn new(
        broker_host: &str,
        broker_port: u16,
        device_id: &str,
        queue: Queue<JobRequest, JobResponse>,
    ) -> Self {
        let client_id = format!("gateway-mediator-{device_id}");
        let mut options = MqttOptions::new(client_id, broker_host.to_owned(), broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 16);

        PubSubBridge {
            client,
            eventloop,
            queue,
            command_topic: format!("pi/{device_id}/command"),
            response_topic: format!("pi/{device_id}/response"),
        }
    }

    /// Subscribe, then loop forever dispatching incoming commands. Never
    /// returns under normal operation; a broker disconnect is handled by
    /// rumqttc's own internal reconnect, so there is nothing to retry here.
    pub async fn run(mut self) {
        if let Err(e) = self.client.subscribe(&self.command_topic, QoS::AtLeastOnce).await {
            error!(topic = %self.command_topic, error = %e, "failed to subscribe to command topic");
            return;
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let client = self.client.clone();
                    let queue = self.queue.clone();
                    let response_topic = self.response_topic.clone();
                    tokio::spawn(async move {
                        let response = handle_command(&queue, &publish.payload).await;
                        let body = serde_json::to_vec(&response).unwrap_or_default();
                        if let Err(e) = client
                            .publish(response_topic, QoS::AtLeastOnce, false, body)
                            .await
                        {
                            warn!(error = %e, "failed to publish pub/sub response");
                        }
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt event loop error, rumqttc will reconnect");
                }
            }
        }
    }
}

async fn handle_command(queue: &Queue<JobRequest, JobResponse>, payload: &[u8]) -> JobResponse {
    let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            return JobResponse {
                success: false,
                error: Some(format!("malformed command envelope: {e}")),
                ..Default::default()
            }
        }
    };

    debug!(function_name = %envelope.function_name, "dispatching pub/sub command");

    if envelope.function_name == "status" {
        return JobResponse {
            success: true,
            ..Default::default()
        };
    }

    let arg = envelope.args.into_iter().next().unwrap_or(serde_json::Value::Null);
    let request = match envelope.function_name.as_str() {
        "get_identity" => Ok(JobRequest::GetIdentity),
        "get_cw" => field_str(&arg, "identity").map(|identity| JobRequest::GetCw { identity }),
        "get_rw" => field_str(&arg, "cw").map(|cw| JobRequest::GetRw { cw }),
        "authenticate" => {
            let identity = field_str(&arg, "identity");
            let cw = field_str(&arg, "cw");
            let rw = field_str(&arg, "rw");
            let transaction_id = field_str(&arg, "transactionId");
            match (identity, cw, rw, transaction_id) {
                (Ok(identity), Ok(cw), Ok(rw), Ok(transaction_id)) => Ok(JobRequest::Authenticate {
                    identity,
                    cw,
                    rw,
                    transaction_id,
                }),
                _ => Err(format!(
                    "authenticate requires identity, cw, rw and transactionId, got {arg}"
                )),
            }
        }
        other => Err(format!("unknown functionName '{other}'")),
    };

    match request {
        Ok(req) => match queue.enqueue_and_wait(req).await {
            Ok(resp) => resp,
            Err(e) => JobResponse {
                success: false,
                error: Some(e.to_string()),
                ..Default::default()
            },
        },
        Err(msg) => JobResponse {
            success: false,
            error: Some(msg),
            ..Default::default()
        },
    }
}

fn field_str(value: &serde_json::Value, field: &str) -> Result<String, String> {
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("missing or non-string field '{field}' in {value}"))
}
