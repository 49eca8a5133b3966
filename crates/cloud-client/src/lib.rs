//! HTTP client for the four cloud endpoints the Authentication Orchestrator
//! calls: `iotLogin`, `requestCW`, `replyRW`, `checkAuthStatus`.
//!
//! Grounded in `examples/original_source/sga.py`'s `do_cyberrock_*` /
//! `get_cyberrock_cw` functions, which name two environments (UAT,
//! SANDBOX) each with their own base URL, plus EK and tenant-claim
//! endpoint variants this client does not expose (see `DESIGN.md`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which cloud environment to call. The source selects this with a
/// module-level string constant; we make it a config value instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Uat,
    Sandbox,
}

/// Explicit endpoint URLs. Built from an [`Environment`] for production use,
/// or supplied directly in tests to point at a mock server.
#[derive(Debug, Clone)]
pub struct CloudUrls {
    pub login: String,
    pub request_cw: String,
    pub reply_rw: String,
    pub check_status: String,
}

impl CloudUrls {
    pub fn for_environment(env: Environment) -> Self {
        let base = match env {
            Environment::Uat => "https://iot-api-uat.sandgrain.dev/api",
            Environment::Sandbox => "https://iot-api.sandbox.sandgrain.io/api",
        };
        CloudUrls {
            login: format!("{base}/auth/iotLogin"),
            request_cw: format!("{base}/iot/requestCW"),
            reply_rw: format!("{base}/iot/replyRW"),
            check_status: format!("{base}/iot/checkAuthStatus"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cloud request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cloud endpoint {url} returned {status}: {body}")]
    NonSuccessStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("response from {url} was missing expected field '{field}'")]
    MissingField { url: String, field: &'static str },
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[allow(dead_code)]
    iot_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestCwBody<'a> {
    #[serde(rename = "PCCID")]
    pccid: &'a str,
    request_signed_response: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestCwResponse {
    #[serde(rename = "CW")]
    cw: String,
    transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRwBody<'a> {
    #[serde(rename = "PCCID")]
    pccid: &'a str,
    #[serde(rename = "CW")]
    cw: &'a str,
    #[serde(rename = "RW")]
    rw: &'a str,
    transaction_id: &'a str,
    request_signed_response: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRwResponse {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckStatusResponse {
    status: String,
    claim_id: Option<String>,
}

/// The verdict the Orchestrator maps `checkAuthStatus` responses onto, per
/// `spec.md` §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    NotReady,
    AuthOk,
    ClaimId(String),
    Denied(String),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    urls: CloudUrls,
}

impl CloudClient {
    pub fn new(environment: Environment) -> Self {
        CloudClient {
            http: reqwest::Client::new(),
            urls: CloudUrls::for_environment(environment),
        }
    }

    /// Point the client at explicit URLs — used in tests to target a mock
    /// cloud server instead of the real UAT/SANDBOX hosts.
    pub fn with_urls(urls: CloudUrls) -> Self {
        CloudClient {
            http: reqwest::Client::new(),
            urls,
        }
    }

    pub async fn iot_login(&self, username: &str, password: &str) -> Result<String, CloudError> {
        let url = self.urls.login.as_str();
        let body = LoginRequest { username, password };
        let resp = self
            .http
            .post(url)
            .form(&body)
            .send()
            .await
            .map_err(|source| CloudError::Network {
                url: url.to_owned(),
                source,
            })?;
        let resp = check_status(url, resp).await?;
        let parsed: LoginResponse = resp.json().await.map_err(|source| CloudError::Decode {
            url: url.to_owned(),
            source,
        })?;
        Ok(parsed.access_token)
    }

    pub async fn request_cw(
        &self,
        access_token: &str,
        pccid: &str,
    ) -> Result<(String, String), CloudError> {
        let url = self.urls.request_cw.as_str();
        let body = RequestCwBody {
            pccid,
            request_signed_response: false,
        };
        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|source| CloudError::Network {
                url: url.to_owned(),
                source,
            })?;
        let resp = check_status(url, resp).await?;
        let parsed: RequestCwResponse =
            resp.json().await.map_err(|source| CloudError::Decode {
                url: url.to_owned(),
                source,
            })?;
        Ok((parsed.cw, parsed.transaction_id))
    }

    pub async fn reply_rw(
        &self,
        access_token: &str,
        pccid: &str,
        cw: &str,
        rw: &str,
        transaction_id: &str,
    ) -> Result<String, CloudError> {
        let url = self.urls.reply_rw.as_str();
        let body = ReplyRwBody {
            pccid,
            cw,
            rw,
            transaction_id,
            request_signed_response: false,
        };
        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|source| CloudError::Network {
                url: url.to_owned(),
                source,
            })?;
        let resp = check_status(url, resp).await?;
        let parsed: ReplyRwResponse =
            resp.json().await.map_err(|source| CloudError::Decode {
                url: url.to_owned(),
                source,
            })?;
        Ok(parsed.transaction_id)
    }

    pub async fn check_auth_status(
        &self,
        access_token: &str,
        transaction_id: &str,
    ) -> Result<AuthStatus, CloudError> {
        let url = self.urls.check_status.as_str();
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("transactionId", transaction_id)])
            .send()
            .await
            .map_err(|source| CloudError::Network {
                url: url.to_owned(),
                source,
            })?;
        let resp = check_status(url, resp).await?;
        let parsed: CheckStatusResponse =
            resp.json().await.map_err(|source| CloudError::Decode {
                url: url.to_owned(),
                source,
            })?;
        Ok(match parsed.status.as_str() {
            "NOT_READY" => AuthStatus::NotReady,
            "AUTH_OK" => AuthStatus::AuthOk,
            "CLAIM_ID" => AuthStatus::ClaimId(parsed.claim_id.unwrap_or_default()),
            other => AuthStatus::Denied(other.to_owned()),
        })
    }
}

/// Polling parameters for `checkAuthStatus` — `spec.md` §4.7: 200-300ms
/// intervals, up to ~30-40 attempts. Kept as data rather than constants so
/// tests can use a near-zero interval.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_millis(250),
            max_attempts: 35,
        }
    }
}

/// Poll `checkAuthStatus` until it stops reporting `NOT_READY` or the
/// attempt budget is exhausted. The upstream contract is poll-style, not
/// long-polling — `spec.md` §9 says to keep it that way.
pub async fn poll_until_ready(
    client: &CloudClient,
    access_token: &str,
    transaction_id: &str,
    poll: &PollConfig,
) -> Result<AuthStatus, CloudError> {
    for _ in 0..poll.max_attempts {
        match client.check_auth_status(access_token, transaction_id).await? {
            AuthStatus::NotReady => tokio::time::sleep(poll.interval).await,
            other => return Ok(other),
        }
    }
    Ok(AuthStatus::NotReady)
}

async fn check_status(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, CloudError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(CloudError::NonSuccessStatus {
            url: url.to_owned(),
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn iot_login_returns_access_token() {
        let router = Router::new().route(
            "/login",
            post(|| async { Json(json!({"accessToken": "tok-123", "iotId": "iot-1"})) }),
        );
        let base = spawn(router).await;
        let client = CloudClient::with_urls(CloudUrls {
            login: format!("{base}/login"),
            request_cw: String::new(),
            reply_rw: String::new(),
            check_status: String::new(),
        });
        let token = client.iot_login("user", "pass").await.unwrap();
        assert_eq!(token, "tok-123");
    }

    #[tokio::test]
    async fn non_success_status_surfaces_as_cloud_error() {
        let router = Router::new().route(
            "/login",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad credentials") }),
        );
        let base = spawn(router).await;
        let client = CloudClient::with_urls(CloudUrls {
            login: format!("{base}/login"),
            request_cw: String::new(),
            reply_rw: String::new(),
            check_status: String::new(),
        });
        let err = client.iot_login("user", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            CloudError::NonSuccessStatus { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn poll_until_ready_returns_once_auth_ok_arrives() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_route = Arc::clone(&calls);
        let router = Router::new().route(
            "/status",
            get(move || {
                let calls = Arc::clone(&calls_route);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Json(json!({"status": "NOT_READY"}))
                    } else {
                        Json(json!({"status": "AUTH_OK"}))
                    }
                }
            }),
        );
        let base = spawn(router).await;
        let client = CloudClient::with_urls(CloudUrls {
            login: String::new(),
            request_cw: String::new(),
            reply_rw: String::new(),
            check_status: format!("{base}/status"),
        });
        let poll = PollConfig {
            interval: Duration::from_millis(1),
            max_attempts: 10,
        };
        let status = poll_until_ready(&client, "tok", "txn-1", &poll).await.unwrap();
        assert_eq!(status, AuthStatus::AuthOk);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_until_ready_surfaces_claim_id() {
        let router = Router::new().route(
            "/status",
            get(|| async { Json(json!({"status": "CLAIM_ID", "claimId": "claim-77"})) }),
        );
        let base = spawn(router).await;
        let client = CloudClient::with_urls(CloudUrls {
            login: String::new(),
            request_cw: String::new(),
            reply_rw: String::new(),
            check_status: format!("{base}/status"),
        });
        let poll = PollConfig {
            interval: Duration::from_millis(1),
            max_attempts: 5,
        };
        let status = poll_until_ready(&client, "tok", "txn-2", &poll).await.unwrap();
        assert_eq!(status, AuthStatus::ClaimId("claim-77".to_owned()));
    }
}
