//! Authentication Orchestrator: the four sub-operations plus `full_auth`,
//! each pinning one or more Transport calls to one or more cloud calls
//! into a single logical transaction, per `spec.md` §4.7.

use cloud_client::{AuthStatus, CloudClient, PollConfig};
use device_pool::Pool;
use device_protocol::{int_to_list, OutboundFrame};
use device_retry::RetryController;
use device_transport::Serializer;
use status_led::{LedState, StatusLed};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Device(#[from] device_retry::DeviceUnavailable),
    #[error(transparent)]
    Cloud(#[from] cloud_client::CloudError),
    #[error(transparent)]
    ProtocolDrift(#[from] device_protocol::CodecError),
    #[error("'{0}' is not a valid CW hex string")]
    InvalidCwHex(String),
    #[error(transparent)]
    Pool(#[from] device_pool::PoolError),
    #[error("authentication denied: {0}")]
    VerdictDeny(String),
}

/// The result of `full_auth()` — every field the `/api/full-auth` and
/// `full_auth` pub/sub handlers surface.
#[derive(Debug, Clone)]
pub struct FullAuthResult {
    pub identity: String,
    pub cw: String,
    pub rw: String,
    pub auth_result: String,
    pub claim_id: Option<String>,
}

pub struct Orchestrator {
    serializer: Arc<Serializer>,
    pool: Arc<Pool>,
    retry: Arc<RetryController>,
    cloud: CloudClient,
    credentials: Credentials,
    poll: PollConfig,
    led: AsyncMutex<StatusLed>,
}

impl Orchestrator {
    pub fn new(
        serializer: Arc<Serializer>,
        pool: Arc<Pool>,
        retry: Arc<RetryController>,
        cloud: CloudClient,
        credentials: Credentials,
        poll: PollConfig,
        led: StatusLed,
    ) -> Self {
        Orchestrator {
            serializer,
            pool,
            retry,
            cloud,
            credentials,
            poll,
            led: AsyncMutex::new(led),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// `get_identity() -> PCCID`: issue Identify, return `hex(PCC)||hex(ID)`.
    pub async fn get_identity(&self) -> Result<String, OrchestratorError> {
        self.led.lock().await.set(LedState::Idle);
        let result = self.get_identity_inner().await;
        self.reflect(&result).await;
        result
    }

    async fn get_identity_inner(&self) -> Result<String, OrchestratorError> {
        let device = self.pool.acquire()?;
        let frame = OutboundFrame::identify();
        let reply = self
            .retry
            .call_with_retry(&self.serializer, &self.pool, &device, || async {
                self.serializer.exchange(&device, &frame).await
            })
            .await?;
        Ok(reply.pccid_hex()?)
    }

    /// `get_cw(pccid) -> (CW, transaction_id)`: log in, request a challenge
    /// word for `identity`.
    pub async fn get_cw(&self, identity: &str) -> Result<(String, String), OrchestratorError> {
        self.led.lock().await.set(LedState::Idle);
        let result = self.get_cw_inner(identity).await;
        self.reflect(&result).await;
        result
    }

    async fn get_cw_inner(&self, identity: &str) -> Result<(String, String), OrchestratorError> {
        let token = self.login().await?;
        let (cw, transaction_id) = self.cloud.request_cw(&token, identity).await?;
        Ok((cw, transaction_id))
    }

    /// `get_rw(cw_hex) -> RW hex`: decode the CW, pose it to the device,
    /// extract the response word.
    pub async fn get_rw(&self, cw_hex: &str) -> Result<String, OrchestratorError> {
        self.led.lock().await.set(LedState::Idle);
        let result = self.get_rw_inner(cw_hex).await;
        self.reflect(&result).await;
        result
    }

    async fn get_rw_inner(&self, cw_hex: &str) -> Result<String, OrchestratorError> {
        let cw_int = u128::from_str_radix(cw_hex, 16)
            .map_err(|_| OrchestratorError::InvalidCwHex(cw_hex.to_owned()))?;
        let challenge = int_to_list(cw_int, 16);
        let frame = OutboundFrame::challenge_response(&challenge)?;
        let device = self.pool.acquire()?;
        let reply = self
            .retry
            .call_with_retry(&self.serializer, &self.pool, &device, || async {
                self.serializer.exchange(&device, &frame).await
            })
            .await?;
        Ok(reply.rw_hex()?)
    }

    /// `authenticate(pccid, cw, rw, transaction_id) -> (verdict, claim_id)`:
    /// submit the response word, then poll for a verdict.
    pub async fn authenticate(
        &self,
        identity: &str,
        cw: &str,
        rw: &str,
        transaction_id: &str,
    ) -> Result<(String, Option<String>), OrchestratorError> {
        self.led.lock().await.set(LedState::Idle);
        let result = self.authenticate_inner(identity, cw, rw, transaction_id).await;
        self.reflect(&result).await;
        result
    }

    async fn authenticate_inner(
        &self,
        identity: &str,
        cw: &str,
        rw: &str,
        transaction_id: &str,
    ) -> Result<(String, Option<String>), OrchestratorError> {
        let token = self.login().await?;
        self.cloud
            .reply_rw(&token, identity, cw, rw, transaction_id)
            .await?;
        let status =
            cloud_client::poll_until_ready(&self.cloud, &token, transaction_id, &self.poll).await?;
        match status {
            AuthStatus::AuthOk => Ok(("AUTH_OK".to_owned(), None)),
            AuthStatus::ClaimId(claim_id) => Ok(("CLAIM_ID".to_owned(), Some(claim_id))),
            AuthStatus::NotReady => Err(OrchestratorError::VerdictDeny(
                "NOT_READY (poll budget exhausted)".to_owned(),
            )),
            AuthStatus::Denied(verdict) => Err(OrchestratorError::VerdictDeny(verdict)),
        }
    }

    /// `full_auth()`: the end-to-end sequence, operating on a freshly read
    /// PCCID.
    pub async fn full_auth(&self) -> Result<FullAuthResult, OrchestratorError> {
        self.led.lock().await.set(LedState::Idle);
        let result = self.full_auth_inner().await;
        self.reflect(&result).await;
        result
    }

    async fn full_auth_inner(&self) -> Result<FullAuthResult, OrchestratorError> {
        let identity = self.get_identity_inner().await?;
        let (cw, transaction_id) = self.get_cw_inner(&identity).await?;
        let rw = self.get_rw_inner(&cw).await?;
        let (auth_result, claim_id) = self
            .authenticate_inner(&identity, &cw, &rw, &transaction_id)
            .await?;
        Ok(FullAuthResult {
            identity,
            cw,
            rw,
            auth_result,
            claim_id,
        })
    }

    async fn login(&self) -> Result<String, OrchestratorError> {
        Ok(self
            .cloud
            .iot_login(&self.credentials.username, &self.credentials.password)
            .await?)
    }

    async fn reflect<T>(&self, result: &Result<T, OrchestratorError>) {
        let mut led = self.led.lock().await;
        led.set(if result.is_ok() {
            LedState::Success
        } else {
            LedState::Failure
        });
    }
}
