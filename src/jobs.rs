//! The unit of work the Job Queue carries, and the flat response shape
//! every front-end (HTTP, pub/sub) serializes back to its caller.
//!
//! `spec.md` §7: "The Worker never propagates exceptions back across the
//! Job Queue as raw panics; it always records a structured
//! `{success:false, error}` result." [`dispatch`] is where that rule lives.

use crate::orchestrator::{Orchestrator, OrchestratorError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub enum JobRequest {
    GetIdentity,
    GetCw {
        identity: String,
    },
    GetRw {
        cw: String,
    },
    Authenticate {
        identity: String,
        cw: String,
        rw: String,
        transaction_id: String,
    },
    FullAuth,
}

/// The JSON shape every HTTP/pub-sub endpoint in `spec.md` §6 returns —
/// a superset of fields with only the ones relevant to the request
/// populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
}

impl JobResponse {
    fn ok() -> Self {
        JobResponse {
            success: true,
            ..Default::default()
        }
    }

    fn failed(err: OrchestratorError) -> Self {
        JobResponse {
            success: false,
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Run one job against the Orchestrator, normalizing any error into a
/// structured `{success:false, error}` response rather than letting a
/// panic or a bare `Result::Err` reach the Worker's caller.
pub async fn dispatch(orchestrator: &Orchestrator, req: JobRequest) -> JobResponse {
    match req {
        JobRequest::GetIdentity => match orchestrator.get_identity().await {
            Ok(identity) => JobResponse {
                identity: Some(identity),
                ..JobResponse::ok()
            },
            Err(e) => JobResponse::failed(e),
        },
        JobRequest::GetCw { identity } => match orchestrator.get_cw(&identity).await {
            Ok((cw, transaction_id)) => JobResponse {
                cw: Some(cw),
                transaction_id: Some(transaction_id),
                ..JobResponse::ok()
            },
            Err(e) => JobResponse::failed(e),
        },
        JobRequest::GetRw { cw } => match orchestrator.get_rw(&cw).await {
            Ok(rw) => JobResponse {
                rw: Some(rw),
                ..JobResponse::ok()
            },
            Err(e) => JobResponse::failed(e),
        },
        JobRequest::Authenticate {
            identity,
            cw,
            rw,
            transaction_id,
        } => match orchestrator
            .authenticate(&identity, &cw, &rw, &transaction_id)
            .await
        {
            Ok((auth_result, claim_id)) => JobResponse {
                auth_result: Some(auth_result),
                claim_id,
                ..JobResponse::ok()
            },
            Err(e) => JobResponse::failed(e),
        },
        JobRequest::FullAuth => match orchestrator.full_auth().await {
            Ok(r) => JobResponse {
                identity: Some(r.identity),
                cw: Some(r.cw),
                rw: Some(r.rw),
                auth_result: Some(r.auth_result),
                claim_id: r.claim_id,
                ..JobResponse::ok()
            },
            Err(e) => JobResponse::failed(e),
        },
    }
}
