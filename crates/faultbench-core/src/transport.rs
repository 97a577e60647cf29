//! Submission channel between an agent and the conductor.

use crate::conductor::Conductor;
use async_trait::async_trait;
use faultbench_proto::{Error, SubmissionTransport, SubmitResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Hands submissions straight to an in-process conductor.
pub struct InProcessTransport {
    conductor: Arc<Conductor>,
}

impl InProcessTransport {
    pub fn new(conductor: Arc<Conductor>) -> Self {
        Self { conductor }
    }
}

#[async_trait]
impl SubmissionTransport for InProcessTransport {
    async fn submit(&self, answer: &str) -> faultbench_proto::Result<SubmitResponse> {
        let response = match self.conductor.submit(answer).await {
            Ok(verdict) => SubmitResponse {
                status: 200,
                message: serde_json::to_string(&verdict)
                    .map_err(|e| Error::Transport(format!("cannot encode verdict: {e}")))?,
            },
            Err(e @ Error::InvariantViolation(_)) => SubmitResponse {
                status: 409,
                message: e.to_string(),
            },
            Err(e) => SubmitResponse {
                status: 500,
                message: format!("{}: {e}", e.class()),
            },
        };
        Ok(response)
    }
}

/// Result of a submission as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub accepted: bool,
    #[serde(default)]
    pub status: Option<u16>,
    pub message: String,
}

/// Submits an answer and never fails: transport errors and rejected
/// submissions become a negative outcome the agent can react to.
pub async fn submit_answer(transport: &dyn SubmissionTransport, answer: &str) -> SubmissionOutcome {
    match transport.submit(answer).await {
        Ok(response) if response.is_success() => {
            info!(status = response.status, "Submission accepted");
            SubmissionOutcome {
                accepted: true,
                status: Some(response.status),
                message: response.message,
            }
        }
        Ok(response) => {
            warn!(status = response.status, message = %response.message, "Submission rejected");
            SubmissionOutcome {
                accepted: false,
                status: Some(response.status),
                message: response.message,
            }
        }
        Err(e) => {
            warn!(error = %e, "Submission transport failed");
            SubmissionOutcome {
                accepted: false,
                status: None,
                message: format!("submission failed ({}): {e}", e.class()),
            }
        }
    }
}
