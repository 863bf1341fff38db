//! Mining against a node over HTTP.

use ledger_core::{Block, MiningTemplate, RejectReason, SubmitError, WorkSource};
use reqwest::{blocking::Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct RemoteWorkSource {
    node: String,
    client: Client,
}

impl RemoteWorkSource {
    /// Must be built outside the async runtime (the blocking client owns
    /// its own).
    pub fn new(node: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            node: node.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

fn transport(e: reqwest::Error) -> SubmitError {
    SubmitError::Transport(e.to_string())
}

/// Turn a refused submission into a typed rejection when the node says why,
/// and a retryable transport failure otherwise.
pub fn decode_rejection(status: StatusCode, body: Value) -> SubmitError {
    if status.is_client_error() {
        if let Ok(reason) = serde_json::from_value::<RejectReason>(body.clone()) {
            return SubmitError::Rejected(reason);
        }
    }
    SubmitError::Transport(format!("node answered {status}: {body}"))
}

impl WorkSource for RemoteWorkSource {
    fn template(&self) -> Result<MiningTemplate, SubmitError> {
        let res = self
            .client
            .get(format!("{}/mining-template", self.node))
            .send()
            .map_err(transport)?;
        if !res.status().is_success() {
            return Err(SubmitError::Transport(format!(
                "template request answered {}",
                res.status()
            )));
        }
        let template: MiningTemplate = res.json().map_err(transport)?;
        debug!(index = template.index, txs = template.transactions.len(), "template fetched");
        Ok(template)
    }

    fn submit(&self, block: &Block) -> Result<(), SubmitError> {
        let res = self
            .client
            .post(format!("{}/submit-block", self.node))
            .json(&json!({ "block": block }))
            .send()
            .map_err(transport)?;
        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.json::<Value>().unwrap_or(Value::Null);
        Err(decode_rejection(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_reply_is_recognised() {
        let body = json!({
            "reason": "STALE_OR_FORKED_PARENT",
            "expected": "ab".repeat(32),
            "found": "00".repeat(32),
            "error": "stale or forked parent"
        });
        let err = decode_rejection(StatusCode::CONFLICT, body);
        assert!(err.is_stale());
    }

    #[test]
    fn difficulty_reply_is_a_rejection() {
        let body = json!({ "reason": "DIFFICULTY_NOT_MET", "difficulty": 3, "error": "x" });
        assert_eq!(
            decode_rejection(StatusCode::UNPROCESSABLE_ENTITY, body),
            SubmitError::Rejected(RejectReason::DifficultyNotMet { difficulty: 3 })
        );
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = decode_rejection(StatusCode::SERVICE_UNAVAILABLE, Value::Null);
        assert!(matches!(err, SubmitError::Transport(_)));
        let err = decode_rejection(StatusCode::BAD_REQUEST, json!({ "error": "?" }));
        assert!(matches!(err, SubmitError::Transport(_)));
    }
}
