use crate::{
    p2p::{self, PeerInfo},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{
    Address, Amount, Block, Durability, MiningTemplate, RejectReason, Transaction,
    TransactionError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/latest-block", get(latest_block))
        .route("/blockchain", get(blockchain))
        .route("/pending", get(pending))
        .route("/mining-template", get(mining_template))
        .route("/balance/{address}", get(balance))
        .route("/transaction", post(create_transaction))
        .route("/submit-block", post(submit_block))
        .route("/peers", get(list_peers).post(add_peer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusView {
    pub height: u64,
    pub head_hash: String,
    pub difficulty: u32,
    pub pending: usize,
    pub peers: usize,
    pub durability: Durability,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct BalanceView {
    pub address: Address,
    pub confirmed: Amount,
    /// Confirmed plus pending effects; may be negative.
    pub tentative: i128,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubmitBlockRequest {
    pub block: Block,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PeerRequest {
    pub peer: String,
}

/// Error bodies are always `{ "error": <message>, "reason": <CODE>, ... }`.
pub enum ApiError {
    Transaction(TransactionError),
    Rejected(RejectReason),
    BadRequest { reason: &'static str, error: String },
    PeerUnreachable(anyhow::Error),
    Internal(String),
}

fn with_message(mut body: Value, message: String) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("error".into(), Value::String(message));
    }
    body
}

pub fn reject_status(reason: &RejectReason) -> StatusCode {
    match reason {
        RejectReason::MalformedBlock { .. } => StatusCode::BAD_REQUEST,
        RejectReason::StaleOrForkedParent { .. } => StatusCode::CONFLICT,
        RejectReason::DifficultyNotMet { .. } | RejectReason::InvalidTransaction { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Transaction(e) => (
                StatusCode::BAD_REQUEST,
                with_message(serde_json::to_value(&e).unwrap_or_default(), e.to_string()),
            ),
            ApiError::Rejected(reason) => (
                reject_status(&reason),
                with_message(
                    serde_json::to_value(&reason).unwrap_or_default(),
                    reason.to_string(),
                ),
            ),
            ApiError::BadRequest { reason, error } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": error, "reason": reason }),
            ),
            ApiError::PeerUnreachable(e) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": format!("{e:#}"), "reason": "PEER_TRANSPORT_FAILURE" }),
            ),
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": error, "reason": "INTERNAL" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    let peers = state.peers.len();
    let chain = state.chain.lock();
    Json(StatusView {
        height: chain.height(),
        head_hash: hex::encode(chain.latest_block().hash),
        difficulty: chain.difficulty(),
        pending: chain.pending().len(),
        peers,
        durability: chain.durability().clone(),
    })
}

async fn latest_block(State(state): State<AppState>) -> Json<Block> {
    Json(state.chain.lock().latest_block().clone())
}

async fn blockchain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.chain.lock().blocks().to_vec())
}

async fn pending(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.chain.lock().pending().to_vec())
}

async fn mining_template(State(state): State<AppState>) -> Json<MiningTemplate> {
    Json(state.chain.lock().mining_template())
}

async fn balance(State(state): State<AppState>, Path(address): Path<String>) -> Json<BalanceView> {
    let chain = state.chain.lock();
    Json(BalanceView {
        confirmed: chain.balance(&address),
        tentative: chain.tentative_balance(&address),
        address,
    })
}

async fn create_transaction(
    State(state): State<AppState>,
    body: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<Transaction>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest {
        reason: "INVALID_PARAMETERS",
        error: e.body_text(),
    })?;
    state
        .submit_transaction(&req.from, &req.to, req.amount)
        .map(Json)
        .map_err(|e| {
            warn!("transaction refused: {e}");
            ApiError::Transaction(e)
        })
}

async fn submit_block(
    State(state): State<AppState>,
    body: Result<Json<SubmitBlockRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(SubmitBlockRequest { block }) = body.map_err(|e| ApiError::BadRequest {
        reason: "MALFORMED_BLOCK",
        error: e.body_text(),
    })?;
    let (index, hash) = (block.index, hex::encode(block.hash));
    // Appending writes the snapshot; keep that off the async workers.
    tokio::task::spawn_blocking(move || state.submit_block(block))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::Rejected)?;
    Ok(Json(json!({ "accepted": true, "index": index, "hash": hash })))
}

async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerInfo>> {
    Json(state.peers.list())
}

async fn add_peer(
    State(state): State<AppState>,
    Json(req): Json<PeerRequest>,
) -> Result<Json<PeerInfo>, ApiError> {
    p2p::connect(&state, &req.peer)
        .await
        .map(Json)
        .map_err(ApiError::PeerUnreachable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_codes_map_to_statuses() {
        let cases = [
            (
                RejectReason::MalformedBlock { detail: "x".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                RejectReason::StaleOrForkedParent {
                    expected: [0; 32],
                    found: [1; 32],
                },
                StatusCode::CONFLICT,
            ),
            (
                RejectReason::DifficultyNotMet { difficulty: 3 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RejectReason::InvalidTransaction {
                    position: 0,
                    detail: "x".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (reason, expected) in cases {
            assert_eq!(reject_status(&reason), expected, "{}", reason.code());
        }
    }

    #[test]
    fn error_body_keeps_reason_fields() {
        let body = with_message(
            serde_json::to_value(TransactionError::InsufficientBalance {
                address: "A".into(),
                available: 1,
                amount: 2,
            })
            .unwrap(),
            "nope".into(),
        );
        assert_eq!(body["reason"], "INSUFFICIENT_BALANCE");
        assert_eq!(body["error"], "nope");
        assert_eq!(body["available"], 1);
    }
}
