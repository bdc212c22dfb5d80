//! # HTTP API
//!
//! Builds the axum router for the replica's operator- and peer-facing
//! surface. All handlers share state through axum's `State` extractor;
//! the protocol logic lives in `vera_protocol::network::node` and the
//! handlers only translate between HTTP and [`NodeError`].
//!
//! ## Endpoints
//!
//! | Method | Path                     | Description                          |
//! |--------|--------------------------|--------------------------------------|
//! | GET    | `/health`                | Liveness probe                       |
//! | GET    | `/status`                | Node status summary                  |
//! | GET    | `/chain`                 | Full block sequence                  |
//! | GET    | `/validators`            | Validator table (id → hex pubkey)    |
//! | GET    | `/sum`                   | ADS root at the chain tip            |
//! | GET    | `/query`                 | Proof-carrying read (`key`,`height`) |
//! | GET    | `/addblock`              | Validator-only write (`key`,`value`) |
//! | POST   | `/sign`                  | Validator-only header signature      |
//! | POST   | `/consensus/preprepare`  | Consensus transport                  |
//! | POST   | `/consensus/prepare`     | Consensus transport                  |
//! | POST   | `/consensus/commit`      | Consensus transport                  |
//! | POST   | `/consensus/viewchange`  | Consensus transport                  |
//! | POST   | `/consensus/newview`     | Consensus transport                  |
//! | POST   | `/broadcast`             | Committed-block push                 |
//! | POST   | `/deposit`               | Ledger: add collateral               |
//! | POST   | `/withdraw`              | Ledger: drain an account             |
//! | POST   | `/challenge`             | Ledger: freeze pending audit         |
//! | POST   | `/submit_proof`          | Ledger: settle an audit              |
//!
//! Hashes and values travel as lowercase hex.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vera_ledger::ServiceLedger;
use vera_protocol::ads::store::AdsError;
use vera_protocol::network::consensus::{NewView, PhaseVote, PrePrepare, ViewChange};
use vera_protocol::network::node::{Node, NodeError};
use vera_protocol::network::rpc::QueryResponse;
use vera_protocol::storage::block::{Block, BlockHeader, Operation};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state for all request handlers. Cheap to clone —
/// everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub ledger: Arc<ServiceLedger>,
    pub metrics: SharedMetrics,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/chain", get(chain_handler))
        .route("/validators", get(validators_handler))
        .route("/sum", get(sum_handler))
        .route("/query", get(query_handler))
        .route("/addblock", get(addblock_handler))
        .route("/sign", post(sign_handler))
        .route("/consensus/preprepare", post(preprepare_handler))
        .route("/consensus/prepare", post(prepare_handler))
        .route("/consensus/commit", post(commit_handler))
        .route("/consensus/viewchange", post(viewchange_handler))
        .route("/consensus/newview", post(newview_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/challenge", post(challenge_handler))
        .route("/submit_proof", post(submit_proof_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Map a [`NodeError`] onto an HTTP status. Nothing here is a 5xx — the
/// replica is healthy, the request was bad or refused.
fn error_status(err: &NodeError) -> StatusCode {
    match err {
        NodeError::Ads(AdsError::NotFound { .. }) => StatusCode::NOT_FOUND,
        NodeError::Service(_) | NodeError::NotValidator(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(err: NodeError) -> Response {
    let status = error_status(&err);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

// ---------------------------------------------------------------------------
// Read Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness probe for orchestrators. Intentionally does
/// not inspect subsystem state; that belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    version: String,
    id: String,
    chain_height: i64,
    is_validator: bool,
    peer_count: usize,
    timestamp: String,
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let chain_height = match state.node.chain() {
        Ok(chain) => chain.last().map(|b| b.height()).unwrap_or(0),
        Err(e) => return error_response(e),
    };
    state.metrics.chain_height.set(chain_height);

    Json(StatusResponse {
        version: state.version.clone(),
        id: state.node.id.clone(),
        chain_height,
        is_validator: state.node.is_validator(),
        peer_count: state.node.peers().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

async fn chain_handler(State(state): State<AppState>) -> Response {
    match state.node.chain() {
        Ok(chain) => Json(chain).into_response(),
        Err(e) => error_response(e),
    }
}

async fn validators_handler(State(state): State<AppState>) -> Response {
    Json(state.node.validators().to_hex_map()).into_response()
}

async fn sum_handler(State(state): State<AppState>) -> Response {
    match state.node.root_at_tip() {
        Ok(sum) => Json(serde_json::json!({ "sum": sum })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    key: String,
    height: Option<i64>,
}

async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Response {
    let timer = state.metrics.query_latency_seconds.start_timer();
    let result = state.node.query(&params.key, params.height);
    timer.observe_duration();

    match result {
        Ok((value, proof, root)) => {
            state.metrics.queries_served_total.inc();
            Json(QueryResponse {
                value: hex::encode(value),
                proof,
                root,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Write Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AddBlockParams {
    key: String,
    value: String,
}

/// Response payload for `GET /addblock`: the candidate block and the ADS
/// root it commits.
#[derive(Debug, Serialize)]
struct AddBlockResponse {
    block: Block,
    digest: String,
}

async fn addblock_handler(
    State(state): State<AppState>,
    Query(params): Query<AddBlockParams>,
) -> Response {
    let op = Operation {
        key: params.key,
        value: params.value.into_bytes(),
    };
    match state.node.submit_operation(op).await {
        Ok((block, digest)) => {
            state.metrics.writes_accepted_total.inc();
            Json(AddBlockResponse { block, digest }).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Response payload for `POST /sign`.
#[derive(Debug, Serialize)]
struct SignResponse {
    signature: String,
}

async fn sign_handler(
    State(state): State<AppState>,
    Json(header): Json<BlockHeader>,
) -> Response {
    match state.node.sign_header(&header) {
        Ok(signature) => Json(SignResponse {
            signature: hex::encode(signature),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Consensus Transport Handlers
// ---------------------------------------------------------------------------
//
// These always answer 200: rejection reasons (stale views, bad
// signatures) are the replica's business and are logged, not reported to
// the peer. A Byzantine sender learns nothing from the status code.

async fn preprepare_handler(
    State(state): State<AppState>,
    Json(msg): Json<PrePrepare>,
) -> StatusCode {
    state.metrics.consensus_messages_total.inc();
    state.node.handle_pre_prepare(msg).await;
    StatusCode::OK
}

async fn prepare_handler(
    State(state): State<AppState>,
    Json(vote): Json<PhaseVote>,
) -> StatusCode {
    state.metrics.consensus_messages_total.inc();
    state.node.handle_prepare(vote).await;
    StatusCode::OK
}

async fn commit_handler(
    State(state): State<AppState>,
    Json(vote): Json<PhaseVote>,
) -> StatusCode {
    state.metrics.consensus_messages_total.inc();
    state.node.handle_commit(vote).await;
    StatusCode::OK
}

async fn viewchange_handler(
    State(state): State<AppState>,
    Json(msg): Json<ViewChange>,
) -> StatusCode {
    state.metrics.consensus_messages_total.inc();
    state.node.handle_view_change(msg).await;
    StatusCode::OK
}

async fn newview_handler(State(state): State<AppState>, Json(msg): Json<NewView>) -> StatusCode {
    state.metrics.consensus_messages_total.inc();
    state.node.handle_new_view(msg).await;
    StatusCode::OK
}

/// `POST /broadcast` — a peer pushing a committed block. Unlike the
/// consensus endpoints this one reports rejection: the sender is
/// claiming finality, and a 4xx tells an honest lagging peer its block
/// was not accepted.
async fn broadcast_handler(State(state): State<AppState>, Json(block): Json<Block>) -> Response {
    match state.node.handle_broadcast(block) {
        Ok(()) => {
            state.metrics.blocks_applied_total.inc();
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Ledger Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DepositParams {
    node: String,
    amt: u64,
}

async fn deposit_handler(
    State(state): State<AppState>,
    Query(params): Query<DepositParams>,
) -> StatusCode {
    state.ledger.deposit(&params.node, params.amt);
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct WithdrawParams {
    node: String,
}

async fn withdraw_handler(
    State(state): State<AppState>,
    Query(params): Query<WithdrawParams>,
) -> Response {
    match state.ledger.withdraw(&params.node) {
        Ok(receipt) => Json(serde_json::json!({ "amount": receipt.amount })).into_response(),
        Err(e) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ChallengeParams {
    server: String,
}

async fn challenge_handler(
    State(state): State<AppState>,
    Query(params): Query<ChallengeParams>,
) -> StatusCode {
    state.ledger.challenge(&params.server);
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct SubmitProofBody {
    server: String,
    valid: bool,
}

async fn submit_proof_handler(
    State(state): State<AppState>,
    Json(body): Json<SubmitProofBody>,
) -> StatusCode {
    state.ledger.submit_proof(&body.server, body.valid);
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
