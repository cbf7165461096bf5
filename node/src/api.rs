//! # REST API
//!
//! Builds the axum router that exposes the hosted token contract over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! The development node does not authenticate transactions: every mutating
//! request names its `caller`, and the node executes the call as that
//! account at the current block timestamp. Reencryption requests are the
//! exception, they carry their own signature.
//!
//! ## Endpoints
//!
//! | Method | Path                             | Description                              |
//! |--------|----------------------------------|------------------------------------------|
//! | GET    | `/health`                        | Liveness probe                           |
//! | GET    | `/status`                        | Node and token summary                   |
//! | POST   | `/inputs`                        | Encrypt an input for a user (dev only)   |
//! | POST   | `/mint`                          | Mint to the caller                       |
//! | POST   | `/transfer`                      | Encrypted transfer                       |
//! | POST   | `/approve`                       | Set an encrypted allowance               |
//! | POST   | `/transfer_from`                 | Spend from an allowance                  |
//! | GET    | `/balances/:address`             | Balance handle                           |
//! | GET    | `/balances/:address/revealed`    | Last balance revealed by the oracle      |
//! | GET    | `/allowances/:owner/:spender`    | Allowance handle                         |
//! | POST   | `/streams`                       | Start a stream                           |
//! | GET    | `/streams/:id`                   | Stream record                            |
//! | POST   | `/streams/:id/stop`              | Sender stops a stream                    |
//! | POST   | `/streams/:id/withdraw`          | Receiver withdraws                       |
//! | GET    | `/streams/:id/streamed?caller=`  | Encrypted amount streamed so far         |
//! | POST   | `/disclosures/reencrypt`         | Signed reencryption request              |
//! | POST   | `/disclosures/balance`           | Owner asks for its balance in clear      |
//! | GET    | `/disclosures/:ticket`           | Oracle result for a ticket (once)        |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use veilstream_contracts::{CallContext, ConfidentialStreamToken, ContractError, StreamId};
use veilstream_protocol::fhe::{CleartextCoprocessor, EncryptedInput, Handle, InputBinding};
use veilstream_protocol::gateway::{
    DecryptionResult, DisclosureError, LocalOracle, OracleError, PendingDisclosure,
    ReencryptRequest, TicketId,
};
use veilstream_protocol::Address;

use crate::clock::BlockClock;
use crate::metrics::SharedMetrics;

/// The token as hosted by this node.
pub type NodeToken = ConfidentialStreamToken<CleartextCoprocessor>;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Account that deployed the hosted token.
    pub operator: Address,
    /// Wall-clock start time, RFC 3339.
    pub started_at: String,
    pub clock: Arc<BlockClock>,
    /// Contract calls run one at a time, in arrival order.
    pub token: Arc<Mutex<NodeToken>>,
    /// Dev-only client-side encryption.
    pub coprocessor: Arc<CleartextCoprocessor>,
    pub oracle: Arc<LocalOracle<CleartextCoprocessor>>,
    /// Oracle results waiting for pickup, by ticket.
    pub disclosures: Arc<RwLock<HashMap<TicketId, DecryptionResult>>>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/inputs", post(inputs_handler))
        .route("/mint", post(mint_handler))
        .route("/transfer", post(transfer_handler))
        .route("/approve", post(approve_handler))
        .route("/transfer_from", post(transfer_from_handler))
        .route("/balances/:address", get(balance_handler))
        .route("/balances/:address/revealed", get(revealed_balance_handler))
        .route("/allowances/:owner/:spender", get(allowance_handler))
        .route("/streams", post(start_stream_handler))
        .route("/streams/:id", get(stream_handler))
        .route("/streams/:id/stop", post(stop_stream_handler))
        .route("/streams/:id/withdraw", post(withdraw_handler))
        .route("/streams/:id/streamed", get(streamed_handler))
        .route("/disclosures/reencrypt", post(reencrypt_handler))
        .route("/disclosures/balance", post(balance_decryption_handler))
        .route("/disclosures/:ticket", get(disclosure_result_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Contract(err) => match err {
                ContractError::InvalidCiphertext(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_ciphertext")
                }
                ContractError::InvalidReceiver(_) => (StatusCode::BAD_REQUEST, "invalid_receiver"),
                ContractError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
                ContractError::UnknownStream(_) => (StatusCode::NOT_FOUND, "unknown_stream"),
                ContractError::InactiveStream { .. } => (StatusCode::CONFLICT, "inactive_stream"),
                ContractError::DuplicateStream { .. } => {
                    (StatusCode::CONFLICT, "duplicate_stream")
                }
                ContractError::SupplyOverflow { .. } => (StatusCode::CONFLICT, "supply_overflow"),
                ContractError::Disclosure(DisclosureError::Unauthorized) => {
                    (StatusCode::FORBIDDEN, "unauthorized")
                }
                ContractError::Disclosure(DisclosureError::InvalidSignature) => {
                    (StatusCode::FORBIDDEN, "invalid_signature")
                }
                ContractError::Disclosure(DisclosureError::Oracle(OracleError::QueueFull {
                    ..
                })) => (StatusCode::SERVICE_UNAVAILABLE, "oracle_busy"),
                ContractError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: kind.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("malformed address: {raw}")))
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub operator: Address,
    pub contract: Address,
    pub chain_id: u64,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Plaintext; mint amounts are public.
    pub total_supply: u64,
    pub holders: usize,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub streams: usize,
    pub active_streams: usize,
    pub pending_oracle_jobs: usize,
    pub pending_balance_decryptions: usize,
    pub started_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputRequest {
    pub value: u64,
    /// Account the input is bound to.
    pub user: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MintRequest {
    pub caller: Address,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub caller: Address,
    pub to: Address,
    pub amount: EncryptedInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub caller: Address,
    pub spender: Address,
    pub amount: EncryptedInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferFromRequest {
    pub caller: Address,
    pub from: Address,
    pub to: Address,
    pub amount: EncryptedInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartStreamRequest {
    pub caller: Address,
    pub receiver: Address,
}

/// Body of `stop` and `withdraw`: the caller plus a well-formed encrypted
/// amount bound to it.
#[derive(Debug, Serialize, Deserialize)]
pub struct SettleStreamRequest {
    pub caller: Address,
    pub amount: EncryptedInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallerQuery {
    pub caller: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDecryptionRequest {
    pub caller: Address,
    pub account: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleResponse {
    /// `None` when nothing was ever stored for the key.
    pub handle: Option<Handle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub block_timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamStartedResponse {
    pub stream_id: StreamId,
    pub start_time: u64,
}

// ---------------------------------------------------------------------------
// Contract Execution
// ---------------------------------------------------------------------------

/// Run one contract call as `caller` at the current block.
///
/// Drains the call's events into the metrics, and logs and counts a
/// rejection.
async fn execute<T>(
    state: &AppState,
    caller: Address,
    operation: &'static str,
    call: impl FnOnce(&mut NodeToken, &CallContext) -> Result<T, ContractError>,
) -> Result<T, ApiError> {
    let timer = state.metrics.operation_latency_seconds.start_timer();
    let mut token = state.token.lock().await;
    let ctx = state.clock.context(caller);

    let result = call(&mut *token, &ctx);
    let events = token.drain_events();
    state
        .metrics
        .active_streams
        .set(token.streams().active_count() as i64);
    drop(token);
    timer.observe_duration();

    for event in &events {
        tracing::debug!(?event, "contract event");
    }
    state.metrics.observe_events(&events);
    state
        .metrics
        .pending_oracle_jobs
        .set(state.oracle.pending_count() as i64);

    result.map_err(|err| {
        state.metrics.rejected_operations_total.inc();
        tracing::warn!(operation, %caller, error = %err, "operation rejected");
        ApiError::from(err)
    })
}

/// Fulfil every queued oracle job, hand the results to the contract
/// callback and keep them for pickup. Returns the number of results.
pub async fn pump_oracle(state: &AppState) -> usize {
    let results = state.oracle.fulfill_pending();
    if results.is_empty() {
        return 0;
    }

    let events = {
        let mut token = state.token.lock().await;
        for result in &results {
            token.on_decryption_result(result);
        }
        token.drain_events()
    };
    state.metrics.observe_events(&events);

    let count = results.len();
    {
        let mut inbox = state.disclosures.write();
        for result in results {
            inbox.insert(result.ticket(), result);
        }
    }
    state.metrics.disclosures_fulfilled_total.inc_by(count as u64);
    state
        .metrics
        .pending_oracle_jobs
        .set(state.oracle.pending_count() as i64);
    tracing::debug!(count, "oracle results delivered");
    count
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node and token summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let block = state.clock.now();
    let token = state.token.lock().await;
    let resp = StatusResponse {
        version: state.version.clone(),
        operator: state.operator,
        contract: token.address(),
        chain_id: token.chain_id(),
        name: token.name().to_string(),
        symbol: token.symbol().to_string(),
        decimals: token.decimals(),
        total_supply: token.total_supply(),
        holders: token.ledger().holder_count(),
        block_height: block.height,
        block_timestamp: block.timestamp,
        streams: token.streams().len(),
        active_streams: token.streams().active_count(),
        pending_oracle_jobs: state.oracle.pending_count(),
        pending_balance_decryptions: token.pending_decryption_count(),
        started_at: state.started_at.clone(),
    };
    Json(resp)
}

/// `POST /inputs`: encrypt a value for `user` against the hosted token.
///
/// Stands in for client-side encryption; a real deployment encrypts on
/// the client and never shows the node a plaintext.
async fn inputs_handler(
    State(state): State<AppState>,
    Json(req): Json<InputRequest>,
) -> impl IntoResponse {
    let contract = state.token.lock().await.address();
    let input = state.coprocessor.encrypt_input(
        req.value,
        &InputBinding {
            contract,
            user: req.user,
        },
    );
    (StatusCode::CREATED, Json(input))
}

/// `POST /mint`
async fn mint_handler(
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> Result<Json<HandleResponse>, ApiError> {
    let handle = execute(&state, req.caller, "mint", |token, ctx| {
        token.mint(ctx, req.amount)
    })
    .await?;
    Ok(Json(HandleResponse {
        handle: Some(handle),
    }))
}

/// `POST /transfer`
async fn transfer_handler(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let (accepted, block_timestamp) = execute(&state, req.caller, "transfer", |token, ctx| {
        Ok((token.transfer(ctx, req.to, &req.amount)?, ctx.block_timestamp))
    })
    .await?;
    Ok(Json(AcceptedResponse {
        accepted,
        block_timestamp,
    }))
}

/// `POST /approve`
async fn approve_handler(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let (accepted, block_timestamp) = execute(&state, req.caller, "approve", |token, ctx| {
        Ok((token.approve(ctx, req.spender, &req.amount)?, ctx.block_timestamp))
    })
    .await?;
    Ok(Json(AcceptedResponse {
        accepted,
        block_timestamp,
    }))
}

/// `POST /transfer_from`
async fn transfer_from_handler(
    State(state): State<AppState>,
    Json(req): Json<TransferFromRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let (accepted, block_timestamp) =
        execute(&state, req.caller, "transfer_from", |token, ctx| {
            Ok((
                token.transfer_from(ctx, req.from, req.to, &req.amount)?,
                ctx.block_timestamp,
            ))
        })
        .await?;
    Ok(Json(AcceptedResponse {
        accepted,
        block_timestamp,
    }))
}

/// `GET /balances/:address`: the balance handle. Reading it requires a
/// reencryption request.
async fn balance_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<HandleResponse>, ApiError> {
    let account = parse_address(&address)?;
    let handle = state.token.lock().await.balance_of(&account);
    Ok(Json(HandleResponse { handle }))
}

/// `GET /balances/:address/revealed`
async fn revealed_balance_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let account = parse_address(&address)?;
    let revealed = state.token.lock().await.revealed_balance(&account);
    revealed
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no revealed balance for {account}")))
}

/// `GET /allowances/:owner/:spender`
async fn allowance_handler(
    Path((owner, spender)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<HandleResponse>, ApiError> {
    let owner = parse_address(&owner)?;
    let spender = parse_address(&spender)?;
    let handle = state.token.lock().await.allowance(&owner, &spender);
    Ok(Json(HandleResponse { handle }))
}

/// `POST /streams`: start a stream from the caller.
async fn start_stream_handler(
    State(state): State<AppState>,
    Json(req): Json<StartStreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (stream_id, start_time) =
        execute(&state, req.caller, "start_stream", |token, ctx| {
            Ok((token.start_stream(ctx, req.receiver)?, ctx.block_timestamp))
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(StreamStartedResponse {
            stream_id,
            start_time,
        }),
    ))
}

/// `GET /streams/:id`
async fn stream_handler(
    Path(id): Path<StreamId>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let stream = state.token.lock().await.stream(id).cloned();
    stream
        .map(Json)
        .ok_or(ApiError::Contract(ContractError::UnknownStream(id)))
}

/// `POST /streams/:id/stop`: sender only.
async fn stop_stream_handler(
    Path(id): Path<StreamId>,
    State(state): State<AppState>,
    Json(req): Json<SettleStreamRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let block_timestamp = execute(&state, req.caller, "stop_stream", |token, ctx| {
        token.stop_stream(ctx, id, &req.amount)?;
        Ok(ctx.block_timestamp)
    })
    .await?;
    Ok(Json(AcceptedResponse {
        accepted: true,
        block_timestamp,
    }))
}

/// `POST /streams/:id/withdraw`: receiver only.
async fn withdraw_handler(
    Path(id): Path<StreamId>,
    State(state): State<AppState>,
    Json(req): Json<SettleStreamRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let block_timestamp = execute(&state, req.caller, "withdraw_from_stream", |token, ctx| {
        token.withdraw_from_stream(ctx, id, &req.amount)?;
        Ok(ctx.block_timestamp)
    })
    .await?;
    Ok(Json(AcceptedResponse {
        accepted: true,
        block_timestamp,
    }))
}

/// `GET /streams/:id/streamed?caller=`: sender or receiver only.
///
/// Grants the returned handle to both parties, so it is routed through
/// the same execution path as mutating calls.
async fn streamed_handler(
    Path(id): Path<StreamId>,
    Query(query): Query<CallerQuery>,
    State(state): State<AppState>,
) -> Result<Json<HandleResponse>, ApiError> {
    let handle = execute(&state, query.caller, "view_already_streamed_balance", |token, ctx| {
        token.view_already_streamed_balance(ctx, id)
    })
    .await?;
    Ok(Json(HandleResponse {
        handle: Some(handle),
    }))
}

/// `POST /disclosures/reencrypt`: signed request to reencrypt one handle
/// to the requester. Answered later at `/disclosures/:ticket`.
async fn reencrypt_handler(
    State(state): State<AppState>,
    Json(req): Json<ReencryptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pending: PendingDisclosure = execute(&state, req.requester, "reencrypt", |token, _| {
        token.request_disclosure(&req)
    })
    .await?;
    Ok((StatusCode::ACCEPTED, Json(pending)))
}

/// `POST /disclosures/balance`: the owner asks the contract to decrypt
/// its balance. The value lands at `/balances/:address/revealed`.
async fn balance_decryption_handler(
    State(state): State<AppState>,
    Json(req): Json<BalanceDecryptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pending = execute(&state, req.caller, "request_user_balance_decryption", |token, ctx| {
        token.request_user_balance_decryption(ctx, req.account)
    })
    .await?;
    Ok((StatusCode::ACCEPTED, Json(pending)))
}

/// `GET /disclosures/:ticket`: 404 until the oracle has answered. A result
/// is handed out once and then dropped from the inbox.
async fn disclosure_result_handler(
    Path(ticket): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<DecryptionResult>, ApiError> {
    let ticket = TicketId(ticket);
    let result = state.disclosures.write().remove(&ticket);
    result
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no result for ticket {ticket}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
