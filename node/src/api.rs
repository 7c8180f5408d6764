//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the vault over HTTP. All endpoints
//! share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/health`              | Liveness probe                       |
//! | GET    | `/status`              | Node and vault summary               |
//! | GET    | `/vault`               | Full vault view                      |
//! | GET    | `/owner`               | Current owner                        |
//! | GET    | `/heir`                | Current heir                         |
//! | GET    | `/events`              | Event log page (`?from=N&limit=M`)   |
//! | GET    | `/accounts/:address`   | External account balance and nonce   |
//! | POST   | `/rpc`                 | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                  | WebSocket for live vault events      |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use heirloom_contracts::{SignedCall, VaultCall};
use heirloom_protocol::config::MAX_EVENTS_PAGE;
use heirloom_protocol::{Address, Amount};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::host::{HostError, VaultHost};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Network endpoint recorded at deployment.
    pub network_url: String,
    /// The vault and everything that executes against it.
    pub host: Arc<VaultHost>,
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
        .route("/vault", get(vault_handler))
        .route("/owner", get(owner_handler))
        .route("/heir", get(heir_handler))
        .route("/events", get(events_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// Vault rejected the call. `data.kind` names the error class.
pub const VAULT_ERROR: i32 = -32000;
/// The node refused the call before it reached the vault.
pub const CALL_REJECTED: i32 = -32001;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Named method parameters.
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoed from the request.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    /// For vault errors, exactly the vault's reason string.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(message: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", message))
    }
}

impl From<HostError> for JsonRpcError {
    fn from(err: HostError) -> Self {
        let code = match &err {
            HostError::Vault(_) => VAULT_ERROR,
            HostError::Clock(_) => INVALID_PARAMS,
            HostError::Db(_)
            | HostError::Corrupt(_)
            | HostError::NotDeployed
            | HostError::AlreadyDeployed => INTERNAL_ERROR,
            _ => CALL_REJECTED,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": err.kind() })),
        }
    }
}

// -- Method parameters -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AmountParams {
    from: Address,
    /// Whole coins, e.g. `"0.5"`.
    amount: String,
}

#[derive(Debug, Deserialize)]
struct SetHeirParams {
    from: Address,
    heir: Address,
}

#[derive(Debug, Deserialize)]
struct ClaimParams {
    from: Address,
    #[serde(alias = "nextHeir")]
    next_heir: Address,
}

#[derive(Debug, Deserialize)]
struct AccountParams {
    address: Address,
}

#[derive(Debug, Deserialize)]
struct IncreaseTimeParams {
    seconds: i64,
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network_url: String,
    pub vault_id: String,
    pub owner: Address,
    pub heir: Address,
    pub balance: String,
    pub claimable: bool,
    pub event_count: usize,
    /// Whether the node runs on the manual dev clock.
    pub dev: bool,
    /// Host time, ISO-8601.
    pub timestamp: String,
}

/// Vault balance in base units and whole coins.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: Amount,
    pub formatted: String,
}

/// Response payload for `GET /accounts/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: Address,
    pub balance: Amount,
    pub balance_formatted: String,
    /// Next nonce a signed call from this address must carry.
    pub nonce: u64,
    /// Whether this node can act as the account without a signature.
    pub unlocked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeResponse {
    pub now: DateTime<Utc>,
}

/// Query string for `GET /events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub from: u64,
    pub limit: Option<usize>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node and vault summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.host.info();
    Json(StatusResponse {
        version: state.version.clone(),
        network_url: state.network_url.clone(),
        vault_id: info.vault_id,
        owner: info.owner,
        heir: info.heir,
        balance: info.balance_formatted,
        claimable: info.claimable,
        event_count: state.host.event_count(),
        dev: state.host.is_dev(),
        timestamp: info.now.to_rfc3339(),
    })
}

async fn vault_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.host.info())
}

async fn owner_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "owner": state.host.owner() }))
}

async fn heir_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "heir": state.host.heir() }))
}

/// `GET /events?from=N&limit=M`: events in sequence order. `limit` is
/// capped at [`MAX_EVENTS_PAGE`].
async fn events_handler(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Response {
    let limit = query.limit.unwrap_or(MAX_EVENTS_PAGE).min(MAX_EVENTS_PAGE);
    match state.host.events(query.from, limit) {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read events");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// `GET /accounts/:address`: external balance and nonce. Unknown
/// addresses read as zero.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match account_response(&state.host, address) {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn account_response(host: &VaultHost, address: Address) -> Result<AccountResponse, HostError> {
    let balance = host.account_balance(&address);
    Ok(AccountResponse {
        address,
        balance,
        balance_formatted: balance.to_decimal_string(),
        nonce: host.nonce(&address)?,
        unlocked: host.is_unlocked(&address),
    })
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Vault errors come back as code -32000 with the vault's reason string as
/// the message. Unknown methods return -32601.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    tracing::debug!(method = %req.method, "rpc request");
    let (result, error) = match dispatch_rpc(&state, &req.method, req.params).await {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };

    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

async fn dispatch_rpc(
    state: &AppState,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, JsonRpcError> {
    let host = &state.host;
    match method {
        "heirloom_version" => to_value(&state.version),
        "vault_owner" => to_value(&host.owner()),
        "vault_heir" => to_value(&host.heir()),
        "vault_balance" => {
            let balance = host.balance();
            to_value(&BalanceResponse {
                balance,
                formatted: balance.to_decimal_string(),
            })
        }
        "vault_info" => to_value(&host.info()),
        "account_balance" => {
            let p: AccountParams = parse_params(params)?;
            to_value(&account_response(host, p.address)?)
        }
        "vault_deposit" => {
            let p: AmountParams = parse_params(params)?;
            let amount = parse_amount(&p.amount)?;
            run_call(host, p.from, VaultCall::Deposit { amount }).await
        }
        "vault_withdraw" => {
            let p: AmountParams = parse_params(params)?;
            let amount = parse_amount(&p.amount)?;
            run_call(host, p.from, VaultCall::Withdraw { amount }).await
        }
        "vault_setHeir" => {
            let p: SetHeirParams = parse_params(params)?;
            run_call(host, p.from, VaultCall::SetHeir { new_heir: p.heir }).await
        }
        "vault_claimOwnership" => {
            let p: ClaimParams = parse_params(params)?;
            run_call(
                host,
                p.from,
                VaultCall::ClaimOwnership {
                    next_heir: p.next_heir,
                },
            )
            .await
        }
        "vault_sendSignedCall" => {
            let signed: SignedCall = parse_params(params)?;
            let host = Arc::clone(host);
            let receipt = spawn_blocking_host(move || host.submit_signed(signed)).await?;
            to_value(&receipt)
        }
        "dev_increaseTime" => {
            let p: IncreaseTimeParams = parse_params(params)?;
            let host = Arc::clone(host);
            let now = spawn_blocking_host(move || host.increase_time(p.seconds)).await?;
            to_value(&TimeResponse { now })
        }
        _ => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )),
    }
}

/// Runs a call as an unlocked account.
async fn run_call(
    host: &Arc<VaultHost>,
    from: Address,
    call: VaultCall,
) -> Result<serde_json::Value, JsonRpcError> {
    let host = Arc::clone(host);
    let receipt = spawn_blocking_host(move || host.call_as(from, call)).await?;
    to_value(&receipt)
}

/// Mutating host methods block on the host lock and a database flush, so
/// they run off the async workers.
async fn spawn_blocking_host<T, F>(f: F) -> Result<T, JsonRpcError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(JsonRpcError::from),
        Err(e) => Err(JsonRpcError::new(
            INTERNAL_ERROR,
            format!("Internal error: {}", e),
        )),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    let value = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
    serde_json::from_value(value).map_err(JsonRpcError::invalid_params)
}

fn parse_amount(s: &str) -> Result<Amount, JsonRpcError> {
    Amount::parse_decimal(s).map_err(JsonRpcError::invalid_params)
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("Internal error: {}", e)))
}

/// `GET /ws`: WebSocket upgrade for live vault events.
///
/// Clients receive each committed [`EventRecord`](crate::host::EventRecord)
/// as JSON. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.host.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(record) => {
                        let payload = match serde_json::to_string(&record) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
