//! # REST API
//!
//! Builds the axum router that exposes the gateway's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method      | Path                                              | Description                  |
//! |-------------|---------------------------------------------------|------------------------------|
//! | GET         | `/isalive`                                        | Liveness probe               |
//! | GET         | `/capabilities`                                   | Supported features           |
//! | GET         | `/assets`                                         | Registered assets, paged     |
//! | GET         | `/assets/:assetId`                                | One asset                    |
//! | GET         | `/addresses/:address/validity`                    | Address check                |
//! | POST/DELETE | `/balances/:address/observation`                  | Balance observation          |
//! | GET         | `/balances`                                       | Balances of observed addresses |
//! | POST        | `/transactions/single`                            | Build a payment              |
//! | POST        | `/transactions/broadcast`                         | Broadcast a signed payment   |
//! | GET         | `/transactions/broadcast/single/:operationId`     | Operation status             |
//! | DELETE      | `/transactions/broadcast/:operationId`            | Soft delete                  |
//! | POST/DELETE | `/transactions/history/{from,to}/:address/observation` | History observation     |
//! | GET         | `/transactions/history/{from,to}/:address`        | History page                 |
//!
//! Every request body goes through an explicit `validate()` before the core
//! sees it. Errors come back as `{errorMessage, errorCode?}`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use xrp_gateway::address;
use xrp_gateway::asset::Asset;
use xrp_gateway::config::{GatewaySettings, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use xrp_gateway::ledger::LedgerClient;
use xrp_gateway::storage::{GatewayDB, HistoryCategory, HistoryEntry, ObservationKind, OperationState};
use xrp_gateway::transaction::{
    delete_operation, get_status, BroadcastCoordinator, BuildRequest, PaymentBuilder,
};
use xrp_gateway::{ErrorCode, GatewayError};

use crate::metrics::{self, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything sits behind `Arc` or is already reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// The service's reported version string.
    pub version: String,
    pub settings: Arc<GatewaySettings>,
    pub db: GatewayDB,
    pub builder: Arc<PaymentBuilder>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub metrics: SharedMetrics,
}

impl AppState {
    pub fn new(
        db: GatewayDB,
        ledger: Arc<dyn LedgerClient>,
        settings: Arc<GatewaySettings>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            builder: Arc::new(PaymentBuilder::new(
                db.clone(),
                Arc::clone(&ledger),
                Arc::clone(&settings),
            )),
            coordinator: Arc::new(BroadcastCoordinator::new(
                db.clone(),
                ledger,
                Arc::clone(&settings),
            )),
            settings,
            db,
            metrics,
        }
    }

    fn record_error(&self, err: &GatewayError) {
        if matches!(err, GatewayError::Ledger(_)) {
            self.metrics.ledger_errors_total.inc();
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/isalive", get(is_alive_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/assets", get(assets_handler))
        .route("/assets/:asset_id", get(asset_handler))
        .route("/addresses/:address/validity", get(address_validity_handler))
        .route(
            "/balances/:address/observation",
            post(observe_balances_handler).delete(unobserve_balances_handler),
        )
        .route("/balances", get(balances_handler))
        .route("/transactions/single", post(build_handler))
        .route("/transactions/broadcast", post(broadcast_handler))
        .route(
            "/transactions/broadcast/single/:operation_id",
            get(operation_status_handler),
        )
        .route(
            "/transactions/broadcast/:operation_id",
            axum::routing::delete(delete_operation_handler),
        )
        .route(
            "/transactions/history/:category/:address/observation",
            post(observe_history_handler).delete(unobserve_history_handler),
        )
        .route("/transactions/history/:category/:address", get(history_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            metrics::track_latency,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Handler error: a rejected request or a core error.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Gateway(GatewayError),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl From<xrp_gateway::storage::DbError> for ApiError {
    fn from(err: xrp_gateway::storage::DbError) -> Self {
        ApiError::Gateway(GatewayError::Storage(err))
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Conflict { .. } => StatusCode::CONFLICT,
        GatewayError::Ledger(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::UnknownAsset(_)
        | GatewayError::InvalidAmount(_)
        | GatewayError::InvalidAddress(_)
        | GatewayError::InvalidTransactionContext(_)
        | GatewayError::AmountTooSmall { .. }
        | GatewayError::NotEnoughBalance { .. }
        | GatewayError::DuplicateHash { .. }
        | GatewayError::BuildingShouldBeRepeated(_)
        | GatewayError::Unknown(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error_message: message,
                    error_code: None,
                },
            ),
            ApiError::Gateway(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (
                    status,
                    ErrorResponse {
                        error_message: err.to_string(),
                        error_code: err.error_code(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T = Response> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /isalive`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IsAliveResponse {
    pub name: String,
    pub version: String,
    pub env: String,
}

/// Response payload for `GET /capabilities`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub is_transactions_rebuilding_supported: bool,
    pub are_many_inputs_supported: bool,
    pub are_many_outputs_supported: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub asset_id: String,
    pub address: String,
    pub name: String,
    pub accuracy: u32,
}

impl From<Asset> for AssetResponse {
    fn from(asset: Asset) -> Self {
        Self {
            asset_id: asset.asset_id,
            address: asset.address,
            name: asset.name,
            accuracy: asset.accuracy,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResponse<T> {
    pub continuation: Option<String>,
    pub items: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressValidityResponse {
    pub is_valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    pub asset_id: String,
    /// Base units.
    pub balance: String,
    pub block: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSingleRequest {
    pub operation_id: String,
    pub from_address: String,
    pub to_address: String,
    pub asset_id: String,
    /// Base units, as a decimal integer string.
    pub amount: String,
    #[serde(default)]
    pub include_fee: bool,
}

impl BuildSingleRequest {
    fn validate(&self, separator: char) -> ApiResult<BuildRequest> {
        if self.operation_id.trim().is_empty() {
            return Err(ApiError::BadRequest("operationId is required".into()));
        }
        if self.asset_id.trim().is_empty() {
            return Err(ApiError::BadRequest("assetId is required".into()));
        }
        for (field, value) in [("fromAddress", &self.from_address), ("toAddress", &self.to_address)] {
            address::validate(value, separator)
                .map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))?;
        }
        let amount = self
            .amount
            .parse::<u64>()
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| ApiError::BadRequest("amount must be a positive integer".into()))?;

        Ok(BuildRequest {
            operation_id: self.operation_id.clone(),
            from_address: self.from_address.clone(),
            to_address: self.to_address.clone(),
            asset_id: self.asset_id.clone(),
            amount_in_base_unit: amount,
            include_fee: self.include_fee,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSingleResponse {
    pub transaction_context: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub operation_id: String,
    /// Base64 JSON `{signedTransaction?, id?}`.
    pub signed_transaction: String,
}

impl BroadcastRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.operation_id.trim().is_empty() {
            return Err(ApiError::BadRequest("operationId is required".into()));
        }
        if self.signed_transaction.trim().is_empty() {
            return Err(ApiError::BadRequest("signedTransaction is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub tx_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItemResponse {
    pub operation_id: String,
    pub timestamp: String,
    pub from_address: String,
    pub to_address: String,
    pub asset_id: String,
    /// Base units.
    pub amount: String,
    pub hash: String,
}

impl From<HistoryEntry> for HistoryItemResponse {
    fn from(entry: HistoryEntry) -> Self {
        Self {
            operation_id: entry.operation_id,
            timestamp: entry.block_time.to_rfc3339(),
            from_address: entry.from_address,
            to_address: entry.to_address,
            asset_id: entry.asset_id,
            amount: entry.amount_in_base_unit.to_string(),
            hash: entry.tx_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub take: Option<usize>,
    pub continuation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub take: Option<usize>,
    pub after_hash: Option<String>,
}

fn page_size(take: Option<usize>) -> ApiResult<usize> {
    match take.unwrap_or(DEFAULT_PAGE_SIZE) {
        0 => Err(ApiError::BadRequest("take must be positive".into())),
        n if n > MAX_PAGE_SIZE => Err(ApiError::BadRequest(format!(
            "take must not exceed {MAX_PAGE_SIZE}"
        ))),
        n => Ok(n),
    }
}

fn history_category(category: &str) -> ApiResult<(HistoryCategory, ObservationKind)> {
    match category.to_ascii_lowercase().as_str() {
        "from" => Ok((HistoryCategory::From, ObservationKind::HistoryFrom)),
        "to" => Ok((HistoryCategory::To, ObservationKind::HistoryTo)),
        other => Err(ApiError::BadRequest(format!("unknown history category `{other}`"))),
    }
}

fn validated_address(state: &AppState, address: &str) -> ApiResult<()> {
    address::validate(address, state.settings.address_separator)
        .map(|_| ())
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers: service
// ---------------------------------------------------------------------------

/// `GET /isalive`: liveness probe.
async fn is_alive_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(IsAliveResponse {
        name: "xrp-gateway".into(),
        version: state.version.clone(),
        env: state.settings.environment.clone(),
    })
}

/// `GET /capabilities`: this gateway builds single-input, single-output
/// payments only.
async fn capabilities_handler() -> impl IntoResponse {
    Json(CapabilitiesResponse {
        is_transactions_rebuilding_supported: false,
        are_many_inputs_supported: false,
        are_many_outputs_supported: false,
    })
}

// ---------------------------------------------------------------------------
// Handlers: assets and addresses
// ---------------------------------------------------------------------------

async fn assets_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let take = page_size(query.take)?;
    let (assets, continuation) = state.db.assets().list(take, query.continuation.as_deref())?;
    Ok(Json(PaginationResponse {
        continuation,
        items: assets.into_iter().map(AssetResponse::from).collect(),
    })
    .into_response())
}

/// `GET /assets/:assetId`: the asset, or 204 when unknown.
async fn asset_handler(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
) -> ApiResult {
    match state.db.assets().get(&asset_id)? {
        Some(asset) => Ok(Json(AssetResponse::from(asset)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn address_validity_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let is_valid = address::validate(&address, state.settings.address_separator).is_ok();
    Json(AddressValidityResponse { is_valid })
}

// ---------------------------------------------------------------------------
// Handlers: observation
// ---------------------------------------------------------------------------

async fn observe(state: &AppState, kind: ObservationKind, address: &str) -> ApiResult {
    validated_address(state, address)?;
    if state.db.observations().add(kind, address)? {
        Ok(StatusCode::OK.into_response())
    } else {
        Ok((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error_message: format!("{address} is already observed"),
                error_code: None,
            }),
        )
            .into_response())
    }
}

async fn unobserve(state: &AppState, kind: ObservationKind, address: &str) -> ApiResult {
    validated_address(state, address)?;
    if state.db.observations().remove(kind, address)? {
        Ok(StatusCode::OK.into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

async fn observe_balances_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult {
    observe(&state, ObservationKind::Balances, &address).await
}

async fn unobserve_balances_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult {
    unobserve(&state, ObservationKind::Balances, &address).await
}

async fn observe_history_handler(
    State(state): State<AppState>,
    Path((category, address)): Path<(String, String)>,
) -> ApiResult {
    let (_, kind) = history_category(&category)?;
    observe(&state, kind, &address).await
}

async fn unobserve_history_handler(
    State(state): State<AppState>,
    Path((category, address)): Path<(String, String)>,
) -> ApiResult {
    let (_, kind) = history_category(&category)?;
    unobserve(&state, kind, &address).await
}

/// `GET /balances`: non-zero balances of observed addresses. Paged by
/// observed address, so a page may hold more items than `take`.
async fn balances_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let take = page_size(query.take)?;
    let (addresses, continuation) = state.db.observations().list(
        ObservationKind::Balances,
        take,
        query.continuation.as_deref(),
    )?;

    let mut items = Vec::new();
    for address in addresses {
        for balance in state.db.balances().get_all(&address)? {
            if balance.amount_in_base_unit != 0 {
                items.push(BalanceResponse {
                    address: balance.address,
                    asset_id: balance.asset_id,
                    balance: balance.amount_in_base_unit.to_string(),
                    block: balance.block,
                });
            }
        }
    }
    Ok(Json(PaginationResponse {
        continuation,
        items,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Handlers: transactions
// ---------------------------------------------------------------------------

/// `POST /transactions/single`: build an unsigned payment.
async fn build_handler(
    State(state): State<AppState>,
    Json(body): Json<BuildSingleRequest>,
) -> ApiResult {
    let request = body.validate(state.settings.address_separator)?;
    let context = state.builder.build(request).await.map_err(|e| {
        state.record_error(&e);
        e
    })?;

    let kind = if context.is_simulated() {
        "simulated"
    } else {
        "payment"
    };
    state
        .metrics
        .operations_built_total
        .with_label_values(&[kind])
        .inc();

    Ok(Json(BuildSingleResponse {
        transaction_context: context.encode()?,
    })
    .into_response())
}

/// `POST /transactions/broadcast`: broadcast a signed payment.
async fn broadcast_handler(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> ApiResult {
    body.validate()?;

    match state
        .coordinator
        .broadcast(&body.operation_id, &body.signed_transaction)
        .await
    {
        Ok(tx_id) => {
            state.metrics.broadcasts_total.inc();
            let completed = state
                .db
                .operations()
                .get(&body.operation_id)?
                .is_some_and(|op| op.state() == OperationState::Completed);
            if completed {
                state.metrics.simulated_transfers_total.inc();
            }
            Ok(Json(BroadcastResponse { tx_id }).into_response())
        }
        Err(e) => {
            state.record_error(&e);
            if let Some(code) = e.error_code() {
                let code = code.to_string();
                state
                    .metrics
                    .broadcasts_failed_total
                    .with_label_values(&[code.as_str()])
                    .inc();
            }
            Err(e.into())
        }
    }
}

/// `GET /transactions/broadcast/single/:operationId`: status, or 204 while
/// the operation is unknown or only built.
async fn operation_status_handler(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult {
    match get_status(state.db.operations(), &operation_id)? {
        Some(status) => Ok(Json(status).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `DELETE /transactions/broadcast/:operationId`: soft delete.
async fn delete_operation_handler(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult {
    match delete_operation(state.db.operations(), &operation_id) {
        Ok(()) => Ok(StatusCode::OK.into_response()),
        Err(GatewayError::NotFound(_)) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

/// `GET /transactions/history/{from,to}/:address?take&afterHash`.
async fn history_handler(
    State(state): State<AppState>,
    Path((category, address)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let (category, _) = history_category(&category)?;
    validated_address(&state, &address)?;
    let take = page_size(query.take)?;

    let entries = state
        .db
        .history()
        .get(category, &address, take, query.after_hash.as_deref())?;
    let items: Vec<HistoryItemResponse> = entries.into_iter().map(Into::into).collect();
    Ok(Json(items).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;
    use xrp_gateway::ledger::ScriptedLedger;
    use xrp_gateway::transaction::SignedContext;

    const GENESIS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const ACCOUNT_ONE: &str = "rrrrrrrrrrrrrrrrrrrrBZbvji";

    struct TestApp {
        router: Router,
        state: AppState,
        ledger: Arc<ScriptedLedger>,
    }

    /// Router over a temporary database and a scripted ledger with a fee of
    /// 10 drops and a 20-drop reserve.
    fn test_app() -> TestApp {
        let db = GatewayDB::open_temporary().expect("temp db");
        let settings = Arc::new(GatewaySettings {
            environment: "test".into(),
            account_reserve: dec!(0.00002),
            ..GatewaySettings::default()
        });
        for asset in settings.registered_assets() {
            db.assets().upsert(&asset).unwrap();
        }
        let ledger = Arc::new(ScriptedLedger::new(dec!(0.00001), 100));
        let metrics = Arc::new(crate::metrics::GatewayMetrics::new());
        let state = AppState::new(db, ledger.clone(), settings, metrics);
        TestApp {
            router: create_router(state.clone()),
            state,
            ledger,
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    async fn delete(router: &Router, path: &str) -> StatusCode {
        let req = Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await.0
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    async fn post_empty(router: &Router, path: &str) -> StatusCode {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await.0
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    fn build_body(operation_id: &str, from: &str, to: &str, amount: &str) -> serde_json::Value {
        serde_json::json!({
            "operationId": operation_id,
            "fromAddress": from,
            "toAddress": to,
            "assetId": "XRP",
            "amount": amount,
            "includeFee": false,
        })
    }

    // -- Service ------------------------------------------------------------

    #[tokio::test]
    async fn is_alive_reports_environment() {
        let app = test_app();
        let (status, body) = get(&app.router, "/isalive").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["name"], "xrp-gateway");
        assert_eq!(body["env"], "test");
    }

    #[tokio::test]
    async fn capabilities_are_all_disabled() {
        let app = test_app();
        let (status, body) = get(&app.router, "/capabilities").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["isTransactionsRebuildingSupported"], false);
        assert_eq!(body["areManyInputsSupported"], false);
    }

    // -- Assets and addresses -----------------------------------------------

    #[tokio::test]
    async fn lists_and_fetches_assets() {
        let app = test_app();
        let (status, body) = get(&app.router, "/assets?take=10").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["items"][0]["assetId"], "XRP");
        assert_eq!(body["items"][0]["accuracy"], 6);
        assert!(body["continuation"].is_null());

        let (status, _) = get(&app.router, "/assets/XRP").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(&app.router, "/assets/DOGE").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn rejects_bad_page_size() {
        let app = test_app();
        let (status, _) = get(&app.router, "/assets?take=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn address_validity() {
        let app = test_app();
        let (_, body) = get(&app.router, &format!("/addresses/{GENESIS}$5/validity")).await;
        assert_eq!(json(&body)["isValid"], true);

        let (_, body) = get(&app.router, "/addresses/rNotAnAddress/validity").await;
        assert_eq!(json(&body)["isValid"], false);
    }

    // -- Observation and balances ---------------------------------------------

    #[tokio::test]
    async fn balance_observation_lifecycle() {
        let app = test_app();
        let path = format!("/balances/{GENESIS}/observation");

        assert_eq!(post_empty(&app.router, &path).await, StatusCode::OK);
        assert_eq!(post_empty(&app.router, &path).await, StatusCode::CONFLICT);
        assert_eq!(delete(&app.router, &path).await, StatusCode::OK);
        assert_eq!(delete(&app.router, &path).await, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn balances_lists_non_zero_observed_balances() {
        let app = test_app();
        app.state
            .db
            .balances()
            .upsert(GENESIS, "XRP", "deposit", dec!(3), 3_000_000, 51)
            .unwrap();
        app.state
            .db
            .balances()
            .upsert(ACCOUNT_ONE, "XRP", "deposit", dec!(0), 0, 51)
            .unwrap();
        post_empty(&app.router, &format!("/balances/{GENESIS}/observation")).await;
        post_empty(&app.router, &format!("/balances/{ACCOUNT_ONE}/observation")).await;

        let (status, body) = get(&app.router, "/balances?take=10").await;
        assert_eq!(status, StatusCode::OK);
        let items = json(&body)["items"].as_array().unwrap().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["address"], GENESIS);
        assert_eq!(items[0]["balance"], "3000000");
    }

    // -- Build and broadcast ------------------------------------------------

    #[tokio::test]
    async fn build_validates_request() {
        let app = test_app();
        let (status, body) = post_json(
            &app.router,
            "/transactions/single",
            build_body("op", "rBogus", ACCOUNT_ONE, "100"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&body)["errorMessage"]
            .as_str()
            .unwrap()
            .starts_with("fromAddress"));

        let (status, _) = post_json(
            &app.router,
            "/transactions/single",
            build_body("op", GENESIS, ACCOUNT_ONE, "0"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn build_reports_not_enough_balance_code() {
        let app = test_app();
        app.ledger.set_balance(GENESIS, "XRP", None, dec!(0.0005));

        let (status, body) = post_json(
            &app.router,
            "/transactions/single",
            build_body("op", GENESIS, ACCOUNT_ONE, "500"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["errorCode"], "notEnoughBalance");
    }

    #[tokio::test]
    async fn build_broadcast_and_poll() {
        let app = test_app();
        app.ledger.set_balance(GENESIS, "XRP", None, dec!(100));

        let (status, body) = post_json(
            &app.router,
            "/transactions/single",
            build_body("op", GENESIS, &format!("{ACCOUNT_ONE}$77"), "1000000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json(&body)["transactionContext"].is_string());

        let (status, _) = get(&app.router, "/transactions/broadcast/single/op").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let signed = SignedContext::signed("BLOB", "HASH").encode().unwrap();
        let broadcast = serde_json::json!({ "operationId": "op", "signedTransaction": signed });
        let (status, body) = post_json(&app.router, "/transactions/broadcast", broadcast.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["txId"], "HASH");

        let (status, body) = get(&app.router, "/transactions/broadcast/single/op").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["state"], "inProgress");
        assert_eq!(body["hash"], "HASH");
        assert_eq!(body["amount"], 1_000_000);

        let (status, _) = post_json(&app.router, "/transactions/broadcast", broadcast).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(app.ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_of_unknown_operation_is_404() {
        let app = test_app();
        let signed = SignedContext::signed("BLOB", "HASH").encode().unwrap();
        let (status, _) = post_json(
            &app.router,
            "/transactions/broadcast",
            serde_json::json!({ "operationId": "ghost", "signedTransaction": signed }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rebuild_required_maps_to_error_code() {
        let app = test_app();
        app.ledger.set_balance(GENESIS, "XRP", None, dec!(100));
        app.ledger.push_submit_result("tefPAST_SEQ");
        post_json(
            &app.router,
            "/transactions/single",
            build_body("op", GENESIS, ACCOUNT_ONE, "1000000"),
        )
        .await;

        let signed = SignedContext::signed("BLOB", "HASH").encode().unwrap();
        let (status, body) = post_json(
            &app.router,
            "/transactions/broadcast",
            serde_json::json!({ "operationId": "op", "signedTransaction": signed }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["errorCode"], "buildingShouldBeRepeated");
    }

    #[tokio::test]
    async fn ledger_outage_is_bad_gateway() {
        let app = test_app();
        app.ledger.set_offline(true);
        let (status, _) = post_json(
            &app.router,
            "/transactions/single",
            build_body("op", GENESIS, ACCOUNT_ONE, "1000000"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.state.metrics.ledger_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn simulated_transfer_shows_up_in_history() {
        let app = test_app();
        let from = format!("{GENESIS}$1");
        let to = format!("{GENESIS}$2");
        app.state
            .db
            .balances()
            .upsert(&from, "XRP", "deposit", dec!(5), 5_000_000, 1)
            .unwrap();

        let (status, _) = post_json(
            &app.router,
            "/transactions/single",
            build_body("move-1", &from, &to, "2000000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let signed = SignedContext::default().encode().unwrap();
        let (status, body) = post_json(
            &app.router,
            "/transactions/broadcast",
            serde_json::json!({ "operationId": "move-1", "signedTransaction": signed }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["txId"], "MOVE1");
        assert_eq!(app.state.metrics.simulated_transfers_total.get(), 1);

        let (status, body) = get(&app.router, &format!("/transactions/history/to/{to}?take=10")).await;
        assert_eq!(status, StatusCode::OK);
        let items = json(&body);
        assert_eq!(items[0]["hash"], "MOVE1");
        assert_eq!(items[0]["amount"], "2000000");
    }

    #[tokio::test]
    async fn delete_is_204_for_unknown_operation() {
        let app = test_app();
        assert_eq!(
            delete(&app.router, "/transactions/broadcast/ghost").await,
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn history_observation_rejects_unknown_category() {
        let app = test_app();
        let status = post_empty(
            &app.router,
            &format!("/transactions/history/sideways/{GENESIS}/observation"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = post_empty(
            &app.router,
            &format!("/transactions/history/from/{GENESIS}/observation"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
