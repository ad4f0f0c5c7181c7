//! JSON API for the marketplace
//!
//! Every response uses the [`ApiResponse`] envelope. The acting user comes
//! from the `X-User-Id` header, set by the authentication proxy in front of
//! this service.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tcg_common::Condition;
use tower_http::cors::{Any, CorsLayer};

use crate::admin::AdminPolicy;
use crate::collection::{self, CatalogRef, CollectionEntry, PurchaseOutcome, SaleReceipt};
use crate::database::{self, lock_db};
use crate::error::{MarketError, MarketResult};
use crate::models::{Trade, TradeDetails, User};
use crate::pricing::{self, Countdown};
use crate::search::{SearchMode, SearchOutcome, SearchPipeline, MIN_QUERY_LEN};
use crate::tcg_api::ProbeReport;
use crate::trade::{self, TradeInbox, TradeOffer};

pub const USER_ID_HEADER: &str = "x-user-id";
const USER_SEARCH_LIMIT: usize = 20;

/// Shared application state (database connection, search pipeline, operator list)
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    pipeline: Arc<SearchPipeline>,
    admins: Arc<AdminPolicy>,
    timezone: Tz,
}

impl AppState {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        pipeline: Arc<SearchPipeline>,
        admins: AdminPolicy,
        timezone: Tz,
    ) -> Self {
        Self {
            db,
            pipeline,
            admins: Arc::new(admins),
            timezone,
        }
    }

    /// Run a synchronous database operation under the connection lock
    fn with_db<T>(&self, f: impl FnOnce(&mut Connection) -> MarketResult<T>) -> MarketResult<T> {
        let mut conn = lock_db(&self.db)?;
        f(&mut conn)
    }

    fn require_admin(&self, actor: Actor) -> MarketResult<User> {
        let user = self.with_db(|conn| database::require_user(conn, actor.0))?;
        self.admins.require_admin(&user)?;
        Ok(user)
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Failure rendered as an error envelope with a matching status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }
}

fn status_for(err: &MarketError) -> StatusCode {
    match err {
        MarketError::Validation(_) => StatusCode::BAD_REQUEST,
        MarketError::Authorization(_) => StatusCode::FORBIDDEN,
        MarketError::NotFound(_) => StatusCode::NOT_FOUND,
        MarketError::Conflict(_) | MarketError::Integrity(_) => StatusCode::CONFLICT,
        MarketError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        MarketError::Database(_) | MarketError::Io(_) | MarketError::LockPoisoned => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        let status = status_for(&err);
        if err.is_internal() {
            log::error!("Request failed: {}", err);
            return Self::new(status, err.kind(), "internal server error");
        }
        log::debug!("Request refused: {}", err);
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            kind: Some(self.kind),
        };
        (self.status, Json(body)).into_response()
    }
}

/// The user a request acts on behalf of
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub i64);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(USER_ID_HEADER).ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing X-User-Id header",
            )
        })?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(Actor)
            .ok_or_else(|| {
                ApiError::new(StatusCode::BAD_REQUEST, "validation", "malformed X-User-Id header")
            })
    }
}

/// Search query parameters
#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    mode: SearchMode,
    #[serde(default)]
    cache_only: bool,
}

#[derive(Deserialize)]
struct TextQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct PurchaseRequest {
    #[serde(flatten)]
    card: CatalogRef,
    #[serde(default = "default_condition")]
    condition: String,
}

fn default_condition() -> String {
    Condition::NearMint.as_str().to_string()
}

#[derive(Deserialize)]
struct ProposeRequest {
    receiver_id: i64,
    #[serde(flatten)]
    offer: TradeOffer,
}

#[derive(Serialize)]
struct Removed {
    removed: i64,
}

#[derive(Serialize)]
struct PriceUpdate {
    updated: usize,
}

#[derive(Serialize)]
struct CacheCleared {
    files_removed: usize,
}

/// GET /api/search?q={query}&mode={normal|cache_only}
async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchOutcome> {
    let mode = if params.cache_only {
        SearchMode::CacheOnly
    } else {
        params.mode
    };
    let outcome = state.pipeline.search(&params.q, mode).await?;
    Ok(ApiResponse::ok(outcome))
}

/// GET /api/autocomplete?q={prefix}
async fn autocomplete_handler(
    State(state): State<AppState>,
    Query(params): Query<TextQuery>,
) -> ApiResult<Vec<String>> {
    Ok(ApiResponse::ok(state.pipeline.autocomplete(&params.q)?))
}

/// GET /api/users/search?q={fragment}
async fn user_search_handler(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<TextQuery>,
) -> ApiResult<Vec<User>> {
    if params.q.trim().chars().count() < MIN_QUERY_LEN {
        return Ok(ApiResponse::ok(Vec::new()));
    }
    let users = state.with_db(|conn| {
        Ok(database::search_users(
            conn,
            &params.q,
            Some(actor.0),
            USER_SEARCH_LIMIT,
        )?)
    })?;
    Ok(ApiResponse::ok(users))
}

/// GET /api/collection
async fn collection_handler(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Vec<CollectionEntry>> {
    let today = pricing::today_in(&state.timezone);
    let entries = state.with_db(|conn| {
        collection::collection_for_user(conn, actor.0, today, &mut rand::thread_rng())
    })?;
    Ok(ApiResponse::ok(entries))
}

/// POST /api/cards/purchase
async fn purchase_handler(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<PurchaseRequest>,
) -> ApiResult<PurchaseOutcome> {
    let condition = Condition::parse(&request.condition).ok_or_else(|| {
        MarketError::Validation(format!("unknown condition: {}", request.condition))
    })?;
    let today = pricing::today_in(&state.timezone);
    let outcome = state.with_db(|conn| {
        collection::purchase(
            conn,
            actor.0,
            &request.card,
            condition,
            today,
            &mut rand::thread_rng(),
        )
    })?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/collection/{id}/sell
async fn sell_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(item_id): Path<i64>,
) -> ApiResult<SaleReceipt> {
    let receipt = state.with_db(|conn| collection::sell(conn, item_id, actor.0))?;
    Ok(ApiResponse::ok(receipt))
}

/// DELETE /api/collection/{id}
async fn remove_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(item_id): Path<i64>,
) -> ApiResult<Removed> {
    state.with_db(|conn| collection::remove(conn, item_id, actor.0))?;
    Ok(ApiResponse::ok(Removed { removed: item_id }))
}

/// GET /api/trades
async fn trades_handler(State(state): State<AppState>, actor: Actor) -> ApiResult<TradeInbox> {
    let inbox = state.with_db(|conn| trade::trades_for_user(conn, actor.0))?;
    Ok(ApiResponse::ok(inbox))
}

/// POST /api/trades
async fn propose_handler(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<ProposeRequest>,
) -> ApiResult<TradeDetails> {
    let details = state
        .with_db(|conn| trade::propose(conn, actor.0, request.receiver_id, &request.offer))?;
    Ok(ApiResponse::ok(details))
}

/// GET /api/trades/{id}
async fn view_trade_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(trade_id): Path<i64>,
) -> ApiResult<TradeDetails> {
    let details = state.with_db(|conn| trade::view_trade(conn, trade_id, actor.0))?;
    Ok(ApiResponse::ok(details))
}

/// POST /api/trades/{id}/accept
async fn accept_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(trade_id): Path<i64>,
) -> ApiResult<TradeDetails> {
    let details = state.with_db(|conn| trade::accept(conn, trade_id, actor.0))?;
    Ok(ApiResponse::ok(details))
}

/// POST /api/trades/{id}/reject
async fn reject_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(trade_id): Path<i64>,
) -> ApiResult<Trade> {
    let closed = state.with_db(|conn| trade::reject(conn, trade_id, actor.0))?;
    Ok(ApiResponse::ok(closed))
}

/// POST /api/trades/{id}/counter
async fn counter_handler(
    State(state): State<AppState>,
    actor: Actor,
    Path(trade_id): Path<i64>,
    Json(offer): Json<TradeOffer>,
) -> ApiResult<TradeDetails> {
    let details = state.with_db(|conn| trade::counter(conn, trade_id, actor.0, &offer))?;
    Ok(ApiResponse::ok(details))
}

/// POST /api/admin/update-prices
async fn update_prices_handler(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<PriceUpdate> {
    let admin = state.require_admin(actor)?;
    let today = pricing::today_in(&state.timezone);
    let updated = state
        .with_db(|conn| pricing::refresh_all_stale(conn, today, &mut rand::thread_rng()))?;
    log::info!("{} refreshed {} card prices", admin.username, updated);
    Ok(ApiResponse::ok(PriceUpdate { updated }))
}

/// POST /api/admin/clear-cache
async fn clear_cache_handler(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<CacheCleared> {
    let admin = state.require_admin(actor)?;
    let files_removed = state.pipeline.clear_cache()?;
    log::info!("{} cleared {} cached searches", admin.username, files_removed);
    Ok(ApiResponse::ok(CacheCleared { files_removed }))
}

/// GET /api/admin/test-api
async fn test_api_handler(State(state): State<AppState>, actor: Actor) -> ApiResult<ProbeReport> {
    state.require_admin(actor)?;
    Ok(ApiResponse::ok(state.pipeline.probe_api().await))
}

/// GET /api/price-countdown
async fn countdown_handler(State(state): State<AppState>) -> Json<ApiResponse<Countdown>> {
    let now = Utc::now().with_timezone(&state.timezone);
    ApiResponse::ok(pricing::time_until_next_update(&now))
}

/// Build the web server router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", get(search_handler))
        .route("/api/autocomplete", get(autocomplete_handler))
        .route("/api/users/search", get(user_search_handler))
        .route("/api/collection", get(collection_handler))
        .route("/api/collection/{id}", delete(remove_handler))
        .route("/api/collection/{id}/sell", post(sell_handler))
        .route("/api/cards/purchase", post(purchase_handler))
        .route("/api/trades", get(trades_handler).post(propose_handler))
        .route("/api/trades/{id}", get(view_trade_handler))
        .route("/api/trades/{id}/accept", post(accept_handler))
        .route("/api/trades/{id}/reject", post(reject_handler))
        .route("/api/trades/{id}/counter", post(counter_handler))
        .route("/api/admin/update-prices", post(update_prices_handler))
        .route("/api/admin/clear-cache", post(clear_cache_handler))
        .route("/api/admin/test-api", get(test_api_handler))
        .route("/api/price-countdown", get(countdown_handler))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Marketplace API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
#[path = "web_tests.rs"]
mod tests;
