//! Client API server implementation.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use futures::Stream;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::services::TickerService;
use crate::domain::ticker::{PriceUpdate, SymbolError, TickerSymbol};

/// Interval between SSE keep-alive comments.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

// =============================================================================
// Wire Types
// =============================================================================

/// Body of `POST /api/tickers`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddTickerRequest {
    /// Raw ticker symbol.
    pub ticker: String,
}

/// Current set of requested tickers.
#[derive(Debug, Clone, Serialize)]
pub struct TickersResponse {
    /// Sorted, normalized symbols.
    pub tickers: Vec<TickerSymbol>,
}

/// Query of `GET /api/prices/stream`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated symbols; absent or empty streams every ticker.
    #[serde(default)]
    pub tickers: Option<String>,
}

impl StreamQuery {
    fn symbols(&self) -> Vec<&str> {
        self.tickers
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Payload of one SSE `price` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEvent {
    /// Ticker symbol.
    pub ticker: String,
    /// Price as a JSON number.
    pub price: f64,
    /// Observation time in Unix milliseconds.
    pub ts_ms: i64,
}

impl From<&PriceUpdate> for PriceEvent {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            ticker: update.ticker.to_string(),
            price: update.price.to_f64().unwrap_or(f64::NAN),
            ts_ms: update.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Errors
// =============================================================================

/// Request errors returned to clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The ticker symbol is blank.
    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),

    /// The CORS origin is not a valid header value.
    #[error("invalid allowed origin {0:?}")]
    InvalidOrigin(String),
}

// =============================================================================
// API State
// =============================================================================

/// Shared state for the API handlers.
#[derive(Debug)]
pub struct ApiState {
    service: TickerService,
    allowed_origin: HeaderValue,
    keep_alive: Duration,
}

impl ApiState {
    /// Create API state.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError::InvalidOrigin` if `allowed_origin` is not a
    /// valid header value.
    pub fn new(service: TickerService, allowed_origin: &str) -> Result<Self, ApiServerError> {
        let allowed_origin = allowed_origin
            .parse::<HeaderValue>()
            .map_err(|_| ApiServerError::InvalidOrigin(allowed_origin.to_string()))?;
        Ok(Self {
            service,
            allowed_origin,
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    /// Override the SSE keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

// =============================================================================
// API Server
// =============================================================================

/// Client API HTTP server.
pub struct ApiServer {
    port: u16,
    state: Arc<ApiState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ApiState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the API server until cancelled.
    ///
    /// Open price streams are dropped when the server stops.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// Build the API router with tracing and CORS layers.
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.allowed_origin.clone())
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/api/tickers", get(list_tickers_handler).post(add_ticker_handler))
        .route("/api/tickers/{ticker}", delete(remove_ticker_handler))
        .route("/api/prices/stream", get(stream_prices_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn add_ticker_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AddTickerRequest>,
) -> Result<Json<TickersResponse>, ApiError> {
    let tickers = state.service.add_ticker(&request.ticker)?;
    Ok(Json(TickersResponse { tickers }))
}

async fn remove_ticker_handler(
    State(state): State<Arc<ApiState>>,
    Path(ticker): Path<String>,
) -> Result<Json<TickersResponse>, ApiError> {
    let tickers = state.service.remove_ticker(&ticker)?;
    Ok(Json(TickersResponse { tickers }))
}

async fn list_tickers_handler(State(state): State<Arc<ApiState>>) -> Json<TickersResponse> {
    Json(TickersResponse {
        tickers: state.service.list_tickers(),
    })
}

async fn stream_prices_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let symbols = query.symbols();
    let prices = state.service.stream_prices(&symbols)?;

    let guard = StreamGuard {
        subscription_id: Uuid::new_v4(),
    };
    tracing::info!(subscription_id = %guard.subscription_id, tickers = ?symbols, "Price stream opened");

    let events = prices.filter_map(move |update| {
        let payload = PriceEvent::from(&update);
        match Event::default().event("price").json_data(&payload) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(
                    subscription_id = %guard.subscription_id,
                    ticker = %update.ticker,
                    error = %e,
                    "Failed to encode price event"
                );
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping")))
}

/// Logs when a client's stream is dropped (disconnect or server stop).
struct StreamGuard {
    subscription_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        tracing::info!(subscription_id = %self.subscription_id, "Price stream closed");
    }
}

// =============================================================================
// Tests
// =============================================================================
