//! Client HTTP API
//!
//! JSON endpoints for managing the requested tickers and a Server-Sent
//! Events endpoint for streaming price changes.
//!
//! # Endpoints
//!
//! - `POST /api/tickers` - Add a ticker (`{"ticker": "btcusdt"}`)
//! - `DELETE /api/tickers/{ticker}` - Remove a ticker
//! - `GET /api/tickers` - List requested tickers
//! - `GET /api/prices/stream?tickers=A,B` - SSE stream of `price` events

pub mod server;

pub use server::{ApiError, ApiServer, ApiServerError, ApiState, PriceEvent, router};
