//! HTTP API tests driven through the router without binding a port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::DateTime;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use ticker_watch::infrastructure::http::router;
use ticker_watch::{ApiState, PriceBroadcast, PriceUpdate};
use tower::ServiceExt;

use common::{Harness, ScriptedDriver, harness, sym};

const ORIGIN: &str = "http://localhost:3000";

fn app(h: &Harness) -> Router {
    router(Arc::new(ApiState::new(h.service.clone(), ORIGIN).unwrap()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_ticker(ticker: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/tickers")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "ticker": ticker }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn add_list_remove_round_trip() {
    let h = harness(
        ScriptedDriver::new()
            .script("BTCUSDT", &["1"])
            .script("ETHUSDT", &["2"]),
    );

    let (status, body) = send(app(&h), post_ticker("ethusdt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": ["ETHUSDT"] }));

    let (_, body) = send(app(&h), post_ticker(" BTCUSDT ")).await;
    assert_eq!(body, json!({ "tickers": ["BTCUSDT", "ETHUSDT"] }));

    let list = Request::get("/api/tickers").body(Body::empty()).unwrap();
    let (status, body) = send(app(&h), list).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": ["BTCUSDT", "ETHUSDT"] }));

    let remove = Request::delete("/api/tickers/btcusdt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&h), remove).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": ["ETHUSDT"] }));
}

#[tokio::test]
async fn removing_unknown_ticker_is_a_no_op() {
    let h = harness(ScriptedDriver::new());
    let remove = Request::delete("/api/tickers/ZZZ").body(Body::empty()).unwrap();
    let (status, body) = send(app(&h), remove).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": [] }));
}

#[tokio::test]
async fn empty_symbol_is_rejected() {
    let h = harness(ScriptedDriver::new());

    let (status, body) = send(app(&h), post_ticker("   ")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));
    assert!(h.service.list_tickers().is_empty());
}

#[tokio::test]
async fn symbol_with_inner_space_is_accepted() {
    let h = harness(ScriptedDriver::new().invalid("BRK B"));

    let (status, body) = send(app(&h), post_ticker(" brk b ")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": ["BRK B"] }));

    let remove = Request::delete("/api/tickers/brk%20b")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&h), remove).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tickers": [] }));
}

#[tokio::test]
async fn price_stream_emits_sse_events() {
    let h = harness(ScriptedDriver::new());
    h.hub.publish(PriceUpdate::new(
        sym("BTCUSDT"),
        Decimal::new(6_712_345, 2),
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
    ));

    let request = Request::get("/api/prices/stream?tickers=btcusdt")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(h.hub.subscriber_count(), 1);

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();

    assert!(text.contains("event: price"), "{text}");
    assert!(
        text.contains(r#"data: {"ticker":"BTCUSDT","price":67123.45,"tsMs":1700000000000}"#),
        "{text}"
    );

    drop(body);
    assert_eq!(h.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn streaming_does_not_request_tickers() {
    let h = harness(ScriptedDriver::new());
    let request = Request::get("/api/prices/stream?tickers=SOLUSDT")
        .body(Body::empty())
        .unwrap();

    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.service.list_tickers().is_empty());
    assert_eq!(h.driver.sessions_created(), 0);
}

#[tokio::test]
async fn idle_stream_sends_keep_alive() {
    let h = harness(ScriptedDriver::new());
    let state = ApiState::new(h.service.clone(), ORIGIN)
        .unwrap()
        .with_keep_alive(Duration::from_millis(50));
    let request = Request::get("/api/prices/stream?tickers=DOGEUSDT")
        .body(Body::empty())
        .unwrap();

    let response = router(Arc::new(state)).oneshot(request).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();

    assert!(text.starts_with(':'), "{text}");
    assert!(text.contains("ping"), "{text}");
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let h = harness(ScriptedDriver::new());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/tickers")
        .header(header::ORIGIN, ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
        .body(Body::empty())
        .unwrap();

    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        ORIGIN
    );
}

#[test]
fn invalid_origin_is_rejected() {
    let h = harness(ScriptedDriver::new());
    assert!(ApiState::new(h.service.clone(), "bad\norigin").is_err());
}
