//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surfaces.

/// Per-ticker broadcast channels for price fan-out.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Client-facing HTTP API and price event stream.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// W3C WebDriver client backing the browser automation port.
pub mod webdriver;
