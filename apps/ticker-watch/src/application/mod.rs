//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the watcher lifecycle services and the port
//! interfaces that define how they reach the browser and the subscribers.

/// Port interfaces for external systems (browser automation, price fan-out).
pub mod ports;

/// Application services for watcher supervision and client operations.
pub mod services;
