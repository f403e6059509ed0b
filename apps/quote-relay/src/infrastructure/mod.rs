//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Provider-agnostic upstream feed supervisor and backoff policy.
pub mod feed;

/// Yahoo Finance streamer adapter.
pub mod yahoo;

/// Downstream WebSocket server.
pub mod websocket;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
