//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus process plumbing.

/// Configuration loaded from the environment.
pub mod config;

/// Dhan market feed and option-chain clients.
pub mod dhan;

/// Tokio-backed signal lookup dispatcher.
pub mod dispatch;

/// Broadcast fan-out of stream events.
pub mod events;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
