//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the domain aggregators into the ingestion path and
//! defines the ports through which signal lookups and events leave it.

/// Port interfaces for external systems (option chains, dispatch, events).
pub mod ports;

/// Tick pipeline and stream engine.
pub mod services;
