//! Infrastructure Layer - Adapters and external integrations.
//!
//! Sockets, channels, workers and everything operational around them.

/// TCP connection loop, worker boundary, processing stage and frame codec.
pub mod tcp;

/// Observer registry and built-in observers.
pub mod observer;

/// Stream client and named client registry.
pub mod client;

/// Configuration loaded from the environment.
pub mod config;

/// Health check, stats and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
