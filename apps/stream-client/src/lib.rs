#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::type_complexity
    )
)]

//! TCP Stream Client - Resilient Streaming Consumer
//!
//! A client that keeps a TCP connection to a data source alive, classifies
//! whatever arrives on it and fans the results out to observers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Frames, parsed messages, connection state, statistics
//!
//! - **Application**: Port definitions
//!   - `ports`: The `StreamObserver` capability set and its error types
//!
//! - **Infrastructure**: Adapters and operational concerns
//!   - `tcp`: Connection loop, worker boundary, processing stage, codec
//!   - `observer`: Observer registry with per-observer failure isolation
//!   - `client`: `StreamClient` and the named `ClientRegistry`
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//!              ┌────────────────┐  inbound  ┌─────────────────┐
//! TCP peer ───►│ ConnectionLoop │──────────►│ ProcessingStage │──► observers
//!              └────────────────┘           └─────────────────┘
//!                      ▲                      classify + stats
//!                      └── commands (stop / disconnect / send)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::message::{FrameFormat, Metadata, ParsedMessage, Payload, RawFrame};
pub use domain::stats::Stats;

// Ports
pub use application::ports::{ObserverError, StreamError, StreamObserver};

// Client
pub use infrastructure::client::{ClientError, ClientRegistry, RegistryError, StreamClient};
pub use infrastructure::observer::{ObserverRef, ObserverRegistry, TracingObserver};
pub use infrastructure::tcp::codec::{FrameClassifier, classify};

// Infrastructure config
pub use infrastructure::config::{AppConfig, BackoffSettings, ClientConfig, ConfigError, WorkerMode};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
