//! TCP Stream Adapters
//!
//! The two stages of a client and what connects them.
//!
//! # Architecture
//!
//! ```text
//! socket ──▶ ConnectionLoop ──inbound──▶ ProcessingStage ──▶ ObserverRegistry
//!                  ▲                           │
//!                  └──────── commands          └── FrameClassifier, StatsTracker
//! ```
//!
//! - `connection`: socket owner and reconnect state machine
//! - `boundary`: bounded channels and the worker hosting strategy
//! - `processing`: classification, statistics and fan-out
//! - `codec`: heuristic frame classifier
//! - `reconnect`: delay policy between attempts

pub mod boundary;
pub mod codec;
pub mod connection;
pub mod processing;
pub mod reconnect;

pub use boundary::{
    BoundaryError, Command, ConnectionWorker, InboundEvent, InboundReceiver, InboundSender,
    command_channel, inbound_channel,
};
pub use codec::{FrameClassifier, classify};
pub use connection::{ConnectionError, ConnectionLoop};
pub use processing::ProcessingStage;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
