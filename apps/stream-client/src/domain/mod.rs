//! Domain Layer - Core streaming types.
//!
//! Frames, parsed messages, connection state and statistics. Nothing here
//! touches sockets, channels or the runtime.

/// Raw frames and classified messages.
pub mod message;

/// Running client statistics.
pub mod stats;

/// Connection lifecycle state.
pub mod connection;
