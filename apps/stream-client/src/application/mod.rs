//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the stream
//! core talks to its collaborators.

/// Port interfaces for stream observers.
pub mod ports;
