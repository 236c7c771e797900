//! Frame and Message Types
//!
//! `RawFrame` is what the connection loop reads off the socket; a
//! `ParsedMessage` is what observers receive after classification.
//!
//! Both types are built from transport-safe primitives only (bytes,
//! numbers, strings) so they can cross a serializing worker boundary.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to a parsed message.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key holding the framing protocol name.
pub const META_PROTOCOL: &str = "protocol";

/// Metadata key holding the declared binary payload length.
pub const META_LENGTH: &str = "length";

/// Metadata key holding a classification failure description.
pub const META_ERROR: &str = "error";

// =============================================================================
// Raw Frame
// =============================================================================

/// Bytes returned by a single socket read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Received bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Peer address the bytes were read from.
    pub source: SocketAddr,
    /// Time the read completed.
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Create a frame stamped with the current time.
    #[must_use]
    pub fn new(payload: Vec<u8>, source: SocketAddr) -> Self {
        Self {
            payload,
            source,
            received_at: Utc::now(),
        }
    }

    /// Number of payload bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the frame carries no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// =============================================================================
// Parsed Message
// =============================================================================

/// Which classification branch produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// UTF-8 JSON document.
    Json,
    /// Length-prefixed binary frame.
    Binary,
    /// Plain (lossy) UTF-8 text.
    Text,
    /// Unclassifiable bytes.
    Raw,
}

impl FrameFormat {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Raw => "raw",
        }
    }
}

/// Decoded message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// A decoded JSON value.
    Json(serde_json::Value),
    /// Decoded text.
    Text(String),
    /// Undecoded bytes.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Payload {
    /// The JSON value, if this payload is JSON.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, if this payload is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The bytes, if this payload was left undecoded.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// A classified frame, shared read-only with every observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    /// Message type tag.
    pub message_type: String,
    /// Decoded payload.
    pub payload: Payload,
    /// The original frame bytes.
    #[serde(with = "serde_bytes")]
    pub raw_data: Vec<u8>,
    /// Classification time.
    pub timestamp: DateTime<Utc>,
    /// Branch-specific metadata.
    pub metadata: Metadata,
    /// Classification branch that matched.
    pub format: FrameFormat,
}

impl ParsedMessage {
    /// Framing protocol recorded in metadata, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.metadata.get(META_PROTOCOL).and_then(|v| v.as_str())
    }

    /// Classification error recorded in metadata, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.metadata.get(META_ERROR).and_then(|v| v.as_str())
    }
}
