//! Frame Classifier
//!
//! Turns the bytes of one socket read into a `ParsedMessage`. The stream
//! carries no self-describing framing, so classification is a cascade of
//! trials where the first match wins:
//!
//! 1. **JSON**: strict UTF-8 text holding a JSON object
//! 2. **Binary**: `[u32 BE length][1 byte type tag][payload]`, at least 5 bytes
//! 3. **Text**: anything else, decoded lossily
//! 4. **Raw**: fallback carrying the failure in `metadata.error`
//!
//! Classification is total: every input produces a message.
//!
//! # Binary Layout
//!
//! ```text
//! 0        4      5                5+L
//! ├────────┼──────┼─────────────────┤
//! │ length │ type │ payload (L)     │
//! └────────┴──────┴─────────────────┘
//! ```
//!
//! A payload shorter or longer than the declared length is not an error;
//! whatever lies inside `[5, min(5+L, len))` is taken.

use chrono::Utc;
use serde_json::Value;

use crate::domain::message::{
    FrameFormat, META_ERROR, META_LENGTH, META_PROTOCOL, Metadata, ParsedMessage, Payload,
};

/// Size of the binary header (length + type tag).
pub const BINARY_HEADER_LEN: usize = 5;

/// Message type used when a JSON object has no `type` field.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Message type for plain text frames.
pub const TEXT_TYPE: &str = "text";

/// Message type for unclassifiable frames.
pub const RAW_TYPE: &str = "raw";

/// Reasons a trial rejected a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Bytes are not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Text is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parsed but is not an object.
    #[error("JSON value is not an object: found {0}")]
    NotAnObject(&'static str),
}

/// Stateless frame classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameClassifier;

impl FrameClassifier {
    /// Create a new classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify one frame.
    #[must_use]
    pub fn classify(&self, data: &[u8]) -> ParsedMessage {
        classify(data)
    }
}

/// Classify one frame.
///
/// Deterministic apart from the timestamp and never fails; see the module
/// docs for the trial order.
#[must_use]
pub fn classify(data: &[u8]) -> ParsedMessage {
    match decode_json(data) {
        Ok(value) => return json_message(data, value),
        Err(CodecError::NotAnObject(kind)) => {
            return raw_message(data, &CodecError::NotAnObject(kind));
        }
        Err(_) => {}
    }

    if data.len() >= BINARY_HEADER_LEN {
        return binary_message(data);
    }

    text_message(data)
}

/// Strict UTF-8 decode followed by a JSON parse.
fn decode_json(data: &[u8]) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(data)?;
    let value: Value = serde_json::from_str(text)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CodecError::NotAnObject(json_kind(&value)))
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn json_message(data: &[u8], value: Value) -> ParsedMessage {
    let message_type = match value.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => UNKNOWN_TYPE.to_string(),
    };

    ParsedMessage {
        message_type,
        payload: Payload::Json(value),
        raw_data: data.to_vec(),
        timestamp: Utc::now(),
        metadata: Metadata::new(),
        format: FrameFormat::Json,
    }
}

fn binary_message(data: &[u8]) -> ParsedMessage {
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let tag = char::from(data[4]);

    let declared = usize::try_from(length).unwrap_or(usize::MAX);
    let end = BINARY_HEADER_LEN.saturating_add(declared).min(data.len());
    let region = &data[BINARY_HEADER_LEN..end];

    let payload = std::str::from_utf8(region)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .map_or_else(|| Payload::Bytes(region.to_vec()), Payload::Json);

    let mut metadata = Metadata::new();
    metadata.insert(META_PROTOCOL.to_string(), Value::from("binary"));
    metadata.insert(META_LENGTH.to_string(), Value::from(length));

    ParsedMessage {
        message_type: tag.to_string(),
        payload,
        raw_data: data.to_vec(),
        timestamp: Utc::now(),
        metadata,
        format: FrameFormat::Binary,
    }
}

fn text_message(data: &[u8]) -> ParsedMessage {
    ParsedMessage {
        message_type: TEXT_TYPE.to_string(),
        payload: Payload::Text(String::from_utf8_lossy(data).into_owned()),
        raw_data: data.to_vec(),
        timestamp: Utc::now(),
        metadata: Metadata::new(),
        format: FrameFormat::Text,
    }
}

fn raw_message(data: &[u8], error: &CodecError) -> ParsedMessage {
    let mut metadata = Metadata::new();
    metadata.insert(META_ERROR.to_string(), Value::from(error.to_string()));

    ParsedMessage {
        message_type: RAW_TYPE.to_string(),
        payload: Payload::Bytes(data.to_vec()),
        raw_data: data.to_vec(),
        timestamp: Utc::now(),
        metadata,
        format: FrameFormat::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn binary_frame(length: u32, tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = length.to_be_bytes().to_vec();
        frame.push(tag);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn json_object_uses_type_field() {
        let data = br#"{"type":"x","v":1}"#;
        let msg = classify(data);

        assert_eq!(msg.format, FrameFormat::Json);
        assert_eq!(msg.message_type, "x");
        assert_eq!(msg.payload, Payload::Json(json!({"type": "x", "v": 1})));
        assert_eq!(msg.raw_data, data.to_vec());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn json_object_without_type_is_unknown() {
        let msg = classify(br#"{"id":7}"#);
        assert_eq!(msg.message_type, UNKNOWN_TYPE);
        assert_eq!(msg.format, FrameFormat::Json);
    }

    #[test]
    fn json_non_string_type_is_rendered() {
        let msg = classify(br#"{"type":42}"#);
        assert_eq!(msg.message_type, "42");
    }

    #[test]
    fn json_with_surrounding_whitespace_is_json() {
        let msg = classify(b"  {\"type\":\"tick\"}\n");
        assert_eq!(msg.message_type, "tick");
    }

    #[test_case(b"[1,2,3]", "array" ; "array")]
    #[test_case(b"12345", "number" ; "number")]
    #[test_case(b"\"quoted\"", "string" ; "string")]
    #[test_case(b"null", "null" ; "null")]
    fn json_non_object_falls_back_to_raw(data: &[u8], kind: &str) {
        let msg = classify(data);
        assert_eq!(msg.format, FrameFormat::Raw);
        assert_eq!(msg.message_type, RAW_TYPE);
        assert_eq!(msg.payload, Payload::Bytes(data.to_vec()));
        assert!(msg.error().unwrap().contains(kind));
    }

    #[test]
    fn binary_frame_with_text_payload_keeps_bytes() {
        let data = binary_frame(5, b'A', b"hello");
        let msg = classify(&data);

        assert_eq!(msg.format, FrameFormat::Binary);
        assert_eq!(msg.message_type, "A");
        assert_eq!(msg.protocol(), Some("binary"));
        assert_eq!(msg.metadata[META_LENGTH], json!(5));
        assert_eq!(msg.payload, Payload::Bytes(b"hello".to_vec()));
        assert_eq!(msg.raw_data, data);
    }

    #[test]
    fn binary_frame_with_json_payload_is_decoded() {
        let body = br#"{"px":101.5}"#;
        let data = binary_frame(u32::try_from(body.len()).unwrap(), b'Q', body);
        let msg = classify(&data);

        assert_eq!(msg.message_type, "Q");
        assert_eq!(msg.payload, Payload::Json(json!({"px": 101.5})));
    }

    #[test]
    fn binary_frame_shorter_than_declared_takes_available() {
        let data = binary_frame(100, b'B', b"abc");
        let msg = classify(&data);

        assert_eq!(msg.metadata[META_LENGTH], json!(100));
        assert_eq!(msg.payload, Payload::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn binary_frame_longer_than_declared_is_truncated() {
        let data = binary_frame(2, b'C', b"abcdef");
        let msg = classify(&data);
        assert_eq!(msg.payload, Payload::Bytes(b"ab".to_vec()));
    }

    #[test]
    fn binary_tag_is_latin1_char() {
        let data = binary_frame(0, 0xE9, b"");
        let msg = classify(&data);
        assert_eq!(msg.message_type, "é");
        assert_eq!(msg.payload, Payload::Bytes(Vec::new()));
    }

    #[test]
    fn max_declared_length_does_not_overflow() {
        let data = binary_frame(u32::MAX, b'Z', b"xy");
        let msg = classify(&data);
        assert_eq!(msg.payload, Payload::Bytes(b"xy".to_vec()));
    }

    #[test]
    fn plain_text_needs_binary_header_length() {
        // Five or more non-JSON bytes are read as a binary header.
        let msg = classify(b"Plain text message\n");
        assert_eq!(msg.format, FrameFormat::Binary);
    }

    #[test_case(b"abc" ; "ascii")]
    #[test_case(b"" ; "empty")]
    #[test_case(b"\xff\xfe" ; "invalid utf8")]
    fn short_non_json_is_text(data: &[u8]) {
        let msg = classify(data);
        assert_eq!(msg.format, FrameFormat::Text);
        assert_eq!(msg.message_type, TEXT_TYPE);
        assert_eq!(msg.raw_data, data.to_vec());
    }

    #[test]
    fn invalid_utf8_text_is_replaced() {
        let msg = classify(b"a\xffb");
        assert_eq!(msg.payload, Payload::Text("a\u{FFFD}b".to_string()));
    }

    #[test]
    fn classifier_struct_delegates() {
        let msg = FrameClassifier::new().classify(b"hey");
        assert_eq!(msg.payload.as_text(), Some("hey"));
    }

    proptest! {
        #[test]
        fn any_input_is_classified(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let msg = classify(&data);
            prop_assert_eq!(&msg.raw_data, &data);
            prop_assert!(!msg.message_type.is_empty());
        }

        #[test]
        fn json_objects_stay_json(kind in "[a-z]{1,12}", value in any::<i64>()) {
            let data = serde_json::to_vec(&json!({"type": kind, "value": value})).unwrap();
            let msg = classify(&data);
            prop_assert_eq!(msg.format, FrameFormat::Json);
            prop_assert_eq!(msg.message_type, kind);
        }
    }
}
