// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Frame envelope of the websocket protocol.
//!
//! Every frame is a UTF-8 JSON object `{ "type": "...", "requestId"?: "...",
//! "payload"?: { ... } }`. The payload stays an opaque [`serde_json::Value`]
//! at this layer; per-type decoding happens in the gateway once the frame
//! type is known.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::messages::MsgType;

/// Hard cap on an inbound frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 512_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame type is empty or missing")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
}

/// A decoded but not yet validated inbound frame.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl InboundFrame {
    /// Decode raw websocket text, enforcing the frame size cap and the
    /// envelope structure. The frame type is resolved against the
    /// exhaustive [`MsgType`] list.
    pub fn decode(raw: &str) -> Result<(MsgType, Self), CodecError> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge);
        }
        let frame: InboundFrame = serde_json::from_str(raw)?;
        if frame.frame_type.is_empty() {
            return Err(CodecError::MissingType);
        }
        let msg_type = frame
            .frame_type
            .parse::<MsgType>()
            .map_err(|_| CodecError::UnknownType(frame.frame_type.clone()))?;
        Ok((msg_type, frame))
    }

    /// Decode the payload into its typed form. A missing payload decodes
    /// like an empty object so payload-less frames (`ping`) stay valid.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(value) => serde_json::from_value(value.clone()),
            None => serde_json::from_value(Value::Object(Default::default())),
        }
    }
}

/// An outbound frame ready for serialization.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: MsgType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundFrame {
    pub fn new(frame_type: MsgType, payload: &impl Serialize) -> Self {
        Self {
            frame_type,
            request_id: None,
            payload: Some(
                serde_json::to_value(payload).expect("payload serialization is infallible"),
            ),
        }
    }

    pub fn without_payload(frame_type: MsgType) -> Self {
        Self {
            frame_type,
            request_id: None,
            payload: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("outbound frame serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_envelope() {
        let (msg_type, frame) =
            InboundFrame::decode(r#"{"type":"ping","requestId":"r1"}"#).unwrap();
        assert_eq!(msg_type, MsgType::Ping);
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        assert!(frame.payload.is_none());
    }

    #[test]
    fn rejects_unknown_type() {
        let err = InboundFrame::decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(t) if t == "teleport"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn frame_size_boundary() {
        // A syntactically valid frame padded to exactly the cap parses;
        // one byte over is rejected before parsing.
        let prefix = r#"{"type":"ping","payload":{"pad":""#;
        let suffix = r#""}}"#;
        let pad = MAX_FRAME_BYTES - prefix.len() - suffix.len();
        let frame = format!("{}{}{}", prefix, "x".repeat(pad), suffix);
        assert_eq!(frame.len(), MAX_FRAME_BYTES);
        assert!(InboundFrame::decode(&frame).is_ok());

        let frame = format!("{}{}{}", prefix, "x".repeat(pad + 1), suffix);
        assert!(matches!(
            InboundFrame::decode(&frame),
            Err(CodecError::FrameTooLarge)
        ));
    }

    #[test]
    fn outbound_encodes_type_and_request_id() {
        let frame = OutboundFrame::without_payload(MsgType::Pong)
            .with_request_id(Some("r9".into()))
            .encode();
        assert_eq!(frame, r#"{"type":"pong","requestId":"r9"}"#);
    }
}
