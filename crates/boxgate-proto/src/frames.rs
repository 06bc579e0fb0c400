//! Frame types for the gateway <-> box tunnel

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while encoding or decoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Expected a text message, got a non-text frame")]
    NonTextMessage,
}

/// Main tunnel frame enum
///
/// One JSON object per WebSocket text message, tagged by `type`. IDENTIFY
/// and RESPONSE travel box -> gateway; PROVISION and REQUEST travel
/// gateway -> box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// First frame on every connection: the box claims an identity.
    /// An absent `box_id` asks the gateway to provision one.
    Identify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        box_id: Option<String>,
    },

    /// Informs the box of its canonical id when it differs from the one
    /// it identified with (or when it identified without one).
    Provision { box_id: String },

    /// A proxied HTTP request. `path` carries no query string; `query` is
    /// the raw query string (empty when the caller sent none).
    Request {
        request_id: String,
        method: String,
        path: String,
        query: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    /// The box's answer to a REQUEST, matched solely by `request_id`.
    Response {
        request_id: String,
        payload: ResponsePayload,
    },
}

/// The HTTP response carried inside a RESPONSE frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Frame {
    /// Encode this frame as a JSON text message
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame from a JSON text message
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_identify_with_id() {
        let frame = Frame::decode(r#"{"type":"IDENTIFY","box_id":"X"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Identify {
                box_id: Some("X".to_string())
            }
        );
    }

    #[test]
    fn decode_identify_without_id() {
        let frame = Frame::decode(r#"{"type":"IDENTIFY"}"#).unwrap();
        assert_eq!(frame, Frame::Identify { box_id: None });
    }

    #[test]
    fn encode_provision() {
        let frame = Frame::Provision {
            box_id: "B1".to_string(),
        };
        assert_eq!(
            frame.encode().unwrap(),
            r#"{"type":"PROVISION","box_id":"B1"}"#
        );
    }

    #[test]
    fn request_omits_empty_body() {
        let frame = Frame::Request {
            request_id: "r-1".to_string(),
            method: "GET".to_string(),
            path: "/items".to_string(),
            query: "x=1".to_string(),
            headers: vec![("accept".to_string(), "application/json".to_string())],
            body: None,
        };

        let text = frame.encode().unwrap();
        assert!(!text.contains("body"));
        assert_eq!(Frame::decode(&text).unwrap(), frame);
    }

    #[test]
    fn decode_response_wire_shape() {
        let text = r#"{
            "type": "RESPONSE",
            "request_id": "r-42",
            "payload": {
                "status": 200,
                "headers": [["content-type", "application/json"]],
                "body": "[]"
            }
        }"#;

        let frame = Frame::decode(text).unwrap();
        match frame {
            Frame::Response {
                request_id,
                payload,
            } => {
                assert_eq!(request_id, "r-42");
                assert_eq!(payload.status, 200);
                assert_eq!(payload.body.as_deref(), Some("[]"));
                assert_eq!(
                    payload.headers,
                    vec![("content-type".to_string(), "application/json".to_string())]
                );
            }
            other => panic!("expected RESPONSE, got {:?}", other),
        }
    }

    #[test]
    fn decode_response_defaults_headers_and_body() {
        let frame =
            Frame::decode(r#"{"type":"RESPONSE","request_id":"r-7","payload":{"status":204}}"#)
                .unwrap();
        match frame {
            Frame::Response { payload, .. } => {
                assert!(payload.headers.is_empty());
                assert!(payload.body.is_none());
            }
            other => panic!("expected RESPONSE, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(Frame::decode(r#"{"type":"PING"}"#).is_err());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(Frame::decode("not json").is_err());
    }
}
