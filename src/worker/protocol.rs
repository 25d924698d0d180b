//! Wire envelopes for the worker transport.
//!
//! Requests are `{ id, type, payload? }` and responses are
//! `{ id, type: "success" | "error", result? | error }`. The envelope
//! carries `type` as a raw string so the worker can reject an
//! unrecognized kind with an explicit error instead of failing to
//! deserialize silently.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;

/// Caller-generated correlation id for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message kinds the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Bring up the compute backend.
    Init,
    /// Load a dataset into the backend's working copy.
    LoadData,
    /// Apply one change and compute its impact.
    Simulate,
    /// Recompute aggregate metrics.
    GetMetrics,
}

impl RequestKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_wire(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LoadData => "loadData",
            Self::Simulate => "simulate",
            Self::GetMetrics => "getMetrics",
        }
    }

    /// Parses a wire name. Returns `None` for unrecognized kinds; the
    /// worker turns that into an explicit error response.
    #[must_use]
    pub fn parse(wire: &str) -> Option<Self> {
        match wire {
            "init" => Some(Self::Init),
            "loadData" => Some(Self::LoadData),
            "simulate" => Some(Self::Simulate),
            "getMetrics" => Some(Self::GetMetrics),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One request to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id echoed back in the response.
    pub id: RequestId,
    /// Message kind, as a wire name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional JSON payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl RequestEnvelope {
    /// Builds an envelope for a known kind.
    #[must_use]
    pub fn new(id: RequestId, kind: RequestKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            id,
            kind: kind.as_wire().to_string(),
            payload,
        }
    }
}

/// Success or error body of a response, tagged on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseBody {
    /// The request succeeded.
    Success {
        /// Result payload, when the operation yields one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// The request failed.
    Error {
        /// Human-readable error description.
        error: String,
    },
}

/// One response from the worker, correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// The correlation id of the request being answered.
    pub id: RequestId,
    /// Success or error body.
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Option<serde_json::Value>) -> Self {
        Self {
            id,
            body: ResponseBody::Success { result },
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            body: ResponseBody::Error {
                error: message.into(),
            },
        }
    }

    /// Unwraps the body into a caller-facing result.
    pub fn into_result(self) -> Result<Option<serde_json::Value>, TransportError> {
        match self.body {
            ResponseBody::Success { result } => Ok(result),
            ResponseBody::Error { error } => Err(TransportError::Rejected { message: error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_kind_wire_names_round_trip() {
        for kind in [
            RequestKind::Init,
            RequestKind::LoadData,
            RequestKind::Simulate,
            RequestKind::GetMetrics,
        ] {
            assert_eq!(RequestKind::parse(kind.as_wire()), Some(kind));
        }
        assert_eq!(RequestKind::parse("terminate"), None);
    }

    #[test]
    fn request_envelope_wire_shape() {
        let id = RequestId::new();
        let env = RequestEnvelope::new(id, RequestKind::LoadData, Some(json!({ "tasks": [] })));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "loadData");
        assert_eq!(json["id"], serde_json::to_value(id).unwrap());
        assert!(json["payload"].is_object());
    }

    #[test]
    fn response_envelope_wire_shape() {
        let id = RequestId::new();
        let ok = serde_json::to_value(ResponseEnvelope::success(id, Some(json!(1)))).unwrap();
        assert_eq!(ok["type"], "success");
        assert_eq!(ok["result"], 1);

        let err = serde_json::to_value(ResponseEnvelope::error(id, "nope")).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"], "nope");
    }

    #[test]
    fn error_body_becomes_rejected() {
        let id = RequestId::new();
        let err = ResponseEnvelope::error(id, "bad payload").into_result().unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));

        let ok = ResponseEnvelope::success(id, None).into_result().unwrap();
        assert!(ok.is_none());
    }
}
