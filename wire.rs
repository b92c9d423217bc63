use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind discriminant for one logical unit exchanged on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Error,
}

/// Wire-level failure codes understood by both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorCode {
    /// No service registered under the requested name
    NoService,
    /// The service has no method of the requested name
    NoMethod,
    /// The request payload could not be interpreted by the handler
    InvalidRequest,
    /// The response payload could not be produced or interpreted
    InvalidResponse,
}

/// Error descriptor carried by an ERROR envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: WireErrorCode,
    pub message: String,
}

/// One logical RPC unit: a request, a response, or an error, plus the
/// correlation id linking a response back to the call that requested it.
///
/// The payload is opaque here; the calling side and the service handler
/// interpret it against the message shape they expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub kind: MessageKind,
    pub id: u64,

    /// Target service name, present on REQUEST only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Target method name, present on REQUEST only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Present on ERROR only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireEnvelope {
    pub fn request(
        id: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
    ) -> WireEnvelope {
        WireEnvelope {
            kind: MessageKind::Request,
            id,
            service: Some(service.into()),
            method: Some(method.into()),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn response(id: u64, payload: Value) -> WireEnvelope {
        WireEnvelope {
            kind: MessageKind::Response,
            id,
            service: None,
            method: None,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: u64, code: WireErrorCode, message: impl Into<String>) -> WireEnvelope {
        WireEnvelope {
            kind: MessageKind::Error,
            id,
            service: None,
            method: None,
            payload: None,
            error: Some(WireError {
                code,
                message: message.into(),
            }),
        }
    }
}
