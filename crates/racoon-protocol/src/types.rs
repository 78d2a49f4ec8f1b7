//! Request and response types for the privilege-forwarding channel.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;

/// Message envelope wrapping all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub protocol_version: String,
    /// Correlates a response with its request.
    pub request_id: String,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates an envelope stamped with the current protocol version.
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Phase scripts the daemon may ask the helper to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Phase1Up,
    Phase1Down,
    Phase1Dead,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phase1Up => "phase1_up",
            Self::Phase1Down => "phase1_down",
            Self::Phase1Dead => "phase1_dead",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that cross the privilege boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrivRequest {
    /// Open the key-management control socket and pass it back.
    OpenControlSocket,

    /// Read private key material from disk.
    LoadPrivateKey { path: PathBuf },

    /// Run a phase script.
    RunScript {
        path: PathBuf,
        kind: ScriptKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        environment: Vec<String>,
    },

    /// Liveness check.
    Ping,
}

impl PrivRequest {
    /// Short operation name for log fields.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::OpenControlSocket => "open_control_socket",
            Self::LoadPrivateKey { .. } => "load_private_key",
            Self::RunScript { .. } => "run_script",
            Self::Ping => "ping",
        }
    }
}

/// Helper responses, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrivResponse {
    /// The descriptor follows as `SCM_RIGHTS` data.
    ControlSocket,

    PrivateKey { key: Vec<u8> },

    ScriptStatus { status: i32 },

    Pong,

    Error {
        #[serde(flatten)]
        error: ErrorResponse,
    },
}

impl PrivResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ControlSocket => "control_socket",
            Self::PrivateKey { .. } => "private_key",
            Self::ScriptStatus { .. } => "script_status",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

/// Error codes carried by [`PrivResponse::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    NotFound,
    PermissionDenied,
    Unsupported,
}

impl ErrorCode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::InternalError => "internal error in privileged helper",
            Self::InvalidRequest => "request was invalid",
            Self::NotFound => "file not found",
            Self::PermissionDenied => "permission denied",
            Self::Unsupported => "operation not supported",
        }
    }

    /// Maps an I/O failure onto the closest code.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::Unsupported => Self::Unsupported,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                Self::InvalidRequest
            }
            _ => Self::InternalError,
        }
    }
}

/// Error response details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_version() {
        let envelope = Envelope::new("req-1", PrivRequest::Ping);
        assert_eq!(envelope.protocol_version, "1");
        assert!(envelope.is_compatible());

        let old = Envelope {
            protocol_version: "0".to_string(),
            ..envelope
        };
        assert!(!old.is_compatible());
    }

    #[test]
    fn request_json() {
        let open = serde_json::to_string(&PrivRequest::OpenControlSocket).unwrap();
        insta::assert_snapshot!(open, @r#"{"type":"open_control_socket"}"#);

        let load = serde_json::to_string(&PrivRequest::LoadPrivateKey {
            path: PathBuf::from("/etc/racoon/host.key"),
        })
        .unwrap();
        insta::assert_snapshot!(load, @r#"{"type":"load_private_key","path":"/etc/racoon/host.key"}"#);

        let script = serde_json::to_string(&PrivRequest::RunScript {
            path: PathBuf::from("/etc/racoon/up.sh"),
            kind: ScriptKind::Phase1Down,
            environment: Vec::new(),
        })
        .unwrap();
        insta::assert_snapshot!(script, @r#"{"type":"run_script","path":"/etc/racoon/up.sh","kind":"phase1_down"}"#);
    }

    #[test]
    fn response_json() {
        let error = serde_json::to_string(&PrivResponse::error(ErrorCode::NotFound, "no such key"))
            .unwrap();
        insta::assert_snapshot!(error, @r#"{"type":"error","code":"not_found","message":"no such key"}"#);

        let status = serde_json::to_string(&PrivResponse::ScriptStatus { status: 0 }).unwrap();
        insta::assert_snapshot!(status, @r#"{"type":"script_status","status":0}"#);
    }

    #[test]
    fn error_response_parses_back() {
        let json = r#"{"type":"error","code":"permission_denied","message":"root only"}"#;
        let parsed: PrivResponse = serde_json::from_str(json).unwrap();
        let error = parsed.as_error().unwrap();
        assert_eq!(error.code, ErrorCode::PermissionDenied);
        assert_eq!(error.to_string(), "permission denied: root only");
    }

    #[test]
    fn io_error_mapping() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(ErrorCode::from_io(&missing), ErrorCode::NotFound);
        let other = std::io::Error::other("boom");
        assert_eq!(ErrorCode::from_io(&other), ErrorCode::InternalError);
    }

    #[test]
    fn names_for_logging() {
        assert_eq!(PrivRequest::Ping.operation(), "ping");
        assert_eq!(PrivResponse::Pong.kind(), "pong");
        assert_eq!(ScriptKind::Phase1Dead.to_string(), "phase1_dead");
    }
}
