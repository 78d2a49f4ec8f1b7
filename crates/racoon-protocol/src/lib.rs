//! Wire types for the privilege-forwarding channel.
//!
//! The unprivileged daemon and its privileged helper exchange
//! length-prefixed JSON over a Unix stream:
//! - 4 bytes: payload length (u32, big-endian)
//! - N bytes: JSON-encoded [`Envelope`]
//!
//! Each request gets exactly one response carrying the same `request_id`.
//! A successful [`PrivResponse::ControlSocket`] frame is followed by a
//! single byte carrying the descriptor as `SCM_RIGHTS` ancillary data.
//!
//! ```rust
//! use racoon_protocol::{Envelope, PrivRequest, decode_frame, encode_frame};
//!
//! let request = Envelope::new("req-1", PrivRequest::OpenControlSocket);
//! let bytes = encode_frame(&request).unwrap();
//! let decoded: Envelope<PrivRequest> = decode_frame(&bytes).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_frame, encode_frame, read_frame, write_frame};
pub use types::{Envelope, ErrorCode, ErrorResponse, PrivRequest, PrivResponse, ScriptKind};

/// Protocol version constant.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum frame payload (64 KiB); key blobs are the largest payload.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;
