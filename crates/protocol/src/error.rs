//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum Error {
	/// Property list could not be serialized or parsed.
	#[error("plist error: {0}")]
	Plist(#[from] plist::Error),

	/// Frame length exceeds what the peer is allowed to send.
	#[error("frame of {len} bytes exceeds limit of {limit} bytes")]
	FrameTooLarge { len: usize, limit: usize },

	/// Frame header is shorter than the fixed header size.
	#[error("truncated header: expected {expected} bytes, got {actual}")]
	TruncatedHeader { expected: usize, actual: usize },

	/// Header advertised a protocol version or message type we do not speak.
	#[error("unsupported {field} {value} in header")]
	UnsupportedHeader { field: &'static str, value: u32 },

	/// Reply was well-formed but not the message we were waiting for.
	#[error("unexpected message: expected {expected}, got {actual}")]
	UnexpectedMessage { expected: &'static str, actual: String },

	/// Required field absent from a reply.
	#[error("missing field '{0}' in reply")]
	MissingField(&'static str),
}
