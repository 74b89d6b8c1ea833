//! Error types for device discovery, sessions and queries.

use imd_protocol::MuxResult;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers. None of these are retried internally.
#[derive(Debug, Error)]
pub enum Error {
	/// No discovery channel answered.
	#[error("device multiplexer unavailable at {address}: {source}")]
	TransportUnavailable {
		address: String,
		#[source]
		source: std::io::Error,
	},

	/// Identifier is not reachable under the requested transports.
	#[error("device {identifier} not found")]
	DeviceNotFound { identifier: String },

	/// Lockdown rejected the session or the exchange broke off.
	#[error("handshake with {identifier} failed: {reason}")]
	HandshakeFailed { identifier: String, reason: String },

	/// Operation issued against a session that is not open.
	#[error("session is not open (state: {state})")]
	SessionNotOpen { state: &'static str },

	/// Key is absent from the queried domain.
	#[error("unknown key '{key}' in {}", domain.as_deref().unwrap_or("root domain"))]
	UnknownKey { domain: Option<String>, key: String },

	/// Caller-supplied bound elapsed.
	#[error("timeout after {ms}ms during {operation}")]
	Timeout { operation: &'static str, ms: u64 },

	/// `close` called on a session that was already closed.
	#[error("session already closed")]
	AlreadyClosed,

	/// Query scope cannot be sent as-is.
	#[error("malformed query scope: {0}")]
	MalformedScope(String),

	/// Device identifier was empty or otherwise unusable.
	#[error("invalid device identifier: {0:?}")]
	InvalidIdentifier(String),

	/// Lockdown answered a request with an error string.
	#[error("lockdown {request} failed: {error}")]
	Lockdown { request: &'static str, error: String },

	/// Multiplexer answered a request with a failure code.
	#[error("muxer {request} failed: {result}")]
	Muxer {
		request: &'static str,
		result: MuxResult,
	},

	/// TLS configuration or negotiation failed.
	#[error("TLS error: {0}")]
	Tls(String),

	/// Frame could not be encoded or decoded.
	#[error("protocol error: {0}")]
	Protocol(#[from] imd_protocol::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Whether the same call may succeed if repeated unchanged.
	///
	/// Misuse and malformed queries never do; transport failures might.
	pub fn is_retriable(&self) -> bool {
		matches!(
			self,
			Error::TransportUnavailable { .. }
				| Error::DeviceNotFound { .. }
				| Error::HandshakeFailed { .. }
				| Error::Timeout { .. }
				| Error::Io(_)
		)
	}

	/// Builds a [`Error::HandshakeFailed`] for `identifier`.
	pub fn handshake_failed(identifier: &str, reason: impl Into<String>) -> Self {
		Error::HandshakeFailed {
			identifier: identifier.to_string(),
			reason: reason.into(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_key_names_root_domain_when_unset() {
		let err = Error::UnknownKey {
			domain: None,
			key: "Nope".into(),
		};
		assert_eq!(err.to_string(), "unknown key 'Nope' in root domain");

		let err = Error::UnknownKey {
			domain: Some("com.apple.mobile.battery".into()),
			key: "Nope".into(),
		};
		assert!(err.to_string().ends_with("in com.apple.mobile.battery"));
	}

	#[test]
	fn misuse_is_not_retriable() {
		assert!(!Error::AlreadyClosed.is_retriable());
		assert!(!Error::SessionNotOpen { state: "closed" }.is_retriable());
		assert!(
			Error::Timeout {
				operation: "open",
				ms: 10
			}
			.is_retriable()
		);
	}
}
