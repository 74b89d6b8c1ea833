//! Scoped property queries over an open session.

use std::time::Duration;

use imd_protocol::{LockdownRequest, PropertyValue};
use imd_runtime::{Error, Result};
use tracing::{debug, warn};

use crate::domains::KnownDomainSet;
use crate::session::{Session, with_timeout};

/// Root-domain key holding the user-visible device name.
pub const DEVICE_NAME_KEY: &str = "DeviceName";

/// Which property (or property group) to fetch.
///
/// No domain means the root domain; no key means every value in the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryScope {
	domain: Option<String>,
	key: Option<String>,
}

impl QueryScope {
	/// The whole root domain.
	pub fn root() -> Self {
		Self::default()
	}

	/// Builds a scope from optional parts.
	///
	/// An empty domain is treated as the root domain.
	///
	/// # Errors
	///
	/// Returns [`Error::MalformedScope`] for an empty key.
	pub fn new(domain: Option<&str>, key: Option<&str>) -> Result<Self> {
		if key.is_some_and(str::is_empty) {
			return Err(Error::MalformedScope("key must not be empty".to_string()));
		}
		Ok(Self {
			domain: domain.filter(|d| !d.is_empty()).map(str::to_string),
			key: key.map(str::to_string),
		})
	}

	/// A single key in the root domain.
	pub fn root_key(key: &str) -> Result<Self> {
		Self::new(None, Some(key))
	}

	/// Every value in `domain`.
	pub fn in_domain(domain: &str) -> Result<Self> {
		Self::new(Some(domain), None)
	}

	pub fn domain(&self) -> Option<&str> {
		self.domain.as_deref()
	}

	pub fn key(&self) -> Option<&str> {
		self.key.as_deref()
	}
}

/// Issues `GetValue` requests, warning about domains it does not recognise.
#[derive(Debug, Clone, Default)]
pub struct QueryService {
	domains: KnownDomainSet,
}

impl QueryService {
	pub fn new(domains: KnownDomainSet) -> Self {
		Self { domains }
	}

	/// Service backed by [`KnownDomainSet::standard`].
	pub fn standard() -> Self {
		Self::new(KnownDomainSet::standard())
	}

	pub fn domains(&self) -> &KnownDomainSet {
		&self.domains
	}

	/// Fetches the value addressed by `scope`.
	///
	/// Returns `Ok(None)` when the domain exists but holds nothing. A query
	/// that times out or breaks the stream leaves it at an unknown position,
	/// so the stream is released and later queries see a closed session. The
	/// caller's `close` still succeeds once.
	///
	/// # Errors
	///
	/// - [`Error::SessionNotOpen`] unless the session is open
	/// - [`Error::UnknownKey`] if the key is absent from the domain
	/// - [`Error::Lockdown`] for any other lockdown failure
	pub async fn query(
		&self,
		session: &mut Session<'_>,
		scope: &QueryScope,
		timeout: Option<Duration>,
	) -> Result<Option<PropertyValue>> {
		session.ensure_open()?;

		if let Some(domain) = scope.domain() {
			if !self.domains.contains(domain) {
				warn!(domain, "sending query with unknown domain");
			}
		}

		let limit = timeout.or(session.default_timeout());
		let request = LockdownRequest::get_value(session.label(), scope.domain(), scope.key());
		let outcome = with_timeout("query", limit, async {
			session.transport_mut()?.exchange(&request).await
		})
		.await;

		let reply = match outcome {
			Ok(reply) => reply,
			Err(err) => {
				if matches!(err, Error::Timeout { .. } | Error::Io(_) | Error::Protocol(_)) {
					debug!(identifier = %session.identifier(), error = %err, "query broke the stream, closing session");
					session.abandon();
				}
				return Err(err);
			}
		};

		if let Some(error) = &reply.error {
			if reply.is_missing_value() {
				return match scope.key() {
					Some(key) => Err(Error::UnknownKey {
						domain: scope.domain().map(str::to_string),
						key: key.to_string(),
					}),
					None => Ok(None),
				};
			}
			return Err(Error::Lockdown {
				request: "GetValue",
				error: error.clone(),
			});
		}
		Ok(reply.into_value())
	}

	/// Reads the root-domain `DeviceName`.
	pub async fn device_name(&self, session: &mut Session<'_>, timeout: Option<Duration>) -> Result<String> {
		let scope = QueryScope {
			domain: None,
			key: Some(DEVICE_NAME_KEY.to_string()),
		};
		match self.query(session, &scope, timeout).await? {
			Some(PropertyValue::String(name)) => Ok(name),
			other => Err(imd_protocol::Error::UnexpectedMessage {
				expected: "string DeviceName",
				actual: format!("{other:?}"),
			}
			.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn root_scope_has_no_parts() {
		let scope = QueryScope::root();
		assert_eq!(scope.domain(), None);
		assert_eq!(scope.key(), None);
	}

	#[test]
	fn blank_domain_means_root() {
		let scope = QueryScope::new(Some(""), Some("DeviceName")).unwrap();
		assert_eq!(scope.domain(), None);
		assert_eq!(scope.key(), Some("DeviceName"));
	}

	#[test]
	fn empty_key_is_malformed() {
		let err = QueryScope::new(Some("com.apple.mobile.battery"), Some("")).unwrap_err();
		assert!(matches!(err, Error::MalformedScope(_)), "got {err:?}");
		assert!(QueryScope::root_key("").is_err());
	}

	#[test]
	fn whitespace_key_is_passed_through() {
		let scope = QueryScope::root_key(" ").unwrap();
		assert_eq!(scope.key(), Some(" "));
	}

	#[test]
	fn domain_scope_keeps_domain() {
		let scope = QueryScope::in_domain("com.unknown.vendor").unwrap();
		assert_eq!(scope.domain(), Some("com.unknown.vendor"));
		assert_eq!(scope.key(), None);
	}
}
