//! Lockdown sessions.
//!
//! A [`Session`] is one authenticated conversation with a device's lockdown
//! service. It moves through a fixed state machine:
//!
//! ```text
//! Unopened ──► Handshaking ──► Open ──► Closed
//!                   │                     ▲
//!                   └─────────────────────┘  (handshake failure)
//! ```
//!
//! Only `Open` sessions are ever handed to callers; a failed handshake drops
//! the stream before the error is returned.

mod tls;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use imd_protocol::LockdownRequest;
use imd_protocol::lockdown::LOCKDOWN_SERVICE_TYPE;
use imd_runtime::{
	DeviceIdentifier, DeviceRegistry, Error, LockdownTransport, Result, TransportKind, TransportSet,
};
use tracing::{debug, info};

/// Upper bound on the best-effort goodbye exchange in [`Session::close`].
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle position of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Unopened,
	Handshaking,
	Open,
	Closed,
}

impl SessionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SessionState::Unopened => "unopened",
			SessionState::Handshaking => "handshaking",
			SessionState::Open => "open",
			SessionState::Closed => "closed",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How much of the lockdown handshake to perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakeMode {
	/// Service identification only. Enough for unauthenticated keys such as
	/// `DeviceName` on most devices.
	Simple,
	/// Identification, pair-record lookup and `StartSession`, upgrading to
	/// TLS when the device asks for it.
	#[default]
	Verified,
}

/// Runs `fut`, failing with [`Error::Timeout`] once `limit` elapses.
pub(crate) async fn with_timeout<T>(
	operation: &'static str,
	limit: Option<Duration>,
	fut: impl Future<Output = Result<T>>,
) -> Result<T> {
	let Some(limit) = limit else {
		return fut.await;
	};
	match tokio::time::timeout(limit, fut).await {
		Ok(result) => result,
		Err(_) => Err(Error::Timeout {
			operation,
			ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
		}),
	}
}

/// An authenticated lockdown conversation with one device.
///
/// Borrows the registry it was opened through, so it can never outlive it.
pub struct Session<'r> {
	registry: &'r DeviceRegistry,
	identifier: DeviceIdentifier,
	transport: Option<TransportKind>,
	state: SessionState,
	conn: Option<LockdownTransport>,
	session_id: Option<String>,
	secure: bool,
	/// Set by the caller's `close`, independent of whether the stream was
	/// already released by an abandoned query.
	close_called: bool,
}

impl<'r> Session<'r> {
	/// Resolves `identifier`, connects to its lockdown port and performs the
	/// handshake.
	///
	/// Candidates are tried USB first, then Network, restricted to
	/// `transports`. `timeout` bounds the whole operation and falls back to
	/// the registry's configured default.
	///
	/// # Errors
	///
	/// - [`Error::DeviceNotFound`] if no entry matches
	/// - [`Error::HandshakeFailed`] if lockdown refuses or the exchange breaks
	/// - [`Error::Timeout`] if the bound elapses
	pub async fn open(
		registry: &'r DeviceRegistry,
		identifier: &DeviceIdentifier,
		transports: TransportSet,
		mode: HandshakeMode,
		timeout: Option<Duration>,
	) -> Result<Session<'r>> {
		let mut session = Session {
			registry,
			identifier: identifier.clone(),
			transport: None,
			state: SessionState::Unopened,
			conn: None,
			session_id: None,
			secure: false,
			close_called: false,
		};

		let limit = timeout.or(registry.config().timeout);
		let outcome = with_timeout("open", limit, session.establish(transports, mode)).await;
		match outcome {
			Ok(()) => {
				session.state = SessionState::Open;
				info!(
					identifier = %session.identifier,
					transport = ?session.transport,
					secure = session.secure,
					"session open"
				);
				Ok(session)
			}
			Err(err) => {
				debug!(identifier = %session.identifier, state = %session.state, error = %err, "open failed");
				session.abandon();
				Err(err)
			}
		}
	}

	async fn establish(&mut self, transports: TransportSet, mode: HandshakeMode) -> Result<()> {
		let not_found = || Error::DeviceNotFound {
			identifier: self.identifier.to_string(),
		};
		if transports.is_empty() {
			return Err(not_found());
		}

		let candidates = self.registry.resolve(&self.identifier, transports).await?;
		if candidates.is_empty() {
			return Err(not_found());
		}

		let port = self.registry.config().lockdown_port;
		let mut last_error = None;
		for entry in &candidates {
			match self.registry.connect(entry, port).await {
				Ok(stream) => {
					self.transport = Some(entry.transport);
					self.conn = Some(LockdownTransport::new(stream));
					break;
				}
				Err(err) => {
					debug!(identifier = %entry.identifier, transport = %entry.transport, error = %err, "connect failed");
					last_error = Some(err);
				}
			}
		}
		if self.conn.is_none() {
			let reason = last_error.map_or_else(|| "no usable transport".to_string(), |e| e.to_string());
			return Err(Error::handshake_failed(self.identifier.as_str(), reason));
		}

		self.state = SessionState::Handshaking;
		self.handshake(mode).await.map_err(|err| match err {
			Error::HandshakeFailed { .. } | Error::Timeout { .. } => err,
			other => Error::handshake_failed(self.identifier.as_str(), other.to_string()),
		})
	}

	async fn handshake(&mut self, mode: HandshakeMode) -> Result<()> {
		let registry = self.registry;
		let label = registry.config().label.as_str();
		let id = self.identifier.as_str();
		let conn = self
			.conn
			.as_mut()
			.ok_or_else(|| Error::handshake_failed(id, "no stream"))?;

		let reply = conn.exchange(&LockdownRequest::query_type(label)).await?;
		if let Some(error) = &reply.error {
			return Err(Error::handshake_failed(id, format!("QueryType: {error}")));
		}
		match reply.service_type() {
			Some(LOCKDOWN_SERVICE_TYPE) => {}
			other => {
				return Err(Error::handshake_failed(
					id,
					format!("unexpected service type {other:?}"),
				));
			}
		}
		if mode == HandshakeMode::Simple {
			return Ok(());
		}

		let Some(record) = registry.read_pair_record(&self.identifier).await? else {
			return Err(Error::handshake_failed(id, "device is not paired"));
		};

		let request = LockdownRequest::start_session(label, &record.host_id, &record.system_buid);
		let reply = conn.exchange(&request).await?;
		if let Some(error) = &reply.error {
			return Err(Error::handshake_failed(id, format!("StartSession: {error}")));
		}
		self.session_id = reply.session_id().map(str::to_string);

		if reply.enable_session_ssl() {
			let plain = self
				.conn
				.take()
				.ok_or_else(|| Error::handshake_failed(id, "no stream"))?;
			let secured = tls::upgrade(plain.into_inner(), &record).await?;
			self.conn = Some(LockdownTransport::new(secured));
			self.secure = true;
		}
		Ok(())
	}

	/// Ends the session.
	///
	/// `StopSession` and `Goodbye` are sent best-effort; failures are logged
	/// and the stream is released either way. A session whose stream was
	/// already dropped by a failed query still accepts its first `close`.
	///
	/// # Errors
	///
	/// Returns [`Error::AlreadyClosed`] on every call after the first.
	pub async fn close(&mut self) -> Result<()> {
		if self.close_called {
			return Err(Error::AlreadyClosed);
		}
		self.close_called = true;

		let label = self.label();
		if let Some(mut conn) = self.conn.take() {
			let session_id = self.session_id.as_deref();
			let farewell = async {
				if let Some(id) = session_id {
					conn.exchange(&LockdownRequest::stop_session(label, id)).await?;
				}
				conn.exchange(&LockdownRequest::goodbye(label)).await?;
				conn.shutdown().await
			};
			match tokio::time::timeout(CLOSE_GRACE, farewell).await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => debug!(identifier = %self.identifier, error = %err, "goodbye failed"),
				Err(_) => debug!(identifier = %self.identifier, "goodbye timed out"),
			}
		}

		self.session_id = None;
		self.state = SessionState::Closed;
		debug!(identifier = %self.identifier, "session closed");
		Ok(())
	}

	/// Drops the stream without saying goodbye.
	///
	/// Later queries see `Closed`; the caller's `close` still succeeds once.
	pub(crate) fn abandon(&mut self) {
		self.conn = None;
		self.session_id = None;
		self.state = SessionState::Closed;
	}

	pub fn identifier(&self) -> &DeviceIdentifier {
		&self.identifier
	}

	/// Transport the session runs over; `None` only before connecting.
	pub fn transport(&self) -> Option<TransportKind> {
		self.transport
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn is_open(&self) -> bool {
		self.state == SessionState::Open
	}

	/// Lockdown session id, present in verified sessions.
	pub fn session_id(&self) -> Option<&str> {
		self.session_id.as_deref()
	}

	/// Whether the stream was upgraded to TLS.
	pub fn is_secure(&self) -> bool {
		self.secure
	}

	pub(crate) fn label(&self) -> &'r str {
		let registry: &'r DeviceRegistry = self.registry;
		registry.config().label.as_str()
	}

	pub(crate) fn default_timeout(&self) -> Option<Duration> {
		self.registry.config().timeout
	}

	pub(crate) fn ensure_open(&self) -> Result<()> {
		if self.state != SessionState::Open {
			return Err(Error::SessionNotOpen {
				state: self.state.as_str(),
			});
		}
		Ok(())
	}

	pub(crate) fn transport_mut(&mut self) -> Result<&mut LockdownTransport> {
		self.ensure_open()?;
		let state = self.state.as_str();
		self.conn.as_mut().ok_or(Error::SessionNotOpen { state })
	}
}

impl fmt::Debug for Session<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("identifier", &self.identifier)
			.field("transport", &self.transport)
			.field("state", &self.state)
			.field("secure", &self.secure)
			.finish_non_exhaustive()
	}
}

impl Drop for Session<'_> {
	fn drop(&mut self) {
		if self.state != SessionState::Closed {
			debug!(identifier = %self.identifier, state = %self.state, "session dropped without close");
		}
	}
}
