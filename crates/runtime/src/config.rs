//! Client configuration.
//!
//! Values are resolved in this order:
//! 1. Explicit overrides set by the caller (CLI flags)
//! 2. Environment variables (`USBMUXD_SOCKET_ADDRESS`, `IMD_PAIR_RECORD_DIR`)
//! 3. Platform defaults

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use imd_protocol::ClientInfo;
use imd_protocol::muxer::LOCKDOWN_PORT;

/// Environment variable overriding the multiplexer socket.
pub const MUXER_ADDRESS_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

/// Environment variable pointing at a directory of `<udid>.plist` pair records.
pub const PAIR_RECORD_DIR_ENV: &str = "IMD_PAIR_RECORD_DIR";

/// Label sent with every lockdown request unless overridden.
pub const DEFAULT_LABEL: &str = "idevice_id";

#[cfg(unix)]
const DEFAULT_UNIX_SOCKET: &str = "/var/run/usbmuxd";

#[cfg(not(unix))]
const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:27015";

/// Where the multiplexer daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxerAddress {
	/// Unix domain socket path.
	Unix(PathBuf),
	/// `host:port` TCP endpoint.
	Tcp(String),
}

impl Default for MuxerAddress {
	#[cfg(unix)]
	fn default() -> Self {
		MuxerAddress::Unix(PathBuf::from(DEFAULT_UNIX_SOCKET))
	}

	#[cfg(not(unix))]
	fn default() -> Self {
		MuxerAddress::Tcp(DEFAULT_TCP_ADDRESS.to_string())
	}
}

impl FromStr for MuxerAddress {
	type Err = String;

	/// Accepts `UNIX:/path/to/socket` or `host:port`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Some(path) = s.strip_prefix("UNIX:") {
			if path.is_empty() {
				return Err("empty socket path".to_string());
			}
			return Ok(MuxerAddress::Unix(PathBuf::from(path)));
		}
		match s.rsplit_once(':') {
			Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
				Ok(MuxerAddress::Tcp(s.to_string()))
			}
			_ => Err(format!("expected UNIX:<path> or <host>:<port>, got {s:?}")),
		}
	}
}

impl fmt::Display for MuxerAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MuxerAddress::Unix(path) => write!(f, "UNIX:{}", path.display()),
			MuxerAddress::Tcp(addr) => write!(f, "{addr}"),
		}
	}
}

/// Settings shared by the registry, sessions and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub muxer: MuxerAddress,
	/// Program label reported to the daemon and to lockdown.
	pub label: String,
	/// Read pair records from this directory instead of asking the daemon.
	pub pair_record_dir: Option<PathBuf>,
	/// Default bound applied to `open` and `query` when the caller gives none.
	pub timeout: Option<Duration>,
	/// Device port lockdown listens on.
	pub lockdown_port: u16,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			muxer: MuxerAddress::default(),
			label: DEFAULT_LABEL.to_string(),
			pair_record_dir: None,
			timeout: None,
			lockdown_port: LOCKDOWN_PORT,
		}
	}
}

impl Config {
	/// Builds a configuration from the process environment.
	pub fn from_env() -> Result<Self, String> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Builds a configuration from an arbitrary variable lookup.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
		let mut config = Self::default();
		if let Some(raw) = lookup(MUXER_ADDRESS_ENV).filter(|v| !v.trim().is_empty()) {
			config.muxer = raw
				.parse()
				.map_err(|e| format!("{MUXER_ADDRESS_ENV}: {e}"))?;
		}
		if let Some(dir) = lookup(PAIR_RECORD_DIR_ENV).filter(|v| !v.trim().is_empty()) {
			config.pair_record_dir = Some(PathBuf::from(dir));
		}
		Ok(config)
	}

	pub fn with_muxer(mut self, muxer: MuxerAddress) -> Self {
		self.muxer = muxer;
		self
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = label.into();
		self
	}

	pub fn with_pair_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.pair_record_dir = Some(dir.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_lockdown_port(mut self, port: u16) -> Self {
		self.lockdown_port = port;
		self
	}

	/// Identity reported to the multiplexer.
	pub fn client_info(&self) -> ClientInfo {
		ClientInfo {
			program: self.label.clone(),
			version: format!("imd-rs {}", env!("CARGO_PKG_VERSION")),
		}
	}
}
