//! Device discovery through the multiplexer daemon.
//!
//! [`DeviceRegistry::enumerate`] asks the daemon for its current device list
//! and returns one [`RegistryEntry`] per reachable (device, transport) pair.
//! Nothing is cached: every call opens a fresh daemon connection and takes a
//! new snapshot.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use imd_protocol::muxer::{DeviceListReply, DeviceRecord, ResultReply};
use imd_protocol::{MuxRequest, MuxResult, PairRecord, PropertyValue};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{BoxedStream, MuxerConnection};

/// Stable identifier (UDID) of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentifier(Arc<str>);

impl DeviceIdentifier {
	/// Wraps `udid`, rejecting empty or blank strings.
	pub fn new(udid: impl AsRef<str>) -> Result<Self> {
		let udid = udid.as_ref().trim();
		if udid.is_empty() {
			return Err(Error::InvalidIdentifier(udid.to_string()));
		}
		Ok(Self(Arc::from(udid)))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for DeviceIdentifier {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

impl AsRef<str> for DeviceIdentifier {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DeviceIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// How a device is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
	Usb,
	Network,
}

impl TransportKind {
	/// Resolution order used when several transports are acceptable.
	pub const PREFERENCE: [TransportKind; 2] = [TransportKind::Usb, TransportKind::Network];

	fn from_connection_type(raw: &str) -> Option<Self> {
		match raw {
			"USB" => Some(TransportKind::Usb),
			"Network" => Some(TransportKind::Network),
			_ => None,
		}
	}
}

impl fmt::Display for TransportKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportKind::Usb => write!(f, "USB"),
			TransportKind::Network => write!(f, "Network"),
		}
	}
}

/// Set of transports a caller is willing to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportSet {
	usb: bool,
	network: bool,
}

impl TransportSet {
	pub const USB: TransportSet = TransportSet {
		usb: true,
		network: false,
	};

	pub const NETWORK: TransportSet = TransportSet {
		usb: false,
		network: true,
	};

	pub const ALL: TransportSet = TransportSet {
		usb: true,
		network: true,
	};

	pub fn new(usb: bool, network: bool) -> Self {
		Self { usb, network }
	}

	pub fn contains(&self, kind: TransportKind) -> bool {
		match kind {
			TransportKind::Usb => self.usb,
			TransportKind::Network => self.network,
		}
	}

	pub fn is_empty(&self) -> bool {
		!self.usb && !self.network
	}

	/// Members in resolution order.
	pub fn iter(&self) -> impl Iterator<Item = TransportKind> + '_ {
		TransportKind::PREFERENCE
			.into_iter()
			.filter(|kind| self.contains(*kind))
	}
}

impl From<TransportKind> for TransportSet {
	fn from(kind: TransportKind) -> Self {
		match kind {
			TransportKind::Usb => TransportSet::USB,
			TransportKind::Network => TransportSet::NETWORK,
		}
	}
}

/// One reachable (device, transport) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
	pub identifier: DeviceIdentifier,
	pub transport: TransportKind,
	/// Daemon-assigned handle, valid only while the device stays attached.
	pub device_id: u32,
	/// Device address for network entries, when the daemon reports one.
	pub network_address: Option<IpAddr>,
	pub product_id: Option<u32>,
}

impl RegistryEntry {
	fn from_record(record: DeviceRecord) -> Option<Self> {
		let props = &record.properties;
		let Some(transport) = props
			.connection_type
			.as_deref()
			.and_then(TransportKind::from_connection_type)
		else {
			debug!(
				device_id = record.device_id,
				connection_type = ?props.connection_type,
				"skipping device with unknown connection type"
			);
			return None;
		};
		let identifier = match props.serial_number.as_deref().map(DeviceIdentifier::new) {
			Some(Ok(identifier)) => identifier,
			_ => {
				debug!(device_id = record.device_id, "skipping device without serial number");
				return None;
			}
		};
		let network_address = match transport {
			TransportKind::Network => props.ip_address(),
			TransportKind::Usb => None,
		};

		Some(Self {
			identifier,
			transport,
			device_id: record.device_id,
			network_address,
			product_id: props.product_id,
		})
	}
}

/// Snapshot of reachable devices, consumed once.
#[derive(Debug)]
pub struct DeviceList {
	entries: std::vec::IntoIter<RegistryEntry>,
}

impl DeviceList {
	/// Builds a list from daemon records, dropping unusable and duplicate pairs.
	///
	/// The first record for a given (identifier, transport) wins.
	pub fn from_records(records: Vec<DeviceRecord>) -> Self {
		let mut seen = HashSet::new();
		let entries: Vec<_> = records
			.into_iter()
			.filter_map(RegistryEntry::from_record)
			.filter(|entry| seen.insert((entry.identifier.clone(), entry.transport)))
			.collect();
		Self {
			entries: entries.into_iter(),
		}
	}
}

impl Iterator for DeviceList {
	type Item = RegistryEntry;

	fn next(&mut self) -> Option<RegistryEntry> {
		self.entries.next()
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		self.entries.size_hint()
	}
}

impl ExactSizeIterator for DeviceList {}

/// Entry point for discovering and connecting to devices.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
	config: Config,
}

impl DeviceRegistry {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	async fn muxer(&self) -> Result<MuxerConnection> {
		MuxerConnection::open(&self.config.muxer, self.config.client_info()).await
	}

	/// Lists devices currently reachable through the daemon.
	///
	/// # Errors
	///
	/// Returns [`Error::TransportUnavailable`] if the daemon cannot be reached.
	pub async fn enumerate(&self) -> Result<DeviceList> {
		let mut muxer = self.muxer().await?;
		let request = MuxRequest::list_devices(muxer.client());
		let reply: DeviceListReply = muxer.request(&request).await?;
		let list = DeviceList::from_records(reply.device_list);
		info!(count = list.len(), "enumerated devices");
		Ok(list)
	}

	/// Entries for `identifier` reachable over `transports`, in resolution order.
	pub async fn resolve(
		&self,
		identifier: &DeviceIdentifier,
		transports: TransportSet,
	) -> Result<Vec<RegistryEntry>> {
		let mut matches: Vec<_> = self
			.enumerate()
			.await?
			.filter(|entry| &entry.identifier == identifier && transports.contains(entry.transport))
			.collect();
		matches.sort_by_key(|entry| entry.transport);
		Ok(matches)
	}

	/// Opens a byte stream to `port` on the device behind `entry`.
	///
	/// Network entries with a known address are dialled directly; everything
	/// else is tunnelled through the daemon.
	pub async fn connect(&self, entry: &RegistryEntry, port: u16) -> Result<BoxedStream> {
		if let (TransportKind::Network, Some(ip)) = (entry.transport, entry.network_address) {
			let addr = SocketAddr::new(ip, port);
			debug!(identifier = %entry.identifier, %addr, "connecting to network device");
			let stream = tokio::net::TcpStream::connect(addr).await?;
			stream.set_nodelay(true)?;
			return Ok(Box::new(stream));
		}

		let mut muxer = self.muxer().await?;
		let request = MuxRequest::connect(muxer.client(), entry.device_id, port);
		let reply: ResultReply = muxer.request(&request).await?;
		match MuxResult::from(reply.number) {
			MuxResult::Ok => {
				debug!(
					identifier = %entry.identifier,
					transport = %entry.transport,
					port,
					"tunnel established"
				);
				Ok(muxer.into_stream())
			}
			result => Err(Error::Muxer {
				request: "Connect",
				result,
			}),
		}
	}

	/// Loads the host's pair record for `identifier`, if one exists.
	pub async fn read_pair_record(&self, identifier: &DeviceIdentifier) -> Result<Option<PairRecord>> {
		if let Some(dir) = &self.config.pair_record_dir {
			let path = dir.join(format!("{identifier}.plist"));
			return match tokio::fs::read(&path).await {
				Ok(bytes) => Ok(Some(PairRecord::from_plist_bytes(&bytes)?)),
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
					debug!(path = %path.display(), "no pair record on disk");
					Ok(None)
				}
				Err(err) => Err(err.into()),
			};
		}

		let mut muxer = self.muxer().await?;
		let request = MuxRequest::read_pair_record(muxer.client(), identifier.as_str());
		let payload = muxer.request_raw(&request).await?;
		match PropertyValue::from_plist_bytes(&payload)?.get("PairRecordData") {
			Some(PropertyValue::Data(data)) => Ok(Some(PairRecord::from_plist_bytes(data)?)),
			_ => {
				debug!(%identifier, "daemon has no pair record");
				Ok(None)
			}
		}
	}
}
