//! In-process fake of the multiplexer daemon and lockdown service.
//!
//! [`FakeMuxer`] listens on a Unix socket and answers `ListDevices`,
//! `ReadPairRecord` and `Connect`. After a successful `Connect` the same
//! socket speaks lockdown for the chosen [`FakeDevice`], so sessions and
//! queries can be exercised end to end without hardware.
//!
//! Network devices marked [`FakeDevice::dialled_directly`] are reported with a
//! loopback `NetworkAddress` and served from a TCP listener instead, and
//! devices carrying [`FakeTls`] switch to TLS after `StartSession`.
//!
//! ```ignore
//! let dir = tempfile::tempdir()?;
//! let muxer = FakeMuxer::start(dir.path().join("mux.sock"), vec![
//!     FakeDevice::usb(1, "A").with_root_value("DeviceName", "Alice's Phone"),
//! ]).await?;
//! let registry = DeviceRegistry::new(muxer.config());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use imd_protocol::lockdown::{self, LENGTH_PREFIX_LEN, MISSING_VALUE};
use imd_protocol::muxer::{HEADER_LEN, LOCKDOWN_PORT, MuxHeader};
use imd_protocol::{LockdownResponse, PropertyValue};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{Config, MuxerAddress};
use crate::transport::BoxedStream;

/// Host identity the fake devices accept in `StartSession`.
pub const TRUSTED_HOST_ID: &str = "00000000-0000-0000-0000-HOSTIDTEST01";

/// System BUID stored in generated pair records.
pub const TEST_SYSTEM_BUID: &str = "00000000-0000-0000-0000-SYSTEMBUID01";

/// Server side of a TLS upgrade, run on the lockdown stream after `StartSession`.
pub type StreamUpgrade =
	Arc<dyn Fn(BoxedStream) -> Pin<Box<dyn Future<Output = std::io::Result<BoxedStream>> + Send>> + Send + Sync>;

/// Identity a TLS-capable [`FakeDevice`] hands out in its pair record.
#[derive(Clone)]
pub struct FakeTls {
	/// PEM certificate the host authenticates with.
	pub host_certificate: Vec<u8>,
	/// PEM private key for `host_certificate`.
	pub host_private_key: Vec<u8>,
	/// PEM certificate the pair record pins for the device.
	pub device_certificate: Vec<u8>,
	pub accept: StreamUpgrade,
}

impl FakeTls {
	/// Builds an identity whose server handshake is `accept`.
	pub fn new<F, Fut>(
		host_certificate: impl Into<Vec<u8>>,
		host_private_key: impl Into<Vec<u8>>,
		device_certificate: impl Into<Vec<u8>>,
		accept: F,
	) -> Self
	where
		F: Fn(BoxedStream) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = std::io::Result<BoxedStream>> + Send + 'static,
	{
		let accept: StreamUpgrade = Arc::new(
			move |stream: BoxedStream| -> Pin<Box<dyn Future<Output = std::io::Result<BoxedStream>> + Send>> {
				Box::pin(accept(stream))
			},
		);
		Self {
			host_certificate: host_certificate.into(),
			host_private_key: host_private_key.into(),
			device_certificate: device_certificate.into(),
			accept,
		}
	}
}

impl fmt::Debug for FakeTls {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeTls").finish_non_exhaustive()
	}
}

/// Scripted device served by [`FakeMuxer`].
#[derive(Debug, Clone)]
pub struct FakeDevice {
	pub device_id: u32,
	pub udid: String,
	/// `ConnectionType` reported in the device list.
	pub connection_type: String,
	/// Domains keyed by name; the root domain is keyed by `""`.
	pub domains: BTreeMap<String, BTreeMap<String, PropertyValue>>,
	/// Whether `ReadPairRecord` finds a record for this device.
	pub paired: bool,
	/// `Type` returned by `QueryType`.
	pub service_type: String,
	/// Request name the device never answers.
	pub stall_on: Option<String>,
	/// Request name that makes the device drop the connection.
	pub hang_up_on: Option<String>,
	/// Switch to TLS after `StartSession`.
	pub tls: Option<FakeTls>,
	/// Report a loopback address and serve lockdown over TCP.
	pub direct: bool,
}

impl FakeDevice {
	fn new(device_id: u32, udid: &str, connection_type: &str) -> Self {
		let mut domains = BTreeMap::new();
		domains.insert(String::new(), BTreeMap::new());
		Self {
			device_id,
			udid: udid.to_string(),
			connection_type: connection_type.to_string(),
			domains,
			paired: true,
			service_type: lockdown::LOCKDOWN_SERVICE_TYPE.to_string(),
			stall_on: None,
			hang_up_on: None,
			tls: None,
			direct: false,
		}
	}

	pub fn usb(device_id: u32, udid: &str) -> Self {
		Self::new(device_id, udid, "USB")
	}

	pub fn network(device_id: u32, udid: &str) -> Self {
		Self::new(device_id, udid, "Network")
	}

	pub fn with_root_value(self, key: &str, value: impl Into<PropertyValue>) -> Self {
		self.with_value("", key, value)
	}

	pub fn with_value(mut self, domain: &str, key: &str, value: impl Into<PropertyValue>) -> Self {
		self.domains
			.entry(domain.to_string())
			.or_default()
			.insert(key.to_string(), value.into());
		self
	}

	/// Adds a domain that exists but holds nothing.
	pub fn with_empty_domain(mut self, domain: &str) -> Self {
		self.domains.entry(domain.to_string()).or_default();
		self
	}

	pub fn unpaired(mut self) -> Self {
		self.paired = false;
		self
	}

	pub fn with_service_type(mut self, service_type: &str) -> Self {
		self.service_type = service_type.to_string();
		self
	}

	pub fn stalling_on(mut self, request: &str) -> Self {
		self.stall_on = Some(request.to_string());
		self
	}

	pub fn hanging_up_on(mut self, request: &str) -> Self {
		self.hang_up_on = Some(request.to_string());
		self
	}

	pub fn with_tls(mut self, tls: FakeTls) -> Self {
		self.tls = Some(tls);
		self
	}

	/// Serves this device from a loopback TCP listener.
	///
	/// Only the first such device passed to [`FakeMuxer::start`] is served.
	pub fn dialled_directly(mut self) -> Self {
		self.direct = true;
		self
	}
}

/// Counters observed by the fake, for leak and protocol assertions.
#[derive(Debug, Default)]
pub struct FakeStats {
	open_tunnels: AtomicUsize,
	direct_connections: AtomicUsize,
	requests: Mutex<Vec<String>>,
}

impl FakeStats {
	/// Lockdown tunnels whose client end has not been closed yet.
	pub fn open_tunnels(&self) -> usize {
		self.open_tunnels.load(Ordering::SeqCst)
	}

	/// TCP connections accepted by the direct listener.
	pub fn direct_connections(&self) -> usize {
		self.direct_connections.load(Ordering::SeqCst)
	}

	/// Every request name received, muxer and lockdown alike, in order.
	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().clone()
	}

	fn record(&self, name: &str) {
		self.requests.lock().push(name.to_string());
	}
}

/// Fake multiplexer daemon bound to a Unix socket.
pub struct FakeMuxer {
	path: PathBuf,
	stats: Arc<FakeStats>,
	task: JoinHandle<()>,
	direct: Option<(u16, JoinHandle<()>)>,
}

impl FakeMuxer {
	/// Binds `path` and starts serving `devices`.
	pub async fn start(path: impl AsRef<Path>, devices: Vec<FakeDevice>) -> std::io::Result<Self> {
		let path = path.as_ref().to_path_buf();
		let listener = UnixListener::bind(&path)?;
		let stats = Arc::new(FakeStats::default());
		let direct = match devices.iter().find(|d| d.direct).cloned() {
			Some(device) => Some(serve_direct(device, Arc::clone(&stats)).await?),
			None => None,
		};
		let devices = Arc::new(devices);

		let task = {
			let stats = Arc::clone(&stats);
			tokio::spawn(async move {
				while let Ok((stream, _)) = listener.accept().await {
					let stats = Arc::clone(&stats);
					let devices = Arc::clone(&devices);
					tokio::spawn(async move {
						if let Err(err) = serve(stream, &devices, &stats).await {
							debug!(error = %err, "fake muxer connection ended");
						}
					});
				}
			})
		};

		Ok(Self {
			path,
			stats,
			task,
			direct,
		})
	}

	/// Client configuration pointing at this fake.
	///
	/// When a device is served directly, the lockdown port is set to its
	/// listener.
	pub fn config(&self) -> Config {
		let config = Config::default().with_muxer(MuxerAddress::Unix(self.path.clone()));
		match &self.direct {
			Some((port, _)) => config.with_lockdown_port(*port),
			None => config,
		}
	}

	pub fn stats(&self) -> Arc<FakeStats> {
		Arc::clone(&self.stats)
	}

	/// Waits (briefly) until every lockdown tunnel has been closed by the client.
	pub async fn wait_for_tunnels_closed(&self) -> bool {
		for _ in 0..200 {
			if self.stats.open_tunnels() == 0 {
				return true;
			}
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		}
		false
	}
}

impl Drop for FakeMuxer {
	fn drop(&mut self) {
		self.task.abort();
		if let Some((_, task)) = &self.direct {
			task.abort();
		}
	}
}

async fn serve_direct(device: FakeDevice, stats: Arc<FakeStats>) -> std::io::Result<(u16, JoinHandle<()>)> {
	let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
	let port = listener.local_addr()?.port();
	let device = Arc::new(device);
	let task = tokio::spawn(async move {
		while let Ok((stream, _)) = listener.accept().await {
			stats.direct_connections.fetch_add(1, Ordering::SeqCst);
			stats.open_tunnels.fetch_add(1, Ordering::SeqCst);
			let stats = Arc::clone(&stats);
			let device = Arc::clone(&device);
			tokio::spawn(async move {
				let _guard = TunnelGuard(Arc::clone(&stats));
				if let Err(err) = serve_lockdown(Box::new(stream), &device, &stats).await {
					debug!(error = %err, "fake direct connection ended");
				}
			});
		}
	});
	Ok((port, task))
}

/// Decrements the open-tunnel counter however the tunnel ends.
struct TunnelGuard(Arc<FakeStats>);

impl Drop for TunnelGuard {
	fn drop(&mut self) {
		self.0.open_tunnels.fetch_sub(1, Ordering::SeqCst);
	}
}

fn dict(entries: Vec<(&str, PropertyValue)>) -> PropertyValue {
	PropertyValue::Dictionary(
		entries
			.into_iter()
			.map(|(k, v)| (k.to_string(), v))
			.collect(),
	)
}

fn pair_record_bytes(device: &FakeDevice) -> std::io::Result<Vec<u8>> {
	let pem = |label: &str| PropertyValue::Data(format!("-----BEGIN {label}-----\n-----END {label}-----\n").into_bytes());
	let (host_cert, host_key, device_cert) = match &device.tls {
		Some(tls) => (
			PropertyValue::Data(tls.host_certificate.clone()),
			PropertyValue::Data(tls.host_private_key.clone()),
			PropertyValue::Data(tls.device_certificate.clone()),
		),
		None => (pem("CERTIFICATE"), pem("RSA PRIVATE KEY"), pem("CERTIFICATE")),
	};
	dict(vec![
		("HostID", PropertyValue::from(TRUSTED_HOST_ID)),
		("SystemBUID", PropertyValue::from(TEST_SYSTEM_BUID)),
		("HostCertificate", host_cert),
		("HostPrivateKey", host_key),
		("DeviceCertificate", device_cert),
	])
	.to_xml()
	.map_err(std::io::Error::other)
}

async fn write_mux_reply(stream: &mut UnixStream, tag: u32, reply: PropertyValue) -> std::io::Result<()> {
	let payload = reply.to_xml().map_err(std::io::Error::other)?;
	let header = MuxHeader::for_payload(payload.len(), tag).map_err(std::io::Error::other)?;
	stream.write_all(&header.encode()).await?;
	stream.write_all(&payload).await
}

/// `sockaddr_in` for 127.0.0.1 as the daemon reports it.
fn loopback_sockaddr() -> Vec<u8> {
	let mut raw = vec![0u8; 16];
	raw[0] = 16;
	raw[1] = 0x02;
	raw[2..4].copy_from_slice(&LOCKDOWN_PORT.to_be_bytes());
	raw[4..8].copy_from_slice(&Ipv4Addr::LOCALHOST.octets());
	raw
}

fn mux_result(number: u64) -> PropertyValue {
	dict(vec![
		("MessageType", PropertyValue::from("Result")),
		("Number", PropertyValue::from(number)),
	])
}

async fn serve(mut stream: UnixStream, devices: &[FakeDevice], stats: &Arc<FakeStats>) -> std::io::Result<()> {
	let mut header = [0u8; HEADER_LEN];
	stream.read_exact(&mut header).await?;
	let header = MuxHeader::decode(&header).map_err(std::io::Error::other)?;
	let mut payload = vec![0u8; header.payload_len()];
	stream.read_exact(&mut payload).await?;
	let request = PropertyValue::from_plist_bytes(&payload).map_err(std::io::Error::other)?;

	let message = request
		.get("MessageType")
		.and_then(PropertyValue::as_str)
		.unwrap_or_default()
		.to_string();
	stats.record(&message);

	match message.as_str() {
		"ListDevices" => {
			let list = devices
				.iter()
				.map(|d| {
					let mut properties = vec![
						("SerialNumber", PropertyValue::from(d.udid.as_str())),
						("ConnectionType", PropertyValue::from(d.connection_type.as_str())),
						("DeviceID", PropertyValue::from(u64::from(d.device_id))),
					];
					if d.direct {
						properties.push(("NetworkAddress", PropertyValue::Data(loopback_sockaddr())));
					}
					dict(vec![
						("DeviceID", PropertyValue::from(u64::from(d.device_id))),
						("MessageType", PropertyValue::from("Attached")),
						("Properties", dict(properties)),
					])
				})
				.collect();
			write_mux_reply(&mut stream, header.tag, dict(vec![("DeviceList", PropertyValue::Array(list))])).await
		}
		"ReadPairRecord" => {
			let udid = request.get("PairRecordID").and_then(PropertyValue::as_str);
			match devices.iter().find(|d| Some(d.udid.as_str()) == udid && d.paired) {
				Some(device) => {
					let reply = dict(vec![("PairRecordData", PropertyValue::Data(pair_record_bytes(device)?))]);
					write_mux_reply(&mut stream, header.tag, reply).await
				}
				None => write_mux_reply(&mut stream, header.tag, mux_result(2)).await,
			}
		}
		"Connect" => {
			let device_id = request
				.get("DeviceID")
				.and_then(PropertyValue::as_integer)
				.and_then(|i| i.as_u64());
			match devices.iter().find(|d| Some(u64::from(d.device_id)) == device_id) {
				Some(device) => {
					write_mux_reply(&mut stream, header.tag, mux_result(0)).await?;
					stats.open_tunnels.fetch_add(1, Ordering::SeqCst);
					let _guard = TunnelGuard(Arc::clone(stats));
					serve_lockdown(Box::new(stream), device, stats).await
				}
				None => write_mux_reply(&mut stream, header.tag, mux_result(2)).await,
			}
		}
		_ => write_mux_reply(&mut stream, header.tag, mux_result(1)).await,
	}
}

async fn write_lockdown(stream: &mut BoxedStream, reply: PropertyValue) -> std::io::Result<()> {
	let payload = reply.to_xml().map_err(std::io::Error::other)?;
	let frame = lockdown::encode_frame(&payload).map_err(std::io::Error::other)?;
	stream.write_all(&frame).await?;
	stream.flush().await
}

async fn serve_lockdown(mut stream: BoxedStream, device: &FakeDevice, stats: &FakeStats) -> std::io::Result<()> {
	loop {
		let mut prefix = [0u8; LENGTH_PREFIX_LEN];
		if stream.read_exact(&mut prefix).await.is_err() {
			return Ok(());
		}
		let len = lockdown::decode_length(prefix).map_err(std::io::Error::other)?;
		let mut payload = vec![0u8; len];
		stream.read_exact(&mut payload).await?;
		let request = LockdownResponse::from_payload(&payload).map_err(std::io::Error::other)?;
		let name = request.request.clone().unwrap_or_default();
		stats.record(&name);

		if device.stall_on.as_deref() == Some(name.as_str()) {
			// Hold the socket open without answering until the client hangs up.
			let mut sink = [0u8; 64];
			while stream.read(&mut sink).await.unwrap_or(0) > 0 {}
			return Ok(());
		}
		if device.hang_up_on.as_deref() == Some(name.as_str()) {
			return Ok(());
		}

		let mut upgrade = None;
		let mut reply = vec![("Request", PropertyValue::from(name.as_str()))];
		match name.as_str() {
			"QueryType" => reply.push(("Type", PropertyValue::from(device.service_type.as_str()))),
			"StartSession" => {
				let host_id = request.get("HostID").and_then(PropertyValue::as_str);
				if host_id == Some(TRUSTED_HOST_ID) {
					reply.push(("SessionID", PropertyValue::from("FAKE-SESSION")));
					reply.push(("EnableSessionSSL", PropertyValue::from(device.tls.is_some())));
					upgrade = device.tls.as_ref().map(|tls| Arc::clone(&tls.accept));
				} else {
					reply.push(("Error", PropertyValue::from("InvalidHostID")));
				}
			}
			"GetValue" => {
				let domain = request.get("Domain").and_then(PropertyValue::as_str).unwrap_or("");
				let key = request.get("Key").and_then(PropertyValue::as_str);
				match (device.domains.get(domain), key) {
					(Some(values), Some(key)) => match values.get(key) {
						Some(value) => reply.push(("Value", value.clone())),
						None => reply.push(("Error", PropertyValue::from(MISSING_VALUE))),
					},
					(Some(values), None) if values.is_empty() => {}
					(Some(values), None) => reply.push(("Value", PropertyValue::Dictionary(values.clone()))),
					(None, _) => reply.push(("Error", PropertyValue::from(MISSING_VALUE))),
				}
			}
			"StopSession" => {}
			"Goodbye" => {
				write_lockdown(&mut stream, dict(reply)).await?;
				return Ok(());
			}
			_ => reply.push(("Error", PropertyValue::from("InvalidRequest"))),
		}
		write_lockdown(&mut stream, dict(reply)).await?;
		if let Some(accept) = upgrade {
			stream = accept(stream).await?;
			debug!(udid = %device.udid, "fake device switched to TLS");
		}
	}
}
