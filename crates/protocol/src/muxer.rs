//! usbmuxd plist protocol messages.
//!
//! Every message is a 16-byte little-endian header followed by an XML
//! property-list payload:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────────────┐
//! │ length   │ version  │ message  │ tag      │ plist payload    │
//! │ u32 LE   │ u32 LE   │ u32 LE   │ u32 LE   │ length - 16      │
//! └──────────┴──────────┴──────────┴──────────┴──────────────────┘
//! ```
//!
//! `length` counts the header itself. Only version 1 (plist) with message type
//! 8 (plist) is spoken; the binary protocol of older daemons is not supported.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of the fixed message header.
pub const HEADER_LEN: usize = 16;

/// Protocol version for plist payloads.
pub const PLIST_VERSION: u32 = 1;

/// Message type for plist payloads.
pub const PLIST_MESSAGE: u32 = 8;

/// Largest payload accepted from the daemon.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// Device-side TCP port of the lockdown service.
pub const LOCKDOWN_PORT: u16 = 62078;

/// Library version advertised to the daemon.
const LIB_USBMUX_VERSION: u64 = 3;

/// Fixed header preceding every muxer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxHeader {
	/// Total message length including this header.
	pub length: u32,
	pub version: u32,
	pub message: u32,
	/// Caller-chosen tag echoed back in the reply.
	pub tag: u32,
}

impl MuxHeader {
	/// Builds a plist header for a payload of `payload_len` bytes.
	pub fn for_payload(payload_len: usize, tag: u32) -> Result<Self> {
		if payload_len > MAX_PAYLOAD_LEN {
			return Err(Error::FrameTooLarge {
				len: payload_len,
				limit: MAX_PAYLOAD_LEN,
			});
		}
		Ok(Self {
			length: (HEADER_LEN + payload_len) as u32,
			version: PLIST_VERSION,
			message: PLIST_MESSAGE,
			tag,
		})
	}

	pub fn encode(&self) -> [u8; HEADER_LEN] {
		let mut out = [0u8; HEADER_LEN];
		out[0..4].copy_from_slice(&self.length.to_le_bytes());
		out[4..8].copy_from_slice(&self.version.to_le_bytes());
		out[8..12].copy_from_slice(&self.message.to_le_bytes());
		out[12..16].copy_from_slice(&self.tag.to_le_bytes());
		out
	}

	/// Parses and validates a header received from the daemon.
	pub fn decode(bytes: &[u8]) -> Result<Self> {
		if bytes.len() < HEADER_LEN {
			return Err(Error::TruncatedHeader {
				expected: HEADER_LEN,
				actual: bytes.len(),
			});
		}
		let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
		let header = Self {
			length: word(0),
			version: word(4),
			message: word(8),
			tag: word(12),
		};

		if header.version != PLIST_VERSION {
			return Err(Error::UnsupportedHeader {
				field: "version",
				value: header.version,
			});
		}
		if header.message != PLIST_MESSAGE {
			return Err(Error::UnsupportedHeader {
				field: "message type",
				value: header.message,
			});
		}
		if (header.length as usize) < HEADER_LEN {
			return Err(Error::TruncatedHeader {
				expected: HEADER_LEN,
				actual: header.length as usize,
			});
		}
		let payload_len = header.payload_len();
		if payload_len > MAX_PAYLOAD_LEN {
			return Err(Error::FrameTooLarge {
				len: payload_len,
				limit: MAX_PAYLOAD_LEN,
			});
		}
		Ok(header)
	}

	/// Length of the payload following the header.
	pub fn payload_len(&self) -> usize {
		(self.length as usize).saturating_sub(HEADER_LEN)
	}
}

/// Request sent to the multiplexer daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MuxRequest {
	pub message_type: &'static str,
	pub client_version_string: String,
	pub prog_name: String,
	#[serde(rename = "kLibUSBMuxVersion")]
	pub lib_usbmux_version: u64,
	#[serde(rename = "DeviceID", skip_serializing_if = "Option::is_none")]
	pub device_id: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub port_number: Option<u16>,
	#[serde(rename = "PairRecordID", skip_serializing_if = "Option::is_none")]
	pub pair_record_id: Option<String>,
}

impl MuxRequest {
	fn base(message_type: &'static str, client: &ClientInfo) -> Self {
		Self {
			message_type,
			client_version_string: client.version.clone(),
			prog_name: client.program.clone(),
			lib_usbmux_version: LIB_USBMUX_VERSION,
			device_id: None,
			port_number: None,
			pair_record_id: None,
		}
	}

	pub fn list_devices(client: &ClientInfo) -> Self {
		Self::base("ListDevices", client)
	}

	/// Asks the daemon to tunnel this socket to `port` on the device.
	///
	/// The daemon expects the port in network byte order.
	pub fn connect(client: &ClientInfo, device_id: u32, port: u16) -> Self {
		Self {
			device_id: Some(device_id),
			port_number: Some(port.to_be()),
			..Self::base("Connect", client)
		}
	}

	pub fn read_pair_record(client: &ClientInfo, udid: &str) -> Self {
		Self {
			pair_record_id: Some(udid.to_string()),
			..Self::base("ReadPairRecord", client)
		}
	}

	/// Serializes the request as a header-prefixed frame.
	pub fn to_frame(&self, tag: u32) -> Result<Vec<u8>> {
		let mut payload = Vec::new();
		plist::to_writer_xml(&mut payload, self)?;
		let header = MuxHeader::for_payload(payload.len(), tag)?;
		let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
		frame.extend_from_slice(&header.encode());
		frame.extend_from_slice(&payload);
		Ok(frame)
	}
}

/// Identity this client reports to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
	pub program: String,
	pub version: String,
}

/// Reply to `ListDevices`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceListReply {
	pub device_list: Vec<DeviceRecord>,
}

/// One attached device as reported by the daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRecord {
	#[serde(rename = "DeviceID")]
	pub device_id: u32,
	#[serde(default)]
	pub message_type: Option<String>,
	pub properties: DeviceProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceProperties {
	#[serde(default)]
	pub serial_number: Option<String>,
	#[serde(default)]
	pub connection_type: Option<String>,
	#[serde(rename = "ProductID", default)]
	pub product_id: Option<u32>,
	/// Raw `sockaddr` bytes for network-attached devices.
	#[serde(default)]
	pub network_address: Option<plist::Value>,
}

impl DeviceProperties {
	/// Decodes the network address if the daemon reported one.
	pub fn ip_address(&self) -> Option<IpAddr> {
		self.network_address
			.as_ref()
			.and_then(plist::Value::as_data)
			.and_then(decode_sockaddr)
	}
}

/// Reply carrying a numeric status code.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultReply {
	pub message_type: String,
	pub number: u64,
}

/// Status codes carried by `Result` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxResult {
	Ok,
	BadCommand,
	BadDevice,
	ConnectionRefused,
	BadVersion,
	Other(u64),
}

impl From<u64> for MuxResult {
	fn from(n: u64) -> Self {
		match n {
			0 => MuxResult::Ok,
			1 => MuxResult::BadCommand,
			2 => MuxResult::BadDevice,
			3 => MuxResult::ConnectionRefused,
			6 => MuxResult::BadVersion,
			other => MuxResult::Other(other),
		}
	}
}

impl std::fmt::Display for MuxResult {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			MuxResult::Ok => write!(f, "ok"),
			MuxResult::BadCommand => write!(f, "bad command"),
			MuxResult::BadDevice => write!(f, "bad device"),
			MuxResult::ConnectionRefused => write!(f, "connection refused"),
			MuxResult::BadVersion => write!(f, "bad version"),
			MuxResult::Other(n) => write!(f, "result {n}"),
		}
	}
}

/// Decodes a reply payload into `T`.
pub fn decode_reply<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
	Ok(plist::from_bytes(payload)?)
}

/// Decodes a `sockaddr` blob as reported by the daemon.
///
/// Byte 1 holds the address family. IPv4 addresses live at offset 4, IPv6 at
/// offset 8. Both the BSD (0x1E) and Linux (0x0A) values of `AF_INET6` occur.
pub fn decode_sockaddr(raw: &[u8]) -> Option<IpAddr> {
	match raw.get(1)? {
		0x02 => {
			let b: [u8; 4] = raw.get(4..8)?.try_into().ok()?;
			Some(IpAddr::V4(Ipv4Addr::from(b)))
		}
		0x0A | 0x1E => {
			let b: [u8; 16] = raw.get(8..24)?.try_into().ok()?;
			Some(IpAddr::V6(Ipv6Addr::from(b)))
		}
		_ => None,
	}
}
