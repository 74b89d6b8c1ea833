//! Lockdown service messages.
//!
//! Lockdown frames are a 4-byte big-endian length followed by an XML
//! property list. Requests are dictionaries keyed by `Request`; replies echo
//! the request name and carry either the result fields or an `Error` string.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::PropertyValue;

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest frame accepted from the device.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Service type reported by `QueryType`.
pub const LOCKDOWN_SERVICE_TYPE: &str = "com.apple.mobile.lockdown";

/// Error string lockdown uses when a domain or key holds no value.
pub const MISSING_VALUE: &str = "MissingValue";

/// Request sent to the lockdown service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockdownRequest<'a> {
	pub label: &'a str,
	pub request: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub domain: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub key: Option<&'a str>,
	#[serde(rename = "HostID", skip_serializing_if = "Option::is_none")]
	pub host_id: Option<&'a str>,
	#[serde(rename = "SystemBUID", skip_serializing_if = "Option::is_none")]
	pub system_buid: Option<&'a str>,
	#[serde(rename = "SessionID", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<&'a str>,
}

impl<'a> LockdownRequest<'a> {
	fn named(label: &'a str, request: &'static str) -> Self {
		Self {
			label,
			request,
			domain: None,
			key: None,
			host_id: None,
			system_buid: None,
			session_id: None,
		}
	}

	pub fn query_type(label: &'a str) -> Self {
		Self::named(label, "QueryType")
	}

	pub fn get_value(label: &'a str, domain: Option<&'a str>, key: Option<&'a str>) -> Self {
		Self {
			domain,
			key,
			..Self::named(label, "GetValue")
		}
	}

	pub fn start_session(label: &'a str, host_id: &'a str, system_buid: &'a str) -> Self {
		Self {
			host_id: Some(host_id),
			system_buid: Some(system_buid),
			..Self::named(label, "StartSession")
		}
	}

	pub fn stop_session(label: &'a str, session_id: &'a str) -> Self {
		Self {
			session_id: Some(session_id),
			..Self::named(label, "StopSession")
		}
	}

	pub fn goodbye(label: &'a str) -> Self {
		Self::named(label, "Goodbye")
	}

	/// Serializes the request as a length-prefixed frame.
	pub fn to_frame(&self) -> Result<Vec<u8>> {
		let mut payload = Vec::new();
		plist::to_writer_xml(&mut payload, self)?;
		encode_frame(&payload)
	}
}

/// Prefixes `payload` with its big-endian length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
	if payload.len() > MAX_FRAME_LEN {
		return Err(Error::FrameTooLarge {
			len: payload.len(),
			limit: MAX_FRAME_LEN,
		});
	}
	let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
	frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
	frame.extend_from_slice(payload);
	Ok(frame)
}

/// Reads the payload length from a frame prefix.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_LEN]) -> Result<usize> {
	let len = u32::from_be_bytes(prefix) as usize;
	if len > MAX_FRAME_LEN {
		return Err(Error::FrameTooLarge {
			len,
			limit: MAX_FRAME_LEN,
		});
	}
	Ok(len)
}

/// Reply from the lockdown service.
#[derive(Debug, Clone, PartialEq)]
pub struct LockdownResponse {
	/// Request name echoed by the device.
	pub request: Option<String>,
	/// Error string, if the request failed.
	pub error: Option<String>,
	fields: BTreeMap<String, PropertyValue>,
}

impl LockdownResponse {
	/// Parses a frame payload.
	pub fn from_payload(payload: &[u8]) -> Result<Self> {
		match PropertyValue::from_plist_bytes(payload)? {
			PropertyValue::Dictionary(fields) => Ok(Self::from_fields(fields)),
			other => Err(Error::UnexpectedMessage {
				expected: "dictionary",
				actual: format!("{other:?}"),
			}),
		}
	}

	pub fn from_fields(mut fields: BTreeMap<String, PropertyValue>) -> Self {
		let request = take_string(&mut fields, "Request");
		let error = take_string(&mut fields, "Error");
		Self {
			request,
			error,
			fields,
		}
	}

	/// Fails unless the device echoed `expected` as the request name.
	pub fn expect_request(&self, expected: &'static str) -> Result<()> {
		match self.request.as_deref() {
			Some(name) if name == expected => Ok(()),
			Some(name) => Err(Error::UnexpectedMessage {
				expected,
				actual: name.to_string(),
			}),
			None => Err(Error::MissingField("Request")),
		}
	}

	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.fields.get(key)
	}

	/// Takes the `Value` field out of a `GetValue` reply.
	pub fn into_value(mut self) -> Option<PropertyValue> {
		self.fields.remove("Value")
	}

	/// Service type from a `QueryType` reply.
	pub fn service_type(&self) -> Option<&str> {
		self.get("Type").and_then(PropertyValue::as_str)
	}

	pub fn session_id(&self) -> Option<&str> {
		self.get("SessionID").and_then(PropertyValue::as_str)
	}

	/// Whether `StartSession` asked for the stream to switch to TLS.
	pub fn enable_session_ssl(&self) -> bool {
		self.get("EnableSessionSSL")
			.and_then(PropertyValue::as_bool)
			.unwrap_or(false)
	}

	/// Whether the failure means the value is absent rather than invalid.
	pub fn is_missing_value(&self) -> bool {
		self.error.as_deref() == Some(MISSING_VALUE)
	}
}

/// Removes `key` if it holds a string, leaving other value types in place.
fn take_string(fields: &mut BTreeMap<String, PropertyValue>, key: &str) -> Option<String> {
	match fields.remove(key)? {
		PropertyValue::String(s) => Some(s),
		other => {
			fields.insert(key.to_string(), other);
			None
		}
	}
}

/// Host-side pairing material for one device.
///
/// Certificates and keys are kept as PEM text exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
	pub host_id: String,
	pub system_buid: String,
	pub host_certificate: Vec<u8>,
	pub host_private_key: Vec<u8>,
	pub device_certificate: Vec<u8>,
}

impl PairRecord {
	/// Parses a pair record property list (XML or binary).
	pub fn from_plist_bytes(bytes: &[u8]) -> Result<Self> {
		Self::from_value(&PropertyValue::from_plist_bytes(bytes)?)
	}

	pub fn from_value(value: &PropertyValue) -> Result<Self> {
		let string = |key: &'static str| {
			value
				.get(key)
				.and_then(PropertyValue::as_str)
				.map(str::to_string)
				.ok_or(Error::MissingField(key))
		};
		let data = |key: &'static str| match value.get(key) {
			Some(PropertyValue::Data(d)) => Some(d.clone()),
			Some(PropertyValue::String(s)) => Some(s.clone().into_bytes()),
			_ => None,
		};

		Ok(Self {
			host_id: string("HostID")?,
			system_buid: string("SystemBUID")?,
			host_certificate: data("HostCertificate").ok_or(Error::MissingField("HostCertificate"))?,
			host_private_key: data("HostPrivateKey").ok_or(Error::MissingField("HostPrivateKey"))?,
			device_certificate: data("DeviceCertificate")
				.ok_or(Error::MissingField("DeviceCertificate"))?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn payload_dict(frame: &[u8]) -> plist::Dictionary {
		let len = decode_length(frame[..4].try_into().unwrap()).unwrap();
		assert_eq!(len, frame.len() - LENGTH_PREFIX_LEN);
		plist::Value::from_reader_xml(&frame[4..])
			.unwrap()
			.into_dictionary()
			.unwrap()
	}

	#[test]
	fn get_value_omits_absent_scope_fields() {
		let frame = LockdownRequest::get_value("idevice_id", None, Some("DeviceName"))
			.to_frame()
			.unwrap();
		let dict = payload_dict(&frame);

		assert_eq!(dict.get("Request").and_then(plist::Value::as_string), Some("GetValue"));
		assert_eq!(dict.get("Label").and_then(plist::Value::as_string), Some("idevice_id"));
		assert_eq!(dict.get("Key").and_then(plist::Value::as_string), Some("DeviceName"));
		assert!(dict.get("Domain").is_none());
	}

	#[test]
	fn start_session_carries_host_identity() {
		let frame = LockdownRequest::start_session("t", "HOST", "BUID").to_frame().unwrap();
		let dict = payload_dict(&frame);
		assert_eq!(dict.get("HostID").and_then(plist::Value::as_string), Some("HOST"));
		assert_eq!(dict.get("SystemBUID").and_then(plist::Value::as_string), Some("BUID"));
	}

	#[test]
	fn length_prefix_is_big_endian() {
		let frame = encode_frame(b"abc").unwrap();
		assert_eq!(&frame[..4], &[0, 0, 0, 3]);
		assert!(matches!(
			decode_length([0xFF, 0xFF, 0xFF, 0xFF]),
			Err(Error::FrameTooLarge { .. })
		));
	}

	#[test]
	fn response_splits_out_request_and_error() {
		let mut fields = BTreeMap::new();
		fields.insert("Request".to_string(), PropertyValue::from("GetValue"));
		fields.insert("Error".to_string(), PropertyValue::from(MISSING_VALUE));
		let response = LockdownResponse::from_fields(fields);

		assert!(response.expect_request("GetValue").is_ok());
		assert!(response.expect_request("QueryType").is_err());
		assert!(response.is_missing_value());
		assert_eq!(response.into_value(), None);
	}

	#[test]
	fn start_session_reply_fields() {
		let mut fields = BTreeMap::new();
		fields.insert("Request".to_string(), PropertyValue::from("StartSession"));
		fields.insert("SessionID".to_string(), PropertyValue::from("S-1"));
		fields.insert("EnableSessionSSL".to_string(), PropertyValue::from(true));
		let response = LockdownResponse::from_fields(fields);

		assert_eq!(response.session_id(), Some("S-1"));
		assert!(response.enable_session_ssl());
		assert!(response.error.is_none());
	}

	#[test]
	fn pair_record_requires_host_identity() {
		let mut fields = BTreeMap::new();
		fields.insert("SystemBUID".to_string(), PropertyValue::from("BUID"));
		let err = PairRecord::from_value(&PropertyValue::Dictionary(fields)).unwrap_err();
		assert!(matches!(err, Error::MissingField("HostID")));
	}
}
