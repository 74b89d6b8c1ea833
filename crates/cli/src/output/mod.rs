//! Text and JSON rendering of command results.
//!
//! Text output is what the tool has always printed: one line per device, or
//! the device name. With `--json`, every invocation instead writes a single
//! envelope to stdout:
//!
//! ```json
//! { "ok": true, "command": "list", "data": [{ "udid": "…", "transport": "USB" }] }
//! ```
//!
//! ```json
//! { "ok": false, "command": "name", "error": { "code": "DEVICE_NOT_FOUND", "message": "…" } }
//! ```


use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use imd::PropertyValue;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Result envelope for `--json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T> {
	pub ok: bool,

	/// `list` or `name`
	pub command: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
}

impl<T: Serialize> CommandResult<T> {
	pub fn success(command: &str, data: T) -> Self {
		Self {
			ok: true,
			command: command.to_string(),
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(command: &str, error: CommandError) -> Self {
		Self {
			ok: false,
			command: command.to_string(),
			data: None,
			error: Some(error),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,

	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Stable error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// The multiplexer could not be asked for devices
	DeviceListFailed,
	/// No attached device has the requested UDID
	DeviceNotFound,
	/// Lockdown could not be reached or refused the session
	ConnectFailed,
	/// The device did not report a usable name
	DeviceNameFailed,
	Timeout,
	InvalidInput,
	IoError,
	InternalError,
}

/// One listed device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedDevice {
	pub udid: String,
	pub transport: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Result of name mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceName {
	pub udid: String,
	pub name: String,
}

/// Converts a property tree to JSON; data blobs become base64 strings.
pub fn property_to_json(value: &PropertyValue) -> serde_json::Value {
	use serde_json::Value;

	match value {
		PropertyValue::String(s) => Value::String(s.clone()),
		PropertyValue::Integer(i) => match (i.as_i64(), i.as_u64()) {
			(Some(signed), _) => Value::from(signed),
			(None, Some(unsigned)) => Value::from(unsigned),
			(None, None) => Value::String(i.to_string()),
		},
		PropertyValue::Real(r) => serde_json::Number::from_f64(*r).map_or(Value::Null, Value::Number),
		PropertyValue::Boolean(b) => Value::Bool(*b),
		PropertyValue::Data(bytes) => Value::String(STANDARD.encode(bytes)),
		PropertyValue::Array(items) => Value::Array(items.iter().map(property_to_json).collect()),
		PropertyValue::Dictionary(entries) => Value::Object(
			entries
				.iter()
				.map(|(k, v)| (k.clone(), property_to_json(v)))
				.collect(),
		),
	}
}

/// Writes `result` as one line of JSON.
pub fn write_result<T: Serialize>(out: &mut dyn Write, result: &CommandResult<T>) -> Result<(), CliError> {
	serde_json::to_writer(&mut *out, result)?;
	writeln!(out)?;
	Ok(())
}

/// Prints `err` for humans on stderr.
pub fn print_error_stderr(err: &CliError) {
	let _ = writeln!(io::stderr().lock(), "ERROR: {err}");
}
