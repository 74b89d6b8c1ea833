use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

/// Process exit status for list-mode failures (`-1` as an unsigned byte).
pub const EXIT_LIST_FAILED: u8 = 255;

/// Process exit status for name-mode failures (`-2` as an unsigned byte).
pub const EXIT_NAME_FAILED: u8 = 254;

/// Process exit status for bad arguments or configuration.
pub const EXIT_USAGE: u8 = 1;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("Unable to retrieve device list!")]
	DeviceList(#[source] imd::Error),

	#[error("No device with UDID {udid} attached.")]
	NoSuchDevice {
		udid: String,
		#[source]
		source: imd::Error,
	},

	#[error("Connecting to device failed!")]
	Connect(#[source] imd::Error),

	#[error("Could not get device name!")]
	DeviceName(#[source] imd::Error),

	#[error("could not render device info: {0}")]
	Render(#[source] imd::Error),

	#[error("{0}")]
	Usage(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	fn library_error(&self) -> Option<&imd::Error> {
		match self {
			CliError::DeviceList(err)
			| CliError::NoSuchDevice { source: err, .. }
			| CliError::Connect(err)
			| CliError::DeviceName(err)
			| CliError::Render(err) => Some(err),
			_ => None,
		}
	}

	pub fn code(&self) -> ErrorCode {
		if self.library_error().is_some_and(imd::Error::is_timeout) {
			return ErrorCode::Timeout;
		}
		match self {
			CliError::DeviceList(_) => ErrorCode::DeviceListFailed,
			CliError::NoSuchDevice { .. } => ErrorCode::DeviceNotFound,
			CliError::Connect(_) => ErrorCode::ConnectFailed,
			CliError::DeviceName(_) => ErrorCode::DeviceNameFailed,
			CliError::Render(_) => ErrorCode::InternalError,
			CliError::Usage(_) => ErrorCode::InvalidInput,
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) => ErrorCode::InternalError,
		}
	}

	pub fn exit_code(&self) -> u8 {
		match self {
			CliError::DeviceList(_) => EXIT_LIST_FAILED,
			CliError::NoSuchDevice { .. } | CliError::Connect(_) | CliError::DeviceName(_) => EXIT_NAME_FAILED,
			CliError::Render(_) | CliError::Usage(_) | CliError::Io(_) | CliError::Json(_) => EXIT_USAGE,
		}
	}

	/// Structured form for `--json` output.
	pub fn to_command_error(&self) -> CommandError {
		CommandError {
			code: self.code(),
			message: self.to_string(),
			details: self.library_error().map(|err| serde_json::json!({ "cause": err.to_string() })),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn list_and_name_failures_keep_historic_exit_codes() {
		let unavailable = || imd::Error::TransportUnavailable {
			address: "UNIX:/var/run/usbmuxd".into(),
			source: std::io::Error::from(std::io::ErrorKind::NotFound),
		};
		assert_eq!(CliError::DeviceList(unavailable()).exit_code(), 255);
		assert_eq!(CliError::Connect(unavailable()).exit_code(), 254);
		assert_eq!(CliError::Usage("x".into()).exit_code(), 1);
	}

	#[test]
	fn timeouts_are_classified_before_mode() {
		let err = CliError::DeviceName(imd::Error::Timeout {
			operation: "query",
			ms: 100,
		});
		assert_eq!(err.code(), ErrorCode::Timeout);
		assert_eq!(err.exit_code(), EXIT_NAME_FAILED);
	}

	#[test]
	fn messages_match_tool_wording() {
		let err = CliError::NoSuchDevice {
			udid: "C".into(),
			source: imd::Error::DeviceNotFound { identifier: "C".into() },
		};
		assert_eq!(err.to_string(), "No device with UDID C attached.");

		let structured = err.to_command_error();
		assert_eq!(structured.code, ErrorCode::DeviceNotFound);
		assert_eq!(structured.details.unwrap()["cause"], "device C not found");
	}
}
