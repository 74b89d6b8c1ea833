use std::io::Write;

use imd::{DeviceIdentifier, DeviceRegistry, Error, HandshakeMode, QueryService, Session, TransportSet};
use tracing::debug;

use crate::error::{CliError, Result};
use crate::output::{CommandResult, DeviceName, write_result};

/// Prints the name of the device with `udid`, reachable over any transport.
pub(super) async fn run(registry: &DeviceRegistry, udid: &str, json: bool, out: &mut dyn Write) -> Result<()> {
	let no_such_device = |source: Error| CliError::NoSuchDevice {
		udid: udid.to_string(),
		source,
	};
	let identifier = DeviceIdentifier::new(udid).map_err(no_such_device)?;

	let mut session = Session::open(registry, &identifier, TransportSet::ALL, HandshakeMode::Simple, None)
		.await
		.map_err(|err| match err {
			Error::DeviceNotFound { .. } | Error::TransportUnavailable { .. } => no_such_device(err),
			other => CliError::Connect(other),
		})?;

	let name = QueryService::standard().device_name(&mut session, None).await;
	if session.is_open() {
		if let Err(err) = session.close().await {
			debug!(error = %err, "closing session failed");
		}
	}
	let name = name.map_err(CliError::DeviceName)?;

	if json {
		let data = DeviceName {
			udid: identifier.to_string(),
			name,
		};
		return write_result(out, &CommandResult::success("name", data));
	}
	writeln!(out, "{name}")?;
	Ok(())
}
