use std::io::Write;

use imd::{DeviceRegistry, PropertyValue, QueryService, RegistryEntry, Session, TransportSet};
use tracing::{debug, warn};

use crate::cli::DetailOptions;
use crate::error::{CliError, Result};
use crate::output::{CommandResult, ListedDevice, property_to_json, write_result};

/// Prints one line per registry entry reachable over `transports`.
///
/// With `details`, each line is the device's info instead of its UDID. A
/// device whose info cannot be read falls back to its UDID so the listing
/// stays complete.
pub(super) async fn run(
	registry: &DeviceRegistry,
	transports: TransportSet,
	details: Option<&DetailOptions>,
	json: bool,
	out: &mut dyn Write,
) -> Result<()> {
	let entries = registry.enumerate().await.map_err(CliError::DeviceList)?;
	let tag_transport = transports == TransportSet::ALL;
	let queries = QueryService::standard();
	let mut listed = Vec::new();

	for entry in entries.filter(|entry| transports.contains(entry.transport)) {
		let info = match details {
			Some(opts) => match read_details(registry, &queries, &entry, opts).await {
				Ok(value) => Some(value),
				Err(err) => {
					warn!(udid = %entry.identifier, error = %err, "could not read device info");
					None
				}
			},
			None => None,
		};

		if json {
			listed.push(ListedDevice {
				udid: entry.identifier.to_string(),
				transport: entry.transport.to_string(),
				details: info.flatten().as_ref().map(property_to_json),
			});
			continue;
		}

		match (info, details) {
			(Some(Some(value)), Some(opts)) => {
				out.write_all(&imd::format(&value, opts.style).map_err(CliError::Render)?)?;
			}
			(Some(None), _) => {}
			_ => write!(out, "{}", entry.identifier)?,
		}
		if tag_transport {
			write!(out, " ({})", entry.transport)?;
		}
		writeln!(out)?;
	}

	if json {
		return write_result(out, &CommandResult::success("list", listed));
	}
	Ok(())
}

async fn read_details(
	registry: &DeviceRegistry,
	queries: &QueryService,
	entry: &RegistryEntry,
	opts: &DetailOptions,
) -> imd::Result<Option<PropertyValue>> {
	let transport = TransportSet::from(entry.transport);
	let mut session = Session::open(registry, &entry.identifier, transport, opts.handshake, None).await?;
	let value = queries.query(&mut session, &opts.scope, None).await;
	if session.is_open() {
		if let Err(err) = session.close().await {
			debug!(udid = %entry.identifier, error = %err, "closing session failed");
		}
	}
	value
}
