
use std::time::Duration;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use imd::{HandshakeMode, OutputStyle, QueryScope, TransportSet};

use crate::error::{CliError, Result};

/// Cargo-like help colours.
fn help_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

/// List attached devices or print the device name of a given device.
///
/// If UDID is given, the name of the connected device with that UDID is
/// retrieved.
#[derive(Parser, Debug, Default)]
#[command(name = "idevice_id")]
#[command(version)]
#[command(styles = help_styles())]
pub struct Cli {
	/// Device to print the name of
	#[arg(value_name = "UDID")]
	pub udid: Option<String>,

	/// List UDIDs of all devices attached via USB
	#[arg(short, long)]
	pub list: bool,

	/// List UDIDs of all devices available via network
	#[arg(short, long)]
	pub network: bool,

	/// Show full device info
	#[arg(short, long)]
	pub full: bool,

	/// Enable communication debugging
	#[arg(short, long)]
	pub debug: bool,

	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Print device info as an XML property list
	#[arg(short = 'x', long)]
	pub xml: bool,

	/// Print results as a JSON envelope
	#[arg(long)]
	pub json: bool,

	/// Skip pairing verification when reading device info
	#[arg(long)]
	pub simple: bool,

	/// Give up on each device after this many milliseconds
	#[arg(long, value_name = "MS")]
	pub timeout: Option<u64>,

	/// Domain to read device info from (default: root)
	#[arg(long, value_name = "DOMAIN")]
	pub domain: Option<String>,

	/// Single key to read instead of the whole domain
	#[arg(long, value_name = "KEY")]
	pub key: Option<String>,
}

/// What one invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
	/// Print the name of one device.
	ShowName { udid: String },
	/// Print one line per matching registry entry.
	List {
		transports: TransportSet,
		details: bool,
	},
}

/// How `--full` reads device info.
#[derive(Debug, Clone)]
pub struct DetailOptions {
	pub scope: QueryScope,
	pub style: OutputStyle,
	pub handshake: HandshakeMode,
}

impl Cli {
	/// Resolves flags into a [`Mode`].
	///
	/// A UDID always wins. Without `-l`/`-n`, USB devices are listed; a bare
	/// invocation also shows their details.
	pub fn mode(&self) -> Mode {
		if let Some(udid) = &self.udid {
			return Mode::ShowName { udid: udid.clone() };
		}
		let explicit = self.list || self.network;
		let transports = if explicit {
			TransportSet::new(self.list, self.network)
		} else {
			TransportSet::USB
		};
		Mode::List {
			transports,
			details: self.full || self.is_bare(),
		}
	}

	fn is_bare(&self) -> bool {
		!self.list
			&& !self.network
			&& !self.full
			&& !self.debug
			&& self.verbose == 0
			&& !self.xml
			&& !self.json
			&& !self.simple
			&& self.timeout.is_none()
			&& self.domain.is_none()
			&& self.key.is_none()
	}

	/// Log verbosity, with `--debug` counting as `-vv`.
	pub fn verbosity(&self) -> u8 {
		if self.debug { self.verbose.max(2) } else { self.verbose }
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout.map(Duration::from_millis)
	}

	pub fn detail_options(&self) -> Result<DetailOptions> {
		let scope = QueryScope::new(self.domain.as_deref(), self.key.as_deref())
			.map_err(|e| CliError::Usage(e.to_string()))?;
		Ok(DetailOptions {
			scope,
			style: if self.xml {
				OutputStyle::StructuredMarkup
			} else {
				OutputStyle::KeyValueText
			},
			handshake: if self.simple {
				HandshakeMode::Simple
			} else {
				HandshakeMode::Verified
			},
		})
	}
}
