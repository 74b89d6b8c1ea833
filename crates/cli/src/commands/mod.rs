//! Command implementations.
//!
//! Each mode writes its result to `out` so tests can capture it; errors are
//! returned for `main` to report.

mod list;
mod name;

use std::io::Write;

use imd::{Config, DeviceRegistry};
use tracing::debug;

use crate::cli::{Cli, Mode};
use crate::error::{CliError, Result};

/// Builds the registry from the environment and `cli`, then runs its mode.
pub async fn dispatch(cli: &Cli, out: &mut dyn Write) -> Result<()> {
	let config = Config::from_env()
		.map_err(CliError::Usage)?
		.with_timeout(cli.timeout());
	debug!(muxer = %config.muxer, "using device multiplexer");
	let registry = DeviceRegistry::new(config);

	match cli.mode() {
		Mode::ShowName { udid } => name::run(&registry, &udid, cli.json, out).await,
		Mode::List { transports, details } => {
			let details = if details { Some(cli.detail_options()?) } else { None };
			list::run(&registry, transports, details.as_ref(), cli.json, out).await
		}
	}
}

/// Flushes `out` and folds a failed flush into `outcome`.
///
/// The command's own error wins when both fail.
pub fn finish(outcome: Result<()>, out: &mut dyn Write) -> Result<()> {
	let flushed = out.flush();
	outcome?;
	flushed?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;

	/// Accepts writes but fails to flush them.
	struct LostOutput;

	impl Write for LostOutput {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
		}
	}

	#[test]
	fn failed_flush_is_an_io_error() {
		let err = finish(Ok(()), &mut LostOutput).unwrap_err();
		assert!(matches!(err, CliError::Io(_)), "got {err:?}");
		assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
	}

	#[test]
	fn command_error_wins_over_flush_error() {
		let err = finish(Err(CliError::Usage("bad".into())), &mut LostOutput).unwrap_err();
		assert!(matches!(err, CliError::Usage(_)), "got {err:?}");
	}

	#[test]
	fn flushed_success_stays_success() {
		let mut out = Vec::new();
		assert!(finish(Ok(()), &mut out).is_ok());
	}
}
