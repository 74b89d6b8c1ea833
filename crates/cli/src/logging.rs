use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (unknown-domain diagnostics stay visible)
	// 1 (-v) = info for imd, warn for the TLS stack
	// 2+ (-vv, --debug) = debug for everything
	let filter = match verbosity {
		0 => "warn,rustls=error",
		1 => "info,rustls=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity > 0)
		.with_level(true)
		.compact()
		.init();
}
