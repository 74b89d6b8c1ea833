use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use imd_cli::cli::{Cli, Mode};
use imd_cli::error::CliError;
use imd_cli::output::{self, CommandResult};
use imd_cli::{commands, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbosity());

	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	let outcome = commands::dispatch(&cli, &mut out).await;
	let outcome = commands::finish(outcome, &mut out);

	match outcome {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			handle_error(&err, &cli, &mut out);
			ExitCode::from(err.exit_code())
		}
	}
}

fn handle_error(err: &CliError, cli: &Cli, out: &mut dyn Write) {
	// Always print to stderr for humans
	output::print_error_stderr(err);

	if cli.json {
		let command = match cli.mode() {
			Mode::ShowName { .. } => "name",
			Mode::List { .. } => "list",
		};
		let result: CommandResult<()> = CommandResult::failure(command, err.to_command_error());
		let _ = output::write_result(out, &result);
	}
}
