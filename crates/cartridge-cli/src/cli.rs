use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use crate::commands;
use crate::error::{CliError, ExitStatus};
use crate::formatter::{OutputFormat, emit_result};
use crate::util::Verbosity;

const NAME: &str = "cartridge";

pub fn run() -> ExitCode {
    match run_cli(std::env::args()) {
        Ok(code) => code,
        Err(err) => {
            err.print();
            err.exit_code()
        }
    }
}

/// Parses arguments, installs logging, and dispatches to a subcommand.
/// Returns a `sysexits`-compatible `ExitCode`.
pub fn run_cli<I, S>(args: I) -> Result<ExitCode, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let command = build_cli();
    let matches = command.try_get_matches_from(args)?;

    let verbosity = Verbosity {
        json: matches.get_flag("json"),
        verbose: matches.get_flag("verbose"),
    };
    init_tracing(verbosity);
    let output = if verbosity.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let result = dispatch(&matches)?;
    emit_result(result, output)
}

/// Logs go to stderr so stdout only carries the report. `RUST_LOG` wins over
/// `--verbose`.
fn init_tracing(verbosity: Verbosity) {
    let default = if verbosity.verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    Command::new(NAME)
        .about("Downgrade Common Cartridge packages to version 1.1")
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Emit the result as JSON instead of human-readable text."),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log each conversion pass to stderr."),
        )
        .subcommand_required(true)
        .subcommand(commands::convert::command())
        .subcommand(commands::check::command())
}

fn dispatch(matches: &ArgMatches) -> Result<commands::CommandResult, CliError> {
    match matches.subcommand() {
        Some(("convert", sub)) => commands::convert::run(sub),
        Some(("check", sub)) => commands::check::run(sub),
        _ => Err(CliError::new("missing command", ExitStatus::Usage)),
    }
}
