use cartridge::CartridgeError;
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::commands::CommandResult;
use crate::error::CliError;
use crate::util::{path_arg, require_dir};

pub fn command() -> Command {
    Command::new("check")
        .about("Verify a converted package directory without modifying it")
        .arg(
            Arg::new("dir")
                .value_name("DIR")
                .required(true)
                .help("Directory holding the converted package."),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Report true/false items that could not be normalized."),
        )
}

pub fn run(matches: &ArgMatches) -> Result<CommandResult, CliError> {
    let root = path_arg(matches, "dir")?;
    require_dir(&root, "package")?;
    let strict = matches.get_flag("strict");

    let (summary, violations) = match cartridge::check(&root, strict) {
        Ok(summary) => (Some(summary), Vec::new()),
        Err(CartridgeError::InvariantViolation(violations)) => (None, violations),
        Err(err) => return Err(err.into()),
    };
    Ok(CommandResult::Checked {
        root: root.display().to_string(),
        healthy: violations.is_empty(),
        summary,
        violations,
    })
}
