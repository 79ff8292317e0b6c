use std::path::{Path, PathBuf};

use crate::error::{CliError, ExitStatus};

#[derive(Clone, Copy, Debug, Default)]
pub struct Verbosity {
    pub json: bool,
    pub verbose: bool,
}

/// Reads a required path argument.
pub fn path_arg(matches: &clap::ArgMatches, name: &str) -> Result<PathBuf, CliError> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new(format!("missing <{}>", name.to_uppercase()), ExitStatus::Usage))
}

pub fn require_dir(path: &Path, what: &str) -> Result<(), CliError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(CliError::new(
            format!("{what} {} is not a directory", path.display()),
            ExitStatus::Usage,
        ))
    }
}
