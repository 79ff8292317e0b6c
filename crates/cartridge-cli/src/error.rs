use std::fmt;
use std::process::ExitCode;

use cartridge::CartridgeError;
use clap::error::ErrorKind as ClapErrorKind;

/// `sysexits` statuses the binary can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Ok = 0,
    Usage = 64,
    Data = 65,
    Software = 70,
    Io = 71,
    Config = 78,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<&CartridgeError> for ExitStatus {
    fn from(err: &CartridgeError) -> Self {
        match err {
            CartridgeError::Structural(_)
            | CartridgeError::InvariantViolation(_)
            | CartridgeError::Xml(_) => ExitStatus::Data,
            CartridgeError::Configuration(_) => ExitStatus::Config,
            CartridgeError::Template(_) | CartridgeError::Serialization(_) => {
                ExitStatus::Software
            }
            CartridgeError::Io(_) => ExitStatus::Io,
        }
    }
}

/// A failed invocation: what to print on stderr and how to exit.
#[derive(Debug)]
pub struct CliError {
    message: String,
    status: ExitStatus,
}

impl CliError {
    pub fn new(message: impl Into<String>, status: ExitStatus) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status.code())
    }

    pub fn print(&self) {
        if !self.message.is_empty() {
            eprintln!("{}", self.message);
        }
    }
}

/// The first violation is part of the error's own message; the rest follow
/// as an indented list.
impl From<CartridgeError> for CliError {
    fn from(err: CartridgeError) -> Self {
        let status = ExitStatus::from(&err);
        let mut message = err.to_string();
        for violation in err.violations().iter().skip(1) {
            message.push_str(&format!("\n  - {violation}"));
        }
        CliError::new(message, status)
    }
}

/// Help and version output is printed by clap itself and exits cleanly.
impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> Self {
        match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                let _ = err.print();
                CliError::new(String::new(), ExitStatus::Ok)
            }
            _ => CliError::new(err.to_string(), ExitStatus::Usage),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}
