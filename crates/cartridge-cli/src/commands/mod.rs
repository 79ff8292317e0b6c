use cartridge::{ChangeReport, CheckSummary, Violation};
use serde::Serialize;

use crate::error::ExitStatus;

pub mod check;
pub mod convert;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResult {
    Converted {
        source: String,
        destination: String,
        report: ChangeReport,
    },
    Checked {
        root: String,
        summary: Option<CheckSummary>,
        violations: Vec<Violation>,
        healthy: bool,
    },
}

impl CommandResult {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            CommandResult::Converted { .. } => ExitStatus::Ok,
            CommandResult::Checked { healthy, .. } => {
                if *healthy {
                    ExitStatus::Ok
                } else {
                    ExitStatus::Data
                }
            }
        }
    }
}
