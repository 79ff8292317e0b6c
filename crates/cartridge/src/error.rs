use std::fmt;

use thiserror::Error;

use crate::verify::Violation;

/// High-level error type shared across cartridge components.
#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("structural error: {0}")]
    Structural(String),
    #[error("{}", describe_violations(.0))]
    InvariantViolation(Vec<Violation>),
    #[error("xml error: {0}")]
    Xml(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CartridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CartridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<walkdir::Error> for CartridgeError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

impl CartridgeError {
    pub fn context<T: fmt::Display>(self, ctx: T) -> Self {
        match self {
            CartridgeError::Structural(msg) => CartridgeError::Structural(format!("{ctx}: {msg}")),
            CartridgeError::InvariantViolation(violations) => {
                CartridgeError::InvariantViolation(violations)
            }
            CartridgeError::Xml(msg) => CartridgeError::Xml(format!("{ctx}: {msg}")),
            CartridgeError::Template(msg) => CartridgeError::Template(format!("{ctx}: {msg}")),
            CartridgeError::Configuration(msg) => {
                CartridgeError::Configuration(format!("{ctx}: {msg}"))
            }
            CartridgeError::Serialization(msg) => {
                CartridgeError::Serialization(format!("{ctx}: {msg}"))
            }
            CartridgeError::Io(err) => CartridgeError::Io(err),
        }
    }

    /// Violations carried by an `InvariantViolation`, empty for every other variant.
    pub fn violations(&self) -> &[Violation] {
        match self {
            CartridgeError::InvariantViolation(violations) => violations,
            _ => &[],
        }
    }
}

fn describe_violations(violations: &[Violation]) -> String {
    match violations.first() {
        None => "invariant violation".to_string(),
        Some(first) if violations.len() == 1 => format!("invariant violation: {first}"),
        Some(first) => format!(
            "{} invariant violations, first: {first}",
            violations.len()
        ),
    }
}
