use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::ResourceKind;
use crate::error::CartridgeError;

/// Resource kinds a caller can ask to remove outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExcludeKind {
    #[serde(alias = "lti")]
    ExternalTool,
    #[serde(alias = "qti")]
    Assessment,
    Discussion,
    #[serde(alias = "weblink")]
    WebLink,
    #[serde(alias = "page")]
    ContentPage,
    #[serde(alias = "file")]
    GenericFile,
}

impl ExcludeKind {
    pub const ALL: [ExcludeKind; 6] = [
        ExcludeKind::ExternalTool,
        ExcludeKind::Assessment,
        ExcludeKind::Discussion,
        ExcludeKind::WebLink,
        ExcludeKind::ContentPage,
        ExcludeKind::GenericFile,
    ];

    pub fn as_str(self) -> &'static str {
        self.resource_kind().as_str()
    }

    pub fn resource_kind(self) -> ResourceKind {
        match self {
            ExcludeKind::ExternalTool => ResourceKind::ExternalTool,
            ExcludeKind::Assessment => ResourceKind::Assessment,
            ExcludeKind::Discussion => ResourceKind::Discussion,
            ExcludeKind::WebLink => ResourceKind::WebLink,
            ExcludeKind::ContentPage => ResourceKind::ContentPage,
            ExcludeKind::GenericFile => ResourceKind::GenericFile,
        }
    }

    pub fn matches(self, kind: ResourceKind) -> bool {
        self.resource_kind() == kind
    }

    /// Parses a comma-separated list such as `qti,web-link`.
    pub fn parse_list(value: &str) -> Result<BTreeSet<ExcludeKind>, CartridgeError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for ExcludeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExcludeKind {
    type Err = CartridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external-tool" | "lti" => Ok(ExcludeKind::ExternalTool),
            "assessment" | "qti" => Ok(ExcludeKind::Assessment),
            "discussion" => Ok(ExcludeKind::Discussion),
            "web-link" | "weblink" => Ok(ExcludeKind::WebLink),
            "content-page" | "page" => Ok(ExcludeKind::ContentPage),
            "generic-file" | "file" => Ok(ExcludeKind::GenericFile),
            other => Err(CartridgeError::Configuration(format!(
                "unknown resource kind `{other}`; expected one of {}",
                ExcludeKind::ALL.map(ExcludeKind::as_str).join(", ")
            ))),
        }
    }
}

/// Caller-supplied policy for one conversion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConvertOptions {
    /// Lets malformed two-choice items become multiple-choice items instead
    /// of being skipped.
    pub fallback_to_multiple_choice: bool,
    pub exclude_kinds: BTreeSet<ExcludeKind>,
    /// Treat any skipped two-choice item as a consistency violation.
    pub strict_answer_keys: bool,
    pub remove_external_tools: bool,
    pub remove_assignment_extensions: bool,
    pub remove_empty_assessments: bool,
    /// Convert even when the package is already at the target version.
    pub force: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            fallback_to_multiple_choice: false,
            exclude_kinds: BTreeSet::new(),
            strict_answer_keys: false,
            remove_external_tools: true,
            remove_assignment_extensions: true,
            remove_empty_assessments: true,
            force: false,
        }
    }
}

impl ConvertOptions {
    pub fn from_yaml(text: &str) -> Result<Self, CartridgeError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, CartridgeError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text).map_err(|err| err.context(path.display()))
    }

    pub fn excludes(&self, kind: ResourceKind) -> Option<ExcludeKind> {
        self.exclude_kinds
            .iter()
            .copied()
            .find(|exclude| exclude.matches(kind))
    }
}
