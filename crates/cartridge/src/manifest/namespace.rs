use serde::{Deserialize, Serialize};

/// Provenance of an element, decided once from its resolved namespace URI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    Core,
    Metadata,
    LegacyExtension,
    #[default]
    Unknown,
}

impl NamespaceKind {
    pub fn classify(uri: Option<&str>) -> Self {
        let Some(uri) = uri else {
            return NamespaceKind::Unknown;
        };
        let lower = uri.to_ascii_lowercase();
        if ["imscsmd", "imscp_extension", "cpextension"]
            .iter()
            .any(|token| lower.contains(token))
        {
            NamespaceKind::LegacyExtension
        } else if ["/lom/", "imsmd", "ltsc.ieee.org"]
            .iter()
            .any(|token| lower.contains(token))
        {
            NamespaceKind::Metadata
        } else if ["imscp_v1p", "imsccv1p", "imscp"]
            .iter()
            .any(|token| lower.contains(token))
        {
            NamespaceKind::Core
        } else {
            NamespaceKind::Unknown
        }
    }
}

/// One `xmlns` declaration on the manifest root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBinding {
    /// `None` for the default namespace.
    pub prefix: Option<String>,
    pub uri: String,
    pub kind: NamespaceKind,
}

impl NamespaceBinding {
    pub fn new(prefix: Option<&str>, uri: &str) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
            kind: NamespaceKind::classify(Some(uri)),
        }
    }

    pub fn attribute_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        }
    }
}
