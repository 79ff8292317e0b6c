//! Semantic kinds of manifest resources.
//!
//! Every predicate is pure over a resource and the payload tree. [`classify`]
//! tests the kinds in a fixed order: payload evidence for assessments,
//! discussions and web links outranks a page-like file extension.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::href;
use crate::manifest::{Manifest, Resource};
use crate::payload::PayloadTree;
use crate::xml::{self, RootTag};

const EXTERNAL_TOOL_TYPE_TOKENS: [&str; 3] = ["imsbasiclti", "basiclti", "lti_link"];
const EXTERNAL_TOOL_ROOT: &str = "cartridge_basiclti_link";
const EXTERNAL_TOOL_NAMESPACE_TOKENS: [&str; 2] = ["imslticc", "imsbasiclti"];

const ASSIGNMENT_TYPE_PREFIXES: [&str; 2] = [
    "assignment_xmlv",
    "associatedcontent/imscc_xmlv1p1/assignment",
];
const ASSIGNMENT_FILE_NAME: &str = "assignment.xml";

const LEGACY_QUIZ_ROOT: &str = "questestinterop";
const STRUCTURED_QUIZ_ROOTS: [&str; 2] = ["assessmentItem", "assessmentTest"];
const STRUCTURED_QUIZ_NAMESPACE_TOKEN: &str = "imsqti_v2";
const QUIZ_FILE_SUFFIXES: [&str; 2] = ["assessment_qti.xml", ".xml.qti"];
const VENDOR_HINTS: [&str; 2] = ["canvas", "instructure"];

const PAGE_EXTENSIONS: [&str; 2] = [".html", ".htm"];
const PAGE_TYPE_TOKEN: &str = "learning-application-resource";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ExternalTool,
    AssignmentExtension,
    Assessment,
    Discussion,
    WebLink,
    ContentPage,
    GenericFile,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ExternalTool => "external-tool",
            ResourceKind::AssignmentExtension => "assignment-extension",
            ResourceKind::Assessment => "assessment",
            ResourceKind::Discussion => "discussion",
            ResourceKind::WebLink => "web-link",
            ResourceKind::ContentPage => "content-page",
            ResourceKind::GenericFile => "generic-file",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(resource: &Resource, payload: &PayloadTree) -> ResourceKind {
    if is_external_tool(resource, payload) {
        ResourceKind::ExternalTool
    } else if is_assignment_extension(resource) {
        ResourceKind::AssignmentExtension
    } else if is_assessment(resource, payload) {
        ResourceKind::Assessment
    } else if is_discussion(resource, payload) {
        ResourceKind::Discussion
    } else if is_web_link(resource, payload) {
        ResourceKind::WebLink
    } else if is_content_page(resource) {
        ResourceKind::ContentPage
    } else {
        ResourceKind::GenericFile
    }
}

pub fn is_external_tool(resource: &Resource, payload: &PayloadTree) -> bool {
    let declared = resource.resource_type.to_ascii_lowercase();
    EXTERNAL_TOOL_TYPE_TOKENS
        .iter()
        .any(|token| declared.contains(token))
        || payload_roots(resource, payload).iter().any(|root| {
            root.local == EXTERNAL_TOOL_ROOT
                || namespace_contains_any(root, &EXTERNAL_TOOL_NAMESPACE_TOKENS)
        })
}

pub fn is_assignment_extension(resource: &Resource) -> bool {
    let declared = resource.resource_type.to_ascii_lowercase();
    if ASSIGNMENT_TYPE_PREFIXES
        .iter()
        .any(|prefix| declared.starts_with(prefix))
    {
        return true;
    }
    resource.primary_reference().is_some_and(|reference| {
        let decoded = href::decode(reference).to_ascii_lowercase();
        decoded.rsplit('/').next() == Some(ASSIGNMENT_FILE_NAME)
    })
}

pub fn is_assessment(resource: &Resource, payload: &PayloadTree) -> bool {
    if resource.resource_type.to_ascii_lowercase().contains("imsqti") {
        return true;
    }
    if resource.references().any(|reference| {
        let lower = reference.to_ascii_lowercase();
        QUIZ_FILE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
    }) {
        return true;
    }
    payload_roots(resource, payload).iter().any(|root| {
        root.local == LEGACY_QUIZ_ROOT
            || STRUCTURED_QUIZ_ROOTS.contains(&root.local.as_str())
            || namespace_contains_any(root, &["imsqti"])
    })
}

pub fn is_discussion(resource: &Resource, payload: &PayloadTree) -> bool {
    descriptor_family(resource, payload, "imsdt")
}

pub fn is_web_link(resource: &Resource, payload: &PayloadTree) -> bool {
    descriptor_family(resource, payload, "imswl")
}

pub fn is_content_page(resource: &Resource) -> bool {
    let looks_like_page = resource.primary_reference().is_some_and(|reference| {
        let lower = reference.to_ascii_lowercase();
        PAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    });
    looks_like_page
        || resource
            .resource_type
            .to_ascii_lowercase()
            .contains(PAGE_TYPE_TOKEN)
}

fn descriptor_family(resource: &Resource, payload: &PayloadTree, token: &str) -> bool {
    resource.resource_type.to_ascii_lowercase().contains(token)
        || payload_roots(resource, payload)
            .iter()
            .any(|root| namespace_contains_any(root, &[token]))
}

fn namespace_contains_any(root: &RootTag, tokens: &[&str]) -> bool {
    root.namespace.as_deref().is_some_and(|ns| {
        let lower = ns.to_ascii_lowercase();
        tokens.iter().any(|token| lower.contains(token))
    })
}

/// Root tags of the XML payload files a resource references.
fn payload_roots(resource: &Resource, payload: &PayloadTree) -> Vec<RootTag> {
    resource
        .references()
        .filter(|reference| {
            let lower = reference.to_ascii_lowercase();
            lower.ends_with(".xml") || lower.ends_with(".qti")
        })
        .filter_map(|reference| href::locate(payload, reference))
        .filter_map(|key| payload.get(&key).and_then(xml::sniff_root))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentFlavor {
    /// QTI 1.2 `questestinterop`; the only flavor whose answer keys are rewritten.
    LegacyFlat,
    /// QTI 2.x items and tests.
    Structured,
    Unknown,
}

impl std::fmt::Display for AssessmentFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AssessmentFlavor::LegacyFlat => "legacy-flat",
            AssessmentFlavor::Structured => "structured",
            AssessmentFlavor::Unknown => "unknown",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlavorAudit {
    pub flavor: AssessmentFlavor,
    pub vendor_extensions: bool,
    /// Payload file the flavor was read from.
    pub path: Option<String>,
}

impl FlavorAudit {
    /// Content the converter leaves alone but an importer may reject.
    pub fn import_risk(&self) -> bool {
        match self.flavor {
            AssessmentFlavor::Structured | AssessmentFlavor::Unknown => true,
            AssessmentFlavor::LegacyFlat => self.vendor_extensions,
        }
    }
}

/// Flavor of one quiz payload, plus whether vendor extensions are mentioned.
pub fn sniff_flavor(bytes: &[u8]) -> (AssessmentFlavor, bool) {
    let lowered = String::from_utf8_lossy(bytes).to_ascii_lowercase();
    let vendor = VENDOR_HINTS.iter().any(|hint| lowered.contains(hint));
    let flavor = match xml::sniff_root(bytes) {
        Some(root)
            if STRUCTURED_QUIZ_ROOTS.contains(&root.local.as_str())
                || namespace_contains_any(&root, &[STRUCTURED_QUIZ_NAMESPACE_TOKEN]) =>
        {
            AssessmentFlavor::Structured
        }
        Some(root) if root.local == LEGACY_QUIZ_ROOT => AssessmentFlavor::LegacyFlat,
        Some(_) => AssessmentFlavor::Unknown,
        None if lowered.contains(STRUCTURED_QUIZ_NAMESPACE_TOKEN) => AssessmentFlavor::Structured,
        None => AssessmentFlavor::Unknown,
    };
    (flavor, vendor)
}

/// Audits the first few XML payloads of an assessment resource; the first
/// recognizable flavor wins.
pub fn assessment_flavor(resource: &Resource, payload: &PayloadTree) -> FlavorAudit {
    let mut seen = Vec::new();
    for reference in resource.references() {
        let Some(key) = href::locate(payload, reference) else {
            continue;
        };
        let lower = key.to_ascii_lowercase();
        if !(lower.ends_with(".xml") || lower.ends_with(".qti")) || seen.contains(&key) {
            continue;
        }
        seen.push(key.clone());
        if seen.len() > 5 {
            break;
        }
        let Some(bytes) = payload.get(&key) else {
            continue;
        };
        let (flavor, vendor_extensions) = sniff_flavor(bytes);
        if flavor != AssessmentFlavor::Unknown {
            return FlavorAudit {
                flavor,
                vendor_extensions,
                path: Some(key),
            };
        }
    }
    FlavorAudit {
        flavor: AssessmentFlavor::Unknown,
        vendor_extensions: false,
        path: None,
    }
}

/// Payload keys of the XML files referenced by every assessment in
/// `manifest` and, transitively, by the resources it depends on. Files of
/// removed resources fall outside this set.
pub fn assessment_payload_paths(manifest: &Manifest, payload: &PayloadTree) -> BTreeSet<String> {
    let mut pending: Vec<&Resource> = manifest
        .resources
        .iter()
        .filter(|resource| is_assessment(resource, payload))
        .collect();
    let mut visited = BTreeSet::new();
    let mut paths = BTreeSet::new();
    while let Some(resource) = pending.pop() {
        if !visited.insert(resource.identifier.as_str()) {
            continue;
        }
        for reference in resource.references() {
            let lower = reference.to_ascii_lowercase();
            if !(lower.ends_with(".xml") || lower.ends_with(".qti")) {
                continue;
            }
            if let Some(key) = href::locate(payload, reference) {
                paths.insert(key);
            }
        }
        pending.extend(
            resource
                .dependencies
                .iter()
                .filter_map(|dependency| manifest.resource(dependency)),
        );
    }
    paths
}

/// Question items in a quiz payload; zero for anything unparsable.
pub fn question_item_count(bytes: &[u8]) -> usize {
    let Ok(root) = xml::parse(bytes) else {
        return 0;
    };
    let own = usize::from(root.local_name() == "assessmentItem");
    own + root.find_all("item").len() + root.find_all("assessmentItemRef").len()
}
