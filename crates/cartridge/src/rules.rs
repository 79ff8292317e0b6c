//! Rewrite rules that move a manifest from the 1.2/1.3 dialects to 1.1.
//!
//! Two levels: structural rules operate on [`Manifest`] before it is written,
//! then [`rewrite_text`] runs a narrow, ordered substitution table over the
//! serialized text. Payload descriptors get the table alone through
//! [`substitute_text`]. All of them are idempotent.
//! [`ensure_no_forbidden_markers`] is the last check on the written manifest.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use semver::Version;
use serde::Serialize;

use crate::error::CartridgeError;
use crate::manifest::{Manifest, NamespaceBinding, NamespaceKind, SchemaLocation, XSI_NAMESPACE};
use crate::verify::Violation;
use crate::xml::Element;

pub const TARGET_VERSION: &str = "1.1.0";

pub const IMSCP_V1P1: &str = "http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1";
pub const LOM_MANIFEST: &str = "http://ltsc.ieee.org/xsd/imsccv1p1/LOM/manifest";
pub const LOM_RESOURCE: &str = "http://ltsc.ieee.org/xsd/imsccv1p1/LOM/resource";

pub const LOM_MANIFEST_PREFIX: &str = "lom";
pub const LOM_RESOURCE_PREFIX: &str = "lomr";

/// Schema location pairs of a 1.1 manifest, in the order importers expect.
pub const CANONICAL_SCHEMA_LOCATIONS: [(&str, &str); 3] = [
    (
        IMSCP_V1P1,
        "http://www.imsglobal.org/profile/cc/ccv1p1/ccv1p1_imscp_v1p1_v1p0.xsd",
    ),
    (
        LOM_MANIFEST,
        "http://www.imsglobal.org/profile/cc/ccv1p1/LOM/ccv1p1_lommanifest_v1p0.xsd",
    ),
    (
        LOM_RESOURCE,
        "http://www.imsglobal.org/profile/cc/ccv1p1/LOM/ccv1p1_lomresource_v1p0.xsd",
    ),
];

/// Markers that must not survive in a converted manifest.
pub const FORBIDDEN_MARKERS: [&str; 3] = ["imsccv1p3", "imscp_extensionv1p2", "ccv1p3"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewriteRule {
    pub pattern: &'static str,
    pub replacement: &'static str,
}

const fn rule(pattern: &'static str, replacement: &'static str) -> RewriteRule {
    RewriteRule {
        pattern,
        replacement,
    }
}

/// Literal substitutions, most specific first. Generic path-segment
/// fallbacks must stay below the full URIs they would otherwise mask.
pub const REWRITE_RULES: &[RewriteRule] = &[
    // Content-package extension: no 1.1 equivalent.
    rule("http://www.imsglobal.org/xsd/imsccv1p3/imscp_extensionv1p2", ""),
    rule(
        "http://www.imsglobal.org/profile/cc/ccv1p3/ccv1p3_cpextensionv1p2_v1p0.xsd",
        "",
    ),
    rule(
        "http://www.imsglobal.org/xsd/imsccv1p3/imscp_v1p1",
        "http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1",
    ),
    rule(
        "http://ltsc.ieee.org/xsd/imsccv1p3/LOM/manifest",
        "http://ltsc.ieee.org/xsd/imsccv1p1/LOM/manifest",
    ),
    rule(
        "http://ltsc.ieee.org/xsd/imsccv1p3/LOM/resource",
        "http://ltsc.ieee.org/xsd/imsccv1p1/LOM/resource",
    ),
    rule(
        "http://www.imsglobal.org/profile/cc/ccv1p3/ccv1p3_imscp_v1p2_v1p0.xsd",
        "http://www.imsglobal.org/profile/cc/ccv1p1/ccv1p1_imscp_v1p1_v1p0.xsd",
    ),
    rule(
        "http://www.imsglobal.org/profile/cc/ccv1p3/LOM/ccv1p3_lommanifest_v1p0.xsd",
        "http://www.imsglobal.org/profile/cc/ccv1p1/LOM/ccv1p1_lommanifest_v1p0.xsd",
    ),
    rule(
        "http://www.imsglobal.org/profile/cc/ccv1p3/LOM/ccv1p3_lomresource_v1p0.xsd",
        "http://www.imsglobal.org/profile/cc/ccv1p1/LOM/ccv1p1_lomresource_v1p0.xsd",
    ),
    rule("/xsd/imsccv1p3/", "/xsd/imsccv1p1/"),
    rule("/profile/cc/ccv1p3/", "/profile/cc/ccv1p1/"),
    rule("/xsd/imsccv1p2/", "/xsd/imsccv1p1/"),
    rule("/profile/cc/ccv1p2/", "/profile/cc/ccv1p1/"),
    // Discussion and web-link descriptor schemas.
    rule("imsdt_v1p2", "imsdt_v1p1"),
    rule("imsdt_v1p3", "imsdt_v1p1"),
    rule("imswl_v1p2", "imswl_v1p1"),
    rule("imswl_v1p3", "imswl_v1p1"),
];

const RESOURCE_TYPE_DOWNSHIFTS: [(&str, &str); 6] = [
    ("imsdt_xmlv1p2", "imsdt_xmlv1p1"),
    ("imsdt_xmlv1p3", "imsdt_xmlv1p1"),
    ("imswl_xmlv1p2", "imswl_xmlv1p1"),
    ("imswl_xmlv1p3", "imswl_xmlv1p1"),
    ("imscc_xmlv1p2", "imscc_xmlv1p1"),
    ("imscc_xmlv1p3", "imscc_xmlv1p1"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub from: String,
    pub to: String,
}

/// An attribute rewritten on one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValueChange {
    pub resource: String,
    pub from: String,
    pub to: String,
}

/// Applies the literal table only. Safe on any payload XML: prefixes and
/// elements are left alone.
pub fn substitute_text(text: &str) -> String {
    let mut out = text.to_string();
    for rule in REWRITE_RULES {
        if out.contains(rule.pattern) {
            out = out.replace(rule.pattern, rule.replacement);
        }
    }
    out
}

/// Applies the literal table, then the regex clean-ups, to a serialized
/// manifest. The clean-ups drop extension prefixes and `variant` elements,
/// so they are only valid where the structural rules already removed every
/// use of those prefixes.
pub fn rewrite_text(text: &str) -> String {
    let mut out = substitute_text(text);
    for (re, replacement) in cleanup_regexes() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out
}

fn cleanup_regexes() -> &'static [(Regex, &'static str)] {
    static CLEANUPS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    CLEANUPS.get_or_init(|| {
        [
            (r"(/profile/cc/)ccv1p3(/)", "${1}ccv1p1${2}"),
            (r#"\s+xmlns:(?:imscsmd|csmd|cpx|ns3)="[^"]*""#, ""),
            (
                r#"\s+xmlns:[A-Za-z_][\w.\-]*="[^"]*(?:imscsmd|imscp_extension)[^"]*""#,
                "",
            ),
            (r"<(?:cpx|ns3):variant\b[^>]*/>", ""),
            (r"(?s)<(?:cpx|ns3):variant\b[^>]*>.*?</(?:cpx|ns3):variant>", ""),
        ]
        .into_iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).expect("Invalid regex"), replacement))
        .collect()
    })
}

/// Distinct forbidden markers present in `text`, sorted.
pub fn find_forbidden_markers(text: &str) -> Vec<String> {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    let re = MARKERS.get_or_init(|| {
        Regex::new(r"imsccv1p3|imscp_extensionv1p2|ccv1p3").expect("Invalid regex")
    });
    re.find_iter(text)
        .map(|found| found.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn ensure_no_forbidden_markers(text: &str) -> Result<(), CartridgeError> {
    let markers = find_forbidden_markers(text);
    if markers.is_empty() {
        return Ok(());
    }
    Err(CartridgeError::InvariantViolation(
        markers
            .into_iter()
            .map(|marker| Violation::ForbiddenMarker { marker })
            .collect(),
    ))
}

/// Reads a `schemaversion` value such as `1.3` or `1.2.0` as a semver version.
pub fn parse_version_tag(tag: &str) -> Option<Version> {
    let mut parts: Vec<&str> = tag.trim().split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&parts.join(".")).ok()
}

pub fn target_version() -> Version {
    Version::new(1, 1, 0)
}

/// True when the declared version is at or below the target.
pub fn is_at_or_below_target(manifest: &Manifest) -> bool {
    manifest
        .version()
        .and_then(|tag| parse_version_tag(&tag))
        .is_some_and(|version| version <= target_version())
}

/// Lowers a declared version above the target to the target.
pub fn downgrade_version(manifest: &mut Manifest) -> Option<VersionChange> {
    let current = manifest.version()?;
    let parsed = parse_version_tag(&current)?;
    if parsed <= target_version() {
        return None;
    }
    manifest.set_version(TARGET_VERSION).then(|| VersionChange {
        from: current,
        to: TARGET_VERSION.to_string(),
    })
}

/// Moves every `lom` subtree into the 1.1 LOM namespaces: manifest-level
/// metadata goes to the manifest namespace, resource-level metadata to the
/// resource namespace. Returns the number of subtrees retagged.
pub fn retag_metadata(manifest: &mut Manifest) -> usize {
    let mut retagged = 0;
    if let Some(metadata) = manifest.metadata.as_mut() {
        retagged += retag_lom_subtrees(metadata, LOM_MANIFEST_PREFIX, LOM_MANIFEST);
    }
    for resource in &mut manifest.resources {
        for ext in &mut resource.extensions {
            retagged += retag_lom_subtrees(ext, LOM_RESOURCE_PREFIX, LOM_RESOURCE);
        }
    }

    let used = used_prefixes(manifest);
    manifest.namespaces.retain(|binding| {
        binding.kind != NamespaceKind::Metadata
            || binding
                .prefix
                .as_ref()
                .is_some_and(|prefix| used.contains(prefix))
    });
    for (prefix, uri) in [(LOM_MANIFEST_PREFIX, LOM_MANIFEST), (LOM_RESOURCE_PREFIX, LOM_RESOURCE)] {
        if used.contains(prefix) {
            bind(manifest, Some(prefix), uri);
        }
    }
    retagged
}

fn retag_lom_subtrees(element: &mut Element, prefix: &str, uri: &str) -> usize {
    if element.local_name() == "lom" {
        retag_subtree(element, prefix, uri);
        return 1;
    }
    element
        .elements_mut()
        .map(|child| retag_lom_subtrees(child, prefix, uri))
        .sum()
}

fn retag_subtree(element: &mut Element, prefix: &str, uri: &str) {
    element.walk_mut(&mut |el: &mut Element| {
        el.name = format!("{prefix}:{}", el.local_name());
        el.namespace = Some(uri.to_string());
        el.kind = NamespaceKind::Metadata;
        el.attributes
            .retain(|attr| attr.namespace_declaration().is_none());
    });
}

fn used_prefixes(manifest: &Manifest) -> BTreeSet<String> {
    fn collect(element: &Element, used: &mut BTreeSet<String>) {
        if let Some(prefix) = element.prefix() {
            used.insert(prefix.to_string());
        }
        for attr in &element.attributes {
            if let Some((prefix, _)) = attr.name.split_once(':') {
                if prefix != "xmlns" && prefix != "xml" {
                    used.insert(prefix.to_string());
                }
            }
        }
        for child in element.elements() {
            collect(child, used);
        }
    }

    let mut used = BTreeSet::new();
    let extension_roots = manifest
        .metadata
        .iter()
        .chain(manifest.extensions.iter())
        .chain(manifest.resources.iter().flat_map(|res| res.extensions.iter()))
        .chain(manifest.organizations.iter().flat_map(|org| org.extensions.iter()))
        .chain(manifest.live_items().flat_map(|(_, item)| item.extensions.iter()));
    for element in extension_roots {
        collect(element, &mut used);
    }
    let attribute_sets = manifest
        .attributes
        .iter()
        .chain(manifest.resources.iter().flat_map(|res| res.attributes.iter()))
        .chain(manifest.live_items().flat_map(|(_, item)| item.attributes.iter()));
    for attr in attribute_sets {
        if let Some((prefix, _)) = attr.name.split_once(':') {
            used.insert(prefix.to_string());
        }
    }
    used
}

fn bind(manifest: &mut Manifest, prefix: Option<&str>, uri: &str) {
    match manifest
        .namespaces
        .iter_mut()
        .find(|binding| binding.prefix.as_deref() == prefix)
    {
        Some(existing) => *existing = NamespaceBinding::new(prefix, uri),
        None => manifest.namespaces.push(NamespaceBinding::new(prefix, uri)),
    }
}

/// Makes the 1.1 content-package namespace the default namespace.
pub fn normalize_core_namespace(manifest: &mut Manifest) {
    bind(manifest, None, IMSCP_V1P1);
}

/// Removes curriculum-standards metadata, content-package variants and every
/// other legacy-extension element, plus their namespace declarations.
/// Returns the number of element blocks removed.
pub fn drop_extension_namespaces(manifest: &mut Manifest) -> usize {
    let is_legacy = |el: &Element| {
        el.kind == NamespaceKind::LegacyExtension
            || el.local_name() == "variant"
            || el
                .namespace
                .as_deref()
                .is_some_and(|uri| uri.contains("imscsmd"))
    };

    let mut removed = 0;
    if let Some(metadata) = manifest.metadata.as_mut() {
        removed += metadata.remove_descendants(&is_legacy);
    }
    removed += drop_matching(&mut manifest.extensions, &is_legacy);
    for resource in &mut manifest.resources {
        removed += drop_matching(&mut resource.extensions, &is_legacy);
    }
    for org in &mut manifest.organizations {
        removed += drop_matching(&mut org.extensions, &is_legacy);
    }
    let live: Vec<_> = manifest.live_items().map(|(id, _)| id).collect();
    for id in live {
        removed += drop_matching(&mut manifest.item_mut(id).extensions, &is_legacy);
    }

    manifest
        .namespaces
        .retain(|binding| binding.kind != NamespaceKind::LegacyExtension);
    manifest.schema_locations.retain(|pair| {
        NamespaceKind::classify(Some(&pair.namespace)) != NamespaceKind::LegacyExtension
            && !pair.location.contains("cpextension")
    });
    removed
}

fn drop_matching<P: Fn(&Element) -> bool>(elements: &mut Vec<Element>, predicate: &P) -> usize {
    let before = elements.len();
    elements.retain(|el| !predicate(el));
    let mut removed = before - elements.len();
    for el in elements.iter_mut() {
        removed += el.remove_descendants(predicate);
    }
    removed
}

/// Replaces the root schema locations with the three 1.1 pairs.
pub fn reset_schema_locations(manifest: &mut Manifest) {
    manifest.schema_locations = CANONICAL_SCHEMA_LOCATIONS
        .iter()
        .map(|(namespace, location)| SchemaLocation {
            namespace: namespace.to_string(),
            location: location.to_string(),
        })
        .collect();
    if !manifest
        .namespaces
        .iter()
        .any(|binding| binding.uri == XSI_NAMESPACE)
    {
        bind(manifest, Some("xsi"), XSI_NAMESPACE);
    }
}

/// `intendeduse="assignment"` has no 1.1 meaning; it becomes `unspecified`.
pub fn patch_intended_use(manifest: &mut Manifest) -> Vec<ValueChange> {
    let mut changes = Vec::new();
    for resource in &mut manifest.resources {
        for attr in &mut resource.attributes {
            if attr.name.eq_ignore_ascii_case("intendeduse")
                && attr.value.eq_ignore_ascii_case("assignment")
            {
                changes.push(ValueChange {
                    resource: resource.identifier.clone(),
                    from: attr.value.clone(),
                    to: "unspecified".to_string(),
                });
                attr.value = "unspecified".to_string();
            }
        }
    }
    changes
}

pub fn downshift_resource_types(manifest: &mut Manifest) -> Vec<ValueChange> {
    let mut changes = Vec::new();
    for resource in &mut manifest.resources {
        let mut new_type = resource.resource_type.clone();
        for (old, new) in RESOURCE_TYPE_DOWNSHIFTS {
            if new_type.contains(old) {
                new_type = new_type.replace(old, new);
            }
        }
        if new_type != resource.resource_type {
            changes.push(ValueChange {
                resource: resource.identifier.clone(),
                from: std::mem::replace(&mut resource.resource_type, new_type.clone()),
                to: new_type,
            });
        }
    }
    changes
}
