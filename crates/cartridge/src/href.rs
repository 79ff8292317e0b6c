//! Reference canonicalization and payload repair.
//!
//! A canonical reference is percent-encoded segment by segment, keeping only
//! unreserved characters (`A-Z a-z 0-9 - _ . ~`) and the `/` separator. The
//! file backing a canonical reference lives at its decoded form, which is the
//! logical entry name inside the package.

use std::collections::BTreeSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CartridgeError;
use crate::manifest::Manifest;
use crate::payload::{PayloadTree, normalize_relative};
use crate::placeholder::PlaceholderRenderer;

pub fn decode(reference: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(reference.as_bytes())).into_owned()
}

/// Decodes, then re-encodes every path segment. Idempotent, and equal for
/// any two encodings of the same logical path.
pub fn canonicalize(reference: &str) -> String {
    decode(reference)
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn is_canonical(reference: &str) -> bool {
    canonicalize(reference) == reference
}

/// Payload key backing `reference`: its canonical form decoded, then the
/// reference as written, then its plain decoding.
pub fn locate(payload: &PayloadTree, reference: &str) -> Option<String> {
    let canonical_key = decode(&canonicalize(reference));
    [canonical_key, reference.to_string(), decode(reference)]
        .into_iter()
        .find(|candidate| payload.contains(candidate))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HrefChangeKind {
    /// The reference was not in canonical form.
    Reencoded,
    /// The resource had no `href`; its first file reference became primary.
    Promoted,
    /// The backing file was found under another spelling and copied.
    Relocated { source: String },
    /// Nothing backed the reference; a placeholder was written.
    Placeholder,
    /// The reference named a directory; it now points at a placeholder page.
    DirectoryPlaceholder,
    /// A secondary reference disagreed with the canonical path.
    DroppedSecondary { reference: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HrefChange {
    pub resource: String,
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub kind: HrefChangeKind,
}

/// An encoded-name payload file dropped in favor of its decoded twin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateRemoval {
    pub removed: String,
    pub kept: String,
    pub identical: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub changes: Vec<HrefChange>,
    pub duplicates: Vec<DuplicateRemoval>,
    /// Resources with no usable reference; they cannot be backed by a file.
    pub unreferenced: BTreeSet<String>,
}

/// Canonicalizes every resource reference and makes sure a payload file
/// backs it, then removes encoded duplicates.
pub fn repair(
    manifest: &mut Manifest,
    payload: &mut PayloadTree,
    placeholder: &dyn PlaceholderRenderer,
) -> Result<RepairOutcome, CartridgeError> {
    let mut outcome = RepairOutcome::default();

    for resource in &mut manifest.resources {
        let id = resource.identifier.clone();
        let Some(raw) = resource.primary_reference().map(str::to_string) else {
            outcome.unreferenced.insert(id);
            continue;
        };
        let Some(mut logical) = normalize_relative(&decode(&raw)).filter(|path| !path.is_empty())
        else {
            tracing::warn!(resource = %id, href = %raw, "reference does not name a file inside the package");
            outcome.unreferenced.insert(id);
            continue;
        };

        let mut records = Vec::new();
        if resource.href.is_none() {
            records.push(HrefChangeKind::Promoted);
        }

        if raw.ends_with('/') || payload.is_directory(&logical) {
            logical = format!("{logical}.html");
            if !payload.contains(&logical) {
                payload.insert(logical.clone(), placeholder.render(&id, &raw)?);
            }
            tracing::warn!(resource = %id, href = %raw, "reference names a directory, pointing it at a placeholder page");
            records.push(HrefChangeKind::DirectoryPlaceholder);
        } else if !payload.contains(&logical) {
            let source = [raw.clone(), decode(&raw), canonicalize(&logical)]
                .into_iter()
                .find(|candidate| candidate != &logical && payload.contains(candidate));
            match source {
                Some(source) => {
                    payload.copy(&source, &logical);
                    tracing::debug!(resource = %id, from = %source, to = %logical, "relocated payload file");
                    records.push(HrefChangeKind::Relocated { source });
                }
                None => {
                    payload.insert(logical.clone(), placeholder.render(&id, &raw)?);
                    tracing::warn!(resource = %id, href = %raw, "missing payload file, wrote placeholder");
                    records.push(HrefChangeKind::Placeholder);
                }
            }
        }

        let canonical = canonicalize(&logical);
        if canonical != raw
            && !records.iter().any(|kind| matches!(kind, HrefChangeKind::DirectoryPlaceholder))
        {
            records.push(HrefChangeKind::Reencoded);
        }

        for file in &resource.files {
            let agrees = normalize_relative(&decode(file))
                .is_some_and(|path| canonicalize(&path) == canonical);
            if !agrees {
                records.push(HrefChangeKind::DroppedSecondary {
                    reference: file.clone(),
                });
            }
        }

        resource.href = Some(canonical.clone());
        resource.files = vec![canonical.clone()];

        for kind in records {
            tracing::debug!(resource = %id, href = %canonical, change = ?kind, "href repaired");
            outcome.changes.push(HrefChange {
                resource: id.clone(),
                from: raw.clone(),
                to: canonical.clone(),
                kind,
            });
        }
    }

    outcome.duplicates = remove_encoded_duplicates(payload);
    tracing::info!(
        changes = outcome.changes.len(),
        duplicates = outcome.duplicates.len(),
        unreferenced = outcome.unreferenced.len(),
        "href repair finished"
    );
    Ok(outcome)
}

/// Drops every payload file whose name is the encoded spelling of another
/// file that also exists. The decoded copy is authoritative.
pub fn remove_encoded_duplicates(payload: &mut PayloadTree) -> Vec<DuplicateRemoval> {
    let pairs: Vec<(String, String)> = payload
        .paths()
        .filter_map(|path| {
            let encoded = canonicalize(path);
            let decoded = decode(&encoded);
            (encoded != decoded && payload.contains(&encoded) && payload.contains(&decoded))
                .then_some((encoded, decoded))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut removed = Vec::new();
    for (encoded, decoded) in pairs {
        let identical = match (payload.get(&encoded), payload.get(&decoded)) {
            (Some(a), Some(b)) => digest(a) == digest(b),
            _ => false,
        };
        if payload.remove(&encoded).is_some() {
            tracing::debug!(removed = %encoded, kept = %decoded, identical, "removed encoded duplicate");
            removed.push(DuplicateRemoval {
                removed: encoded,
                kept: decoded,
                identical,
            });
        }
    }
    removed
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::HtmlPlaceholder;

    fn manifest_with(resources: &str) -> Manifest {
        let doc = format!("<manifest><resources>{resources}</resources></manifest>");
        Manifest::parse(doc.as_bytes()).unwrap()
    }

    #[test]
    fn canonicalize_is_idempotent_and_encoding_insensitive() {
        let variants = [
            "wiki content/My Page (1).html",
            "wiki%20content/My%20Page%20(1).html",
            "wiki%20content/My%20Page%20%281%29.html",
            "wiki content/My%20Page %281%29.html",
        ];
        let canonical = canonicalize(variants[0]);
        assert_eq!(canonical, "wiki%20content/My%20Page%20%281%29.html");
        for variant in variants {
            assert_eq!(canonicalize(variant), canonical, "{variant}");
            assert_eq!(canonicalize(&canonicalize(variant)), canonicalize(variant));
        }
        assert!(is_canonical(&canonical));
        assert!(!is_canonical(variants[0]));
        assert_eq!(decode(&canonical), variants[0]);
    }

    #[test]
    fn canonicalize_handles_unicode_and_literal_percent() {
        let canonical = canonicalize("média/100%25 sure.pdf");
        assert_eq!(canonical, "m%C3%A9dia/100%25%20sure.pdf");
        assert_eq!(canonicalize(&canonical), canonical);
        assert_eq!(decode(&canonical), "média/100% sure.pdf");
        assert_eq!(canonicalize("a-b_c.d~e/f"), "a-b_c.d~e/f");
    }

    #[test]
    fn two_encodings_collapse_onto_decoded_file() {
        let mut manifest = manifest_with(
            r#"<resource identifier="r1" type="webcontent" href="pages/My%20Page.html"><file href="pages/My Page.html"/></resource>"#,
        );
        let mut payload = PayloadTree::new();
        payload.insert("pages/My Page.html", "<p>x</p>");

        let outcome = repair(&mut manifest, &mut payload, &HtmlPlaceholder::new()).unwrap();
        let resource = manifest.resource("r1").unwrap();
        assert_eq!(resource.href.as_deref(), Some("pages/My%20Page.html"));
        assert_eq!(resource.files, vec!["pages/My%20Page.html".to_string()]);
        assert_eq!(payload.len(), 1);
        assert!(payload.contains("pages/My Page.html"));
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn encoded_only_file_is_relocated_and_duplicate_removed() {
        let mut manifest = manifest_with(
            r#"<resource identifier="r1" type="webcontent" href="docs/a%20b.pdf"><file href="docs/a%20b.pdf"/></resource>"#,
        );
        let mut payload = PayloadTree::new();
        payload.insert("docs/a%20b.pdf", "pdf");

        let outcome = repair(&mut manifest, &mut payload, &HtmlPlaceholder::new()).unwrap();
        assert_eq!(payload.paths().collect::<Vec<_>>(), vec!["docs/a b.pdf"]);
        assert_eq!(payload.get("docs/a b.pdf"), Some(&b"pdf"[..]));
        assert!(matches!(
            outcome.changes[0].kind,
            HrefChangeKind::Relocated { ref source } if source == "docs/a%20b.pdf"
        ));
        assert_eq!(outcome.duplicates.len(), 1);
        assert!(outcome.duplicates[0].identical);
    }

    #[test]
    fn missing_and_directory_targets_get_placeholders() {
        let mut manifest = manifest_with(
            r#"<resource identifier="gone" type="webcontent" href="pages/gone.html"/>
               <resource identifier="dir" type="webcontent" href="media"><file href="media/x.png"/></resource>
               <resource identifier="none" type="webcontent"/>"#,
        );
        let mut payload = PayloadTree::new();
        payload.insert("media/x.png", "png");

        let outcome = repair(&mut manifest, &mut payload, &HtmlPlaceholder::new()).unwrap();
        assert!(payload.contains("pages/gone.html"));
        assert!(payload.contains("media.html"));
        assert_eq!(
            manifest.resource("dir").unwrap().href.as_deref(),
            Some("media.html")
        );
        assert_eq!(manifest.resource("dir").unwrap().files, vec!["media.html".to_string()]);
        assert!(outcome.unreferenced.contains("none"));

        let kinds: Vec<_> = outcome.changes.iter().map(|c| (c.resource.as_str(), &c.kind)).collect();
        assert!(kinds.contains(&("gone", &HrefChangeKind::Placeholder)));
        assert!(kinds.contains(&("dir", &HrefChangeKind::DirectoryPlaceholder)));
        assert!(kinds.iter().any(|(id, kind)| *id == "dir"
            && matches!(kind, HrefChangeKind::DroppedSecondary { .. })));
    }

    #[test]
    fn promoted_file_reference_becomes_href() {
        let mut manifest = manifest_with(
            r#"<resource identifier="q" type="imsqti_xmlv1p2"><file href="q/assessment qti.xml"/></resource>"#,
        );
        let mut payload = PayloadTree::new();
        payload.insert("q/assessment qti.xml", "<questestinterop/>");

        let outcome = repair(&mut manifest, &mut payload, &HtmlPlaceholder::new()).unwrap();
        assert_eq!(
            manifest.resource("q").unwrap().href.as_deref(),
            Some("q/assessment%20qti.xml")
        );
        let kinds: Vec<_> = outcome.changes.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(kinds, vec![HrefChangeKind::Promoted, HrefChangeKind::Reencoded]);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut manifest = manifest_with(
            r#"<resource identifier="r1" type="webcontent" href="a b.html"/>"#,
        );
        let mut payload = PayloadTree::new();
        payload.insert("a b.html", "x");
        let placeholder = HtmlPlaceholder::new();
        repair(&mut manifest, &mut payload, &placeholder).unwrap();
        let before = (manifest.clone(), payload.clone());
        let second = repair(&mut manifest, &mut payload, &placeholder).unwrap();
        assert!(second.changes.is_empty());
        assert_eq!((manifest, payload), before);
    }

    #[test]
    fn locate_tries_every_spelling() {
        let mut payload = PayloadTree::new();
        payload.insert("x y.html", "");
        payload.insert("lit%20eral.html", "");
        assert_eq!(locate(&payload, "x%20y.html").as_deref(), Some("x y.html"));
        assert_eq!(locate(&payload, "lit%20eral.html").as_deref(), Some("lit%20eral.html"));
        assert_eq!(locate(&payload, "nope.html"), None);
    }
}
