use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::answer_key::{self, ItemOutcome};
use crate::error::CartridgeError;
use crate::href;
use crate::manifest::Manifest;
use crate::payload::PayloadTree;
use crate::report::AnswerKeyRecord;
use crate::rules;
use crate::xml;

/// One broken invariant found in a finished package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "kebab-case")]
pub enum Violation {
    DanglingItem { item: String, resource: String },
    DanglingDependency { resource: String, dependency: String },
    MissingReference { resource: String },
    NonCanonicalReference { resource: String, reference: String },
    MissingPayload { resource: String, path: String },
    ReferenceMismatch { resource: String, reference: String },
    MalformedAnswerItem { path: String, index: usize, reason: String },
    SkippedAnswerItem { path: String, index: usize },
    ForbiddenMarker { marker: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DanglingItem { item, resource } => {
                write!(f, "item {item} references missing resource {resource}")
            }
            Violation::DanglingDependency {
                resource,
                dependency,
            } => write!(f, "resource {resource} depends on missing resource {dependency}"),
            Violation::MissingReference { resource } => {
                write!(f, "resource {resource} has no reference")
            }
            Violation::NonCanonicalReference {
                resource,
                reference,
            } => write!(f, "resource {resource} reference {reference} is not canonical"),
            Violation::MissingPayload { resource, path } => {
                write!(f, "resource {resource} has no payload file at {path}")
            }
            Violation::ReferenceMismatch {
                resource,
                reference,
            } => write!(
                f,
                "resource {resource} file reference {reference} disagrees with its href"
            ),
            Violation::MalformedAnswerItem {
                path,
                index,
                reason,
            } => write!(f, "two-choice item {index} in {path}: {reason}"),
            Violation::SkippedAnswerItem { path, index } => {
                write!(f, "two-choice item {index} in {path} was skipped")
            }
            Violation::ForbiddenMarker { marker } => {
                write!(f, "forbidden version marker {marker} remains in the manifest")
            }
        }
    }
}

/// How the verifier decides which two-choice items may stay non-canonical.
#[derive(Clone, Copy, Debug)]
pub enum AnswerKeyPolicy<'a> {
    /// Outcomes the normalizer recorded during this run. Skipped and
    /// fallback items are exempt.
    Recorded(&'a [AnswerKeyRecord]),
    /// No run history. Candidates whose shape the normalizer would reject
    /// count as skipped.
    Inferred,
}

/// Re-walks the serialized manifest and the payload tree. Returns every
/// violation found; strict mode also rejects skipped two-choice items.
///
/// Answer keys are only judged in `quiz_paths`, the quiz files of the
/// assessments the package still carries.
pub fn verify_package(
    manifest_text: &str,
    payload: &PayloadTree,
    quiz_paths: &BTreeSet<String>,
    policy: AnswerKeyPolicy<'_>,
    strict: bool,
) -> Result<(), CartridgeError> {
    let manifest = Manifest::parse(manifest_text.as_bytes())?;
    let mut violations = graph_violations(&manifest);
    violations.extend(payload_violations(&manifest, payload));
    violations.extend(answer_key_violations(payload, quiz_paths, policy, strict));
    violations.extend(
        rules::find_forbidden_markers(manifest_text)
            .into_iter()
            .map(|marker| Violation::ForbiddenMarker { marker }),
    );

    if violations.is_empty() {
        tracing::debug!("consistency verification passed");
        return Ok(());
    }
    for violation in &violations {
        tracing::error!(%violation, "consistency violation");
    }
    Err(CartridgeError::InvariantViolation(violations))
}

/// Items naming a missing resource and dependency edges naming one.
pub fn graph_violations(manifest: &Manifest) -> Vec<Violation> {
    let ids = manifest.resource_ids();
    let mut violations = Vec::new();
    for (id, item) in manifest.live_items() {
        if let Some(reference) = &item.identifierref {
            if !ids.contains(reference) {
                violations.push(Violation::DanglingItem {
                    item: item
                        .identifier
                        .clone()
                        .unwrap_or_else(|| format!("#{}", id.index())),
                    resource: reference.clone(),
                });
            }
        }
    }
    for resource in &manifest.resources {
        for dependency in &resource.dependencies {
            if !ids.contains(dependency) {
                violations.push(Violation::DanglingDependency {
                    resource: resource.identifier.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    violations
}

/// Every resource must carry a canonical href backed by a payload file, and
/// its file references must agree with it.
pub fn payload_violations(manifest: &Manifest, payload: &PayloadTree) -> Vec<Violation> {
    let mut violations = Vec::new();
    for resource in &manifest.resources {
        let id = &resource.identifier;
        let Some(reference) = resource.href.as_deref() else {
            violations.push(Violation::MissingReference {
                resource: id.clone(),
            });
            continue;
        };
        if !href::is_canonical(reference) {
            violations.push(Violation::NonCanonicalReference {
                resource: id.clone(),
                reference: reference.to_string(),
            });
        }
        let path = href::decode(reference);
        if !payload.contains(&path) {
            violations.push(Violation::MissingPayload {
                resource: id.clone(),
                path,
            });
        }
        for file in resource.files.iter().filter(|file| *file != reference) {
            violations.push(Violation::ReferenceMismatch {
                resource: id.clone(),
                reference: file.clone(),
            });
        }
    }
    violations
}

/// Two-choice items in the legacy quiz payloads of `quiz_paths` that are
/// neither canonical nor exempt.
pub fn answer_key_violations(
    payload: &PayloadTree,
    quiz_paths: &BTreeSet<String>,
    policy: AnswerKeyPolicy<'_>,
    strict: bool,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut exempt = BTreeSet::new();
    if let AnswerKeyPolicy::Recorded(records) = policy {
        for record in records.iter().filter(|record| quiz_paths.contains(&record.path)) {
            if record.outcome.is_exempt() {
                exempt.insert((record.path.as_str(), record.index));
            }
            if strict && matches!(record.outcome, ItemOutcome::Skipped { .. }) {
                violations.push(Violation::SkippedAnswerItem {
                    path: record.path.clone(),
                    index: record.index,
                });
            }
        }
    }

    for path in quiz_paths.iter().map(String::as_str) {
        let Some(bytes) = payload.get(path) else {
            continue;
        };
        if xml::sniff_root(bytes).is_none_or(|root| root.local != "questestinterop") {
            continue;
        }
        let Ok(root) = xml::parse(bytes) else {
            continue;
        };
        for (index, item) in answer_key::collect_items(&root).into_iter().enumerate() {
            let Some(Err(reason)) = answer_key::check_item(item) else {
                continue;
            };
            match policy {
                AnswerKeyPolicy::Recorded(_) if exempt.contains(&(path, index)) => {}
                AnswerKeyPolicy::Inferred if !answer_key::has_normalizable_shape(item) => {
                    if strict {
                        violations.push(Violation::SkippedAnswerItem {
                            path: path.to_string(),
                            index,
                        });
                    }
                }
                _ => violations.push(Violation::MalformedAnswerItem {
                    path: path.to_string(),
                    index,
                    reason,
                }),
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer_key::MappingBasis;

    const CLEAN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="m" xmlns="http://www.imsglobal.org/xsd/imscc/imscp_v1p1">
  <metadata><schema>IMS Common Cartridge</schema><schemaversion>1.1.0</schemaversion></metadata>
  <organizations>
    <organization identifier="org">
      <item identifier="root">
        <item identifier="i1" identifierref="page"><title>Page</title></item>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="page" type="webcontent" href="My%20Page.html">
      <file href="My%20Page.html"/>
    </resource>
  </resources>
</manifest>"#;

    const SKIPPED_QUIZ: &str = r#"<questestinterop><assessment ident="a"><section ident="s">
<item ident="q1"><itemmetadata><qtimetadata><qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>true_false_question</fieldentry></qtimetadatafield></qtimetadata></itemmetadata>
<presentation><response_lid ident="r"><render_choice>
<response_label ident="a"><material><mattext>True</mattext></material></response_label>
<response_label ident="b"><material><mattext>False</mattext></material></response_label>
<response_label ident="c"><material><mattext>Maybe</mattext></material></response_label>
</render_choice></response_lid></presentation>
<resprocessing><respcondition><conditionvar><varequal respident="r">a</varequal></conditionvar><setvar>100</setvar></respcondition></resprocessing>
</item></section></assessment></questestinterop>"#;

    fn with_quiz() -> String {
        CLEAN.replace(
            "</resources>",
            r#"<resource identifier="quiz" type="imsqti_xmlv1p2/imscc_xmlv1p1/assessment" href="quiz/q.xml">
      <file href="quiz/q.xml"/>
    </resource>
  </resources>"#,
        )
    }

    fn quiz_paths(manifest_text: &str, payload: &PayloadTree) -> BTreeSet<String> {
        let manifest = Manifest::parse(manifest_text.as_bytes()).unwrap();
        crate::classify::assessment_payload_paths(&manifest, payload)
    }

    fn payload_with(files: &[(&str, &str)]) -> PayloadTree {
        let mut payload = PayloadTree::new();
        for (path, body) in files {
            payload.insert(*path, body.as_bytes());
        }
        payload
    }

    #[test]
    fn clean_package_passes() {
        let payload = payload_with(&[("My Page.html", "<p>hi</p>")]);
        verify_package(CLEAN, &payload, &BTreeSet::new(), AnswerKeyPolicy::Inferred, true)
            .unwrap();
    }

    #[test]
    fn reports_every_violation() {
        let broken = CLEAN
            .replace(r#"identifierref="page""#, r#"identifierref="gone""#)
            .replace(
                r#"<file href="My%20Page.html"/>"#,
                r#"<file href="My Page.html"/><dependency identifierref="css"/>"#,
            )
            .replace("1.1.0", "1.3.0")
            .replace("imscp_v1p1", "imsccv1p3");
        let err = verify_package(
            &broken,
            &PayloadTree::new(),
            &BTreeSet::new(),
            AnswerKeyPolicy::Inferred,
            false,
        )
        .unwrap_err();
        let violations = err.violations();

        assert!(violations.contains(&Violation::DanglingItem {
            item: "i1".into(),
            resource: "gone".into()
        }));
        assert!(violations.contains(&Violation::DanglingDependency {
            resource: "page".into(),
            dependency: "css".into()
        }));
        assert!(violations.contains(&Violation::MissingPayload {
            resource: "page".into(),
            path: "My Page.html".into()
        }));
        assert!(violations.contains(&Violation::ReferenceMismatch {
            resource: "page".into(),
            reference: "My Page.html".into()
        }));
        assert!(violations.contains(&Violation::ForbiddenMarker {
            marker: "imsccv1p3".into()
        }));
    }

    #[test]
    fn skipped_items_are_exempt_unless_strict() {
        let manifest = with_quiz();
        let payload = payload_with(&[("My Page.html", "x"), ("quiz/q.xml", SKIPPED_QUIZ)]);
        let scope = quiz_paths(&manifest, &payload);
        let records = vec![AnswerKeyRecord {
            path: "quiz/q.xml".into(),
            index: 0,
            ident: Some("q1".into()),
            outcome: ItemOutcome::Skipped {
                reason: "3 choices, expected 2".into(),
            },
        }];

        verify_package(&manifest, &payload, &scope, AnswerKeyPolicy::Recorded(&records), false)
            .unwrap();
        verify_package(&manifest, &payload, &scope, AnswerKeyPolicy::Inferred, false).unwrap();

        let strict =
            verify_package(&manifest, &payload, &scope, AnswerKeyPolicy::Recorded(&records), true)
                .unwrap_err();
        assert_eq!(
            strict.violations(),
            &[Violation::SkippedAnswerItem {
                path: "quiz/q.xml".into(),
                index: 0
            }]
        );
        assert!(
            verify_package(&manifest, &payload, &scope, AnswerKeyPolicy::Inferred, true).is_err()
        );
    }

    #[test]
    fn quiz_files_outside_the_scope_are_not_judged() {
        let payload = payload_with(&[("My Page.html", "x"), ("quiz/q.xml", SKIPPED_QUIZ)]);
        let scope = quiz_paths(CLEAN, &payload);
        assert!(scope.is_empty());
        let records = vec![AnswerKeyRecord {
            path: "quiz/q.xml".into(),
            index: 0,
            ident: Some("q1".into()),
            outcome: ItemOutcome::Skipped {
                reason: "3 choices, expected 2".into(),
            },
        }];

        verify_package(CLEAN, &payload, &scope, AnswerKeyPolicy::Recorded(&records), true)
            .unwrap();
        verify_package(CLEAN, &payload, &scope, AnswerKeyPolicy::Inferred, true).unwrap();
    }

    #[test]
    fn normalized_claim_on_non_canonical_item_is_malformed() {
        let manifest = with_quiz();
        let payload = payload_with(&[("My Page.html", "x"), ("quiz/q.xml", SKIPPED_QUIZ)]);
        let scope = quiz_paths(&manifest, &payload);
        let records = vec![AnswerKeyRecord {
            path: "quiz/q.xml".into(),
            index: 0,
            ident: Some("q1".into()),
            outcome: ItemOutcome::Normalized {
                basis: MappingBasis::Positional,
            },
        }];
        let err =
            verify_package(&manifest, &payload, &scope, AnswerKeyPolicy::Recorded(&records), false)
                .unwrap_err();
        assert!(matches!(
            err.violations(),
            [Violation::MalformedAnswerItem { index: 0, .. }]
        ));
    }
}
