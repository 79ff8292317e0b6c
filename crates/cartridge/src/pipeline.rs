//! Conversion entry points.
//!
//! [`transform`] runs every pass over an in-memory package; [`convert`] wraps
//! it with the directory boundary and only publishes a finished package.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::answer_key;
use crate::cascade;
use crate::classify::{self, ResourceKind};
use crate::error::CartridgeError;
use crate::href::{self, HrefChange, HrefChangeKind};
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::options::ConvertOptions;
use crate::payload::PayloadTree;
use crate::placeholder::{HtmlPlaceholder, PlaceholderRenderer};
use crate::report::{
    AnswerKeyRecord, AnswerKeyTally, AuditFinding, ChangeReport, RemovalReason, ReportBuilder,
};
use crate::rules;
use crate::verify::{self, AnswerKeyPolicy};

const LEGACY_QUIZ_DIR: &str = "non_cc_assessments/";
const LEGACY_QUIZ_SUFFIX: &str = ".xml.qti";
const QUIZ_DESCRIPTOR: &str = "assessment_qti.xml";

/// A converted package written to disk.
#[derive(Debug)]
pub struct Conversion {
    pub output: PathBuf,
    pub report: ChangeReport,
}

/// Summary of a package that passed [`check`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub manifest_path: String,
    pub version: Option<String>,
    pub resources: usize,
    pub items: usize,
}

/// Converts the package directory `source` into `destination`, which must
/// not exist yet. Nothing is left at `destination` when conversion fails.
pub fn convert(
    source: &Path,
    destination: &Path,
    options: &ConvertOptions,
) -> Result<Conversion, CartridgeError> {
    if destination.exists() {
        return Err(CartridgeError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        )));
    }
    if !source.is_dir() {
        return Err(CartridgeError::Structural(format!(
            "{} is not a package directory",
            source.display()
        )));
    }

    let payload = PayloadTree::read_dir(source)?;
    tracing::info!(source = %source.display(), files = payload.len(), "package loaded");
    let (converted, report) = transform(payload, options)?;

    let staging = staging_dir(destination)?;
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let published = converted
        .write_dir(&staging)
        .and_then(|()| fs::rename(&staging, destination).map_err(CartridgeError::from));
    if let Err(err) = published {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    tracing::info!(destination = %destination.display(), "package written");
    Ok(Conversion {
        output: destination.to_path_buf(),
        report,
    })
}

fn staging_dir(destination: &Path) -> Result<PathBuf, CartridgeError> {
    let name = destination.file_name().ok_or_else(|| {
        CartridgeError::Structural(format!(
            "{} does not name a directory",
            destination.display()
        ))
    })?;
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    Ok(parent.join(format!(".{}.partial", name.to_string_lossy())))
}

/// Verifies an already converted package directory without modifying it.
pub fn check(root: &Path, strict: bool) -> Result<CheckSummary, CartridgeError> {
    let mut payload = PayloadTree::read_dir(root)?;
    let manifest_path = payload.locate_manifest().ok_or_else(|| {
        CartridgeError::Structural(format!("no {MANIFEST_FILE} found in {}", root.display()))
    })?;
    let (prefix, name) = split_manifest_path(&manifest_path);
    let inner = payload.split_off_prefix(prefix);
    let text = inner.get_text(name).unwrap_or_default();
    let manifest = Manifest::parse(text.as_bytes()).map_err(|err| err.context(&manifest_path))?;

    let quiz_paths = classify::assessment_payload_paths(&manifest, &inner);
    verify::verify_package(&text, &inner, &quiz_paths, AnswerKeyPolicy::Inferred, strict)?;
    Ok(CheckSummary {
        version: manifest.version(),
        resources: manifest.resources.len(),
        items: manifest.live_items().count(),
        manifest_path,
    })
}

fn split_manifest_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Runs every pass over an in-memory package.
pub fn transform(
    payload: PayloadTree,
    options: &ConvertOptions,
) -> Result<(PayloadTree, ChangeReport), CartridgeError> {
    transform_with(payload, options, &HtmlPlaceholder::new())
}

/// [`transform`] with a caller-chosen placeholder renderer.
pub fn transform_with(
    mut payload: PayloadTree,
    options: &ConvertOptions,
    placeholder: &dyn PlaceholderRenderer,
) -> Result<(PayloadTree, ChangeReport), CartridgeError> {
    let manifest_path = payload.locate_manifest().ok_or_else(|| {
        CartridgeError::Structural(format!("no {MANIFEST_FILE} found anywhere in the package"))
    })?;
    let (prefix, name) = split_manifest_path(&manifest_path);
    let (prefix, name) = (prefix.to_string(), name.to_string());
    let inner = payload.split_off_prefix(&prefix);
    let manifest = Manifest::parse(inner.get(&name).unwrap_or_default())
        .map_err(|err| err.context(&manifest_path))?;
    tracing::debug!(manifest = %manifest_path, version = ?manifest.version(), "manifest parsed");

    let mut run = Run {
        manifest,
        payload: inner,
        manifest_name: name,
        options,
        report: ReportBuilder::new(&manifest_path),
        quiz_paths: BTreeSet::new(),
    };

    if !options.force && run.is_already_at_target() {
        tracing::info!(manifest = %manifest_path, "package already at target version, copying unchanged");
        run.report.already_at_target();
        payload.absorb_under_prefix(&prefix, run.payload);
        return Ok((payload, run.report.finish()));
    }

    run.hygiene();
    run.remove_by_kind();
    run.downgrade_schema();
    run.fix_assessment_hrefs();
    run.remove_empty_assessments();
    run.collect_quiz_paths();
    run.repair_hrefs(placeholder)?;
    run.collect_quiz_paths();
    run.patch_descriptors();
    run.normalize_answer_keys();
    run.audit();
    run.finish_manifest()?;

    payload.absorb_under_prefix(&prefix, run.payload);
    Ok((payload, run.report.finish()))
}

/// State of one conversion. The manifest and payload are owned here until the
/// last pass has run.
struct Run<'a> {
    manifest: Manifest,
    payload: PayloadTree,
    manifest_name: String,
    options: &'a ConvertOptions,
    report: ReportBuilder,
    /// Quiz files of surviving assessments; answer keys are only touched here.
    quiz_paths: BTreeSet<String>,
}

impl Run<'_> {
    fn is_already_at_target(&self) -> bool {
        rules::is_at_or_below_target(&self.manifest) && !self.has_legacy_quiz_artifacts()
    }

    fn has_legacy_quiz_artifacts(&self) -> bool {
        self.manifest.resources.iter().any(|resource| {
            resource.references().any(|reference| {
                let lower = href::decode(reference).to_ascii_lowercase();
                (lower.contains(LEGACY_QUIZ_DIR) && lower.ends_with(LEGACY_QUIZ_SUFFIX))
                    || lower.ends_with(QUIZ_DESCRIPTOR)
            })
        })
    }

    fn hygiene(&mut self) {
        let intended = rules::patch_intended_use(&mut self.manifest);
        let downshifts = rules::downshift_resource_types(&mut self.manifest);
        let dropped = rules::drop_extension_namespaces(&mut self.manifest);
        tracing::info!(
            intended_use = intended.len(),
            type_downshifts = downshifts.len(),
            metadata_blocks = dropped,
            "manifest hygiene applied"
        );
        self.report.intended_use_changes(intended);
        self.report.type_downshifts(downshifts);
        self.report.metadata_blocks_removed(dropped);
    }

    fn removal_reason(&self, kind: ResourceKind) -> Option<RemovalReason> {
        match kind {
            ResourceKind::ExternalTool if self.options.remove_external_tools => {
                Some(RemovalReason::ExternalTool)
            }
            ResourceKind::AssignmentExtension if self.options.remove_assignment_extensions => {
                Some(RemovalReason::AssignmentExtension)
            }
            other => self.options.excludes(other).map(RemovalReason::Excluded),
        }
    }

    /// Seeds external tools, assignment extensions and excluded kinds, then
    /// removes them in one cascade.
    fn remove_by_kind(&mut self) {
        let seeds: Vec<(String, RemovalReason)> = self
            .manifest
            .resources
            .iter()
            .filter_map(|resource| {
                let kind = classify::classify(resource, &self.payload);
                self.removal_reason(kind)
                    .map(|reason| (resource.identifier.clone(), reason))
            })
            .collect();
        self.cascade(seeds);
    }

    fn cascade(&mut self, seeds: Vec<(String, RemovalReason)>) {
        if seeds.is_empty() {
            return;
        }
        for (id, reason) in &seeds {
            let titles = self.manifest.item_titles_for(id);
            tracing::info!(resource = %id, %reason, "removing resource");
            self.report.removed(id, *reason, titles);
        }
        let ids: BTreeSet<String> = seeds.into_iter().map(|(id, _)| id).collect();
        let outcome = cascade::remove(&mut self.manifest, &ids);
        self.report
            .pruned(outcome.removed_items, outcome.removed_dependencies);
    }

    fn downgrade_schema(&mut self) {
        let change = rules::downgrade_version(&mut self.manifest);
        if let Some(change) = &change {
            tracing::info!(from = %change.from, to = %change.to, "version downgraded");
        }
        self.report.version_change(change);
        rules::reset_schema_locations(&mut self.manifest);
        let retagged = rules::retag_metadata(&mut self.manifest);
        rules::normalize_core_namespace(&mut self.manifest);
        tracing::debug!(retagged, "metadata retagged");
    }

    /// Assessments whose only reference is a secondary `assessment_qti.xml`
    /// take it as their href.
    fn fix_assessment_hrefs(&mut self) {
        let candidates: Vec<String> = self
            .manifest
            .resources
            .iter()
            .filter(|resource| {
                resource.href.is_none() && classify::is_assessment(resource, &self.payload)
            })
            .map(|resource| resource.identifier.clone())
            .collect();
        for id in candidates {
            let Some(resource) = self.manifest.resource_mut(&id) else {
                continue;
            };
            let descriptor = resource
                .files
                .iter()
                .find(|file| {
                    let lower = file.to_ascii_lowercase();
                    lower == QUIZ_DESCRIPTOR || lower.ends_with(&format!("/{QUIZ_DESCRIPTOR}"))
                })
                .cloned();
            if let Some(descriptor) = descriptor {
                tracing::debug!(resource = %id, href = %descriptor, "assessment href set from file reference");
                resource.href = Some(descriptor.clone());
                self.report.href_change(HrefChange {
                    resource: id,
                    from: String::new(),
                    to: descriptor,
                    kind: HrefChangeKind::Promoted,
                });
            }
        }
    }

    fn remove_empty_assessments(&mut self) {
        if !self.options.remove_empty_assessments {
            return;
        }
        let seeds: Vec<(String, RemovalReason)> = self
            .manifest
            .resources
            .iter()
            .filter(|resource| resource.resource_type.to_ascii_lowercase().contains("imsqti"))
            .filter(|resource| {
                resource
                    .primary_reference()
                    .and_then(|reference| href::locate(&self.payload, reference))
                    .and_then(|key| self.payload.get(&key))
                    .is_none_or(|bytes| classify::question_item_count(bytes) == 0)
            })
            .map(|resource| (resource.identifier.clone(), RemovalReason::EmptyAssessment))
            .collect();
        self.cascade(seeds);
    }

    fn repair_hrefs(&mut self, placeholder: &dyn PlaceholderRenderer) -> Result<(), CartridgeError> {
        let outcome = href::repair(&mut self.manifest, &mut self.payload, placeholder)?;
        for change in outcome.changes {
            self.report.href_change(change);
        }
        self.report.duplicates_removed(outcome.duplicates);
        let seeds = outcome
            .unreferenced
            .into_iter()
            .map(|id| (id, RemovalReason::MissingReference))
            .collect();
        self.cascade(seeds);

        let sweep = cascade::remove(&mut self.manifest, &BTreeSet::new());
        self.report
            .pruned(sweep.removed_items, sweep.removed_dependencies);
        Ok(())
    }

    /// Runs once before href repair, which drops secondary file references,
    /// and once after, which may move files to their canonical keys.
    fn collect_quiz_paths(&mut self) {
        let paths = classify::assessment_payload_paths(&self.manifest, &self.payload);
        self.quiz_paths.extend(paths);
    }

    fn xml_payload_paths(&self) -> Vec<String> {
        self.payload
            .paths()
            .filter(|path| *path != self.manifest_name)
            .filter(|path| {
                let lower = path.to_ascii_lowercase();
                lower.ends_with(".xml") || lower.ends_with(".qti")
            })
            .map(str::to_string)
            .collect()
    }

    /// Runs the textual rule table over descriptor payloads.
    fn patch_descriptors(&mut self) {
        for path in self.xml_payload_paths() {
            let Some(bytes) = self.payload.get(&path) else {
                continue;
            };
            let Ok(text) = std::str::from_utf8(bytes) else {
                continue;
            };
            let rewritten = rules::substitute_text(text);
            if rewritten != text {
                tracing::debug!(path = %path, "descriptor patched");
                self.payload.insert(path.clone(), rewritten.into_bytes());
                self.report.descriptor_patch(&path);
            }
        }
    }

    fn normalize_answer_keys(&mut self) {
        let fallback = self.options.fallback_to_multiple_choice;
        for path in self.quiz_paths.clone() {
            let Some(outcome) = self
                .payload
                .get(&path)
                .and_then(|bytes| answer_key::normalize_payload(bytes, fallback))
            else {
                continue;
            };
            for item in outcome.items {
                self.report.answer_key(AnswerKeyRecord::from_item(&path, item));
            }
            if let Some(rewritten) = outcome.rewritten {
                self.payload.insert(path, rewritten);
            }
        }
        let tally = AnswerKeyTally::from_records(self.report.answer_key_records());
        tracing::info!(
            normalized = tally.normalized,
            positional = tally.positional,
            fallback = tally.fallback,
            skipped = tally.skipped,
            "two-choice items processed"
        );
        if tally.positional > 0 {
            tracing::warn!(
                count = tally.positional,
                "two-choice items mapped by position; correct answers may be inverted"
            );
        }
    }

    fn audit(&mut self) {
        let mut findings = Vec::new();
        for resource in &self.manifest.resources {
            match classify::classify(resource, &self.payload) {
                ResourceKind::Assessment => {
                    let flavor = classify::assessment_flavor(resource, &self.payload);
                    let import_risk = flavor.import_risk();
                    if import_risk {
                        tracing::warn!(resource = %resource.identifier, flavor = ?flavor.flavor, "assessment may not import cleanly");
                    }
                    findings.push(AuditFinding::AssessmentFlavor {
                        resource: resource.identifier.clone(),
                        flavor: flavor.flavor,
                        vendor_extensions: flavor.vendor_extensions,
                        import_risk,
                        path: flavor.path,
                        titles: self.manifest.item_titles_for(&resource.identifier),
                    });
                }
                ResourceKind::ContentPage => {
                    let Some(key) = resource
                        .primary_reference()
                        .and_then(|reference| href::locate(&self.payload, reference))
                    else {
                        continue;
                    };
                    let empty = self
                        .payload
                        .get(&key)
                        .is_some_and(|bytes| bytes.iter().all(u8::is_ascii_whitespace));
                    if empty {
                        tracing::warn!(resource = %resource.identifier, path = %key, "content page is empty");
                        findings.push(AuditFinding::EmptyContentPage {
                            resource: resource.identifier.clone(),
                            path: key,
                        });
                    }
                }
                _ => {}
            }
        }
        for finding in findings {
            self.report.audit(finding);
        }
    }

    /// Serializes the manifest, applies the textual pass, and verifies the
    /// finished package.
    fn finish_manifest(&mut self) -> Result<(), CartridgeError> {
        let text = rules::rewrite_text(&self.manifest.serialize());
        rules::ensure_no_forbidden_markers(&text)?;
        verify::verify_package(
            &text,
            &self.payload,
            &self.quiz_paths,
            AnswerKeyPolicy::Recorded(self.report.answer_key_records()),
            self.options.strict_answer_keys,
        )?;
        self.payload
            .insert(self.manifest_name.clone(), text.into_bytes());
        Ok(())
    }
}
