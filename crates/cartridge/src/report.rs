//! The immutable record a conversion returns.
//!
//! Passes hand their results to a [`ReportBuilder`]; the pipeline seals it
//! into a [`ChangeReport`] once every pass has run.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::answer_key::{ItemOutcome, ItemReport, MappingBasis};
use crate::classify::AssessmentFlavor;
use crate::href::{DuplicateRemoval, HrefChange};
use crate::options::ExcludeKind;
use crate::rules::{ValueChange, VersionChange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "reason", content = "kind", rename_all = "kebab-case")]
pub enum RemovalReason {
    ExternalTool,
    AssignmentExtension,
    Excluded(ExcludeKind),
    EmptyAssessment,
    MissingReference,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalReason::ExternalTool => f.write_str("external-tool"),
            RemovalReason::AssignmentExtension => f.write_str("assignment-extension"),
            RemovalReason::Excluded(kind) => write!(f, "excluded {kind}"),
            RemovalReason::EmptyAssessment => f.write_str("empty-assessment"),
            RemovalReason::MissingReference => f.write_str("missing-reference"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemovedResource {
    pub id: String,
    pub reason: RemovalReason,
    /// Titles of the items that referenced the resource before removal.
    pub titles: Vec<String>,
}

/// Findings reported for content the converter does not rewrite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "finding", rename_all = "kebab-case")]
pub enum AuditFinding {
    AssessmentFlavor {
        resource: String,
        flavor: AssessmentFlavor,
        vendor_extensions: bool,
        import_risk: bool,
        path: Option<String>,
        titles: Vec<String>,
    },
    EmptyContentPage {
        resource: String,
        path: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnswerKeyRecord {
    /// Payload file holding the item.
    pub path: String,
    pub index: usize,
    pub ident: Option<String>,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl AnswerKeyRecord {
    pub(crate) fn from_item(path: &str, item: ItemReport) -> Self {
        Self {
            path: path.to_string(),
            index: item.index,
            ident: item.ident,
            outcome: item.outcome,
        }
    }
}

/// Per-outcome counts of two-choice items. `normalized` includes
/// `positional`; the four buckets other than `positional` sum to the number
/// of detected candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnswerKeyTally {
    pub normalized: usize,
    pub positional: usize,
    pub fallback: usize,
    pub skipped: usize,
}

impl AnswerKeyTally {
    pub fn from_records(records: &[AnswerKeyRecord]) -> Self {
        let mut tally = AnswerKeyTally::default();
        for record in records {
            match &record.outcome {
                ItemOutcome::Normalized { basis } => {
                    tally.normalized += 1;
                    if *basis == MappingBasis::Positional {
                        tally.positional += 1;
                    }
                }
                ItemOutcome::ConvertedToFallback { .. } => tally.fallback += 1,
                ItemOutcome::Skipped { .. } => tally.skipped += 1,
            }
        }
        tally
    }

    pub fn candidates(&self) -> usize {
        self.normalized + self.fallback + self.skipped
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    manifest_path: String,
    already_at_target: bool,
    version_change: Option<VersionChange>,
    removed: Vec<RemovedResource>,
    pruned_items: usize,
    pruned_dependencies: usize,
    intended_use_changes: Vec<ValueChange>,
    type_downshifts: Vec<ValueChange>,
    metadata_blocks_removed: usize,
    href_changes: Vec<HrefChange>,
    duplicates_removed: Vec<DuplicateRemoval>,
    descriptor_patches: Vec<String>,
    answer_keys: Vec<AnswerKeyRecord>,
    audit: Vec<AuditFinding>,
}

impl ChangeReport {
    /// Manifest location inside the package, relative to its root.
    pub fn manifest_path(&self) -> &str {
        &self.manifest_path
    }

    pub fn already_at_target(&self) -> bool {
        self.already_at_target
    }

    pub fn version_change(&self) -> Option<&VersionChange> {
        self.version_change.as_ref()
    }

    pub fn removed(&self) -> &[RemovedResource] {
        &self.removed
    }

    pub fn pruned_items(&self) -> usize {
        self.pruned_items
    }

    pub fn pruned_dependencies(&self) -> usize {
        self.pruned_dependencies
    }

    pub fn intended_use_changes(&self) -> &[ValueChange] {
        &self.intended_use_changes
    }

    pub fn type_downshifts(&self) -> &[ValueChange] {
        &self.type_downshifts
    }

    /// Curriculum-standards and variant blocks dropped from the manifest.
    pub fn metadata_blocks_removed(&self) -> usize {
        self.metadata_blocks_removed
    }

    pub fn href_changes(&self) -> &[HrefChange] {
        &self.href_changes
    }

    pub fn duplicates_removed(&self) -> &[DuplicateRemoval] {
        &self.duplicates_removed
    }

    /// Descriptor payload files rewritten by the textual rule table.
    pub fn descriptor_patches(&self) -> &[String] {
        &self.descriptor_patches
    }

    pub fn answer_keys(&self) -> &[AnswerKeyRecord] {
        &self.answer_keys
    }

    pub fn audit(&self) -> &[AuditFinding] {
        &self.audit
    }

    pub fn removal_counts(&self) -> BTreeMap<RemovalReason, usize> {
        let mut counts = BTreeMap::new();
        for removed in &self.removed {
            *counts.entry(removed.reason).or_insert(0) += 1;
        }
        counts
    }

    pub fn answer_key_tally(&self) -> AnswerKeyTally {
        AnswerKeyTally::from_records(&self.answer_keys)
    }

    pub fn is_empty(&self) -> bool {
        self.version_change.is_none()
            && self.removed.is_empty()
            && self.pruned_items == 0
            && self.pruned_dependencies == 0
            && self.intended_use_changes.is_empty()
            && self.type_downshifts.is_empty()
            && self.metadata_blocks_removed == 0
            && self.href_changes.is_empty()
            && self.duplicates_removed.is_empty()
            && self.descriptor_patches.is_empty()
            && self.answer_keys.is_empty()
    }
}

/// Accumulates pass results. Only the pipeline holds one.
#[derive(Debug, Default)]
pub(crate) struct ReportBuilder {
    report: ChangeReport,
}

impl ReportBuilder {
    pub(crate) fn new(manifest_path: &str) -> Self {
        Self {
            report: ChangeReport {
                manifest_path: manifest_path.to_string(),
                ..ChangeReport::default()
            },
        }
    }

    pub(crate) fn already_at_target(&mut self) {
        self.report.already_at_target = true;
    }

    pub(crate) fn version_change(&mut self, change: Option<VersionChange>) {
        if change.is_some() {
            self.report.version_change = change;
        }
    }

    pub(crate) fn removed(&mut self, id: &str, reason: RemovalReason, titles: Vec<String>) {
        self.report.removed.push(RemovedResource {
            id: id.to_string(),
            reason,
            titles,
        });
    }

    pub(crate) fn pruned(&mut self, items: usize, dependencies: usize) {
        self.report.pruned_items += items;
        self.report.pruned_dependencies += dependencies;
    }

    pub(crate) fn intended_use_changes(&mut self, changes: Vec<ValueChange>) {
        self.report.intended_use_changes.extend(changes);
    }

    pub(crate) fn type_downshifts(&mut self, changes: Vec<ValueChange>) {
        self.report.type_downshifts.extend(changes);
    }

    pub(crate) fn metadata_blocks_removed(&mut self, count: usize) {
        self.report.metadata_blocks_removed += count;
    }

    pub(crate) fn href_change(&mut self, change: HrefChange) {
        self.report.href_changes.push(change);
    }

    pub(crate) fn duplicates_removed(&mut self, duplicates: Vec<DuplicateRemoval>) {
        self.report.duplicates_removed.extend(duplicates);
    }

    pub(crate) fn descriptor_patch(&mut self, path: &str) {
        self.report.descriptor_patches.push(path.to_string());
    }

    pub(crate) fn answer_key(&mut self, record: AnswerKeyRecord) {
        self.report.answer_keys.push(record);
    }

    pub(crate) fn audit(&mut self, finding: AuditFinding) {
        self.report.audit.push(finding);
    }

    pub(crate) fn answer_key_records(&self) -> &[AnswerKeyRecord] {
        &self.report.answer_keys
    }

    pub(crate) fn finish(self) -> ChangeReport {
        self.report
    }
}
