use std::process::ExitCode;

use cartridge::{AuditFinding, ChangeReport, CheckSummary, HrefChangeKind, Violation};
use serde_json::json;

use crate::commands::CommandResult;
use crate::error::CliError;

pub enum OutputFormat {
    Text,
    Json,
}

/// Renders a `CommandResult` as human-readable text or a single JSON line and
/// turns its outcome into an exit code.
pub fn emit_result(result: CommandResult, format: OutputFormat) -> Result<ExitCode, CliError> {
    match format {
        OutputFormat::Text => print_text(&result),
        OutputFormat::Json => print_json(&result)?,
    };
    Ok(ExitCode::from(result.exit_status().code()))
}

fn print_text(result: &CommandResult) {
    match result {
        CommandResult::Converted {
            source,
            destination,
            report,
        } => {
            println!("Converted {source} -> {destination}");
            print_report(report);
        }
        CommandResult::Checked {
            root,
            summary,
            violations,
            healthy,
        } => print_check(root, summary.as_ref(), violations, *healthy),
    }
}

fn print_json(result: &CommandResult) -> Result<(), CliError> {
    let payload = json!(result);
    println!("{payload}");
    Ok(())
}

fn print_report(report: &ChangeReport) {
    println!("Manifest: {}", report.manifest_path());
    if report.already_at_target() {
        println!("Package is already at version 1.1 or below; copied unchanged.");
        return;
    }

    match report.version_change() {
        Some(change) => println!("Version: {} -> {}", change.from, change.to),
        None => println!("Version: unchanged"),
    }

    if !report.removed().is_empty() {
        println!("Removed {} resource(s):", report.removed().len());
        for removed in report.removed() {
            if removed.titles.is_empty() {
                println!("  - {} ({})", removed.id, removed.reason);
            } else {
                println!(
                    "  - {} ({}): {}",
                    removed.id,
                    removed.reason,
                    removed.titles.join(", ")
                );
            }
        }
    }
    if report.pruned_items() > 0 || report.pruned_dependencies() > 0 {
        println!(
            "Pruned {} item(s) and {} dependency edge(s)",
            report.pruned_items(),
            report.pruned_dependencies()
        );
    }

    for change in report.intended_use_changes() {
        println!(
            "  intendeduse {}: {} -> {}",
            change.resource, change.from, change.to
        );
    }
    for change in report.type_downshifts() {
        println!("  type {}: {} -> {}", change.resource, change.from, change.to);
    }
    if report.metadata_blocks_removed() > 0 {
        println!(
            "Dropped {} extension metadata block(s)",
            report.metadata_blocks_removed()
        );
    }

    if !report.href_changes().is_empty() {
        println!("Reference changes:");
        for change in report.href_changes() {
            println!(
                "  - {}: {} -> {} ({})",
                change.resource,
                change.from,
                change.to,
                describe_href_change(&change.kind)
            );
        }
    }
    for duplicate in report.duplicates_removed() {
        let note = if duplicate.identical {
            "identical"
        } else {
            "content differed"
        };
        println!(
            "  removed duplicate {} (kept {}, {note})",
            duplicate.removed, duplicate.kept
        );
    }
    for path in report.descriptor_patches() {
        println!("  patched descriptor {path}");
    }

    let tally = report.answer_key_tally();
    if tally.candidates() > 0 {
        println!(
            "True/false items: {} normalized ({} by position), {} converted to multiple choice, {} skipped",
            tally.normalized, tally.positional, tally.fallback, tally.skipped
        );
    }

    let findings: Vec<String> = report.audit().iter().filter_map(describe_finding).collect();
    if !findings.is_empty() {
        println!("Audit:");
        for finding in findings {
            println!("  - {finding}");
        }
    }
}

fn describe_href_change(kind: &HrefChangeKind) -> String {
    match kind {
        HrefChangeKind::Reencoded => "re-encoded".to_string(),
        HrefChangeKind::Promoted => "promoted file reference".to_string(),
        HrefChangeKind::Relocated { source } => format!("copied from {source}"),
        HrefChangeKind::Placeholder => "placeholder written".to_string(),
        HrefChangeKind::DirectoryPlaceholder => "directory placeholder".to_string(),
        HrefChangeKind::DroppedSecondary { reference } => format!("dropped {reference}"),
    }
}

/// Only findings worth a reader's attention are printed; JSON carries all.
fn describe_finding(finding: &AuditFinding) -> Option<String> {
    match finding {
        AuditFinding::AssessmentFlavor {
            resource,
            flavor,
            vendor_extensions,
            import_risk: true,
            ..
        } => {
            let vendor = if *vendor_extensions {
                " with vendor extensions"
            } else {
                ""
            };
            Some(format!("{resource}: {flavor} assessment{vendor} may not import cleanly"))
        }
        AuditFinding::EmptyContentPage { resource, path } => {
            Some(format!("{resource}: content page {path} is empty"))
        }
        _ => None,
    }
}

fn print_check(root: &str, summary: Option<&CheckSummary>, violations: &[Violation], healthy: bool) {
    if healthy {
        match summary {
            Some(summary) => println!(
                "Package check: OK ({}, version {}, {} resources, {} items)",
                summary.manifest_path,
                summary.version.as_deref().unwrap_or("unknown"),
                summary.resources,
                summary.items
            ),
            None => println!("Package check: OK ({root})"),
        }
        return;
    }
    println!("Package check: FAIL ({} violation(s))", violations.len());
    for violation in violations {
        println!("  - {violation}");
    }
}
