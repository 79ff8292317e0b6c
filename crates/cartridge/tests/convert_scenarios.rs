use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use cartridge::{
    CartridgeError, ConvertOptions, ExcludeKind, HrefChangeKind, ItemOutcome, MANIFEST_FILE,
    Manifest, MappingBasis, RemovalReason, TARGET_VERSION, check, convert, xml,
};

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="course" xmlns="http://www.imsglobal.org/xsd/imsccv1p3/imscp_v1p1"
  xmlns:lomimscc="http://ltsc.ieee.org/xsd/imsccv1p3/LOM/manifest"
  xmlns:lom="http://ltsc.ieee.org/xsd/imsccv1p3/LOM/resource"
  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xsi:schemaLocation="http://www.imsglobal.org/xsd/imsccv1p3/imscp_v1p1 http://www.imsglobal.org/profile/cc/ccv1p3/ccv1p3_imscp_v1p2_v1p0.xsd">
  <metadata>
    <schema>IMS Common Cartridge</schema>
    <schemaversion>1.3.0</schemaversion>
    <lomimscc:lom>
      <lomimscc:general><lomimscc:title><lomimscc:string>Biology 101</lomimscc:string></lomimscc:title></lomimscc:general>
    </lomimscc:lom>
  </metadata>
  <organizations>
    <organization identifier="org" structure="rooted-hierarchy">
      <item identifier="root">
        <item identifier="m1">
          <title>Module 1</title>
          <item identifier="i_tool" identifierref="tool"><title>Publisher Tool</title></item>
          <item identifier="i_notes" identifierref="notes"><title>Notes</title></item>
          <item identifier="i_quiz" identifierref="quiz"><title>Quiz</title></item>
          <item identifier="i_maybe" identifierref="maybe"><title>Maybe Quiz</title></item>
          <item identifier="i_empty" identifierref="emptyquiz"><title>Empty Quiz</title></item>
          <item identifier="i_link" identifierref="link"><title>Reading</title></item>
        </item>
        <item identifier="m2">
          <title>Tools only</title>
          <item identifier="i_tool2" identifierref="tool"><title>Publisher Tool again</title></item>
        </item>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="tool" type="imsbasiclti_xmlv1p3">
      <file href="tool.xml"/>
    </resource>
    <resource identifier="notes" type="webcontent" href="files/My%20Notes%21.pdf">
      <file href="files/My Notes!.pdf"/>
      <dependency identifierref="tool"/>
    </resource>
    <resource identifier="quiz" type="imsqti_xmlv1p2/imscc_xmlv1p3/assessment">
      <file href="quiz/assessment_qti.xml"/>
    </resource>
    <resource identifier="maybe" type="imsqti_xmlv1p2/imscc_xmlv1p3/assessment" href="maybe/assessment_qti.xml">
      <file href="maybe/assessment_qti.xml"/>
    </resource>
    <resource identifier="emptyquiz" type="imsqti_xmlv1p2/imscc_xmlv1p3/assessment" href="empty/assessment_qti.xml">
      <file href="empty/assessment_qti.xml"/>
    </resource>
    <resource identifier="link" type="imswl_xmlv1p3">
      <file href="link.xml"/>
    </resource>
  </resources>
</manifest>"#;

const TOOL: &str = r#"<cartridge_basiclti_link xmlns="http://www.imsglobal.org/xsd/imslticc_v1p0"><title>Tool</title></cartridge_basiclti_link>"#;

const LINK: &str = r#"<webLink xmlns="http://www.imsglobal.org/xsd/imsccv1p3/imswl_v1p3"><title>Reading</title><url href="https://example.com/reading"/></webLink>"#;

fn quiz(labels: &[(&str, &str)], correct: &str) -> String {
    let labels: String = labels
        .iter()
        .map(|(ident, text)| {
            format!(
                r#"<response_label ident="{ident}"><material><mattext texttype="text/plain">{text}</mattext></material></response_label>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<questestinterop xmlns="http://www.imsglobal.org/xsd/ims_qtiasiv1p2">
  <assessment ident="a1" title="Quiz">
    <section ident="root_section">
      <item ident="q1" title="Sky">
        <itemmetadata><qtimetadata>
          <qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>true_false_question</fieldentry></qtimetadatafield>
        </qtimetadata></itemmetadata>
        <presentation>
          <material><mattext texttype="text/html">The sky is blue.</mattext></material>
          <response_lid ident="response1" rcardinality="Single"><render_choice>{labels}</render_choice></response_lid>
        </presentation>
        <resprocessing>
          <outcomes><decvar maxvalue="100" minvalue="0" varname="SCORE" vartype="Decimal"/></outcomes>
          <respcondition continue="No">
            <conditionvar><varequal respident="response1">{correct}</varequal></conditionvar>
            <setvar action="Set" varname="SCORE">100</setvar>
          </respcondition>
          <respcondition continue="Yes">
            <conditionvar><other/></conditionvar>
            <displayfeedback feedbacktype="Response" linkrefid="general_incorrect_fb"/>
          </respcondition>
        </resprocessing>
      </item>
    </section>
  </assessment>
</questestinterop>
"#
    )
}

const EMPTY_QUIZ: &str = r#"<questestinterop><assessment ident="e"><section ident="root_section"/></assessment></questestinterop>"#;

fn write_file(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn make_package(root: &Path) {
    write_file(root, MANIFEST_FILE, MANIFEST);
    write_file(root, "tool.xml", TOOL);
    write_file(root, "files/My Notes!.pdf", "%PDF-1.4 notes");
    write_file(
        root,
        "quiz/assessment_qti.xml",
        &quiz(&[("opt1", "True"), ("opt2", "False")], "opt1"),
    );
    write_file(
        root,
        "maybe/assessment_qti.xml",
        &quiz(&[("a", "True"), ("b", "False"), ("c", "Maybe")], "a"),
    );
    write_file(root, "empty/assessment_qti.xml", EMPTY_QUIZ);
    write_file(root, "link.xml", LINK);
}

fn output_manifest(root: &Path) -> Manifest {
    Manifest::parse(&fs::read(root.join(MANIFEST_FILE)).unwrap()).unwrap()
}

#[test]
fn external_tool_is_removed_with_its_items_and_edges() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");

    let conversion = convert(&source, &destination, &ConvertOptions::default()).unwrap();
    let report = conversion.report;
    let manifest = output_manifest(&destination);

    assert_eq!(manifest.version().as_deref(), Some(TARGET_VERSION));
    assert!(!manifest.contains_resource("tool"));
    assert!(manifest.items_referencing("tool").is_empty());
    assert!(manifest.dependents_of("tool").is_empty());
    assert!(manifest.resource("notes").unwrap().dependencies.is_empty());

    let tool = report
        .removed()
        .iter()
        .find(|removed| removed.id == "tool")
        .unwrap();
    assert_eq!(tool.reason, RemovalReason::ExternalTool);
    assert_eq!(
        tool.titles,
        vec!["Publisher Tool".to_string(), "Publisher Tool again".to_string()]
    );
    // The module that only held the tool collapses with it.
    assert!(
        manifest
            .live_items()
            .all(|(_, item)| item.identifier.as_deref() != Some("m2"))
    );

    let text = fs::read_to_string(destination.join(MANIFEST_FILE)).unwrap();
    assert!(!text.contains("imsccv1p3"));
    assert!(!text.contains("ccv1p3"));
    assert!(text.contains("http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1"));
}

#[test]
fn differently_encoded_references_collapse_to_one_canonical_path() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");

    let report = convert(&source, &destination, &ConvertOptions::default())
        .unwrap()
        .report;
    let manifest = output_manifest(&destination);
    let notes = manifest.resource("notes").unwrap();

    assert_eq!(notes.href.as_deref(), Some("files/My%20Notes%21.pdf"));
    assert_eq!(notes.files, vec!["files/My%20Notes%21.pdf".to_string()]);

    let entries: Vec<_> = fs::read_dir(destination.join("files"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["My Notes!.pdf".to_string()]);

    assert!(!report.href_changes().iter().any(|change| change.resource == "notes"
        && matches!(change.kind, HrefChangeKind::Placeholder)));
}

#[test]
fn two_choice_item_is_normalized_by_its_choice_texts() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");

    let report = convert(&source, &destination, &ConvertOptions::default())
        .unwrap()
        .report;

    let bytes = fs::read(destination.join("quiz/assessment_qti.xml")).unwrap();
    let root = xml::parse(&bytes).unwrap();
    let idents: Vec<_> = root
        .find_all("response_label")
        .into_iter()
        .map(|label| label.attr("ident").unwrap().to_string())
        .collect();
    assert_eq!(idents, vec!["true", "false"]);
    let refs: Vec<_> = root
        .find_all("varequal")
        .into_iter()
        .map(|eq| eq.text_content())
        .collect();
    assert_eq!(refs, vec!["true"]);
    assert!(root.find("other").is_none());

    let record = report
        .answer_keys()
        .iter()
        .find(|record| record.path == "quiz/assessment_qti.xml")
        .unwrap();
    assert_eq!(
        record.outcome,
        ItemOutcome::Normalized {
            basis: MappingBasis::LiteralText
        }
    );

    // The quiz had no href; its descriptor file was promoted.
    let manifest = output_manifest(&destination);
    assert_eq!(
        manifest.resource("quiz").unwrap().href.as_deref(),
        Some("quiz/assessment_qti.xml")
    );
}

#[test]
fn malformed_item_without_fallback_is_skipped_and_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");

    let report = convert(&source, &destination, &ConvertOptions::default())
        .unwrap()
        .report;

    let before = xml::parse(&fs::read(source.join("maybe/assessment_qti.xml")).unwrap()).unwrap();
    let after =
        xml::parse(&fs::read(destination.join("maybe/assessment_qti.xml")).unwrap()).unwrap();
    assert_eq!(before, after);

    let tally = report.answer_key_tally();
    assert_eq!(tally.skipped, 1);
    assert_eq!(tally.normalized, 1);
    assert_eq!(tally.candidates(), report.answer_keys().len());
}

#[test]
fn fallback_converts_malformed_items_to_multiple_choice() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");
    let options = ConvertOptions {
        fallback_to_multiple_choice: true,
        ..ConvertOptions::default()
    };

    let report = convert(&source, &destination, &options).unwrap().report;
    let text = fs::read_to_string(destination.join("maybe/assessment_qti.xml")).unwrap();
    assert!(text.contains("multiple_choice_question"));
    assert!(!text.contains("<other"));
    assert_eq!(report.answer_key_tally().fallback, 1);
}

#[test]
fn strict_mode_rejects_skipped_items_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");
    let options = ConvertOptions {
        strict_answer_keys: true,
        ..ConvertOptions::default()
    };

    let err = convert(&source, &destination, &options).unwrap_err();
    assert!(matches!(err, CartridgeError::InvariantViolation(_)));
    assert_eq!(err.violations().len(), 1);
    assert!(!destination.exists());
}

#[test]
fn excluded_assessments_are_neither_rewritten_nor_judged() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");
    let options = ConvertOptions {
        exclude_kinds: BTreeSet::from([ExcludeKind::Assessment]),
        strict_answer_keys: true,
        ..ConvertOptions::default()
    };

    let report = convert(&source, &destination, &options).unwrap().report;
    let manifest = output_manifest(&destination);
    for id in ["quiz", "maybe", "emptyquiz"] {
        assert!(!manifest.contains_resource(id), "{id}");
    }
    assert!(report.answer_keys().is_empty());
    assert_eq!(
        report
            .removal_counts()
            .get(&RemovalReason::Excluded(ExcludeKind::Assessment)),
        Some(&3)
    );

    for path in ["quiz/assessment_qti.xml", "maybe/assessment_qti.xml"] {
        let before = fs::read(source.join(path)).unwrap();
        let after = fs::read(destination.join(path)).unwrap();
        assert_eq!(before, after, "{path}");
    }
    check(&destination, true).unwrap();
}

#[test]
fn empty_assessments_and_excluded_kinds_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");
    let options = ConvertOptions {
        exclude_kinds: BTreeSet::from([ExcludeKind::WebLink]),
        ..ConvertOptions::default()
    };

    let report = convert(&source, &destination, &options).unwrap().report;
    let manifest = output_manifest(&destination);
    assert!(!manifest.contains_resource("emptyquiz"));
    assert!(!manifest.contains_resource("link"));

    let counts = report.removal_counts();
    assert_eq!(counts.get(&RemovalReason::EmptyAssessment), Some(&1));
    assert_eq!(
        counts.get(&RemovalReason::Excluded(ExcludeKind::WebLink)),
        Some(&1)
    );
}

#[test]
fn descriptors_and_resource_types_are_downshifted() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");

    let report = convert(&source, &destination, &ConvertOptions::default())
        .unwrap()
        .report;

    let link = fs::read_to_string(destination.join("link.xml")).unwrap();
    assert!(link.contains("imsccv1p1/imswl_v1p1"));
    assert!(report.descriptor_patches().contains(&"link.xml".to_string()));

    let manifest = output_manifest(&destination);
    assert_eq!(manifest.resource("link").unwrap().resource_type, "imswl_xmlv1p1");
    assert!(
        report
            .type_downshifts()
            .iter()
            .any(|change| change.resource == "quiz" && change.to.contains("imscc_xmlv1p1"))
    );
}

#[test]
fn converted_package_passes_a_standalone_check() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    make_package(&source);
    let destination = dir.path().join("converted");
    convert(&source, &destination, &ConvertOptions::default()).unwrap();

    let summary = check(&destination, false).unwrap();
    assert_eq!(summary.version.as_deref(), Some(TARGET_VERSION));
    assert_eq!(summary.manifest_path, MANIFEST_FILE);

    // The skipped item is reported once strict mode is requested.
    assert!(check(&destination, true).is_err());
    // The unconverted source does not pass.
    assert!(check(&source, false).is_err());
}

#[test]
fn package_without_manifest_is_structural() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_file(&source, "page.html", "<p>orphan</p>");

    let err = convert(&source, &dir.path().join("out"), &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, CartridgeError::Structural(_)));
    assert!(!dir.path().join("out").exists());
}
