use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="course" xmlns="http://www.imsglobal.org/xsd/imsccv1p3/imscp_v1p1"
  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xsi:schemaLocation="http://www.imsglobal.org/xsd/imsccv1p3/imscp_v1p1 http://www.imsglobal.org/profile/cc/ccv1p3/ccv1p3_imscp_v1p2_v1p0.xsd">
  <metadata>
    <schema>IMS Common Cartridge</schema>
    <schemaversion>1.3.0</schemaversion>
  </metadata>
  <organizations>
    <organization identifier="org" structure="rooted-hierarchy">
      <item identifier="root">
        <item identifier="i_page" identifierref="page"><title>Welcome</title></item>
        <item identifier="i_tool" identifierref="tool"><title>Publisher Tool</title></item>
        <item identifier="i_link" identifierref="link"><title>Reading</title></item>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="page" type="webcontent" href="wiki_content/welcome page.html">
      <file href="wiki_content/welcome%20page.html"/>
    </resource>
    <resource identifier="tool" type="imsbasiclti_xmlv1p3">
      <file href="tool.xml"/>
    </resource>
    <resource identifier="link" type="imswl_xmlv1p3">
      <file href="link.xml"/>
    </resource>
  </resources>
</manifest>"#;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cartridge"))
}

fn make_package(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(root.join("wiki_content"))?;
    fs::write(root.join("imsmanifest.xml"), MANIFEST)?;
    fs::write(root.join("wiki_content/welcome page.html"), "<p>Welcome</p>")?;
    fs::write(
        root.join("tool.xml"),
        r#"<cartridge_basiclti_link xmlns="http://www.imsglobal.org/xsd/imslticc_v1p0"/>"#,
    )?;
    fs::write(
        root.join("link.xml"),
        r#"<webLink xmlns="http://www.imsglobal.org/xsd/imsccv1p3/imswl_v1p3"><url href="https://example.com"/></webLink>"#,
    )?;
    Ok(())
}

#[test]
fn convert_prints_a_text_report() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let destination = temp.path().join("out");

    cli()
        .arg("convert")
        .arg(&source)
        .arg(&destination)
        .assert()
        .success()
        .stdout(contains("Version: 1.3.0 -> 1.1.0"))
        .stdout(contains("tool (external-tool): Publisher Tool"))
        .stdout(contains("wiki_content/welcome%20page.html"));

    let manifest = fs::read_to_string(destination.join("imsmanifest.xml"))?;
    assert!(manifest.contains("<schemaversion>1.1.0</schemaversion>"));
    assert!(!manifest.contains("imsccv1p3"));
    assert!(destination.join("wiki_content/welcome page.html").exists());
    Ok(())
}

#[test]
fn convert_emits_json_when_requested() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let destination = temp.path().join("out");

    let output = cli()
        .arg("--json")
        .arg("convert")
        .arg(&source)
        .arg(&destination)
        .output()?;
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["type"], "converted");
    assert_eq!(value["report"]["version_change"]["to"], "1.1.0");
    assert_eq!(value["report"]["removed"][0]["id"], "tool");
    Ok(())
}

#[test]
fn exclude_flag_removes_the_named_kinds() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let destination = temp.path().join("out");

    cli()
        .args(["convert", "--exclude", "weblink"])
        .arg(&source)
        .arg(&destination)
        .assert()
        .success()
        .stdout(contains("link (excluded web-link): Reading"));

    let manifest = fs::read_to_string(destination.join("imsmanifest.xml"))?;
    assert!(!manifest.contains(r#"identifier="link""#));
    Ok(())
}

#[test]
fn config_file_supplies_options() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let config = temp.path().join("cartridge.yaml");
    fs::write(&config, "remove-external-tools: false\n")?;
    let destination = temp.path().join("out");

    cli()
        .arg("convert")
        .arg(&source)
        .arg(&destination)
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    let manifest = fs::read_to_string(destination.join("imsmanifest.xml"))?;
    assert!(manifest.contains(r#"identifier="tool""#));
    Ok(())
}

#[test]
fn bad_config_exits_with_config_status() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let config = temp.path().join("cartridge.yaml");
    fs::write(&config, "exclude-kinds: [video]\n")?;

    cli()
        .arg("convert")
        .arg(&source)
        .arg(temp.path().join("out"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(78);
    assert!(!temp.path().join("out").exists());
    Ok(())
}

#[test]
fn unknown_exclude_kind_is_a_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;

    cli()
        .args(["convert", "--exclude", "video"])
        .arg(&source)
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .code(64)
        .stderr(contains("video"));
    Ok(())
}

#[test]
fn existing_destination_is_refused() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    make_package(&source)?;
    let destination = temp.path().join("out");
    fs::create_dir_all(&destination)?;

    cli()
        .arg("convert")
        .arg(&source)
        .arg(&destination)
        .assert()
        .failure()
        .code(64)
        .stderr(contains("already exists"));
    Ok(())
}

#[test]
fn missing_manifest_is_a_data_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let source = temp.path().join("source");
    fs::create_dir_all(&source)?;
    fs::write(source.join("page.html"), "<p>orphan</p>")?;

    cli()
        .arg("convert")
        .arg(&source)
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .code(65)
        .stderr(contains("imsmanifest.xml"));
    assert!(!temp.path().join("out").exists());
    Ok(())
}
