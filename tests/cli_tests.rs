// End-to-end tests for the setupforge binary
//
// Exit codes: 0 success, 1 compile rule violated, 2 usage/config/IO failure.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const SAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/samples/desktop_app.json");

fn setupforge() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_setupforge"));
    for var in [
        "SETUPFORGE_PLATFORM",
        "SETUPFORGE_VERSION",
        "SETUPFORGE_PROFILE",
        "SETUPFORGE_BINARY",
        "SETUPFORGE_ICON",
        "SETUPFORGE_LICENSE",
        "SETUPFORGE_BANNER",
        "SETUPFORGE_DIALOG",
        "SETUPFORGE_BASELINE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn compile_to(manifest: &Path, out: &Path, extra: &[&str]) -> Output {
    setupforge()
        .arg("compile")
        .arg(manifest)
        .args(["--platform", "x64", "--version", "3.1.4", "--binary", "build/acme.exe"])
        .arg("--out")
        .arg(out)
        .args(extra)
        .output()
        .expect("Failed to run setupforge")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_manifest(dir: &TempDir, mutate: impl FnOnce(&mut serde_json::Value)) -> PathBuf {
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(SAMPLE).unwrap()).unwrap();
    mutate(&mut value);
    let path = dir.path().join("product.json");
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

#[test]
fn test_compile_writes_resolved_package() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("resolved.json");

    let output = compile_to(Path::new(SAMPLE), &out, &[]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("resolved.json"));
    assert!(text.lines().any(|l| l.starts_with("sha256:") && l.len() == "sha256:".len() + 64));

    let resolved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(resolved["product"]["version"], "3.1.4");
    assert_eq!(resolved["product"]["win64"], true);
}

#[test]
fn test_compile_to_stdout() {
    let output = setupforge()
        .args(["compile", SAMPLE, "--platform", "x86", "--version", "1.0.0"])
        .args(["--binary", "build/acme.exe"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let resolved: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(resolved["product"]["platform"], "x86");
}

#[test]
fn test_compile_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");

    assert!(compile_to(Path::new(SAMPLE), &first, &[]).status.success());
    assert!(compile_to(Path::new(SAMPLE), &second, &[]).status.success());
    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn test_version_from_environment() {
    let output = setupforge()
        .args(["validate", SAMPLE, "--binary", "build/acme.exe"])
        .env("SETUPFORGE_VERSION", "4.0.1")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("✓ Manifest is valid: Acme Editor 4.0.1"));
}

#[test]
fn test_rule_violation_exits_one_without_output() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, |v| {
        v["components"][0]["integrations"][0]
            .as_object_mut()
            .unwrap()
            .remove("permanent");
    });
    let out = dir.path().join("resolved.json");

    let output = compile_to(&manifest, &out, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!out.exists());
    assert!(String::from_utf8_lossy(&output.stderr).contains("MissingPermanenceFlag"));
}

#[test]
fn test_missing_injected_binary_is_a_rule_violation() {
    let output = setupforge()
        .args(["validate", SAMPLE, "--version", "1.0.0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_missing_manifest_exits_two() {
    let dir = TempDir::new().unwrap();
    let output = compile_to(
        &dir.path().join("absent.json"),
        &dir.path().join("resolved.json"),
        &[],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_version_is_a_usage_error() {
    let output = setupforge().args(["validate", SAMPLE]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_wxs_written_alongside_json() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("resolved.json");
    let wxs = dir.path().join("product.wxs");

    let output = compile_to(Path::new(SAMPLE), &out, &["--wxs", wxs.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let source = std::fs::read_to_string(&wxs).unwrap();
    assert!(source.starts_with("<?xml"));
    assert!(source.contains("<Product "));
}

#[test]
fn test_failed_wxs_write_leaves_no_json() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("resolved.json");
    let wxs = dir.path().join("missing").join("product.wxs");

    let output = compile_to(Path::new(SAMPLE), &out, &["--wxs", wxs.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!out.exists());
    assert!(!wxs.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_baseline_accepts_rebuild() {
    let dir = TempDir::new().unwrap();
    let baseline = dir.path().join("baseline.json");
    let out = dir.path().join("resolved.json");

    assert!(compile_to(Path::new(SAMPLE), &baseline, &[]).status.success());
    let output = compile_to(
        Path::new(SAMPLE),
        &out,
        &["--baseline", baseline.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_baseline_rejects_changed_upgrade_code() {
    let dir = TempDir::new().unwrap();
    let baseline = dir.path().join("baseline.json");
    assert!(compile_to(Path::new(SAMPLE), &baseline, &[]).status.success());

    let manifest = write_manifest(&dir, |v| {
        v["product"]["upgrade_code"] = "{9B2A0C7E-1D3F-4E5A-8B6C-7D8E9F0A1B2C}".into();
    });
    let out = dir.path().join("resolved.json");
    let output = compile_to(&manifest, &out, &["--baseline", baseline.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!out.exists());
    assert!(String::from_utf8_lossy(&output.stderr).contains("UpgradeCodeChanged"));
}
