//! Integration tests running the `rdtk` binary end to end

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Config file pointing every catalogue at a JSON file under `root`
fn write_config(root: &Path) -> std::path::PathBuf {
    let path = root.join("rdtk.toml");
    fs::write(
        &path,
        format!(
            "[db.meta]\nengine = \"json\"\nhost = \"{}\"\ndatabase = \"catalog\"\n",
            root.join("db").display()
        ),
    )
    .unwrap();
    path
}

fn rdtk(home: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_rdtk"))
        .env("HOME", home)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("RDTK_LOG")
        .arg("--quiet")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    if let Some(input) = stdin {
        child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    } else {
        drop(child.stdin.take());
    }
    child.wait_with_output().unwrap()
}

#[test]
fn test_models_json_listing() {
    let temp_dir = TempDir::new().unwrap();
    let ws = temp_dir.path().to_string_lossy().into_owned();
    let output = rdtk(temp_dir.path(), &["--workspace", &ws, "models", "--format", "json"], None);
    assert!(
        output.status.success(),
        "rdtk models should succeed: stderr={:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    let models: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(models[0]["name"], "AnnotationCsv");
    assert!(models.as_array().unwrap().len() > 10);
}

#[test]
fn test_add_then_list_through_binary() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let config = config.to_string_lossy().into_owned();
    let base_dir = temp_dir.path().join("data").to_string_lossy().into_owned();

    let input = format!(
        r#"[{{"record_id": "r1"}}, {{"record_id": "r1", "path": "{}/r1/a.csv"}}]"#,
        base_dir
    );
    let added = rdtk(
        temp_dir.path(),
        &["--config", &config, "db", "add", "--base-dir", &base_dir],
        Some(&input),
    );
    assert!(
        added.status.success(),
        "rdtk db add should succeed: stderr={:?}",
        String::from_utf8_lossy(&added.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&added.stdout).lines().count(), 2);

    let listed = rdtk(
        temp_dir.path(),
        &[
            "--config", &config, "db", "list", "files", "--base-dir", &base_dir, "--format",
            "json",
        ],
        None,
    );
    assert!(listed.status.success());
    let files: serde_json::Value = serde_json::from_slice(&listed.stdout).unwrap();
    assert_eq!(files.as_array().unwrap().len(), 1);

    let databases = rdtk(
        temp_dir.path(),
        &["--config", &config, "db", "list", "databases", "--format", "json"],
        None,
    );
    let databases: serde_json::Value = serde_json::from_slice(&databases.stdout).unwrap();
    assert_eq!(databases.as_array().unwrap().len(), 1);
}

#[test]
fn test_empty_stdin_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let config = config.to_string_lossy().into_owned();
    let output = rdtk(temp_dir.path(), &["--config", &config, "db", "add"], Some(""));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no metadata in input"));
}
