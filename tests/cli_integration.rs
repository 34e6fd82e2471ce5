//! Integration tests for the AutoSCAD CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Command for the autoscad binary, isolated from the user's config.
fn autoscad(dir: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("autoscad"));
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env_remove("RUST_LOG")
        .arg("-C")
        .arg(dir);
    cmd
}

fn write_settings(dir: &Path, content: &str) {
    let path = dir.join(".autoscad/settings.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_help() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Refine OpenSCAD models"));
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_run_help_lists_options() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-iterations"))
        .stdout(predicate::str::contains("--render-dir"))
        .stdout(predicate::str::contains("--events"));
}

#[test]
fn test_missing_directory() {
    autoscad(Path::new("/nonexistent/autoscad/dir"))
        .args(["projects", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Directory does not exist"));
}

// ============================================================================
// run: failures before any external call
// ============================================================================

#[test]
fn test_run_empty_specification_is_input_error() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["run", "--spec", "   "])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Specification must not be empty"));
}

#[test]
fn test_run_zero_iterations_is_input_error() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["run", "--spec", "A 10mm cube", "--max-iterations", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_iterations"));
}

#[test]
fn test_run_oversized_source_is_input_error() {
    let temp = TempDir::new().unwrap();
    write_settings(temp.path(), r#"{"limits": {"max_source_bytes": 8}}"#);
    let source = temp.path().join("model.scad");
    std::fs::write(&source, "cube([10, 10, 10]);").unwrap();

    autoscad(temp.path())
        .args(["run", "--spec", "A cube", "--source"])
        .arg(&source)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("too large"));
}

#[test]
fn test_run_missing_renderer() {
    let temp = TempDir::new().unwrap();
    write_settings(
        temp.path(),
        r#"{"render": {"binary": "autoscad-no-such-renderer"}}"#,
    );

    autoscad(temp.path())
        .args(["run", "--spec", "A 10mm cube"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("autoscad-no-such-renderer"));
}

#[cfg(unix)]
#[test]
fn test_run_missing_api_key() {
    let temp = TempDir::new().unwrap();
    write_settings(
        temp.path(),
        r#"{"render": {"binary": "sh"}, "llm": {"api_key_env": "AUTOSCAD_TEST_MISSING_KEY"}}"#,
    );

    autoscad(temp.path())
        .env_remove("AUTOSCAD_TEST_MISSING_KEY")
        .args(["run", "--spec", "A 10mm cube", "--project", "cube"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("AUTOSCAD_TEST_MISSING_KEY"));

    // No project is created for a run that never started
    autoscad(temp.path())
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects yet"));
}

#[test]
fn test_run_invalid_config() {
    let temp = TempDir::new().unwrap();
    write_settings(temp.path(), r#"{"render": {"width": 0}}"#);

    autoscad(temp.path())
        .args(["run", "--spec", "A 10mm cube"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("image size must be positive"));
}

#[test]
fn test_run_rejects_unknown_view_preset() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["run", "--spec", "A 10mm cube", "--views", "isometric"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown view preset"));
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_show_defaults() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("google/gemma-3-27b-it"))
        .stdout(predicate::str::contains("Max iterations: 3"))
        .stdout(predicate::str::contains("inheritance chain"));
}

#[test]
fn test_config_show_json_merges_project_settings() {
    let temp = TempDir::new().unwrap();
    write_settings(
        temp.path(),
        r#"{"llm": {"model": "openai/gpt-4o"}, "refine": {"views": "standard"}}"#,
    );

    let output = autoscad(temp.path())
        .args(["config", "show", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["llm"]["model"], "openai/gpt-4o");
    assert_eq!(config["refine"]["views"], "standard");
    assert_eq!(config["refine"]["max_render_attempts"], 3);
}

#[test]
fn test_config_validate_syntax_error() {
    let temp = TempDir::new().unwrap();
    write_settings(temp.path(), "{ broken");

    autoscad(temp.path())
        .args(["config", "validate"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("syntax error"));
}

#[test]
fn test_config_validate_reports_field_errors() {
    let temp = TempDir::new().unwrap();
    write_settings(temp.path(), r#"{"llm": {"max_tokens": 0}}"#);

    autoscad(temp.path())
        .args(["config", "validate"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("llm.max_tokens"));
}

// ============================================================================
// projects and iterations
// ============================================================================

#[test]
fn test_projects_create_list_rename() {
    let temp = TempDir::new().unwrap();

    autoscad(temp.path())
        .args(["projects", "create", "bracket"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created bracket"));

    autoscad(temp.path())
        .args(["projects", "rename", "bracket", "wall bracket"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Renamed to wall bracket"));

    let output = autoscad(temp.path())
        .args(["projects", "list", "--json"])
        .output()
        .unwrap();
    let projects: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(projects.as_array().unwrap().len(), 1);
    assert_eq!(projects[0]["name"], "wall bracket");
    assert!(temp.path().join(".autoscad/store/projects").is_dir());
}

#[test]
fn test_projects_create_generates_name() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["projects", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created project-"));
}

#[test]
fn test_projects_rename_to_empty_name() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["projects", "create", "gear"])
        .assert()
        .success();

    autoscad(temp.path())
        .args(["projects", "rename", "gear", "  "])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("Project name cannot be empty"));
}

#[test]
fn test_iterations_unknown_project() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["iterations", "nothing-here"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("Project not found"));
}

#[test]
fn test_iterations_empty_project() {
    let temp = TempDir::new().unwrap();
    autoscad(temp.path())
        .args(["projects", "create", "empty"])
        .assert()
        .success();

    autoscad(temp.path())
        .args(["iterations", "empty"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs stored"));
}

#[test]
fn test_store_dir_setting() {
    let temp = TempDir::new().unwrap();
    write_settings(temp.path(), r#"{"store_dir": "designs"}"#);

    autoscad(temp.path())
        .args(["projects", "create", "vase"])
        .assert()
        .success();
    assert!(temp.path().join("designs/projects").is_dir());
}

// ============================================================================
// check
// ============================================================================

#[test]
fn test_check_reports_missing_renderer() {
    let temp = TempDir::new().unwrap();
    write_settings(
        temp.path(),
        r#"{"render": {"binary": "autoscad-no-such-renderer"}, "llm": {"api_key_env": "AUTOSCAD_TEST_MISSING_KEY"}}"#,
    );

    autoscad(temp.path())
        .env_remove("AUTOSCAD_TEST_MISSING_KEY")
        .arg("check")
        .assert()
        .code(6)
        .stdout(predicate::str::contains("autoscad-no-such-renderer"))
        .stdout(predicate::str::contains("AUTOSCAD_TEST_MISSING_KEY"));
}
