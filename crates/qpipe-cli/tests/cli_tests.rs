//! End-to-end tests of the `qpipe` binary.
//!
//! Each test writes its own configuration into a temporary directory and
//! runs the compiled binary against the demo programs.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn demo(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(path)
}

fn qpipe(config: Option<&Path>, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_qpipe"));
    cmd.env_remove("QPIPE_CONFIG")
        .env_remove("QPIPE_BACKEND")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.args(args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Config with a SQLite store inside `dir`.
fn write_config(dir: &Path, backend: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    let yaml = format!(
        "executor:\n  backend: {backend}\n  seed: 7\npipeline:\n  run_timeout_ms: 5000\nstore:\n  type: sqlite\n  path: {}\n",
        dir.join("jobs.db").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_version() {
    let output = qpipe(None, &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_backends_lists_simulators() {
    let output = qpipe(None, &["backends"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("sim1q"));
    assert!(text.contains("sim2q"));
    assert!(text.contains("bridge"));
}

#[test]
fn test_validate_demo_program() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    let program = demo("programs/rabi_x90.json");

    let output = qpipe(Some(&config), &["validate", program.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("Native experiment"));
    assert!(text.contains("d0"));
}

#[test]
fn test_validate_rejects_two_qubit_program_on_one_qubit() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    let program = demo("programs/cross_resonance.json");

    let output = qpipe(Some(&config), &["validate", program.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Translation failed"));
}

#[test]
fn test_run_then_status_and_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    let program = demo("programs/rabi_x90.json");

    let output = qpipe(
        Some(&config),
        &["run", program.to_str().unwrap(), "--shots", "200", "--json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let entry = &report[0];
    assert_eq!(entry["outcome"]["outcome"], "completed");
    let job_id = entry["job_id"].as_str().unwrap().to_string();

    let output = qpipe(Some(&config), &["status", &job_id]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("DONE"));

    let output = qpipe(Some(&config), &["status", "--filter", "done"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains(&job_id));

    let output = qpipe(Some(&config), &["result", &job_id, "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let result: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(result["shots"], 200);
}

#[test]
fn test_run_on_two_qubit_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim2q");
    let program = demo("programs/cross_resonance.json");

    let output = qpipe(Some(&config), &["run", program.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Results from"));
}

#[test]
fn test_failed_job_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    let program = demo("programs/cross_resonance.json");

    // Passes intake, fails translation for the one-qubit wiring
    let output = qpipe(Some(&config), &["run", program.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("FAILED"));
    assert!(stderr(&output).contains("1 of 1 job(s) failed"));
}

#[test]
fn test_result_for_unknown_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    // Create the store
    let program = demo("programs/rabi_x90.json");
    assert!(qpipe(Some(&config), &["run", program.to_str().unwrap()]).status.success());

    let output = qpipe(
        Some(&config),
        &["result", "550e8400-e29b-41d4-a716-446655440000"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Job not found"));
}

#[test]
fn test_status_needs_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("memory.yaml");
    std::fs::write(&config, "store:\n  type: memory\n").unwrap();

    let output = qpipe(Some(&config), &["status", "--all"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("in-memory"));
}

#[test]
fn test_missing_program_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sim1q");
    let output = qpipe(Some(&config), &["run", "/nonexistent/program.json"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("File not found"));
}
