use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_case_file(path: &Path) {
    let source = r#"
        {
            "name": "demo",
            "folder": ".",
            "stages": [
                { "name": "prep", "intermediate": true },
                { "name": "solve" }
            ]
        }
    "#;
    std::fs::write(path, source).expect("case file write should succeed");
}

fn run_cli(args: &[&str], cwd: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_meshrun-cli"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("cli process should start")
}

#[test]
fn run_command_case_file_expected_success_output() {
    let temp = TempDir::new().expect("tempdir should create");
    let case_file = temp.path().join("demo.json");
    write_case_file(&case_file);

    let output = run_cli(
        &[
            "run",
            "--case",
            case_file.to_str().expect("case file path should be utf8"),
            "--engine",
            "simulator",
        ],
        temp.path(),
    );

    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("case: demo"));
    assert!(stdout.contains("solve: success"));
    assert!(stdout.contains("prep: success|intermediate"));
    assert!(stdout.contains("[monitor] case demo completed"));
}

#[test]
fn run_command_event_json_expected_json_event_lines() {
    let temp = TempDir::new().expect("tempdir should create");
    let case_file = temp.path().join("demo.json");
    write_case_file(&case_file);

    let output = run_cli(
        &[
            "run",
            "--case",
            case_file.to_str().expect("case file path should be utf8"),
            "--engine",
            "simulator",
            "--event-json",
        ],
        temp.path(),
    );

    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("\"kind\":\"submitted\""));
    assert!(stdout.contains("\"kind\":\"stage_finished\""));
    assert!(stdout.contains("\"kind\":\"case_completed\""));
}

#[test]
fn run_command_batch_engine_without_clients_expected_error() {
    let temp = TempDir::new().expect("tempdir should create");
    let case_file = temp.path().join("demo.json");
    write_case_file(&case_file);

    let output = run_cli(
        &[
            "run",
            "--case",
            case_file.to_str().expect("case file path should be utf8"),
            "--engine",
            "batch",
        ],
        temp.path(),
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("needs scheduler clients"));
}

#[test]
fn servers_command_expected_localhost_up() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["servers", "--engine", "simulator"], temp.path());

    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("localhost: up"));
}
