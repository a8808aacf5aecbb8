use assert_cmd::Command;
use pretty_assertions::assert_eq;
use std::{fs, path::PathBuf};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("evmapper-cli-{name}-{}", std::process::id()));

    fs::create_dir_all(&dir).unwrap();

    dir
}

#[test]
fn check_mapping() {
    let dir = scratch("check");
    let file = dir.join("pad.json");

    fs::write(
        &file,
        r#"{
            "grab": true,
            "buttons": [{"name": "A", "code": 304}, {"name": "B", "code": 305}],
            "axes": [{"name": "X", "code": 0, "min": -10, "max": 10}],
            "actions": [
                {"trigger": "A", "type": "key", "target": "KEY_ENTER"},
                {"trigger": ["B", "X:max"], "hold": true, "type": "exec", "target": "true"}
            ]
        }"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd.args(["check", file.to_str().unwrap()]).assert();

    let output = assert.get_output();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    fs::remove_dir_all(&dir).unwrap();

    assert_eq!(stderr, "");

    assert_eq!(
        stdout,
        format!(
            r#"{}: 2 buttons, 1 axes, 2 actions, grab
	action 0 (key KEY_ENTER): Simultaneous A
	action 1 (exec true): Simultaneous B X:max (hold)
"#,
            file.display()
        )
    );
}

#[test]
fn check_invalid_mapping() {
    let dir = scratch("invalid");
    let file = dir.join("pad.json");

    fs::write(
        &file,
        r#"{"buttons": [{"name": "A", "code": 304}, {"name": "A", "code": 305}]}"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd.args(["check", file.to_str().unwrap()]).assert();

    let output = assert.get_output();

    let stderr = String::from_utf8_lossy(&output.stderr);

    fs::remove_dir_all(&dir).unwrap();

    assert!(!output.status.success());
    assert_eq!(
        stderr,
        format!("error: {}: duplicate event name 'A'\n", file.display())
    );
}

#[test]
fn check_missing_file() {
    let dir = scratch("missing");
    let file = dir.join("nothere.json");

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd.args(["check", file.to_str().unwrap()]).assert();

    let output = assert.get_output();

    let stderr = String::from_utf8_lossy(&output.stderr);

    fs::remove_dir_all(&dir).unwrap();

    assert!(!output.status.success());
    assert_eq!(
        stderr,
        format!("error: {}: file not found\n", file.display())
    );
}

#[test]
fn check_broken_json() {
    let dir = scratch("broken");
    let file = dir.join("pad.json");

    fs::write(&file, "{\"buttons\": [").unwrap();

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd.args(["check", file.to_str().unwrap()]).assert();

    let output = assert.get_output();

    let stderr = String::from_utf8_lossy(&output.stderr);

    fs::remove_dir_all(&dir).unwrap();

    assert!(!output.status.success());
    assert!(stderr.starts_with(&format!("error: {}: invalid JSON file: ", file.display())));
}

#[test]
fn daemon_not_running() {
    let dir = scratch("nodaemon");
    let socket = dir.join("control.socket");

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd
        .args(["devices", "--socket", socket.to_str().unwrap()])
        .assert();

    let output = assert.get_output();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert_eq!(stdout, "");
    assert!(stderr.starts_with(&format!(
        "error: cannot reach daemon at {}: ",
        socket.display()
    )));

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd
        .args([
            "load",
            "/dev/input/event0",
            "pad.json",
            "--socket",
            socket.to_str().unwrap(),
        ])
        .assert();

    fs::remove_dir_all(&dir).unwrap();

    assert!(!assert.get_output().status.success());
}

#[test]
fn configure_missing_device() {
    let dir = scratch("configure");
    let device = dir.join("event99");

    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd
        .args([
            "configure",
            device.to_str().unwrap(),
            "--config-dir",
            dir.to_str().unwrap(),
        ])
        .assert();

    let output = assert.get_output();

    let stderr = String::from_utf8_lossy(&output.stderr);

    fs::remove_dir_all(&dir).unwrap();

    assert!(!output.status.success());
    assert!(stderr.starts_with(&format!("error: {}: ", device.display())));
}

#[test]
fn help() {
    let mut cmd = Command::cargo_bin("evmapper").unwrap();

    let assert = cmd.arg("--help").assert();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();

    for command in ["daemon", "list", "configure", "check", "load", "devices"] {
        assert!(stdout.contains(command), "{command} missing from help");
    }
}
