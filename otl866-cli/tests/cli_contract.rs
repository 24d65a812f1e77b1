//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("otl866");
    cmd.env_remove("OTL866_PORT")
        .env_remove("OTL866_VERBOSE")
        .env_remove("RUST_LOG");
    cmd
}

/// Config file with no settings, so the user's own config cannot leak in.
fn empty_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir
        .path()
        .join("otl866.toml");
    fs::write(&path, "").expect("write empty config");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("otl866"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("otl866"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_lists_update_flags() {
    let mut cmd = cli_cmd();
    cmd.args(["update", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--erase-key")
                .and(predicate::str::contains("--reset-tty"))
                .and(predicate::str::contains("--unsafe")),
        );
}

#[test]
fn list_json_returns_valid_json() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list", "--json"])
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success()
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_malformed_erase_key() {
    let mut cmd = cli_cmd();
    cmd.args(["update", "fw.enc", "--erase-key", "zz"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_update_without_erase_key() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let image = dir
        .path()
        .join("fw.enc");
    fs::write(&image, vec![0u8; 160]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("erase key"));
}

#[test]
fn erase_key_can_come_from_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("otl866.toml");
    fs::write(&config, "[update]\nerase_key = 0x10\n").expect("write config");
    let missing = dir
        .path()
        .join("missing.enc");

    // Gets past argument checks and fails on the image instead.
    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&missing)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to load image"));
}

#[test]
fn exit_code_one_for_missing_image() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let missing = dir
        .path()
        .join("does_not_exist.enc");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&missing)
        .args(["--erase-key", "10"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn misaligned_image_is_rejected_before_touching_hardware() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let image = dir
        .path()
        .join("short.enc");
    fs::write(&image, vec![0u8; 81]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&image)
        .args(["--erase-key", "10"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("multiple of 80"));
}

#[test]
fn base_inside_bootloader_is_rejected_before_touching_hardware() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let image = dir
        .path()
        .join("fw.enc");
    fs::write(&image, vec![0u8; 160]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&image)
        .args(["--erase-key", "10", "--base", "100"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("inside the bootloader"));
}

#[test]
fn cmd_on_missing_port_fails_with_clean_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let port = dir
        .path()
        .join("no-such-tty");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("-p")
        .arg(&port)
        .args(["cmd", "Z"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn port_from_environment_is_used() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);
    let port = dir
        .path()
        .join("env-tty");

    let mut cmd = cli_cmd();
    cmd.env("OTL866_PORT", &port)
        .arg("--config")
        .arg(&config)
        .arg("bootloader")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("env-tty"));
}

#[test]
fn invalid_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--config")
        .arg(&config)
        .args(["list", "--json"])
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn list_human_output_stays_off_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(&dir);

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["-q", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("updte")
        .assert()
        .failure()
        .stderr(predicate::str::contains("update"));
}
