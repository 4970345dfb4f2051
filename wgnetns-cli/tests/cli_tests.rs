use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

const CONFIG: &str = "\
[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
ListenPort = 51820

[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
Endpoint = 192.95.5.67:1234
AllowedIPs = 0.0.0.0/0
";

fn wgnetns() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wgnetns"))
}

fn config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

#[test]
fn test_help_command() {
    wgnetns()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("network namespaces"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("interfaces"));
}

#[test]
fn test_up_help_lists_flags() {
    wgnetns()
        .args(["up", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tmpdir"))
        .stdout(predicate::str::contains("--ready-timeout"))
        .stdout(predicate::str::contains("wireguard.conf"));
}

#[test]
fn test_version_command() {
    wgnetns()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wgnetns"));
}

#[test]
fn test_invalid_command() {
    wgnetns()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_up_without_arguments() {
    wgnetns()
        .arg("up")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_up_rejects_bad_interface_name() {
    wgnetns()
        .args(["up", "1", "much-too-long-interface", "wg.conf"])
        .assert()
        .failure();
}

#[test]
fn test_up_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    wgnetns()
        .args(["up", "--tmpdir"])
        .arg(dir.path())
        .args(["1", "wg0"])
        .arg(dir.path().join("absent.conf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_up_nonexistent_process() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_file();
    wgnetns()
        .args(["up", "--tmpdir"])
        .arg(dir.path())
        .args(["999999999", "wg0"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Namespace error"));
}

#[test]
fn test_show_without_engine() {
    let dir = tempfile::tempdir().unwrap();
    wgnetns()
        .args(["show", "--tmpdir"])
        .arg(dir.path())
        .arg("wg0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("wg0.sock"));
}

#[test]
fn test_interfaces_of_self() {
    // Our own namespace always has loopback
    wgnetns()
        .args(["interfaces", &std::process::id().to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("lo"));
}

#[test]
fn test_interfaces_of_missing_process() {
    wgnetns()
        .args(["interfaces", "999999999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get namespace information"));
}
