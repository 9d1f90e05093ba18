use assert_cmd::Command;
use predicates::str::contains;
use std::io::Write;

#[test]
fn test_server_help() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("resumer-server"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("Response resumer"));
}

#[test]
fn test_server_version() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("resumer-server"));
    cmd.arg("--version").assert().success();
}

#[test]
fn test_config_prints_effective_configuration() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 7001\n\n[directory]\nkind = \"none\"").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("resumer-server"));
    cmd.arg("config")
        .arg("--config")
        .arg(file.path())
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stdout(contains("port = 7001"))
        .stdout(contains("kind = \"none\""))
        .stdout(contains("claim_ttl_secs = 10"));
}

#[test]
fn test_config_rejects_invalid_timings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[directory]\nclaim_ttl_secs = 5\nrefresh_interval_secs = 5"
    )
    .unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("resumer-server"));
    cmd.arg("config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(contains("claim_ttl_secs"));
}
