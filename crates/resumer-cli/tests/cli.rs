use assert_cmd::Command;
use predicates::str::contains;
use resumer_core::directory::InMemoryDirectory;
use resumer_core::{ReplicaCore, ResumerConfig, StaticAccessGate};
use resumer_traits::RedirectTarget;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

fn resumer(home: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("resumer"));
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("RESUMER_SERVER")
        .env_remove("RESUMER_API_KEY")
        .env_remove("RESUMER_TOKEN");
    cmd
}

async fn spawn_replica() -> (String, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bound = listener.local_addr().unwrap();

    let config = ResumerConfig::default();
    let gate = StaticAccessGate::new().with_api_key("agent-key");
    let advertised = RedirectTarget::new("127.0.0.1", bound.port()).unwrap();
    let core = ReplicaCore::with_parts(
        &config,
        Arc::new(InMemoryDirectory::new()),
        Arc::new(gate),
        advertised,
    );
    let server = core.server(listener, &config);

    let (shutdown, receiver) = broadcast::channel(1);
    tokio::spawn(server.run(receiver));
    (bound.to_string(), shutdown)
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    resumer(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Resumer"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    resumer(&home).arg("--version").assert().success();
}

#[test]
fn test_completions_bash() {
    let home = TempDir::new().unwrap();
    let output = resumer(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let script = String::from_utf8(output).unwrap();
    assert!(script.starts_with("_resumer"));
}

#[test]
fn test_unreachable_server_suggests_starting_replica() {
    let home = TempDir::new().unwrap();
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    resumer(&home)
        .args(["enabled", "--server", &format!("127.0.0.1:{port}")])
        .assert()
        .failure()
        .stderr(contains("Suggestion:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_record_then_replay_against_replica() {
    let (address, _shutdown) = spawn_replica().await;
    let home = TempDir::new().unwrap();

    let record = {
        let address = address.clone();
        let mut cmd = resumer(&home);
        tokio::task::spawn_blocking(move || {
            cmd.args([
                "record", "conv-1", "--text", "hello brave world", "--server", &address,
                "--api-key", "agent-key",
            ])
            .assert()
            .success()
            .stdout(contains("Recorded 3 chunks to conv-1"));
        })
    };
    record.await.unwrap();

    let replay = {
        let address = address.clone();
        let mut cmd = resumer(&home);
        tokio::task::spawn_blocking(move || {
            cmd.args(["replay", "conv-1", "--server", &address, "--api-key", "agent-key"])
                .assert()
                .success()
                .stdout(contains("hello brave world"));
        })
    };
    replay.await.unwrap();

    let status = {
        let mut cmd = resumer(&home);
        tokio::task::spawn_blocking(move || {
            cmd.args([
                "status", "conv-1", "--server", &address, "--api-key", "agent-key", "--format",
                "json",
            ])
            .assert()
            .success()
            .stdout(contains("\"in_progress\": false"));
        })
    };
    status.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_credentials_rejected() {
    let (address, _shutdown) = spawn_replica().await;
    let home = TempDir::new().unwrap();

    let mut cmd = resumer(&home);
    tokio::task::spawn_blocking(move || {
        cmd.args(["status", "conv-1", "--server", &address])
            .assert()
            .failure()
            .stderr(contains("missing authorization"));
    })
    .await
    .unwrap();
}
