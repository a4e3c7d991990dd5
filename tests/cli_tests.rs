//! Integration tests for the clearml-sessions CLI
//!
//! These tests run the actual binary. Each gets its own config dir and
//! workspace so nothing on the host leaks in.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_ID: &str = "8a3c9e0f2b7d4c1e9f0a1b2c3d4e5f60";

/// Binary under test, isolated from host settings
fn clearml_sessions_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clearml-sessions").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("CLEARML_CONFIG_FILE")
        .env_remove("VIRTUAL_ENV")
        .env("NO_COLOR", "1")
        .arg("--workspace")
        .arg(home.path());
    cmd
}

fn write_conf(dir: &Path, api_server: &str) -> String {
    let conf = dir.join("clearml.conf");
    fs::write(
        &conf,
        format!(
            "api {{\n  web_server: \"http://localhost:8080\"\n  api_server: \"{}\"\n  credentials {{\n    access_key: \"AK\"\n    secret_key: \"SECRETKEY123\"\n  }}\n}}\n",
            api_server
        ),
    )
    .unwrap();
    conf.display().to_string()
}

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"meta": {}, "data": data}))
}

async fn mock_clearml() -> MockServer {
    mock_clearml_with_logs(json!([
        {"msg": "SSH Server running on ip-172-31-26-64 [172.31.26.64] port 10022"},
        {"msg": "LOGIN u:root p:pass"}
    ]))
    .await
}

async fn mock_clearml_with_logs(events: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(envelope(json!({"token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects.get_all"))
        .respond_with(envelope(json!({"projects": [{"id": "p-devops", "name": "DevOps"}]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks.get_all_ex"))
        .respond_with(envelope(json!({"tasks": [{
            "id": SESSION_ID,
            "name": "Interactive Session",
            "status": "in_progress",
            "comment": "GPU box",
            "project": {"id": "p-devops", "name": "DevOps"}
        }]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events.get_task_log"))
        .respond_with(envelope(json!({"events": events})))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Help and argument parsing
// ============================================================================

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    clearml_sessions_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ClearML interactive sessions"))
        .stdout(predicate::str::contains("ssh-details"))
        .stdout(predicate::str::contains("install-deps"));
}

#[test]
fn test_logs_help() {
    let home = TempDir::new().unwrap();
    clearml_sessions_cmd(&home)
        .args(["logs", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--order"));
}

#[test]
fn test_invalid_subcommand() {
    let home = TempDir::new().unwrap();
    clearml_sessions_cmd(&home)
        .arg("teleport")
        .assert()
        .failure();
}

// ============================================================================
// Offline commands
// ============================================================================

#[test]
fn test_config_masks_secret() {
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), "http://localhost:8008");

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api_server:   http://localhost:8008"))
        .stdout(predicate::str::contains("SECR***"))
        .stdout(predicate::str::contains("SECRETKEY123").not())
        .stdout(predicate::str::contains("builtin parser"));
}

#[test]
fn test_config_missing_file_shows_fix() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("nope.conf");

    clearml_sessions_cmd(&home)
        .args(["--config-file", &missing.display().to_string(), "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CSM-020"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_workspace_settings_apply() {
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), "http://localhost:8008");
    fs::write(
        home.path().join(".clearml-session-manager.yaml"),
        "project_name: Research\nstatuses: [in_progress]\n",
    )
    .unwrap();

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("project_name:        Research"))
        .stdout(predicate::str::contains("statuses:            in_progress\n"));
}

#[test]
fn test_config_file_from_workspace_placeholder() {
    let home = TempDir::new().unwrap();
    write_conf(home.path(), "http://localhost:8008");
    fs::write(
        home.path().join(".clearml-session-manager.yaml"),
        "clearml_config_file: \"${workspaceFolder}/clearml.conf\"\n",
    )
    .unwrap();

    clearml_sessions_cmd(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://localhost:8008"));
}

#[test]
fn test_invalid_settings_file() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".clearml-session-manager.yaml"),
        "project_nmae: typo\n",
    )
    .unwrap();

    clearml_sessions_cmd(&home)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CSM-021"));
}

#[test]
fn test_install_deps_without_interpreter() {
    let home = TempDir::new().unwrap();
    clearml_sessions_cmd(&home)
        .arg("install-deps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CSM-022"))
        .stderr(predicate::str::contains("virtualenv"));
}

// ============================================================================
// Against a mock ClearML server
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_list_sessions() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("8a3c9e0f"))
        .stdout(predicate::str::contains("GPU box"))
        .stdout(predicate::str::contains("1 session(s)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_sessions_json() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    let output = clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "list", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let sessions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(sessions[0]["id"], SESSION_ID);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_url_by_prefix() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "url", "8a3c"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "http://localhost:8080/projects/p-devops/experiments/{}/execution?",
            SESSION_ID
        )));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_session_prefix() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "show", "ffff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CSM-012"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ssh_details_json() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "ssh-details", SESSION_ID, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ipAddress\": \"172.31.26.64\""))
        .stdout(predicate::str::contains("\"port\": \"10022\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_print() {
    let server = mock_clearml().await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "connect", "8a3c9e0f", "--via", "print"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ssh -p 10022 root@172.31.26.64"))
        .stdout(predicate::str::contains("password: pass"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_before_ssh_server_is_up() {
    let server = mock_clearml_with_logs(json!([{"msg": "Installing requirements"}])).await;
    let home = TempDir::new().unwrap();
    let conf = write_conf(home.path(), &server.uri());

    clearml_sessions_cmd(&home)
        .args(["--config-file", &conf, "connect", SESSION_ID, "--via", "print"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CSM-032"))
        .stderr(predicate::str::contains("--wait"));
}
