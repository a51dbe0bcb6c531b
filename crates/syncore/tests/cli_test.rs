//! Integration tests for the `syncore` CLI binary.
//!
//! These tests validate argument parsing, help output, config handling
//! and each command against a temporary configuration file.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

const CONFIG: &str = r#"
[retry]
max_attempts = 1

[api]
timeout_secs = 5

[api.queries]
facture = "/factures/:id"

[guard]
fallback = "login"

[[routes]]
id = "login"
path = "/login"
module = "auth"

[[routes]]
id = "facture"
path = "/factures/:id"
module = "facturation"
protected = true

[[routes]]
id = "facture_nouvelle"
path = "/factures/nouvelle"
module = "facturation"
roles = ["comptable"]
protected = true

[[schemas]]
name = "devise"

[[schemas.fields]]
path = "code"
rules = [{ rule = "required" }, { rule = "max_length", value = 3 }]
"#;

/// Build a [`Command`] for the `syncore` binary with env isolation.
///
/// Clears all `SYNCORE_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn syncore_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("syncore");
    cmd.env("HOME", "/tmp/syncore-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/syncore-cli-test-nonexistent")
        .env_remove("SYNCORE_CONFIG")
        .env_remove("SYNCORE_BASE_URL")
        .env_remove("SYNCORE_TOKEN")
        .env_remove("SYNCORE_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

fn with_config(config: &Path) -> assert_cmd::Command {
    let mut cmd = syncore_cmd();
    cmd.arg("--config").arg(config);
    cmd
}

// ── Help & parsing ──────────────────────────────────────────────────

#[test]
fn test_help_lists_commands() {
    syncore_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("routes"))
        .stdout(predicate::str::contains("navigate"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("fetch"));
}

#[test]
fn test_no_args_shows_usage() {
    syncore_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_completions_bash() {
    syncore_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("syncore"));
}

#[test]
fn test_bad_param_syntax_is_rejected() {
    syncore_cmd()
        .args(["navigate", "facture", "-P", "id"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("key=value"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_masks_token() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[api]\ntoken = \"s3cret\"\n").unwrap();

    with_config(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("****"))
        .stdout(predicate::str::contains("s3cret").not());
}

// ── Routes & navigation ─────────────────────────────────────────────

#[test]
fn test_routes_list_plain() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["routes", "list", "-o", "plain", "--module", "facturation"])
        .assert()
        .success()
        .stdout("facture\nfacture_nouvelle\n");
}

#[test]
fn test_routes_resolve_prefers_literal_path() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["routes", "resolve", "/factures/nouvelle", "-o", "plain"])
        .assert()
        .success()
        .stdout("facture_nouvelle\n");
}

#[test]
fn test_unknown_route_is_not_found() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["routes", "resolve", "/inconnu"])
        .assert()
        .code(4);
}

#[test]
fn test_navigate_anonymous_redirects_to_login() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["navigate", "facture", "-P", "id=42", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""outcome": "redirected""#))
        .stdout(predicate::str::contains("/factures/42"));
}

#[test]
fn test_navigate_missing_role_is_denied() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["navigate", "/factures/nouvelle", "--role", "commercial"])
        .assert()
        .code(5)
        .stdout(predicate::str::contains("comptable"));

    with_config(&config)
        .args(["navigate", "/factures/nouvelle", "--role", "comptable", "-o", "plain"])
        .assert()
        .success()
        .stdout("facture_nouvelle\n");
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_validate_reports_field_errors() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let payload = dir.path().join("devise.json");

    std::fs::write(&payload, json!({"code": "EURO"}).to_string()).unwrap();
    with_config(&config)
        .args(["validate", "devise"])
        .arg(&payload)
        .assert()
        .code(9)
        .stdout(predicate::str::contains("code"));

    std::fs::write(&payload, json!({"code": "EUR"}).to_string()).unwrap();
    with_config(&config)
        .args(["validate", "devise"])
        .arg(&payload)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_validate_unknown_schema() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let payload = dir.path().join("p.json");
    std::fs::write(&payload, "{}").unwrap();

    with_config(&config)
        .args(["validate", "inconnu"])
        .arg(&payload)
        .assert()
        .code(4);
}

// ── Fetch ───────────────────────────────────────────────────────────

#[test]
fn test_fetch_without_base_url() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    with_config(&config)
        .args(["fetch", "ref.pays"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("base URL"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_through_http_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/factures/42"))
        .and(query_param("details", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "total": 120})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/prive"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let base_url = format!("{}/api", server.uri());

    with_config(&config)
        .args(["fetch", "facture", "-P", "id=42", "-P", "details=true", "-o", "json-compact"])
        .args(["--base-url", &base_url])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""total":120"#));

    with_config(&config)
        .args(["fetch", "prive", "--base-url", &base_url])
        .assert()
        .code(3);
}
