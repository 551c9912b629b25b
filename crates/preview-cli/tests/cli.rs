#![allow(deprecated)]
use std::process::{Child, Stdio};
use std::time::Duration;

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn previewd() -> Command {
    let mut cmd = Command::cargo_bin("previewd").unwrap();
    cmd.env_remove("PREVIEWD_URL").env_remove("PORT");
    cmd
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A `previewd serve` child, killed on drop.
struct Server {
    child: Child,
    url: String,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start a server on a free port; `None` when git is unavailable here.
fn start_server() -> Option<Server> {
    which_git()?;
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let child = std::process::Command::cargo_bin("previewd")
        .unwrap()
        .args(["serve", "--port", &port.to_string(), "--data-dir"])
        .arg(dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let server = Server {
        child,
        url: format!("http://127.0.0.1:{port}"),
        _dir: dir,
    };
    for _ in 0..100 {
        if ureq::get(&format!("{}/healthz", server.url)).call().is_ok() {
            return Some(server);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("previewd did not come up on {}", server.url);
}

fn which_git() -> Option<()> {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|_| ())
}

// ---------------------------------------------------------------------------
// Argument handling
// ---------------------------------------------------------------------------

#[test]
fn help_lists_subcommands() {
    previewd()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("serve")
                .and(predicate::str::contains("deploy"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("list"))
                .and(predicate::str::contains("stop")),
        );
}

#[test]
fn deploy_requires_config_path() {
    previewd()
        .args(["deploy", "https://github.com/acme/docs/pull/1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--config-path"));
}

#[test]
fn unreachable_server_is_reported() {
    let port = free_port();
    previewd()
        .args(["--server", &format!("http://127.0.0.1:{port}"), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: cannot reach previewd"));
}

#[test]
fn serve_rejects_unreadable_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("broken.yaml");
    std::fs::write(&config, "listen_port: [not, a, port]\n").unwrap();
    previewd()
        .args(["serve", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

// ---------------------------------------------------------------------------
// Against a live server
// ---------------------------------------------------------------------------

#[test]
fn list_on_fresh_server_is_empty() {
    let Some(server) = start_server() else {
        return;
    };
    previewd()
        .args(["--server", &server.url, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No deployments."));

    previewd()
        .args(["--server", &server.url, "--json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn status_and_stop_of_unknown_id_fail_with_server_message() {
    let Some(server) = start_server() else {
        return;
    };
    let id = "0123456789abcdef0123456789abcdef";
    previewd()
        .args(["--server", &server.url, "status", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").and(predicate::str::contains("HTTP 404")));

    previewd()
        .args(["--server", &server.url, "stop", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP 404"));
}

#[test]
fn deploy_with_bad_config_extension_is_rejected() {
    let Some(server) = start_server() else {
        return;
    };
    previewd()
        .args([
            "--server",
            &server.url,
            "deploy",
            "https://github.com/acme/docs.git",
            "--config-path",
            "docs/mint.yaml",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP 400"));
}
