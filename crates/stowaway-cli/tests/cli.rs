//! Integration tests for the stowaway binary
//!
//! The origin points at the discard port on loopback, so every network
//! request is refused and the binary runs fully offline.

use std::path::Path;

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use predicates::prelude::*;
use tempfile::TempDir;

const UNREACHABLE_ORIGIN: &str = "http://127.0.0.1:9/";

fn stowaway(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("stowaway");
    cmd.env_remove("STOWAWAY_VERSION")
        .env_remove("STOWAWAY_ORIGIN")
        .env_remove("STOWAWAY_CACHE_DIR")
        .env_remove("RUST_LOG")
        .current_dir(dir)
        .arg("--config")
        .arg(dir.join("config.json"))
        .arg("--cache-dir")
        .arg(dir.join("stores"))
        .arg("--origin")
        .arg(UNREACHABLE_ORIGIN);
    cmd
}

fn installed() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path()).arg("install").assert().success();
    dir
}

#[test]
fn help_displays() {
    cargo_bin_cmd!("stowaway")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("offline caching intermediary"));
}

#[test]
fn version_displays() {
    cargo_bin_cmd!("stowaway")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stowaway"));
}

#[test]
fn status_without_stores() {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("stowaway-v1"))
        .stdout(predicate::str::contains("State:   parsed"))
        .stdout(predicate::str::contains("No stores"));
}

#[test]
fn install_offline_still_activates() {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path())
        .arg("install")
        .assert()
        .success()
        // the same-origin entries are refused; the CDN stylesheet depends
        // on whether the sandbox has outside access
        .stdout(predicate::str::contains("Installed stowaway-v1 ("))
        .stdout(predicate::str::contains("cached, 2 failed)").or(predicate::str::contains("0 cached, 3 failed)")))
        .stdout(predicate::str::contains("Activated stowaway-v1"));

    stowaway(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("State:   activated"))
        .stdout(predicate::str::contains("* stowaway-v1"));
}

#[test]
fn leftover_store_directory_keeps_worker_active() {
    let dir = installed();
    std::fs::create_dir_all(dir.path().join("stores").join("leftover")).expect("mkdir");

    stowaway(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("State:   activated"));

    stowaway(dir.path())
        .args(["fetch", "--navigate", "/about"])
        .assert()
        .success()
        .stdout(predicate::str::contains("You're Offline"));
}

#[test]
fn new_version_replaces_old_store() {
    let dir = installed();
    stowaway(dir.path())
        .args(["install", "--version-tag", "v2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted stowaway-v1"));

    stowaway(dir.path())
        .args(["status", "--version-tag", "v2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* stowaway-v2"))
        .stdout(predicate::str::contains("stowaway-v1").not());
}

#[test]
fn install_without_activation_waits() {
    let dir = installed();
    stowaway(dir.path())
        .args(["install", "--no-activate", "--version-tag", "v2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Waiting to activate"));

    stowaway(dir.path())
        .args(["status", "--version-tag", "v2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("State:   installed"));

    stowaway(dir.path())
        .args(["activate", "--version-tag", "v2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted stowaway-v1"));
}

#[test]
fn offline_navigation_prints_fallback_page() {
    let dir = installed();
    stowaway(dir.path())
        .args(["fetch", "--navigate", "/about"])
        .assert()
        .success()
        .stdout(predicate::str::contains("You're Offline"));
}

#[test]
fn offline_subresource_fails() {
    let dir = installed();
    stowaway(dir.path())
        .args(["fetch", "/assets/js/main.js"])
        .assert()
        .failure();
}

#[test]
fn failed_post_is_queued_then_kept_by_sync() {
    let dir = installed();
    stowaway(dir.path())
        .args(["fetch", "-X", "POST", "-d", "name=x", "--queue-on-failure", "/api/contact"])
        .assert()
        .success()
        .stderr(predicate::str::contains("queued as #0"));

    stowaway(dir.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(predicate::str::contains("POST"))
        .stdout(predicate::str::contains("/api/contact"));

    stowaway(dir.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed 0, 1 still queued"));
}

#[test]
fn push_shows_notification() {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path())
        .args(["push", r#"{"title":"Hello","body":"New project"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("[notification #0] Hello: New project"))
        .stdout(predicate::str::contains("/assets/img/favicon.ico"));
}

#[test]
fn push_without_usable_payload_shows_nothing() {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path())
        .arg("push")
        .assert()
        .success()
        .stdout(predicate::str::contains("No notification shown"));

    stowaway(dir.path())
        .args(["push", "not json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No notification shown"));
}

#[test]
fn click_opens_root_window() {
    let dir = TempDir::new().expect("temp dir");
    stowaway(dir.path())
        .args(["click", "--title", "Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Opened window #0 at http://127.0.0.1:9/"));
}
