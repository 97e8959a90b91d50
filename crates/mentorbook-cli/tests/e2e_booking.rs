//! E2E booking workflow: init -> create -> request -> accept, plus the
//! error contract for rejected operations.
//!
//! Each test runs `mb` as a subprocess in an isolated temp directory with
//! its own user config home.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the `mb` binary, rooted in `dir`.
fn mb_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mb"));
    cmd.current_dir(dir);
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env("MENTORBOOK_LOG", "error");
    cmd.env_remove("MENTORBOOK_TOKEN");
    cmd.env_remove("FORMAT");
    cmd
}

fn init_project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    mb_cmd(dir.path()).arg("init").assert().success();
    dir
}

fn mint(dir: &Path, subject: &str, roles: &[&str]) -> String {
    let output = mb_cmd(dir)
        .args(["token", "mint", subject])
        .args(roles)
        .arg("--json")
        .output()
        .expect("mint should not crash");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    json["token"].as_str().expect("token field").to_string()
}

/// Run a command as `token` with `--json` and parse stdout.
fn run_json(dir: &Path, token: &str, args: &[&str]) -> Value {
    let output = mb_cmd(dir)
        .env("MENTORBOOK_TOKEN", token)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

fn create_event(dir: &Path, staff: &str, required: &str, mentors: &[&str]) -> String {
    let mut args = vec![
        "create",
        "--title",
        "Career day",
        "--date",
        "2099-06-01",
        "--start",
        "10:00",
        "--duration",
        "90",
        "--required",
        required,
    ];
    for mentor in mentors {
        args.extend(["--mentor", mentor]);
    }
    let json = run_json(dir, staff, &args);
    json["id"].as_str().expect("id field").to_string()
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[test]
fn request_then_accept_completes_event() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let mentor = mint(dir.path(), "m-bo", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &["m-bo"]);

    let created = run_json(dir.path(), &staff, &["show", &id]);
    assert_eq!(created["status"], "new");
    assert_eq!(created["staff_members"][0], "s-ada");
    assert_eq!(created["end"], "11:30");

    let requested = run_json(dir.path(), &mentor, &["request", &id]);
    assert_eq!(requested["status"], "firstRequests");
    assert_eq!(requested["membership"]["requesting"][0], "m-bo");

    let accepted = run_json(dir.path(), &staff, &["accept", &id, "m-bo"]);
    assert_eq!(accepted["status"], "successComplete");
    assert_eq!(accepted["membership"]["accepted"][0], "m-bo");
    assert_eq!(accepted["open_slots"], 0);

    let listed = run_json(dir.path(), &mentor, &["list"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["id"], id.as_str());
}

#[test]
fn mentors_only_list_allowlisted_events() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let outsider = mint(dir.path(), "m-cy", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &["m-bo"]);

    let listed = run_json(dir.path(), &outsider, &["list"]);
    assert_eq!(listed, serde_json::json!([]));

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &outsider)
        .args(["show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));

    // The allowlist only filters reads; the request gate ignores it.
    let requested = run_json(dir.path(), &outsider, &["request", &id]);
    assert_eq!(requested["membership"]["requesting"][0], "m-cy");
}

#[test]
fn event_created_without_mentors_can_be_requested() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let bo = mint(dir.path(), "m-bo", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &[]);

    let requested = run_json(dir.path(), &bo, &["request", &id]);
    assert_eq!(requested["status"], "firstRequests");
    let accepted = run_json(dir.path(), &staff, &["accept", &id, "m-bo"]);
    assert_eq!(accepted["status"], "successComplete");
}

#[test]
fn full_event_rejects_further_requests() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let bo = mint(dir.path(), "m-bo", &["mentor"]);
    let cy = mint(dir.path(), "m-cy", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &["m-bo", "m-cy"]);

    run_json(dir.path(), &bo, &["request", &id]);
    run_json(dir.path(), &staff, &["accept", &id, "m-bo"]);

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &cy)
        .args(["request", &id, "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error_code\": \"E3001\""));
}

#[test]
fn withdraw_and_decline_move_mentors_out_of_requesting() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let bo = mint(dir.path(), "m-bo", &["mentor"]);
    let cy = mint(dir.path(), "m-cy", &["mentor"]);
    let id = create_event(dir.path(), &staff, "2", &["m-bo", "m-cy"]);

    run_json(dir.path(), &bo, &["request", &id]);
    run_json(dir.path(), &cy, &["request", &id]);

    let withdrawn = run_json(dir.path(), &bo, &["withdraw", &id]);
    assert_eq!(withdrawn["membership"]["requesting"], serde_json::json!(["m-cy"]));

    let declined = run_json(dir.path(), &staff, &["decline", &id, "m-cy"]);
    assert_eq!(declined["membership"]["requesting"], serde_json::json!([]));
    assert_eq!(declined["membership"]["declined"], serde_json::json!(["m-cy"]));
    assert_eq!(declined["status"], "new");
}

#[test]
fn mentors_cannot_accept_requests() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let bo = mint(dir.path(), "m-bo", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &["m-bo"]);
    run_json(dir.path(), &bo, &["request", &id]);

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &bo)
        .args(["accept", &id, "m-bo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3002"));
}

#[test]
fn locked_events_reject_requests_until_unlocked() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let bo = mint(dir.path(), "m-bo", &["mentor"]);
    let id = create_event(dir.path(), &staff, "1", &["m-bo"]);

    let locked = run_json(dir.path(), &staff, &["lock", &id]);
    assert_eq!(locked["status"], "locked");

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &bo)
        .args(["request", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3001"));

    let unlocked = run_json(dir.path(), &staff, &["unlock", &id]);
    assert_eq!(unlocked["locked"], false);
    run_json(dir.path(), &bo, &["request", &id]);
}

#[test]
fn deleted_events_disappear() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    let id = create_event(dir.path(), &staff, "1", &[]);

    let deleted = run_json(dir.path(), &staff, &["delete", &id]);
    assert_eq!(deleted["deleted"], true);
    let listed = run_json(dir.path(), &staff, &["list"]);
    assert_eq!(listed, serde_json::json!([]));
}

// ---------------------------------------------------------------------------
// Identity and setup
// ---------------------------------------------------------------------------

#[test]
fn missing_token_is_reported() {
    let dir = init_project();
    mb_cmd(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no identity token"));
}

#[test]
fn role_switch_changes_capabilities() {
    let dir = init_project();
    let dual = mint(dir.path(), "m-dee", &["mentor", "staff"]);

    let signed_in = run_json(dir.path(), &dual, &["whoami"]);
    assert_eq!(signed_in["active_role"], "staff");
    assert_eq!(signed_in["capabilities"]["can_request_mentor"], false);

    let switched = run_json(dir.path(), &dual, &["whoami", "--role", "mentor"]);
    assert_eq!(switched["active_role"], "mentor");
    assert_eq!(switched["capabilities"]["can_request_mentor"], true);

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &dual)
        .args(["whoami", "--role", "super-admin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3002"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().expect("tempdir");
    mb_cmd(dir.path())
        .args(["list", "--token", "a.b.c"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mb init"));
}

#[test]
fn text_output_has_headers() {
    let dir = init_project();
    let staff = mint(dir.path(), "s-ada", &["staff"]);
    create_event(dir.path(), &staff, "1", &[]);

    mb_cmd(dir.path())
        .env("MENTORBOOK_TOKEN", &staff)
        .env("FORMAT", "text")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ID  DATE  START  STATUS"))
        .stdout(predicate::str::contains("2099-06-01  10:00  new  0/1  Career day"));
}

#[test]
fn sim_run_passes_small_campaign() {
    let dir = TempDir::new().expect("tempdir");
    let output = mb_cmd(dir.path())
        .args(["sim", "run", "--seeds", "5", "--json"])
        .output()
        .expect("sim should not crash");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["seeds_run"], 5);
    assert_eq!(json["all_passed"], true);
    assert_eq!(json["write_mode"], "conditional");
}
