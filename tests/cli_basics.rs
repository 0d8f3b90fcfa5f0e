use predicates::prelude::*;

fn data_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}

#[test]
fn status_before_configuration_reports_defaults() {
    let dir = data_dir();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    cmd.args(["--data-dir", dir.path().to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server: not configured"))
        .stdout(predicate::str::contains("mode: url"))
        .stdout(predicate::str::contains("activity: idle"));
}

#[test]
fn mode_round_trips_through_the_store() {
    let dir = data_dir();
    let dir_arg = dir.path().to_str().unwrap().to_string();

    let mut set = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    set.args(["--data-dir", &dir_arg, "mode", "--set", "html"])
        .assert()
        .success()
        .stdout("mode set to html\n");

    let mut show = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    show.args(["--data-dir", &dir_arg, "mode"])
        .assert()
        .success()
        .stdout("mode: html\n");
}

#[test]
fn unknown_mode_is_rejected() {
    let dir = data_dir();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    cmd.args([
        "--data-dir",
        dir.path().to_str().unwrap(),
        "mode",
        "--set",
        "pdf",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("mode must be `url` or `html`"));
}

#[test]
fn empty_log_prints_placeholder() {
    let dir = data_dir();
    let dir_arg = dir.path().to_str().unwrap().to_string();

    let mut show = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    show.args(["--data-dir", &dir_arg, "log", "show"])
        .assert()
        .success()
        .stdout("event log is empty\n");

    let mut clear = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    clear
        .args(["--data-dir", &dir_arg, "log", "clear"])
        .assert()
        .success()
        .stdout("event log cleared\n");
}

#[test]
fn submit_rejects_non_http_urls() {
    let dir = data_dir();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    cmd.args([
        "--data-dir",
        dir.path().to_str().unwrap(),
        "submit",
        "--url",
        "file:///tmp/recipe.html",
        "--no-probe",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--url must be http/https"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let dir = data_dir();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("minimealie");
    cmd.env("RUST_LOG", "debug")
        .args(["--data-dir", dir.path().to_str().unwrap(), "status"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
