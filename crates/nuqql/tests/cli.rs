use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn version_prints_and_exits() {
    Command::cargo_bin("nuqql")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nuqql"));
}

#[test]
fn list_backends_with_empty_path_reports_none() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("nuqql")
        .unwrap()
        .env("HOME", dir.path())
        .env("NUQQL_DIR", dir.path())
        .env("PATH", dir.path())
        .arg("--list-backends")
        .assert()
        .success()
        .stdout(predicate::str::contains("no backends found"));
}

#[test]
fn invalid_config_is_a_readable_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "list-ratio = 99\n").unwrap();

    Command::cargo_bin("nuqql")
        .unwrap()
        .env("HOME", dir.path())
        .env("NUQQL_DIR", dir.path())
        .env("PATH", dir.path())
        .arg("--list-backends")
        .assert()
        .failure()
        .stderr(predicate::str::contains("list-ratio"));
}
