//! Integration tests for the kapsel binary.
// The cargo_bin function is marked deprecated in favor of cargo_bin! macro,
// but both work correctly. Suppressing until assert_cmd stabilizes the new API.
#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn setup_project(manifest: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("kapsel.yml"), manifest).unwrap();
    temp
}

fn kapsel(dir: &Path) -> Command {
    let mut cmd = Command::new(cargo_bin("kapsel"));
    cmd.current_dir(dir)
        .env_remove("KAPSEL_DIRECTORY")
        .env_remove("FOO")
        .env_remove("CONDA_PREFIX")
        .env_remove("CONDA_DEFAULT_ENV")
        .env_remove("RUST_LOG");
    cmd
}

const FOO_ONLY: &str = "variables: [FOO]\n";

#[test]
fn cli_shows_help() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    kapsel(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("prepare"))
        .stdout(predicate::str::contains("unprepare"));
    Ok(())
}

#[test]
fn cli_shows_version() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    kapsel(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn cli_rejects_unknown_mode() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .args(["prepare", "--mode", "eager"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("eager"));
    Ok(())
}

#[test]
fn cli_missing_manifest_exits_with_two() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    kapsel(temp.path())
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No kapsel.yml found"));
    Ok(())
}

#[test]
fn cli_check_reports_unset_variable() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FOO is not set"));
    assert!(!temp.path().join("kapsel-local.yml").exists());
    Ok(())
}

#[test]
fn cli_check_passes_with_variable_in_environment() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .arg("check")
        .env("FOO", "bar")
        .assert()
        .success()
        .stdout(predicate::str::contains("All requirements are met."));
    Ok(())
}

#[test]
fn cli_check_passes_with_manifest_default() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project("variables:\n  PORT:\n    default: 8080\n");
    kapsel(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("All requirements are met."));
    assert!(!temp.path().join("kapsel-local.yml").exists());
    Ok(())
}

#[test]
fn cli_directory_flag_and_env() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    let elsewhere = TempDir::new()?;

    kapsel(elsewhere.path())
        .arg("check")
        .arg("-d")
        .arg(temp.path())
        .env("FOO", "bar")
        .assert()
        .success();

    kapsel(elsewhere.path())
        .arg("check")
        .env("KAPSEL_DIRECTORY", temp.path())
        .env("FOO", "bar")
        .assert()
        .success();
    Ok(())
}

#[test]
fn cli_finds_manifest_in_parent_directory() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    let nested = temp.path().join("src").join("deep");
    fs::create_dir_all(&nested)?;

    kapsel(&nested)
        .arg("check")
        .env("FOO", "bar")
        .assert()
        .success();
    Ok(())
}

#[test]
fn cli_prepare_non_interactive_uses_default() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project("variables:\n  FOO:\n    default: from-manifest\n");
    kapsel(temp.path())
        .args(["prepare", "--non-interactive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("The project is ready to run commands."));
    Ok(())
}

#[test]
fn cli_prepare_non_interactive_fails_on_missing_value() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .args(["prepare", "--non-interactive"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing requirement to run this project"));
    Ok(())
}

#[test]
fn cli_prepare_rejects_unknown_env_spec() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .args(["prepare", "--non-interactive", "--env-spec", "nope"])
        .env("FOO", "bar")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Environment name 'nope' is not in kapsel.yml"));
    Ok(())
}

#[test]
fn cli_variable_set_then_check_passes() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);

    kapsel(temp.path())
        .args(["variable", "set", "FOO", "stored"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set FOO for this project."));
    assert!(temp.path().join("kapsel-local.yml").exists());

    kapsel(temp.path()).arg("check").assert().success();

    kapsel(temp.path())
        .args(["variable", "unset", "FOO"])
        .assert()
        .success();

    kapsel(temp.path()).arg("check").assert().code(1);
    Ok(())
}

#[test]
fn cli_variable_rejects_undeclared_name() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(FOO_ONLY);
    kapsel(temp.path())
        .args(["variable", "set", "BAR", "x"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Variable BAR is not declared in kapsel.yml."));
    Ok(())
}

#[test]
fn cli_unprepare_with_empty_manifest() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project("name: empty\n");
    kapsel(temp.path())
        .arg("unprepare")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean up."));
    Ok(())
}

#[test]
fn cli_download_prepare_then_unprepare() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/data.csv");
        then.status(200).body("a,b\n1,2\n");
    });
    let temp = setup_project(&format!(
        "downloads:\n  DATA_CSV: {}\n",
        server.url("/data.csv")
    ));
    let downloaded = temp.path().join("data.csv");

    kapsel(temp.path())
        .args(["prepare", "--non-interactive"])
        .assert()
        .success();
    mock.assert_calls(1);
    assert_eq!(fs::read_to_string(&downloaded)?, "a,b\n1,2\n");

    kapsel(temp.path())
        .arg("unprepare")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed downloaded file"));
    assert!(!downloaded.exists());
    Ok(())
}

#[test]
fn cli_check_never_downloads() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/data.csv");
        then.status(200).body("a,b\n");
    });
    let temp = setup_project(&format!(
        "downloads:\n  DATA_CSV: {}\n",
        server.url("/data.csv")
    ));

    kapsel(temp.path()).arg("check").assert().code(1);

    mock.assert_calls(0);
    assert!(!temp.path().join("data.csv").exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn cli_run_passes_prepared_environment() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project(
        "variables:\n  FOO:\n    default: bar\ncommands:\n  show:\n    unix: echo value=$FOO\n",
    );
    kapsel(temp.path())
        .args(["run", "--non-interactive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("value=bar"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn cli_run_propagates_exit_code() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project("commands:\n  fail:\n    unix: exit 3\n");
    kapsel(temp.path())
        .args(["run", "--non-interactive", "fail"])
        .assert()
        .code(3);
    Ok(())
}

#[test]
fn cli_run_without_commands() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_project("name: bare\n");
    kapsel(temp.path())
        .args(["run", "--non-interactive"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No known run command for project bare"));
    Ok(())
}
