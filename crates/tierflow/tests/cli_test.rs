#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

mod common;
use common::{STACK, TestProject};

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("依存グラフ"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("outputs"));
}

/// バージョン表示はスタックファイルなしで動作する
#[test]
fn test_cli_version() {
    let project = TestProject::new();
    project
        .tier()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tierflow"));
}

#[test]
fn test_up_help() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("up")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fail-fast"))
        .stdout(predicate::str::contains("--parallelism"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// スタックファイルがないディレクトリでは失敗する
#[test]
fn test_validate_without_stack_file() {
    let project = TestProject::new();
    project
        .tier()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TIERFLOW_STACK_PATH"));
}

#[test]
fn test_validate_prints_partition() {
    let project = TestProject::new();
    project.write_stack(STACK);

    project
        .tier()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.0/24"))
        .stdout(predicate::str::contains("10.0.12.0/24"))
        .stdout(predicate::str::contains("demo-vpc"))
        .stdout(predicate::str::contains("demo-eks-cluster"));
}

#[test]
fn test_validate_rejects_exhausted_address_space() {
    let project = TestProject::new();
    project.write_stack("project: demo\nnetwork:\n  cidr: 10.0.0.0/16\n  zones: 11\n");

    project.tier().arg("validate").assert().failure();
}

#[test]
fn test_missing_secret_is_reported() {
    let project = TestProject::new();
    project.write_stack(STACK);

    project
        .tier()
        .env_remove("TIERFLOW_CLI_TEST_DB_PASSWORD")
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TIERFLOW_CLI_TEST_DB_PASSWORD"));
}

/// up → outputs → 再実行で変更なし
#[test]
fn test_up_is_idempotent() {
    let project = TestProject::new();
    project.write_stack(STACK);

    project
        .tier()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("+ demo-vpc"));

    project
        .tier()
        .arg("up")
        .assert()
        .success()
        .stdout(predicate::str::contains("vpcId = vpc-"))
        .stdout(predicate::str::contains("rdsDbUsername = admin"))
        .stdout(predicate::str::contains("eksKubeconfig = [secret]"))
        .stdout(predicate::str::contains("hunter22-secret").not());

    assert!(project.path().join(".tierflow").join("state.json").exists());
    assert!(!project.path().join(".tierflow").join("lock.json").exists());

    project
        .tier()
        .arg("up")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 created, 0 updated"));

    project
        .tier()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));

    project
        .tier()
        .arg("outputs")
        .assert()
        .success()
        .stdout(predicate::str::contains("rdsEndpoint = demo-rds-instance."))
        .stdout(predicate::str::contains("eksKubeconfig = [secret]"));

    project
        .tier()
        .args(["outputs", "--show-secrets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("current-context: demo-eks-cluster"));
}

#[test]
fn test_outputs_before_up() {
    let project = TestProject::new();
    project.write_stack(STACK);

    project
        .tier()
        .arg("outputs")
        .assert()
        .success()
        .stdout(predicate::str::contains("tier up"));
}

/// 他のプロセスがロックを保持している間は up できない
#[test]
fn test_up_respects_lock() {
    let project = TestProject::new();
    project.write_stack(STACK);

    let state_dir = project.path().join(".tierflow");
    fs::create_dir_all(&state_dir).unwrap();
    fs::write(
        state_dir.join("lock.json"),
        r#"{"holder":"ci-runner","acquired_at":"2999-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    project
        .tier()
        .arg("up")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ci-runner"));
}

/// -f でスタックファイルを直接指定できる
#[test]
fn test_explicit_stack_file() {
    let project = TestProject::new();
    let path = project.path().join("custom.yaml");
    fs::write(&path, "project: other\nnetwork:\n  cidr: 172.16.0.0/16\n  zones: 1\n").unwrap();

    project
        .tier()
        .arg("validate")
        .arg("-f")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("172.16.10.0/24"));
}
