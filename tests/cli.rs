mod common;

use std::fs;

use assert_cmd::Command;
use common::{PEOPLE_CSV, TestWorkspace};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;

fn tabvault(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("tabvault").expect("binary exists");
    cmd.arg("--store").arg(workspace.store_path());
    cmd
}

fn create_people(workspace: &TestWorkspace) {
    let csv = workspace.write("people.csv", PEOPLE_CSV);
    tabvault(workspace)
        .args(["create", "--name", "people", "--source"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(contains("created dataset 1"));
}

#[test]
fn create_show_and_versions() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args(["show", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("Alice").and(contains("name")));

    tabvault(&workspace)
        .args(["versions", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("INIT FROM CSV people.csv"));

    tabvault(&workspace)
        .arg("list")
        .assert()
        .success()
        .stdout(contains("people"));
}

#[test]
fn show_honors_the_row_limit() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args(["show", "--db", "1", "--limit", "1"])
        .assert()
        .success()
        .stdout(contains("... 2 more row(s)"));
}

#[test]
fn transform_commits_a_version_and_undo_removes_it() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args(["transform", "--db", "1", "normalize", "--column", "age"])
        .assert()
        .success()
        .stdout(contains("committed version 2"));

    tabvault(&workspace)
        .args(["versions", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("NORMALIZE age"));

    tabvault(&workspace)
        .args(["undo", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("removed version 2"));

    tabvault(&workspace)
        .args(["versions", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("NORMALIZE age").not());

    // An undone number is not handed out again.
    tabvault(&workspace)
        .args(["transform", "--db", "1", "normalize", "--column", "age"])
        .assert()
        .success()
        .stdout(contains("committed version 3"));
}

#[test]
fn undoing_the_sole_version_fails() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args(["undo", "--db", "1"])
        .assert()
        .failure()
        .stderr(contains("sole remaining version"));
}

#[test]
fn access_is_denied_until_granted() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args(["show", "--db", "1", "--user", "mallory"])
        .assert()
        .failure()
        .stderr(contains("no access"));

    tabvault(&workspace)
        .args(["grant", "--db", "1", "--to", "mallory"])
        .assert()
        .success();

    tabvault(&workspace)
        .args(["show", "--db", "1", "--user", "mallory"])
        .assert()
        .success()
        .stdout(contains("Alice"));

    // Plain membership does not allow mutations.
    tabvault(&workspace)
        .args(["undo", "--db", "1", "--user", "mallory"])
        .assert()
        .failure()
        .stderr(contains("cannot administer"));
}

#[test]
fn export_writes_the_current_table_as_csv() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);
    let output = workspace.path().join("out.csv");

    tabvault(&workspace)
        .args(["export", "--db", "1", "--output"])
        .arg(&output)
        .assert()
        .success();

    let contents = fs::read_to_string(&output).expect("read export");
    assert!(contents.starts_with("name,age\n"));
    assert!(contents.contains("Alice,30"));
}

#[test]
fn resolve_rewrites_confirmed_duplicates() {
    let workspace = TestWorkspace::new();
    let csv = workspace.write("cities.csv", "city\nBerlin\nBerlim\nTokyo\n");
    tabvault(&workspace)
        .args(["create", "--name", "cities", "--source"])
        .arg(&csv)
        .assert()
        .success();

    tabvault(&workspace)
        .args(["duplicates", "--db", "1", "--column", "city"])
        .assert()
        .success()
        .stdout(contains("Berlim"));

    tabvault(&workspace)
        .args([
            "resolve", "--db", "1", "--column", "city", "--map", "Berlim=Berlin",
        ])
        .assert()
        .success()
        .stdout(contains("committed version 2"));

    tabvault(&workspace)
        .args(["show", "--db", "1"])
        .assert()
        .success()
        .stdout(contains("Berlim").not());
}

#[test]
fn unknown_transform_types_are_rejected() {
    let workspace = TestWorkspace::new();
    create_people(&workspace);

    tabvault(&workspace)
        .args([
            "transform", "--db", "1", "change-type", "--column", "age", "--to", "bogus",
        ])
        .assert()
        .failure()
        .stderr(contains("unknown target type"));
}
