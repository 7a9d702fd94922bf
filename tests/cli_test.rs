use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_demo_end_to_end() {
    let mut cmd = Command::new(cargo_bin!("punchcard"));
    cmd.arg("--punches").arg("2");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("session started, join code"))
        .stdout(predicate::str::contains("round 1: punches earned 1/2"))
        .stdout(predicate::str::contains("round 2: punches earned 2/2"))
        .stdout(predicate::str::contains("reward fulfilled"))
        .stdout(predicate::str::contains("session ended"));
}
