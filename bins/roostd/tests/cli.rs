// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CLI surface: flags, exit codes, and the sanity check.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn sanity_check_exits_zero() {
    Command::cargo_bin("roostd")
        .expect("binary builds")
        .arg("-s")
        .assert()
        .success();
}

#[test]
fn help_prints_usage_and_exits_zero() {
    Command::cargo_bin("roostd")
        .expect("binary builds")
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("roostd"));
}

#[test]
fn unknown_flags_exit_with_ex_usage() {
    Command::cargo_bin("roostd")
        .expect("binary builds")
        .arg("--definitely-not-a-flag")
        .assert()
        .code(64);
}

#[test]
fn verbosity_flag_is_repeatable() {
    Command::cargo_bin("roostd")
        .expect("binary builds")
        .args(["-V", "-V", "-s"])
        .assert()
        .success();
}
