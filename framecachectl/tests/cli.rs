use std::{fs, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn ctl(workdir: &Path, root: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("framecachectl");
    cmd.current_dir(workdir)
        .env_remove("FRAMECACHE_CONFIG_PATH")
        .env_remove("FRAMECACHE_CONFIG_JSON")
        .env_remove("FRAMECACHE_EXPIRATION")
        .env_remove("FRAMECACHE_DISK_SIZE_LIMIT")
        .env("RUST_LOG", "off")
        .arg("--root")
        .arg(root)
        .arg("--store")
        .arg("posters");
    cmd
}

#[test]
fn help_lists_maintenance_commands() {
    let mut cmd = cargo_bin_cmd!("framecachectl");
    let out = cmd.arg("--help").assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    for command in ["stat", "put", "get", "sweep", "trim", "maintain", "clear"] {
        assert!(text.contains(command), "help missing '{command}'");
    }
    assert!(text.contains("--root"), "help missing --root");
}

#[test]
fn put_get_and_stat_round_trip_through_the_disk_store() {
    let work = tempdir().unwrap();
    let root = work.path().join("cache");
    let payload = work.path().join("poster.bin");
    fs::write(&payload, vec![7u8; 300]).unwrap();

    ctl(work.path(), &root)
        .args(["put", "movie-42-185x278-fit", "--file"])
        .arg(&payload)
        .assert()
        .success()
        .stderr(predicate::str::contains("300 bytes"));

    let out = ctl(work.path(), &root)
        .args(["get", "movie-42-185x278-fit"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(out, vec![7u8; 300]);

    ctl(work.path(), &root)
        .args(["stat", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entries\": 1"))
        .stdout(predicate::str::contains("\"size_bytes\": 300"));

    assert!(root.join("posters").is_dir());
}

#[test]
fn missing_key_fails() {
    let work = tempdir().unwrap();
    let root = work.path().join("cache");
    ctl(work.path(), &root)
        .args(["get", "nothing-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no live entry"));
}

#[test]
fn rm_and_clear_empty_the_store() {
    let work = tempdir().unwrap();
    let root = work.path().join("cache");
    let payload = work.path().join("frame.bin");
    fs::write(&payload, b"frame").unwrap();

    for key in ["a", "b"] {
        ctl(work.path(), &root)
            .args(["put", key, "--file"])
            .arg(&payload)
            .assert()
            .success();
    }

    ctl(work.path(), &root)
        .args(["rm", "a"])
        .assert()
        .success()
        .stderr(predicate::str::contains("removed 'a'"));
    ctl(work.path(), &root).args(["clear"]).assert().success();

    ctl(work.path(), &root)
        .args(["stat", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entries\": 0"));
}

#[test]
fn config_file_limits_drive_trim() {
    let work = tempdir().unwrap();
    let root = work.path().join("cache");
    fs::write(
        work.path().join("framecache.toml"),
        "[disk]\nsize_limit_bytes = 40\nexpiration = \"never\"\n",
    )
    .unwrap();
    let payload = work.path().join("ten.bin");
    fs::write(&payload, [1u8; 10]).unwrap();

    for key in ["k1", "k2", "k3", "k4"] {
        ctl(work.path(), &root)
            .args(["put", key, "--file"])
            .arg(&payload)
            .assert()
            .success();
    }

    ctl(work.path(), &root)
        .arg("trim")
        .assert()
        .success()
        .stdout(predicate::str::contains("trimmed 2 entries"));
    ctl(work.path(), &root)
        .args(["stat", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"size_bytes\": 20"))
        .stdout(predicate::str::contains("\"expiration\": \"never\""));
}

#[test]
fn sweep_reports_expired_keys_and_drops_orphans() {
    let work = tempdir().unwrap();
    let root = work.path().join("cache");
    fs::write(
        work.path().join("framecache.toml"),
        "[disk]\nexpiration = \"1ms\"\n",
    )
    .unwrap();
    let payload = work.path().join("frame.bin");
    fs::write(&payload, b"frame").unwrap();

    ctl(work.path(), &root)
        .args(["put", "short-lived", "--file"])
        .arg(&payload)
        .assert()
        .success();
    // A payload with no side-car, as left by an interrupted write.
    fs::write(root.join("posters").join("a".repeat(64)), b"stray").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));

    ctl(work.path(), &root)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("swept 1 expired entries"));
    ctl(work.path(), &root)
        .args(["stat", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entries\": 0"));
}
