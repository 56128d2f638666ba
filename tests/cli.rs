use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn base_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sftp-relay"));
    cmd.env("RUST_LOG", "info");
    cmd.env("NO_COLOR", "1");
    cmd.env_remove("SFTP_RELAY_LOG_DIR");
    cmd
}

fn write_config(dir: &TempDir, source: &std::path::Path, destination: &std::path::Path) -> std::path::PathBuf {
    let path = dir.path().join("job.toml");
    let body = format!(
        "[source]\nroot_path = {:?}\nfile_name_filter = \"*.csv\"\n\n[destination]\nroot_path = {:?}\n",
        source.to_string_lossy(),
        destination.to_string_lossy()
    );
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn help_lists_arguments() {
    base_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("<CONFIG>"))
        .stdout(contains("--log-dir"));
}

#[test]
fn missing_config_exits_with_failure() {
    let tmp = TempDir::new().unwrap();
    base_cmd()
        .arg(tmp.path().join("nope.toml"))
        .assert()
        .code(1)
        .stderr(contains("error:"))
        .stderr(contains("nope.toml"));
}

#[test]
fn malformed_filter_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(
        &path,
        "[source]\nroot_path = \"in\"\nfile_name_filter = \"[oops\"\n\n[destination]\nroot_path = \"out\"\n",
    )
    .unwrap();

    base_cmd()
        .arg(&path)
        .assert()
        .code(1)
        .stderr(contains("error:"));
}

#[test]
fn relays_local_tree_and_writes_log_file() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("in");
    let dst = tmp.path().join("out");
    fs::create_dir_all(src.join("daily")).unwrap();
    fs::create_dir_all(&dst).unwrap();
    fs::write(src.join("daily/sales.csv"), "a,b\n1,2\n").unwrap();
    fs::write(src.join("notes.txt"), "ignored").unwrap();
    let config = write_config(&tmp, &src, &dst);
    let logs = tmp.path().join("logs");

    base_cmd()
        .arg(&config)
        .arg("--log-dir")
        .arg(&logs)
        .assert()
        .success()
        .stdout(contains("Relay finished: 1 file/s relayed"))
        .stderr(predicate::str::contains("error:").not());

    assert_eq!(fs::read_to_string(dst.join("daily/sales.csv")).unwrap(), "a,b\n1,2\n");
    assert!(!dst.join("notes.txt").exists());

    let log_files: Vec<_> = fs::read_dir(&logs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(log_files.len(), 1);
    assert!(log_files[0].starts_with("job."));
}

#[test]
fn unknown_action_fails_run() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("in");
    let dst = tmp.path().join("out");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir_all(&dst).unwrap();
    let config = write_config(&tmp, &src, &dst);
    let mut body = fs::read_to_string(&config).unwrap();
    body.push_str("action = \"no-such-hook\"\n");
    fs::write(&config, body).unwrap();

    base_cmd()
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("no-such-hook"));
}
