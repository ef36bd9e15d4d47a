use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

// Above the kernel's pid_max ceiling, so nothing real is ever addressed.
const SERVER_PID: &str = "4999001";
const SIX_PID: &str = "4999002";

const TCP_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";
const TCP6_HEADER: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

/// A proc tree with a listener on 127.0.0.1:8080 owned by `fakesrv`, an
/// unowned connection to port 22, and a `sixd` listener on [::1]:443.
fn fake_proc() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("net")).unwrap();
    fs::write(
        root.join("net/tcp"),
        format!(
            "{TCP_HEADER}\n\
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 9001 1 0000000000000000 100 0 0 10 0\n\
   1: 0100007F:D431 0100007F:0016 01 00000000:00000000 00:00000000 00000000     0        0 9002 1 0000000000000000 20 4 30 10 -1\n"
        ),
    )
    .unwrap();
    fs::write(
        root.join("net/tcp6"),
        format!(
            "{TCP6_HEADER}\n\
   0: 00000000000000000000000001000000:01BB 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 9003 1 0000000000000000 100 0 0 10 0\n"
        ),
    )
    .unwrap();

    add_process(root, SERVER_PID, "fakesrv", &[("3", "socket:[9001]"), ("0", "/dev/null")]);
    add_process(root, SIX_PID, "sixd", &[("4", "socket:[9003]")]);
    fs::create_dir(root.join("self")).unwrap();
    dir
}

fn add_process(root: &Path, pid: &str, comm: &str, fds: &[(&str, &str)]) {
    let pid_dir = root.join(pid);
    fs::create_dir_all(pid_dir.join("fd")).unwrap();
    fs::write(pid_dir.join("comm"), format!("{}\n", comm)).unwrap();
    for (fd, target) in fds {
        symlink(target, pid_dir.join("fd").join(fd)).unwrap();
    }
}

fn procnet(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("procnet").unwrap();
    cmd.arg("--proc-root").arg(root);
    cmd
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[test]
fn test_lists_owned_and_unowned_sockets() {
    let proc_root = fake_proc();
    procnet(proc_root.path())
        .arg("net")
        .assert()
        .success()
        .stdout(predicate::str::contains("LOCAL ADDRESS"))
        .stdout(predicate::str::contains("127.0.0.1:8080"))
        .stdout(predicate::str::contains("fakesrv"))
        .stdout(predicate::str::contains("127.0.0.1:22"))
        .stdout(predicate::str::contains("[::1]:443"))
        .stdout(predicate::str::contains("sixd"));
}

#[test]
fn test_terse_prints_distinct_pids_in_order() {
    let proc_root = fake_proc();
    procnet(proc_root.path())
        .args(["net", "-t"])
        .assert()
        .success()
        .stdout(format!("{}\n{}\n", SERVER_PID, SIX_PID));
}

#[test]
fn test_protocol_and_program_selection() {
    let proc_root = fake_proc();
    procnet(proc_root.path())
        .args(["net", "--tcp6", "-t"])
        .assert()
        .success()
        .stdout(format!("{}\n", SIX_PID));

    procnet(proc_root.path())
        .args(["net", "--program", "srv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fakesrv"))
        .stdout(predicate::str::contains("sixd").not());

    procnet(proc_root.path())
        .args(["net", "--remote-port", "22"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ESTABLISHED"))
        .stdout(predicate::str::contains("LISTEN").not());
}

#[test]
fn test_limit() {
    let proc_root = fake_proc();
    let output = procnet(proc_root.path())
        .args(["net", "--limit", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Header plus one row.
    assert_eq!(stdout.lines().count(), 2);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_conflicting_filters_fail_before_reading() {
    procnet(Path::new("/nonexistent/procnet-root"))
        .args(["net", "--program", "nginx", "--pid", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Conflicting filter options"));

    procnet(Path::new("/nonexistent/procnet-root"))
        .args(["net", "--local-port", "80", "--remote-port", "443"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("local-port and remote-port"));
}

#[test]
fn test_missing_table_fails() {
    procnet(Path::new("/nonexistent/procnet-root"))
        .arg("net")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_malformed_table_fails() {
    let proc_root = fake_proc();
    fs::write(
        proc_root.path().join("net/tcp"),
        format!("{TCP_HEADER}\n   0: 0100007F:1F90 00000000:0000 0A\n"),
    )
    .unwrap();
    procnet(proc_root.path())
        .args(["net", "--tcp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed socket table"))
        .stderr(predicate::str::contains("line 2"));
}

// ---------------------------------------------------------------------------
// Real /proc
// ---------------------------------------------------------------------------

#[test]
fn test_real_proc_lists_headers() {
    Command::cargo_bin("procnet")
        .unwrap()
        .args(["net", "--tcp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PROTO"));
}
