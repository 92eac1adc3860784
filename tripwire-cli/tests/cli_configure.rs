use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn tripwire_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tripwire").expect("tripwire binary");
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = tripwire_cmd(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self {
            child,
            home: home.to_path_buf(),
        }
    }

    fn stop(&mut self) {
        let _ = tripwire_cmd(&self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn daemon_running(home: &Path) -> bool {
    let Ok(output) = tripwire_cmd(home).args(["daemon", "status"]).output() else {
        return false;
    };
    serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .ok()
        .and_then(|value| value.get("running").and_then(|v| v.as_bool()))
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn configure_without_options_is_rejected_locally() {
    let home = TempDir::new().expect("home");
    tripwire_cmd(home.path())
        .arg("configure")
        .assert()
        .failure()
        .stderr(contains("requires an option object"));
}

#[test]
fn configure_without_daemon_says_so() {
    let home = TempDir::new().expect("home");
    tripwire_cmd(home.path())
        .args(["configure", "--main-log"])
        .arg(home.path().join("main.log"))
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");
    tripwire_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}

#[test]
fn configure_round_trip_against_a_live_daemon() {
    let home = TempDir::new().expect("home");
    let mut daemon = DaemonProcess::start(home.path());
    assert!(
        wait_until(Duration::from_secs(10), || daemon_running(home.path())),
        "daemon did not come up"
    );

    let main_log = home.path().join("main.log");
    tripwire_cmd(home.path())
        .args(["configure", "--main-log"])
        .arg(&main_log)
        .assert()
        .success()
        .stdout(contains("mainLog"));
    let contents = fs::read_to_string(&main_log).expect("main log");
    assert!(contents.starts_with("FileLogger opened"), "{contents}");

    let polling_log = home.path().join("polling.log");
    tripwire_cmd(home.path())
        .args(["configure", "--json", "--polling-log"])
        .arg(&polling_log)
        .assert()
        .success()
        .stdout(contains("deferred"));
    assert!(!polling_log.exists(), "no poll session yet");

    tripwire_cmd(home.path())
        .args(["configure", "--worker-log"])
        .arg(home.path().join("missing").join("worker.log"))
        .assert()
        .failure()
        .stderr(contains("failed to open worker log"));

    tripwire_cmd(home.path())
        .args(["status"])
        .assert()
        .success()
        .stdout(contains("STOPPED"))
        .stdout(contains("main.log"));

    daemon.stop();
    assert!(!daemon_running(home.path()));
}
