//! End-to-end tests driving the `bwx` binary against a stub vault and
//! shell-script sinks.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const STUB_VAULT: &str = r#"#!/bin/sh
case "$1 $2" in
  "get password")
    if [ "$3" = "mail" ]; then printf 's3cr3t\n'; exit 0; fi
    if [ "$3" = "bank" ]; then printf 'b4nk\n'; exit 0; fi
    echo "Not found." >&2; exit 1 ;;
  "unlock --raw")
    echo unlocked >> "$(dirname "$0")/unlock-calls"
    printf 'tok-123\n' ;;
  "whoami "*)
    printf '%s' "$BW_SESSION" ;;
  *)
    exit 2 ;;
esac
"#;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(timeout: i64) -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let bw = fixture.path("bw");
        fs::write(&bw, STUB_VAULT).unwrap();
        fs::set_permissions(&bw, fs::Permissions::from_mode(0o755)).unwrap();
        fixture.write_config(&format!(
            "transient_dir: {run}\n\
             bw_cmd: {bw}\n\
             clipboard_copy_cmd: [sh, -c, \"cat > '{copied}'\"]\n\
             clipboard_clear_cmd: [sh, -c, \"echo cleared >> '{cleared}'\"]\n\
             clipboard_clear_timeout: {timeout}\n",
            run = fixture.path("run").display(),
            bw = bw.display(),
            copied = fixture.path("copied").display(),
            cleared = fixture.path("cleared").display(),
        ));
        fixture
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn pid_file(&self) -> PathBuf {
        self.path("run").join("bw_clear.pid")
    }

    fn write_config(&self, yaml: &str) {
        fs::write(self.path("bwx.yml"), yaml).unwrap();
    }

    fn bwx(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_bwx"))
            .arg("--config")
            .arg(self.path("bwx.yml"))
            .args(args)
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.path("config"))
            .env_remove("BW_SESSION")
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }

    fn clear_count(&self) -> usize {
        fs::read_to_string(self.path("cleared"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    fn pending_pid(&self) -> Option<u32> {
        fs::read_to_string(self.pid_file())
            .ok()
            .map(|raw| raw.trim().parse().unwrap())
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    done()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "bwx failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn copy_then_clear_after_timeout() {
    let fx = Fixture::new(2);

    let start = Instant::now();
    let output = fx.bwx(&["copy", "mail"]);
    assert_success(&output);

    assert_eq!(fs::read_to_string(fx.path("copied")).unwrap(), "s3cr3t");
    assert!(fx.pending_pid().is_some(), "timer should be armed");

    sleep(Duration::from_millis(1500).saturating_sub(start.elapsed()));
    assert_eq!(fx.clear_count(), 0, "cleared before the timeout");

    assert!(wait_until(Duration::from_secs(3), || fx.clear_count() == 1));
    let cleared_after = start.elapsed();
    assert!(cleared_after >= Duration::from_secs(2));
    assert!(cleared_after < Duration::from_secs(3), "cleared after {cleared_after:?}");
    assert!(wait_until(Duration::from_secs(1), || !fx.pid_file().exists()));

    sleep(Duration::from_millis(500));
    assert_eq!(fx.clear_count(), 1);
}

#[test]
fn newer_copy_supersedes_pending_clear() {
    let fx = Fixture::new(2);

    assert_success(&fx.bwx(&["copy", "mail"]));
    let first = fx.pending_pid().unwrap();

    assert_success(&fx.bwx(&["cp", "bank"]));
    assert_eq!(fs::read_to_string(fx.path("copied")).unwrap(), "b4nk");
    let second = fx.pending_pid().unwrap();
    assert_ne!(first, second);

    assert!(wait_until(Duration::from_secs(5), || {
        fx.clear_count() == 1 && !fx.pid_file().exists()
    }));
    sleep(Duration::from_millis(500));
    assert_eq!(fx.clear_count(), 1);
}

#[test]
fn back_to_back_copies_leave_one_clear() {
    let fx = Fixture::new(2);

    for _ in 0..4 {
        assert_success(&fx.bwx(&["copy", "mail"]));
    }

    assert!(wait_until(Duration::from_secs(5), || {
        fx.clear_count() >= 1 && !fx.pid_file().exists()
    }));
    sleep(Duration::from_millis(500));
    assert_eq!(fx.clear_count(), 1);
}

#[test]
fn stale_pid_file_is_taken_over() {
    let fx = Fixture::new(1);
    fs::create_dir_all(fx.path("run")).unwrap();
    fs::write(fx.pid_file(), i32::MAX.to_string()).unwrap();

    assert_success(&fx.bwx(&["copy", "mail"]));

    assert_ne!(fx.pending_pid(), Some(i32::MAX as u32));
    assert!(wait_until(Duration::from_secs(3), || fx.clear_count() == 1));
}

#[test]
fn unknown_item_is_silent_success() {
    let fx = Fixture::new(1);

    let output = fx.bwx(&["copy", "nope"]);

    assert_success(&output);
    assert!(!fx.path("copied").exists());
    assert!(!fx.pid_file().exists());
}

#[test]
fn first_unlock_is_cached_owner_only() {
    let fx = Fixture::new(1);

    assert_success(&fx.bwx(&["unlock"]));

    let cache = fx.path("run").join("BW_SESSION");
    assert_eq!(fs::read_to_string(&cache).unwrap(), "tok-123");
    assert_eq!(
        fs::metadata(&cache).unwrap().permissions().mode() & 0o777,
        0o600
    );

    // A second run reuses the cache instead of unlocking again.
    let output = fx.bwx(&["whoami", "x"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "tok-123");
    let unlocks = fs::read_to_string(fx.path("unlock-calls")).unwrap();
    assert_eq!(unlocks.lines().count(), 1);
}

#[test]
fn environment_token_is_passed_through() {
    let fx = Fixture::new(1);

    let output = Command::new(env!("CARGO_BIN_EXE_bwx"))
        .arg("--config")
        .arg(fx.path("bwx.yml"))
        .args(["whoami", "x"])
        .env("HOME", fx.dir.path())
        .env("XDG_CONFIG_HOME", fx.path("config"))
        .env("BW_SESSION", "tok-env")
        .output()
        .unwrap();

    assert_eq!(String::from_utf8_lossy(&output.stdout), "tok-env");
    assert!(!fx.path("unlock-calls").exists());
    assert!(!fx.path("run").join("BW_SESSION").exists());
}

#[test]
fn copy_without_sink_fails() {
    let fx = Fixture::new(1);
    fx.write_config(&format!(
        "transient_dir: {}\nbw_cmd: {}\n",
        fx.path("run").display(),
        fx.path("bw").display()
    ));

    let output = fx.bwx(&["copy", "mail"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not configured"));
}

#[test]
fn invalid_timeout_is_a_startup_error() {
    let fx = Fixture::new(0);

    let output = fx.bwx(&["unlock"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout"));
    assert!(!fx.path("unlock-calls").exists());
}

#[test]
fn hold_timer_cleans_up_on_sigterm() {
    let fx = Fixture::new(1);
    fs::create_dir_all(fx.path("run")).unwrap();

    let mut timer = Command::new(env!("CARGO_BIN_EXE_bwx"))
        .arg("hold-timer")
        .arg("--pid-file")
        .arg(fx.pid_file())
        .arg("--timeout")
        .arg("30")
        .arg("--")
        .args(["sh", "-c"])
        .arg(format!("echo cleared >> '{}'", fx.path("cleared").display()))
        .stdout(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let pid = timer.id();
    assert!(wait_until(Duration::from_secs(3), || fx.pending_pid() == Some(pid)));

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).unwrap();

    assert!(timer.wait().unwrap().success());
    assert!(!fx.pid_file().exists());
    assert_eq!(fx.clear_count(), 0);
}
