//! Standard stream capture, observed through writes that bypass the test harness.
#![cfg(unix)]

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Instant;

use clrhost::capture;

// sessions are process-wide
static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn captures_process_and_child_output() {
    let _serial = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let session = capture::begin().unwrap();

    // io::stdout() writes straight to the descriptor, unlike print!
    writeln!(std::io::stdout(), "from the host").unwrap();
    writeln!(std::io::stderr(), "host warning").unwrap();

    let status = Command::new("sh")
        .arg("-c")
        .arg("echo from the child; echo child warning >&2")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .unwrap();
    assert!(status.success());

    let output = session.end().unwrap();
    let stdout = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    assert!(stdout.contains("from the host"));
    assert!(stdout.contains("from the child"));
    assert!(stderr.contains("host warning"));
    assert!(stderr.contains("child warning"));
}

#[test]
fn lingering_child_does_not_block_end() {
    let _serial = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let session = capture::begin().unwrap();

    writeln!(std::io::stdout(), "before the child").unwrap();
    let mut child = Command::new("sh")
        .arg("-c")
        .arg("echo child started; sleep 30")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .unwrap();

    let started = Instant::now();
    let output = session.end();
    let elapsed = started.elapsed();
    child.kill().unwrap();
    child.wait().unwrap();

    let output = output.unwrap();
    assert!(elapsed < capture::DRAIN_TIMEOUT * 5, "end took {elapsed:?}");
    assert!(output.stdout_lossy().contains("before the child"));

    // the next session is unaffected by the detached reader
    let session = capture::begin().unwrap();
    writeln!(std::io::stdout(), "after").unwrap();
    assert!(session.end().unwrap().stdout_lossy().contains("after"));
}
