//! # Recorder Process Tests
//!
//! These tests run `FfmpegRecorder` against small shell scripts that behave
//! like ffmpeg: they write to the output path given as the last argument and
//! finish when `q` arrives on stdin.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test recorder_test
//! ```
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tiktok_reup::recorder::{FfmpegRecorder, Recorder};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Records until told to quit
fn quits_on_q(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "ffmpeg-q.sh",
        "for arg; do out=\"$arg\"; done\necho started > \"$out\"\nread line\necho \"$line\" >> \"$out\"\n",
    )
}

fn recorder(script: &Path) -> FfmpegRecorder {
    FfmpegRecorder::new(script.display().to_string()).with_startup_grace(Duration::from_millis(200))
}

#[tokio::test]
async fn test_start_then_graceful_stop() {
    let dir = tempfile::tempdir().unwrap();
    let script = quits_on_q(dir.path());
    let recorder = recorder(&script);
    let output = dir.path().join("out").join("alice_20240101_000000.mp4");

    recorder
        .start("target-1", "http://cdn.test/live.flv", &output, None)
        .await
        .unwrap();
    assert!(recorder.is_running("target-1"));

    let err = recorder
        .start("target-1", "http://cdn.test/live.flv", &output, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already in progress"));

    recorder.stop("target-1").await.unwrap();
    assert!(!recorder.is_running("target-1"));

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written, "started\nq\n");
}

#[tokio::test]
async fn test_stop_unknown_target_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder(&quits_on_q(dir.path()));
    recorder.stop("never-started").await.unwrap();
    assert!(!recorder.is_running("never-started"));
}

#[tokio::test]
async fn test_immediate_exit_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "ffmpeg-fail.sh",
        "echo 'Connection refused' >&2\nexit 1\n",
    );
    let recorder = recorder(&script);

    let err = recorder
        .start("target-1", "http://cdn.test/live.flv", &dir.path().join("a.mp4"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exited immediately"));
    assert!(!recorder.is_running("target-1"));
}

#[tokio::test]
async fn test_missing_binary_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = FfmpegRecorder::new("/nonexistent/bin/ffmpeg");
    let err = recorder
        .start("target-1", "http://cdn.test/live.flv", &dir.path().join("a.mp4"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to spawn"));
}

#[tokio::test]
async fn test_process_exit_is_noticed() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "ffmpeg-short.sh",
        "for arg; do out=\"$arg\"; done\necho data > \"$out\"\nsleep 1\n",
    );
    let recorder = recorder(&script);
    let output = dir.path().join("short.mp4");

    recorder
        .start("target-1", "http://cdn.test/live.flv", &output, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(recorder.is_running("target-1"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!recorder.is_running("target-1"));
    assert!(output.exists());

    // A fresh capture may start once the old one is gone
    recorder
        .start("target-1", "http://cdn.test/live.flv", &output, None)
        .await
        .unwrap();
    recorder.stop("target-1").await.unwrap();
}
