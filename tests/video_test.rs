//! # Video Upload Tests
//!
//! These tests run `VideoService` against temporary directories. Transforms
//! that need ffmpeg use a small shell script standing in for the binary, so
//! no real ffmpeg install is required.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test video_test
//! ```

use std::path::{Path, PathBuf};

use tiktok_reup::video::{TransformOptions, VideoError, VideoService};

fn extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mkv".to_string(), "mov".to_string()]
}

fn service(dir: &Path, ffmpeg: &str) -> VideoService {
    VideoService::new(
        dir.join("uploads"),
        dir.join("uploads").join("processed"),
        extensions(),
        ffmpeg.to_string(),
    )
}

/// Regular files directly inside the staging directory
fn staged_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.join("uploads")) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_upload_without_options_is_copied() {
    let dir = tempfile::tempdir().unwrap();
    let video = service(dir.path(), "ffmpeg-that-does-not-exist");

    let result = video
        .process_upload("My Clip.MP4", b"not really a video", &TransformOptions::default())
        .await
        .unwrap();

    assert!(result.original_file.starts_with("My_Clip_"));
    assert!(result.original_file.ends_with(".MP4"));
    assert_eq!(result.processed_file, format!("processed_{}", result.original_file));
    assert_eq!(result.processing_status, "Success");
    assert_eq!(result.message, "Video processed successfully");

    let processed = video.processed_path(&result.processed_file).unwrap();
    assert_eq!(std::fs::read(processed).unwrap(), b"not really a video");
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_disallowed_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let video = service(dir.path(), "ffmpeg");

    for name in ["notes.txt", "archive.mp4.exe", "noextension", "video."] {
        let err = video
            .process_upload(name, b"data", &TransformOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::InvalidFileType), "{}", name);
    }
    assert!(!dir.path().join("uploads").exists());
}

#[tokio::test]
async fn test_invalid_options_are_rejected_before_staging() {
    let dir = tempfile::tempdir().unwrap();
    let video = service(dir.path(), "ffmpeg");
    let opts = TransformOptions {
        trim_start: Some(10.0),
        trim_end: Some(5.0),
        ..Default::default()
    };

    let err = video.process_upload("clip.mp4", b"data", &opts).await.unwrap_err();
    assert!(matches!(err, VideoError::InvalidOptions(_)));
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_ffmpeg_cleans_up_staged_file() {
    let dir = tempfile::tempdir().unwrap();
    let video = service(dir.path(), "/nonexistent/bin/ffmpeg");
    let opts = TransformOptions {
        flip_horizontal: true,
        ..Default::default()
    };

    let err = video.process_upload("clip.mp4", b"data", &opts).await.unwrap_err();
    assert!(matches!(err, VideoError::Processing(_)));
    assert!(staged_files(dir.path()).is_empty());
    let processed: Vec<_> = std::fs::read_dir(dir.path().join("uploads").join("processed"))
        .unwrap()
        .collect();
    assert!(processed.is_empty());
}

#[tokio::test]
async fn test_download_names_cannot_escape_processed_dir() {
    let dir = tempfile::tempdir().unwrap();
    let video = service(dir.path(), "ffmpeg");
    std::fs::create_dir_all(dir.path().join("uploads").join("processed")).unwrap();
    std::fs::write(dir.path().join("secret.mp4"), b"x").unwrap();

    for name in ["../secret.mp4", "..", "", "missing.mp4", "/etc/passwd"] {
        assert!(
            matches!(video.processed_path(name), Err(VideoError::NotFound)),
            "{}",
            name
        );
    }
}

#[cfg(unix)]
fn write_fake_ffmpeg(dir: &Path, exit_code: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-ffmpeg.sh");
    let log = dir.join("ffmpeg-args.log");
    let body = format!(
        "#!/bin/sh\necho \"$@\" > '{}'\nfor arg; do out=\"$arg\"; done\necho transformed > \"$out\"\necho 'Invalid data found' >&2\nexit {}\n",
        log.display(),
        exit_code
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[tokio::test]
async fn test_transform_runs_ffmpeg_with_filters() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = write_fake_ffmpeg(dir.path(), 0);
    let video = service(dir.path(), &ffmpeg.display().to_string());
    let opts = TransformOptions {
        trim_start: Some(2.0),
        zoom: Some(1.1),
        flip_horizontal: true,
        strip_audio: true,
        ..Default::default()
    };

    let result = video.process_upload("clip.mp4", b"data", &opts).await.unwrap();
    assert_eq!(
        result.message,
        "Video processed successfully: trimmed 2 seconds from the start, zoomed in 110%, flipped horizontally, audio removed"
    );
    let processed = video.processed_path(&result.processed_file).unwrap();
    assert_eq!(std::fs::read_to_string(processed).unwrap().trim(), "transformed");

    let args = std::fs::read_to_string(dir.path().join("ffmpeg-args.log")).unwrap();
    assert!(args.contains("-ss 2"));
    assert!(args.contains("hflip"));
    assert!(args.contains("-an"));
    assert!(staged_files(dir.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_transform_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = write_fake_ffmpeg(dir.path(), 1);
    let video = service(dir.path(), &ffmpeg.display().to_string());
    let opts = TransformOptions {
        scale: Some(0.5),
        ..Default::default()
    };

    let err = video.process_upload("clip.mov", b"data", &opts).await.unwrap_err();
    match err {
        VideoError::Processing(msg) => assert!(msg.contains("Invalid data found")),
        other => panic!("unexpected error: {}", other),
    }
    let processed: Vec<_> = std::fs::read_dir(dir.path().join("uploads").join("processed"))
        .unwrap()
        .collect();
    assert!(processed.is_empty());
}
