use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("Invalid file name")]
    InvalidFileName,
    #[error("{0}")]
    InvalidOptions(String),
    #[error("File not found")]
    NotFound,
    #[error("Video processing failed: {0}")]
    Processing(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// True when `filename` has an extension from the allow-list (case-insensitive)
pub fn allowed_file(filename: &str, allowed_extensions: &[String]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Reduce a client-supplied name to a safe basename
///
/// Directory components are dropped, spaces become `_` and anything outside
/// `[A-Za-z0-9._-]` is removed. Leading dots are stripped.
pub fn secure_filename(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// `<stem>_<8 hex>.<ext>`
pub fn unique_filename(filename: &str) -> String {
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", filename, suffix),
    }
}

/// Requested edits; all optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransformOptions {
    /// Seconds from the start of the clip
    pub trim_start: Option<f64>,
    /// Seconds from the start of the clip, must be after `trim_start`
    pub trim_end: Option<f64>,
    /// Output size factor in (0, 4]
    pub scale: Option<f64>,
    /// Center zoom factor in [1, 4]; the frame size is kept
    pub zoom: Option<f64>,
    #[serde(default)]
    pub flip_horizontal: bool,
    #[serde(default)]
    pub strip_audio: bool,
}

impl TransformOptions {
    pub fn is_noop(&self) -> bool {
        self.trim_start.is_none()
            && self.trim_end.is_none()
            && self.scale.is_none()
            && self.zoom.is_none()
            && !self.flip_horizontal
            && !self.strip_audio
    }

    pub fn validate(&self) -> Result<(), VideoError> {
        let invalid = |msg: &str| Err(VideoError::InvalidOptions(msg.to_string()));
        if let Some(start) = self.trim_start {
            if !start.is_finite() || start < 0.0 {
                return invalid("trim_start must be zero or positive");
            }
        }
        if let Some(end) = self.trim_end {
            if !end.is_finite() || end <= self.trim_start.unwrap_or(0.0) {
                return invalid("trim_end must be greater than trim_start");
            }
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale <= 0.0 || scale > 4.0 {
                return invalid("scale must be greater than 0 and at most 4");
            }
        }
        if let Some(zoom) = self.zoom {
            if !zoom.is_finite() || !(1.0..=4.0).contains(&zoom) {
                return invalid("zoom must be between 1 and 4");
            }
        }
        Ok(())
    }

    /// Video filter chain, None when no video filter applies
    pub fn video_filter(&self) -> Option<String> {
        let mut filters = Vec::new();
        if let Some(zoom) = self.zoom.filter(|z| *z > 1.0) {
            filters.push(format!("scale=iw*{z}:ih*{z},crop=iw/{z}:ih/{z}", z = zoom));
        }
        if let Some(scale) = self.scale.filter(|s| *s != 1.0) {
            filters.push(format!(
                "scale=trunc(iw*{s}/2)*2:trunc(ih*{s}/2)*2",
                s = scale
            ));
        }
        if self.flip_horizontal {
            filters.push("hflip".to_string());
        }
        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }

    /// Human readable list of what was applied
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match (self.trim_start, self.trim_end) {
            (Some(start), Some(end)) => parts.push(format!("trimmed to {}s-{}s", start, end)),
            (Some(start), None) => parts.push(format!("trimmed {} seconds from the start", start)),
            (None, Some(end)) => parts.push(format!("trimmed after {} seconds", end)),
            (None, None) => {}
        }
        if let Some(scale) = self.scale {
            parts.push(format!("scaled to {}%", (scale * 100.0).round()));
        }
        if let Some(zoom) = self.zoom {
            parts.push(format!("zoomed in {}%", (zoom * 100.0).round()));
        }
        if self.flip_horizontal {
            parts.push("flipped horizontally".to_string());
        }
        if self.strip_audio {
            parts.push("audio removed".to_string());
        }
        parts.join(", ")
    }
}

/// Build the ffmpeg argument list for a transformation
pub fn ffmpeg_args(input: &Path, output: &Path, opts: &TransformOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
    ];

    if let Some(start) = opts.trim_start {
        args.push("-ss".into());
        args.push(start.to_string());
    }
    if let Some(end) = opts.trim_end {
        args.push("-to".into());
        args.push(end.to_string());
    }

    match opts.video_filter() {
        Some(chain) => {
            args.push("-vf".into());
            args.push(chain);
        }
        None if opts.trim_start.is_none() && opts.trim_end.is_none() => {
            args.push("-c:v".into());
            args.push("copy".into());
        }
        None => {}
    }

    if opts.strip_audio {
        args.push("-an".into());
    } else {
        args.push("-c:a".into());
        args.push("copy".into());
    }

    args.push(output.display().to_string());
    args
}

/// Outcome of a processed upload
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub original_file: String,
    pub processed_file: String,
    pub file_size_mb: f64,
    pub processing_status: String,
    pub processed_at: String,
    pub message: String,
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

pub struct VideoService {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    allowed_extensions: Vec<String>,
    ffmpeg_path: String,
}

impl VideoService {
    pub fn new(
        upload_dir: PathBuf,
        processed_dir: PathBuf,
        allowed_extensions: Vec<String>,
        ffmpeg_path: String,
    ) -> Self {
        Self {
            upload_dir,
            processed_dir,
            allowed_extensions,
            ffmpeg_path,
        }
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Validate, stage and transform one uploaded file
    ///
    /// The staged copy is always removed, whether processing succeeds or not.
    pub async fn process_upload(
        &self,
        file_name: &str,
        data: &[u8],
        opts: &TransformOptions,
    ) -> Result<ProcessResult, VideoError> {
        if !allowed_file(file_name, &self.allowed_extensions) {
            return Err(VideoError::InvalidFileType);
        }
        let safe_name = secure_filename(file_name).ok_or(VideoError::InvalidFileName)?;
        if !allowed_file(&safe_name, &self.allowed_extensions) {
            return Err(VideoError::InvalidFileType);
        }
        opts.validate()?;

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.processed_dir).await?;

        let staged_name = unique_filename(&safe_name);
        let staged_path = self.upload_dir.join(&staged_name);
        tokio::fs::write(&staged_path, data).await?;

        let result = self.transform(&staged_name, &staged_path, opts).await;

        if let Err(e) = tokio::fs::remove_file(&staged_path).await {
            warn!(
                "Failed to clean up staged upload '{}': {}",
                staged_path.display(),
                e
            );
        }
        result
    }

    async fn transform(
        &self,
        staged_name: &str,
        staged_path: &Path,
        opts: &TransformOptions,
    ) -> Result<ProcessResult, VideoError> {
        let processed_name = format!("processed_{}", staged_name);
        let processed_path = self.processed_dir.join(&processed_name);

        let message = if opts.is_noop() {
            tokio::fs::copy(staged_path, &processed_path).await?;
            "Video processed successfully".to_string()
        } else {
            let args = ffmpeg_args(staged_path, &processed_path, opts);
            info!("Running {} {}", self.ffmpeg_path, args.join(" "));
            let output = Command::new(&self.ffmpeg_path)
                .args(&args)
                .output()
                .await
                .map_err(|e| {
                    VideoError::Processing(format!(
                        "failed to run '{}': {}",
                        self.ffmpeg_path, e
                    ))
                })?;
            if !output.status.success() {
                let _ = tokio::fs::remove_file(&processed_path).await;
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(VideoError::Processing(format!(
                    "ffmpeg exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            format!("Video processed successfully: {}", opts.describe())
        };

        let size = tokio::fs::metadata(&processed_path).await?.len();
        info!("Processed upload '{}' into '{}'", staged_name, processed_name);

        Ok(ProcessResult {
            original_file: staged_name.to_string(),
            processed_file: processed_name,
            file_size_mb: size_mb(size),
            processing_status: "Success".to_string(),
            processed_at: Utc::now().to_rfc3339(),
            message,
        })
    }

    /// Resolve a download name inside the processed directory
    pub fn processed_path(&self, name: &str) -> Result<PathBuf, VideoError> {
        let safe = secure_filename(name).ok_or(VideoError::NotFound)?;
        if safe != name {
            return Err(VideoError::NotFound);
        }
        let path = self.processed_dir.join(&safe);
        if !path.is_file() {
            return Err(VideoError::NotFound);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["mp4".to_string(), "mkv".to_string(), "mov".to_string()]
    }

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("clip.mp4", &exts()));
        assert!(allowed_file("CLIP.MOV", &exts()));
        assert!(allowed_file("a.b.mkv", &exts()));
        assert!(!allowed_file("clip.avi", &exts()));
        assert!(!allowed_file("mp4", &exts()));
        assert!(!allowed_file("clip.", &exts()));
        assert!(!allowed_file("", &exts()));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("my clip.mp4").as_deref(), Some("my_clip.mp4"));
        assert_eq!(secure_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(secure_filename("C:\\videos\\a.mov").as_deref(), Some("a.mov"));
        assert_eq!(secure_filename(".hidden.mp4").as_deref(), Some("hidden.mp4"));
        assert_eq!(secure_filename("vidéo!.mp4").as_deref(), Some("vido.mp4"));
        assert_eq!(secure_filename("../"), None);
        assert_eq!(secure_filename("..."), None);
    }

    #[test]
    fn test_unique_filename_keeps_extension() {
        let name = unique_filename("clip.mp4");
        assert!(name.starts_with("clip_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "clip_".len() + 8 + ".mp4".len());
        assert_ne!(unique_filename("clip.mp4"), unique_filename("clip.mp4"));
    }

    #[test]
    fn test_validate_options() {
        assert!(TransformOptions::default().validate().is_ok());
        let ok = TransformOptions {
            trim_start: Some(1.0),
            trim_end: Some(3.5),
            scale: Some(0.5),
            zoom: Some(1.1),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let cases = [
            TransformOptions { trim_start: Some(-1.0), ..Default::default() },
            TransformOptions { trim_start: Some(5.0), trim_end: Some(5.0), ..Default::default() },
            TransformOptions { scale: Some(0.0), ..Default::default() },
            TransformOptions { scale: Some(4.5), ..Default::default() },
            TransformOptions { zoom: Some(0.9), ..Default::default() },
            TransformOptions { zoom: Some(f64::NAN), ..Default::default() },
        ];
        for opts in cases {
            assert!(opts.validate().is_err(), "{:?} should be rejected", opts);
        }
    }

    #[test]
    fn test_ffmpeg_args_full_chain() {
        let opts = TransformOptions {
            trim_start: Some(2.0),
            trim_end: Some(5.0),
            scale: Some(0.5),
            zoom: Some(1.1),
            flip_horizontal: true,
            strip_audio: true,
        };
        let args = ffmpeg_args(Path::new("in.mp4"), Path::new("out.mp4"), &opts);
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mp4 -ss 2 -to 5"));
        assert!(joined.contains(
            "-vf scale=iw*1.1:ih*1.1,crop=iw/1.1:ih/1.1,scale=trunc(iw*0.5/2)*2:trunc(ih*0.5/2)*2,hflip"
        ));
        assert!(args.contains(&"-an".to_string()));
        assert!(!joined.contains("-c:a copy"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_ffmpeg_args_without_options_copies_streams() {
        let args = ffmpeg_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &TransformOptions::default(),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy -c:a copy"));
        assert!(!joined.contains("-vf"));
    }

    #[test]
    fn test_describe_mentions_each_edit() {
        let opts = TransformOptions {
            trim_start: Some(2.0),
            zoom: Some(1.1),
            flip_horizontal: true,
            strip_audio: true,
            ..Default::default()
        };
        let text = opts.describe();
        assert!(text.contains("trimmed 2 seconds"));
        assert!(text.contains("zoomed in 110%"));
        assert!(text.contains("flipped horizontally"));
        assert!(text.contains("audio removed"));
    }

    #[test]
    fn test_size_mb_rounds_to_two_places() {
        assert_eq!(size_mb(1024 * 1024), 1.0);
        assert_eq!(size_mb(1536 * 1024), 1.5);
        assert_eq!(size_mb(0), 0.0);
    }
}
