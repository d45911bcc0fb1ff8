use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::db::DynError;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 20;

/// Process manager the monitor drives
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Begin capturing `stream_url` into `output_path`; fails if the target is already recording
    async fn start(
        &self,
        target_id: &str,
        stream_url: &str,
        output_path: &Path,
        max_duration: Option<Duration>,
    ) -> Result<(), DynError>;

    /// Finish the capture for a target. Unknown targets are ignored.
    async fn stop(&self, target_id: &str) -> Result<(), DynError>;

    /// True while the capture process is alive; exited processes are reaped
    fn is_running(&self, target_id: &str) -> bool;
}

/// `<output_dir>/<username>_<YYYYmmdd_HHMMSS>.mp4`
pub fn recording_path(output_dir: &Path, username: &str, at: DateTime<Local>) -> PathBuf {
    output_dir.join(format!("{}_{}.mp4", username, at.format("%Y%m%d_%H%M%S")))
}

/// Arguments for capturing a live stream into an mp4 without re-encoding
pub fn recording_args(
    stream_url: &str,
    output_path: &Path,
    max_duration: Option<Duration>,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(stream_url.to_string());
    if let Some(duration) = max_duration {
        args.push("-t".to_string());
        args.push(duration.as_secs().to_string());
    }
    for arg in ["-c", "copy", "-bsf:a", "aac_adtstoasc", "-f", "mp4"] {
        args.push(arg.to_string());
    }
    args.push(output_path.display().to_string());
    args
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

struct RecordingProcess {
    child: Child,
    output_path: PathBuf,
    stderr_tail: StderrTail,
}

fn tail_text(tail: &StderrTail) -> String {
    match tail.lock() {
        Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join(" | "),
        Err(_) => String::new(),
    }
}

fn log_exit(target_id: &str, process: &RecordingProcess, status: ExitStatus) {
    if status.success() {
        info!(
            "Recorder for {} finished: {}",
            target_id,
            process.output_path.display()
        );
    } else {
        warn!(
            "Recorder for {} exited with {}: {}",
            target_id,
            status,
            tail_text(&process.stderr_tail)
        );
    }
}

/// Runs one `ffmpeg` child per target
pub struct FfmpegRecorder {
    ffmpeg_path: String,
    startup_grace: Duration,
    processes: Mutex<HashMap<String, RecordingProcess>>,
}

impl FfmpegRecorder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            startup_grace: DEFAULT_STARTUP_GRACE,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// How long a fresh process must survive before `start` reports success
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RecordingProcess>>, DynError> {
        self.processes
            .lock()
            .map_err(|_| "Recorder process table lock poisoned".into())
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    async fn start(
        &self,
        target_id: &str,
        stream_url: &str,
        output_path: &Path,
        max_duration: Option<Duration>,
    ) -> Result<(), DynError> {
        if self.is_running(target_id) {
            return Err(format!("Recording already in progress for {}", target_id).into());
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                format!("Failed to create output directory '{}': {}", parent.display(), e)
            })?;
        }

        let args = recording_args(stream_url, output_path, max_duration);
        debug!("Spawning {} {}", self.ffmpeg_path, args.join(" "));
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn '{}': {}", self.ffmpeg_path, e))?;

        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut buf) = tail.lock() {
                        if buf.len() == STDERR_TAIL_LINES {
                            buf.pop_front();
                        }
                        buf.push_back(line);
                    }
                }
            });
        }

        if !self.startup_grace.is_zero() {
            tokio::time::sleep(self.startup_grace).await;
            if let Some(status) = child.try_wait()? {
                return Err(format!(
                    "Recorder exited immediately with {}: {}",
                    status,
                    tail_text(&stderr_tail)
                )
                .into());
            }
        }

        let mut processes = self.lock()?;
        if processes.contains_key(target_id) {
            return Err(format!("Recording already in progress for {}", target_id).into());
        }
        processes.insert(
            target_id.to_string(),
            RecordingProcess {
                child,
                output_path: output_path.to_path_buf(),
                stderr_tail,
            },
        );
        info!("Recording {} into {}", target_id, output_path.display());
        Ok(())
    }

    async fn stop(&self, target_id: &str) -> Result<(), DynError> {
        let process = self.lock()?.remove(target_id);
        let mut process = match process {
            Some(p) => p,
            None => {
                debug!("No recorder running for {}", target_id);
                return Ok(());
            }
        };

        if let Some(mut stdin) = process.child.stdin.take() {
            // ffmpeg finalizes the container when it reads `q`
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!("Could not signal recorder for {}: {}", target_id, e);
            }
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(STOP_TIMEOUT, process.child.wait()).await {
            Ok(Ok(status)) => log_exit(target_id, &process, status),
            Ok(Err(e)) => warn!("Failed to wait for recorder of {}: {}", target_id, e),
            Err(_) => {
                warn!(
                    "Recorder for {} did not exit within {:?}, killing it",
                    target_id, STOP_TIMEOUT
                );
                process.child.kill().await?;
            }
        }
        Ok(())
    }

    fn is_running(&self, target_id: &str) -> bool {
        let mut processes = match self.processes.lock() {
            Ok(p) => p,
            Err(_) => return false,
        };
        let exited = match processes.get_mut(target_id) {
            None => return false,
            Some(process) => match process.child.try_wait() {
                Ok(None) => return true,
                Ok(Some(status)) => Some(status),
                Err(e) => {
                    warn!("Failed to poll recorder for {}: {}", target_id, e);
                    None
                }
            },
        };
        if let Some(process) = processes.remove(target_id) {
            if let Some(status) = exited {
                log_exit(target_id, &process, status);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recording_path_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            recording_path(Path::new("/rec"), "alice", at),
            PathBuf::from("/rec/alice_20240309_140507.mp4")
        );
    }

    #[test]
    fn test_recording_args() {
        let args = recording_args(
            "http://cdn/live.flv",
            Path::new("/rec/a.mp4"),
            Some(Duration::from_secs(3600)),
        );
        assert_eq!(
            args.join(" "),
            "-hide_banner -loglevel error -y -reconnect 1 -reconnect_streamed 1 \
             -reconnect_delay_max 5 -i http://cdn/live.flv -t 3600 -c copy \
             -bsf:a aac_adtstoasc -f mp4 /rec/a.mp4"
        );

        let unbounded = recording_args("rtmp://x", Path::new("o.mp4"), None);
        assert!(!unbounded.contains(&"-t".to_string()));
    }
}
