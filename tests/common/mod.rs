//! Shared fakes for the monitor and HTTP tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tiktok_reup::db::DynError;
use tiktok_reup::forward::Forwarder;
use tiktok_reup::monitor::{Monitor, MonitorSettings};
use tiktok_reup::recorder::Recorder;
use tiktok_reup::tiktok::LiveProbe;
use tokio::sync::Notify;

/// Liveness answers controlled by the test
#[derive(Default)]
pub struct FakeProbe {
    rooms: Mutex<HashMap<String, String>>,
    live: Mutex<HashSet<String>>,
    pub fail_live_checks: AtomicBool,
    pub live_checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_room(&self, username: &str, room_id: &str) {
        self.rooms
            .lock()
            .unwrap()
            .insert(username.to_string(), room_id.to_string());
    }

    pub fn set_live(&self, room_id: &str, live: bool) {
        let mut rooms = self.live.lock().unwrap();
        if live {
            rooms.insert(room_id.to_string());
        } else {
            rooms.remove(room_id);
        }
    }
}

#[async_trait]
impl LiveProbe for FakeProbe {
    async fn resolve_room_id(&self, username: &str) -> Result<Option<String>, DynError> {
        Ok(self.rooms.lock().unwrap().get(username).cloned())
    }

    async fn is_live(&self, room_id: &str) -> Result<bool, DynError> {
        self.live_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_live_checks.load(Ordering::SeqCst) {
            return Err("connection reset".into());
        }
        Ok(self.live.lock().unwrap().contains(room_id))
    }

    async fn stream_url(&self, room_id: &str) -> Result<String, DynError> {
        Ok(format!("https://pull.example/stage/{}.flv", room_id))
    }
}

/// Recorder that writes a small file instead of spawning ffmpeg
#[derive(Default)]
pub struct FakeRecorder {
    running: Mutex<HashMap<String, PathBuf>>,
    pub fail_start: AtomicBool,
    /// Number of upcoming starts that fail before starts succeed again
    pub failing_starts: AtomicUsize,
    pub write_empty: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the capture process exiting on its own
    pub fn crash(&self, target_id: &str) {
        self.running.lock().unwrap().remove(target_id);
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn start(
        &self,
        target_id: &str,
        _stream_url: &str,
        output_path: &Path,
        _max_duration: Option<Duration>,
    ) -> Result<(), DynError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err("ffmpeg exited with status 1".into());
        }
        let failing = self
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err("Connection refused".into());
        }
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data: &[u8] = if self.write_empty.load(Ordering::SeqCst) {
            b""
        } else {
            b"fake mp4 payload"
        };
        std::fs::write(output_path, data)?;
        self.running
            .lock()
            .unwrap()
            .insert(target_id.to_string(), output_path.to_path_buf());
        Ok(())
    }

    async fn stop(&self, target_id: &str) -> Result<(), DynError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(target_id);
        Ok(())
    }

    fn is_running(&self, target_id: &str) -> bool {
        self.running.lock().unwrap().contains_key(target_id)
    }
}

/// Collects everything the monitor tries to forward
#[derive(Default)]
pub struct FakeForwarder {
    pub videos: Mutex<Vec<(String, PathBuf, String)>>,
    pub messages: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
    /// Uploads wait for `release` while this is set
    pub hold_uploads: AtomicBool,
    pub uploads_in_flight: AtomicUsize,
    pub release: Notify,
}

impl FakeForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Forwarder for FakeForwarder {
    async fn send_video(&self, destination: &str, path: &Path, caption: &str) -> Result<(), DynError> {
        if self.hold_uploads.load(Ordering::SeqCst) {
            self.uploads_in_flight.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("Bad Request: chat not found".into());
        }
        self.videos.lock().unwrap().push((
            destination.to_string(),
            path.to_path_buf(),
            caption.to_string(),
        ));
        Ok(())
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<(), DynError> {
        self.messages
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

pub fn test_settings(output_directory: &Path) -> MonitorSettings {
    MonitorSettings {
        check_interval_secs: 60,
        error_backoff_secs: 30,
        recording_duration_secs: None,
        output_directory: output_directory.to_path_buf(),
        start_retries: 1,
        telegram_enabled: false,
        telegram_chat_id: None,
    }
}

pub struct TestMonitor {
    pub monitor: Arc<Monitor>,
    pub probe: Arc<FakeProbe>,
    pub recorder: Arc<FakeRecorder>,
    pub forwarder: Arc<FakeForwarder>,
    pub pool: sqlx::SqlitePool,
    pub dir: tempfile::TempDir,
}

/// A monitor wired to fakes over a fresh database. The loop is not started.
pub async fn create_test_monitor() -> TestMonitor {
    create_test_monitor_with(|_| {}).await
}

/// Like `create_test_monitor`, with the starting settings adjusted first
pub async fn create_test_monitor_with<F: FnOnce(&mut MonitorSettings)>(adjust: F) -> TestMonitor {
    let (pool, dir) = tiktok_reup::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    tiktok_reup::db::init_database_schema(&pool).await.unwrap();

    let probe = FakeProbe::new();
    let recorder = FakeRecorder::new();
    let forwarder = FakeForwarder::new();
    let mut settings = test_settings(&dir.path().join("recordings"));
    adjust(&mut settings);
    let monitor = Monitor::new(
        pool.clone(),
        settings,
        false,
        probe.clone(),
        recorder.clone(),
        Some(forwarder.clone() as Arc<dyn Forwarder>),
    );
    TestMonitor {
        monitor,
        probe,
        recorder,
        forwarder,
        pool,
        dir,
    }
}
