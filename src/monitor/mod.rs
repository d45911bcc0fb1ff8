//! Live monitoring loop.
//!
//! A single background task walks the registry every `check_interval_secs`,
//! asks the `LiveProbe` whether each account is broadcasting and starts or
//! stops a `Recorder` accordingly. Finished recordings are written to the
//! `live_recordings` table and handed to the `Forwarder`.
//!
//! The registry lives behind a std mutex that is never held across an await.
//! Work on a single target (a loop visit, removal, pausing) is serialised by
//! an async mutex so a recording is never finalised twice. Telegram traffic
//! is queued while that mutex is held and sent once it is released.

pub mod registry;

use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::db::{self, DynError};
use crate::forward::{live_notice, recording_caption, Forwarder};
use crate::models::{LiveRecording, RecordingStatus};
use crate::recorder::{recording_path, Recorder};
use crate::tiktok::{parse_user_input, LiveProbe};

pub use registry::{MonitoredTarget, MonitoringStatus, Registry, TargetView};

pub const MIN_CHECK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_RECORDINGS_LIMIT: u64 = 50;
pub const MAX_RECORDINGS_LIMIT: u64 = 500;

const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("User @{0} is already being monitored")]
    Duplicate(String),
    #[error("Monitored user not found")]
    NotFound,
    #[error("{0}")]
    InvalidSettings(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl From<DynError> for MonitorError {
    fn from(e: DynError) -> Self {
        MonitorError::Database(e.to_string())
    }
}

/// Get backoff duration in milliseconds before retry `attempt` (1-based)
fn get_backoff_ms(attempt: u32) -> u64 {
    match attempt {
        0 | 1 => 500, // 0.5s
        2 => 1000,    // 1s
        3 => 2000,    // 2s
        4 => 4000,    // 4s
        _ => 5000,    // 5s
    }
}

/// Runtime-adjustable monitor settings
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSettings {
    pub check_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub recording_duration_secs: Option<u64>,
    pub output_directory: PathBuf,
    pub start_retries: u32,
    pub telegram_enabled: bool,
    pub telegram_chat_id: Option<String>,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            check_interval_secs: config.monitor.check_interval_secs,
            error_backoff_secs: config.monitor.error_backoff_secs,
            recording_duration_secs: config.monitor.recording_duration_secs,
            output_directory: config.recordings_dir(),
            start_retries: config.monitor.start_retries.max(1),
            telegram_enabled: config.telegram.enabled,
            telegram_chat_id: config.telegram.chat_id.clone(),
        }
    }
}

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub check_interval_secs: Option<u64>,
    #[serde(default, deserialize_with = "double_option")]
    pub recording_duration_secs: Option<Option<u64>>,
    pub output_directory: Option<PathBuf>,
    pub telegram_enabled: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub telegram_chat_id: Option<Option<String>>,
}

/// Answer of `get_monitoring_status`
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringReport {
    pub active: bool,
    pub check_interval_secs: u64,
    pub users: Vec<TargetView>,
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What a visit to one target did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Skipped,
    Checked,
}

/// Telegram traffic produced while working on a target
#[derive(Debug)]
enum Delivery {
    LiveNotice {
        username: String,
    },
    Recording {
        recording_id: i64,
        path: PathBuf,
        username: String,
    },
}

pub struct Monitor {
    pool: SqlitePool,
    probe: Arc<dyn LiveProbe>,
    recorder: Arc<dyn Recorder>,
    forwarder: Option<Arc<dyn Forwarder>>,
    autostart: bool,
    registry: Mutex<Registry>,
    settings: Mutex<MonitorSettings>,
    work: tokio::sync::Mutex<()>,
    task: Mutex<Option<LoopHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Monitor {
    pub fn new(
        pool: SqlitePool,
        settings: MonitorSettings,
        autostart: bool,
        probe: Arc<dyn LiveProbe>,
        recorder: Arc<dyn Recorder>,
        forwarder: Option<Arc<dyn Forwarder>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            probe,
            recorder,
            forwarder,
            autostart,
            registry: Mutex::new(Registry::new()),
            settings: Mutex::new(settings),
            work: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    pub fn settings(&self) -> MonitorSettings {
        lock(&self.settings).clone()
    }

    /// Restore targets from the database and close out recordings a previous
    /// process left open. Returns the number of restored targets.
    pub async fn load_from_db(&self) -> Result<usize, DynError> {
        let interrupted =
            db::fail_unfinished_recordings(&self.pool, now_ms(), INTERRUPTED_MESSAGE).await?;
        if interrupted > 0 {
            warn!("Marked {} unfinished recording(s) as failed", interrupted);
        }

        let records = db::list_monitored_users(&self.pool).await?;
        let mut registry = self.registry();
        let mut restored = 0;
        for record in records {
            if registry.insert(MonitoredTarget::from_record(record)) {
                restored += 1;
            }
        }
        info!("Restored {} monitored user(s)", restored);
        Ok(restored)
    }

    pub fn target_count(&self) -> usize {
        self.registry().len()
    }

    // ========================================================================
    // Registry operations
    // ========================================================================

    /// Start watching an account given as a username, `@username` or profile URL
    pub async fn add_user(self: &Arc<Self>, input: &str) -> Result<TargetView, MonitorError> {
        let (username, room_id) = parse_user_input(input).map_err(MonitorError::InvalidInput)?;
        let id = uuid::Uuid::new_v4().to_string();
        let added_at_ms = now_ms();
        let target = MonitoredTarget::new(id.clone(), username.clone(), room_id.clone(), added_at_ms);

        if !self.registry().insert(target) {
            return Err(MonitorError::Duplicate(username));
        }
        if let Err(e) =
            db::insert_monitored_user(&self.pool, &id, &username, room_id.as_deref(), added_at_ms)
                .await
        {
            self.registry().remove(&id);
            return Err(e.into());
        }
        info!("Added @{} to monitoring ({})", username, id);

        if self.autostart {
            self.start_monitoring();
        }
        self.view(&id).ok_or(MonitorError::NotFound)
    }

    /// Stop watching a target, finalising any recording in progress
    pub async fn remove_user(&self, id: &str) -> Result<(), MonitorError> {
        let mut outbox = Vec::new();
        let result = self.remove_target(id, &mut outbox).await;
        self.deliver(outbox).await;
        result
    }

    async fn remove_target(&self, id: &str, outbox: &mut Vec<Delivery>) -> Result<(), MonitorError> {
        let _work = self.work.lock().await;
        let recording = match self.registry().get(id) {
            None => return Err(MonitorError::NotFound),
            Some(target) => target.is_recording(),
        };
        if recording {
            self.finalize_recording(id, outbox).await?;
        }
        let removed = self.registry().remove(id);
        db::delete_monitored_user(&self.pool, id).await?;
        if let Some(target) = removed {
            info!("Removed @{} from monitoring", target.username);
        }
        Ok(())
    }

    /// Pause or resume a target; pausing finalises an active recording
    pub async fn set_monitoring(&self, id: &str, enabled: bool) -> Result<TargetView, MonitorError> {
        let mut outbox = Vec::new();
        let result = self.set_target_monitoring(id, enabled, &mut outbox).await;
        self.deliver(outbox).await;
        result?;
        self.view(id).ok_or(MonitorError::NotFound)
    }

    async fn set_target_monitoring(
        &self,
        id: &str,
        enabled: bool,
        outbox: &mut Vec<Delivery>,
    ) -> Result<(), MonitorError> {
        let _work = self.work.lock().await;
        let recording = match self.registry().get(id) {
            None => return Err(MonitorError::NotFound),
            Some(target) => target.is_recording(),
        };
        if !enabled && recording {
            self.finalize_recording(id, outbox).await?;
        }
        {
            let mut registry = self.registry();
            let target = registry.get_mut(id).ok_or(MonitorError::NotFound)?;
            target.monitoring = enabled;
            target.mark_healthy(match (enabled, target.is_recording()) {
                (true, true) => MonitoringStatus::Recording,
                (true, false) => MonitoringStatus::Waiting,
                (false, _) => MonitoringStatus::Stopped,
            });
        }
        db::set_monitoring_flag(&self.pool, id, enabled).await?;
        Ok(())
    }

    fn view(&self, id: &str) -> Option<TargetView> {
        self.registry().get(id).map(|t| t.view(now_ms()))
    }

    /// Snapshot of the loop and every target, without touching the network
    pub fn get_monitoring_status(&self) -> MonitoringReport {
        MonitoringReport {
            active: self.is_active(),
            check_interval_secs: self.settings().check_interval_secs,
            users: self.registry().views(now_ms()),
        }
    }

    pub fn get_settings(&self) -> MonitorSettings {
        self.settings()
    }

    /// Apply a partial update; nothing changes unless every field is valid
    pub fn update_settings(&self, patch: SettingsPatch) -> Result<MonitorSettings, MonitorError> {
        let mut settings = lock(&self.settings);
        let mut next = settings.clone();

        if let Some(interval) = patch.check_interval_secs {
            if interval < MIN_CHECK_INTERVAL_SECS {
                return Err(MonitorError::InvalidSettings(format!(
                    "check_interval_secs must be at least {}",
                    MIN_CHECK_INTERVAL_SECS
                )));
            }
            next.check_interval_secs = interval;
        }
        if let Some(duration) = patch.recording_duration_secs {
            if duration == Some(0) {
                return Err(MonitorError::InvalidSettings(
                    "recording_duration_secs must be greater than 0".to_string(),
                ));
            }
            next.recording_duration_secs = duration;
        }
        if let Some(dir) = patch.output_directory {
            if dir.as_os_str().is_empty() {
                return Err(MonitorError::InvalidSettings(
                    "output_directory must not be empty".to_string(),
                ));
            }
            next.output_directory = dir;
        }
        if let Some(chat_id) = patch.telegram_chat_id {
            next.telegram_chat_id = chat_id.filter(|c| !c.trim().is_empty());
        }
        if let Some(enabled) = patch.telegram_enabled {
            next.telegram_enabled = enabled;
        }
        if next.telegram_enabled {
            if next.telegram_chat_id.is_none() {
                return Err(MonitorError::InvalidSettings(
                    "telegram_chat_id is required to enable Telegram".to_string(),
                ));
            }
            if self.forwarder.is_none() {
                return Err(MonitorError::InvalidSettings(
                    "Telegram bot token is not configured".to_string(),
                ));
            }
        }

        *settings = next.clone();
        info!("Monitor settings updated: {:?}", next);
        Ok(next)
    }

    /// Most recent recordings, newest first
    pub async fn recordings(&self, limit: Option<u64>) -> Result<Vec<LiveRecording>, MonitorError> {
        let limit = limit
            .unwrap_or(DEFAULT_RECORDINGS_LIMIT)
            .clamp(1, MAX_RECORDINGS_LIMIT);
        Ok(db::list_recent_recordings(&self.pool, limit).await?)
    }

    /// Every recording of one account, newest first
    pub async fn recordings_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<LiveRecording>, MonitorError> {
        let (username, _) = parse_user_input(username).map_err(MonitorError::InvalidInput)?;
        Ok(db::list_recordings_for_user(&self.pool, &username).await?)
    }

    // ========================================================================
    // Loop control
    // ========================================================================

    pub fn is_active(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the loop; false if it was already running
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut task = lock(&self.task);
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                return false;
            }
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_loop(cancel.clone()));
        *task = Some(LoopHandle { cancel, handle });
        true
    }

    /// Cancel the loop and finalise every active recording; false if it was not running
    pub async fn stop_monitoring(&self) -> bool {
        let running = lock(&self.task).take();
        let running = match running {
            Some(t) => t,
            None => return false,
        };
        let was_active = !running.handle.is_finished();
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!("Monitoring task ended abnormally: {}", e);
        }

        let mut outbox = Vec::new();
        {
            let _work = self.work.lock().await;
            let recording_ids = self.registry().recording_ids();
            for id in recording_ids {
                if let Err(e) = self.finalize_recording(&id, &mut outbox).await {
                    error!("Failed to finalise recording for {}: {}", id, e);
                }
            }
        }
        self.deliver(outbox).await;
        was_active
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("Live monitoring started");
        while !cancel.is_cancelled() {
            let pause_secs = match self.check_all(&cancel).await {
                Ok(checked) => {
                    debug!("Monitoring tick checked {} target(s)", checked);
                    self.settings().check_interval_secs
                }
                Err(e) => {
                    error!("Monitoring tick failed: {}", e);
                    self.settings().error_backoff_secs
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(pause_secs)) => {}
            }
        }
        info!("Live monitoring stopped");
    }

    /// One pass over every monitored target. Returns how many were checked.
    pub async fn check_all(&self, cancel: &CancellationToken) -> Result<usize, DynError> {
        let ids = self.registry().monitored_ids();
        let mut checked = 0;
        for id in ids {
            if cancel.is_cancelled() {
                break;
            }
            let mut outbox = Vec::new();
            let visit = {
                let _work = self.work.lock().await;
                self.check_target(&id, &mut outbox).await
            };
            self.deliver(outbox).await;
            if visit? == Visit::Checked {
                checked += 1;
            }
        }
        Ok(checked)
    }

    async fn check_target(&self, id: &str, outbox: &mut Vec<Delivery>) -> Result<Visit, DynError> {
        let (username, room_id, was_recording) = match self.registry().get(id) {
            Some(t) if t.monitoring => (t.username.clone(), t.room_id.clone(), t.is_recording()),
            _ => return Ok(Visit::Skipped),
        };
        let checked_at = now_ms();
        self.update_target(id, |t| t.last_check_ms = Some(checked_at));
        db::touch_monitored_user(&self.pool, id, checked_at).await?;

        let room_id = match room_id {
            Some(room_id) => room_id,
            None => match self.probe.resolve_room_id(&username).await {
                Ok(Some(room_id)) => {
                    db::set_monitored_room_id(&self.pool, id, &room_id).await?;
                    self.update_target(id, |t| t.room_id = Some(room_id.clone()));
                    info!("Resolved @{} to room {}", username, room_id);
                    room_id
                }
                Ok(None) => {
                    self.update_target(id, |t| {
                        t.mark_error(format!("Could not find user: {}", username))
                    });
                    return Ok(Visit::Checked);
                }
                Err(e) => {
                    warn!("Room lookup for @{} failed: {}", username, e);
                    self.update_target(id, |t| {
                        t.mark_error(format!("Could not find user: {} ({})", username, e))
                    });
                    return Ok(Visit::Checked);
                }
            },
        };

        let mut recording = was_recording;
        if recording && !self.recorder.is_running(id) {
            info!("Recorder for @{} exited on its own", username);
            self.finalize_recording(id, outbox).await?;
            recording = false;
        }

        let live = match self.probe.is_live(&room_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Live check for @{} failed: {}", username, e);
                self.update_target(id, |t| t.mark_error(format!("Live check failed: {}", e)));
                return Ok(Visit::Checked);
            }
        };

        match (live, recording) {
            (true, false) => {
                info!("@{} is live", username);
                self.update_target(id, |t| t.mark_healthy(MonitoringStatus::Live));
                self.start_recording(id, &username, &room_id, outbox).await?;
            }
            (true, true) => {
                self.update_target(id, |t| t.mark_healthy(MonitoringStatus::Recording));
            }
            (false, true) => {
                info!("@{} went offline", username);
                self.finalize_recording(id, outbox).await?;
                self.update_target(id, |t| t.mark_healthy(MonitoringStatus::Waiting));
            }
            (false, false) => {
                self.update_target(id, |t| t.mark_healthy(MonitoringStatus::Waiting));
            }
        }
        Ok(Visit::Checked)
    }

    fn update_target<F: FnOnce(&mut MonitoredTarget)>(&self, id: &str, f: F) -> bool {
        match self.registry().get_mut(id) {
            Some(target) => {
                f(target);
                true
            }
            None => false,
        }
    }

    async fn start_recording(
        &self,
        id: &str,
        username: &str,
        room_id: &str,
        outbox: &mut Vec<Delivery>,
    ) -> Result<(), DynError> {
        let settings = self.settings();
        let output_path = recording_path(&settings.output_directory, username, Local::now());
        let max_duration = settings.recording_duration_secs.map(Duration::from_secs);

        let mut last_error = String::from("no attempt made");
        let mut started = false;
        for attempt in 0..settings.start_retries {
            if attempt > 0 {
                let backoff_ms = get_backoff_ms(attempt);
                debug!("Retrying recorder start for @{} in {}ms", username, backoff_ms);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            let stream_url = match self.probe.stream_url(room_id).await {
                Ok(url) => url,
                Err(e) => {
                    last_error = format!("Could not get stream URL: {}", e);
                    continue;
                }
            };
            match self
                .recorder
                .start(id, &stream_url, &output_path, max_duration)
                .await
            {
                Ok(()) => {
                    started = true;
                    break;
                }
                Err(e) => last_error = format!("Recorder failed to start: {}", e),
            }
        }

        if !started {
            error!("Could not record @{}: {}", username, last_error);
            self.update_target(id, |t| {
                t.mark_error(format!("Failed to start recording: {}", last_error))
            });
            return Ok(());
        }

        let start_ms = now_ms();
        let path_str = output_path.display().to_string();
        let recording_id =
            match db::insert_recording(&self.pool, username, room_id, start_ms, &path_str).await {
                Ok(recording_id) => recording_id,
                Err(e) => {
                    // A capture without a row is never finalised
                    if let Err(stop_err) = self.recorder.stop(id).await {
                        warn!("Failed to stop recorder for @{}: {}", username, stop_err);
                    }
                    self.update_target(id, |t| {
                        t.mark_error(format!("Failed to save recording: {}", e))
                    });
                    return Err(e);
                }
            };
        self.update_target(id, |t| {
            t.recording_id = Some(recording_id);
            t.recording_path = Some(output_path.clone());
            t.recording_start_ms = Some(start_ms);
            t.mark_healthy(MonitoringStatus::Recording);
        });
        info!("Recording @{} into {}", username, path_str);

        outbox.push(Delivery::LiveNotice {
            username: username.to_string(),
        });
        Ok(())
    }

    fn forward_target(&self, settings: &MonitorSettings) -> Option<(Arc<dyn Forwarder>, String)> {
        if !settings.telegram_enabled {
            return None;
        }
        let forwarder = self.forwarder.clone()?;
        let chat_id = settings.telegram_chat_id.clone()?;
        Some((forwarder, chat_id))
    }

    /// Stop the recorder of a target and close its `live_recordings` row.
    /// A completed file is queued for forwarding. The target keeps its
    /// recording link until the row is closed, so a failed update is retried.
    async fn finalize_recording(
        &self,
        id: &str,
        outbox: &mut Vec<Delivery>,
    ) -> Result<Option<RecordingStatus>, DynError> {
        let active = self.registry().get(id).and_then(|t| {
            let recording_id = t.recording_id?;
            Some((recording_id, t.recording_path.clone(), t.username.clone()))
        });
        let (recording_id, path, username) = match active {
            Some(v) => v,
            None => return Ok(None),
        };

        if let Err(e) = self.recorder.stop(id).await {
            warn!("Failed to stop recorder for @{}: {}", username, e);
        }

        let file_size = match &path {
            Some(p) => tokio::fs::metadata(p).await.ok().map(|m| m.len() as i64),
            None => None,
        };
        let (status, error_message) = match file_size {
            Some(size) if size > 0 => (RecordingStatus::Completed, None),
            Some(_) => (RecordingStatus::Failed, Some("Recording file is empty")),
            None => (RecordingStatus::Failed, Some("Recording file is missing")),
        };
        db::finish_recording(
            &self.pool,
            recording_id,
            now_ms(),
            file_size,
            status,
            error_message,
        )
        .await?;
        info!("Recording {} for @{} {}", recording_id, username, status);

        let path_str = path.as_ref().map(|p| p.display().to_string());
        self.update_target(id, |t| {
            t.recording_id = None;
            t.recording_path = None;
            t.recording_start_ms = None;
            t.last_recording = path_str.clone();
            t.status = if t.monitoring {
                MonitoringStatus::Waiting
            } else {
                MonitoringStatus::Stopped
            };
        });

        match (path, status) {
            (Some(path), RecordingStatus::Completed) => outbox.push(Delivery::Recording {
                recording_id,
                path,
                username,
            }),
            _ => warn!(
                "Skipping forwarding of recording {}: {}",
                recording_id,
                error_message.unwrap_or("no file")
            ),
        }
        Ok(Some(status))
    }

    /// Send queued Telegram traffic. Failures are logged; an unsent recording
    /// keeps `telegram_sent = false`.
    async fn deliver(&self, outbox: Vec<Delivery>) {
        if outbox.is_empty() {
            return;
        }
        let target = self.forward_target(&self.settings());
        for delivery in outbox {
            match (delivery, &target) {
                (Delivery::LiveNotice { username }, Some((forwarder, chat_id))) => {
                    if let Err(e) = forwarder.send_message(chat_id, &live_notice(&username)).await {
                        warn!("Failed to send live notice for @{}: {}", username, e);
                    }
                }
                (
                    Delivery::Recording {
                        recording_id,
                        path,
                        username,
                    },
                    Some((forwarder, chat_id)),
                ) => match forwarder
                    .send_video(chat_id, &path, &recording_caption(&username))
                    .await
                {
                    Ok(()) => {
                        if let Err(e) = db::mark_recording_sent(&self.pool, recording_id).await {
                            error!("Failed to mark recording {} as sent: {}", recording_id, e);
                        }
                    }
                    Err(e) => warn!("Failed to forward recording {}: {}", recording_id, e),
                },
                (Delivery::Recording { path, .. }, None) => warn!(
                    "Telegram forwarding is not configured, keeping {} local",
                    path.display()
                ),
                (Delivery::LiveNotice { .. }, None) => {}
            }
        }
    }
}
