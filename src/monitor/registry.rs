use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::models::MonitoredUserRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringStatus {
    Waiting,
    Live,
    Recording,
    Stopped,
    Error,
}

/// One watched account
#[derive(Debug, Clone)]
pub struct MonitoredTarget {
    pub id: String,
    pub username: String,
    pub room_id: Option<String>,
    pub monitoring: bool,
    pub status: MonitoringStatus,
    pub added_at_ms: i64,
    pub last_check_ms: Option<i64>,
    pub last_recording: Option<String>,
    pub error_message: Option<String>,
    pub recording_start_ms: Option<i64>,
    pub recording_id: Option<i64>,
    pub recording_path: Option<PathBuf>,
    pub consecutive_failures: u32,
}

impl MonitoredTarget {
    pub fn new(id: String, username: String, room_id: Option<String>, added_at_ms: i64) -> Self {
        Self {
            id,
            username,
            room_id,
            monitoring: true,
            status: MonitoringStatus::Waiting,
            added_at_ms,
            last_check_ms: None,
            last_recording: None,
            error_message: None,
            recording_start_ms: None,
            recording_id: None,
            recording_path: None,
            consecutive_failures: 0,
        }
    }

    pub fn from_record(record: MonitoredUserRecord) -> Self {
        let mut target = Self::new(record.id, record.username, record.room_id, record.added_at_ms);
        target.monitoring = record.monitoring;
        target.last_check_ms = record.last_checked_ms;
        if !record.monitoring {
            target.status = MonitoringStatus::Stopped;
        }
        target
    }

    pub fn is_recording(&self) -> bool {
        self.recording_id.is_some()
    }

    pub fn mark_error(&mut self, message: String) {
        self.status = MonitoringStatus::Error;
        self.error_message = Some(message);
        self.consecutive_failures += 1;
    }

    /// Clear failure state after a successful check
    pub fn mark_healthy(&mut self, status: MonitoringStatus) {
        self.status = status;
        self.error_message = None;
        self.consecutive_failures = 0;
    }

    pub fn view(&self, now_ms: i64) -> TargetView {
        TargetView {
            id: self.id.clone(),
            username: self.username.clone(),
            room_id: self.room_id.clone(),
            monitoring: self.monitoring,
            status: self.status,
            added_at: format_ms(Some(self.added_at_ms)),
            last_check: format_ms(self.last_check_ms),
            last_recording: self.last_recording.clone(),
            error_message: self.error_message.clone(),
            recording_start: format_ms(self.recording_start_ms),
            recording_seconds: self
                .recording_start_ms
                .map(|start| ((now_ms - start) / 1000).max(0)),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

fn format_ms(ms: Option<i64>) -> Option<String> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.to_rfc3339())
}

/// JSON shape of a target in status responses
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub id: String,
    pub username: String,
    pub room_id: Option<String>,
    pub monitoring: bool,
    pub status: MonitoringStatus,
    pub added_at: Option<String>,
    pub last_check: Option<String>,
    pub last_recording: Option<String>,
    pub error_message: Option<String>,
    pub recording_start: Option<String>,
    pub recording_seconds: Option<i64>,
    pub consecutive_failures: u32,
}

/// Targets in the order they were added
#[derive(Debug, Default)]
pub struct Registry {
    targets: Vec<MonitoredTarget>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Case-insensitive username lookup
    pub fn find_username(&self, username: &str) -> Option<&MonitoredTarget> {
        self.targets
            .iter()
            .find(|t| t.username.eq_ignore_ascii_case(username))
    }

    /// Add a target; false when its username is already present
    pub fn insert(&mut self, target: MonitoredTarget) -> bool {
        if self.find_username(&target.username).is_some() {
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<MonitoredTarget> {
        let index = self.targets.iter().position(|t| t.id == id)?;
        Some(self.targets.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&MonitoredTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MonitoredTarget> {
        self.targets.iter_mut().find(|t| t.id == id)
    }

    /// Ids the loop should visit this tick
    pub fn monitored_ids(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.monitoring)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn recording_ids(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.is_recording())
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn views(&self, now_ms: i64) -> Vec<TargetView> {
        self.targets.iter().map(|t| t.view(now_ms)).collect()
    }
}
