use serde::Serialize;
use std::fmt;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// Approval status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Approved,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Approved => "approved",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(AccountStatus::Pending),
            "approved" => Ok(AccountStatus::Approved),
            other => Err(format!("Unknown account status '{}'", other)),
        }
    }
}

/// Operator account
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at_ms: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_approved(&self) -> bool {
        self.status == AccountStatus::Approved
    }
}

/// Row of the monitored_users table
#[derive(Debug, Clone)]
pub struct MonitoredUserRecord {
    pub id: String,
    pub username: String,
    pub room_id: Option<String>,
    pub monitoring: bool,
    pub added_at_ms: i64,
    pub last_checked_ms: Option<i64>,
}

/// Outcome of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Recording => "recording",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "recording" => Ok(RecordingStatus::Recording),
            "completed" => Ok(RecordingStatus::Completed),
            "failed" => Ok(RecordingStatus::Failed),
            other => Err(format!("Unknown recording status '{}'", other)),
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the live_recordings table
#[derive(Debug, Clone, Serialize)]
pub struct LiveRecording {
    pub id: i64,
    pub username: String,
    pub room_id: String,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub telegram_sent: bool,
    pub status: RecordingStatus,
    pub error_message: Option<String>,
}
