use sea_query::{ColumnDef, Index, SqliteQueryBuilder, Table};

use crate::schema::{LiveRecordings, Metadata, MonitoredUsers, Users};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS users (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     username TEXT NOT NULL UNIQUE,
///     password_hash TEXT NOT NULL,
///     role TEXT NOT NULL DEFAULT 'user',
///     status TEXT NOT NULL DEFAULT 'pending',
///     created_at_ms INTEGER NOT NULL
/// )
pub fn create_users_table() -> String {
    Table::create()
        .table(Users::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Users::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(Users::Username)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
        .col(
            ColumnDef::new(Users::Role)
                .string()
                .not_null()
                .default("user"),
        )
        .col(
            ColumnDef::new(Users::Status)
                .string()
                .not_null()
                .default("pending"),
        )
        .col(ColumnDef::new(Users::CreatedAtMs).big_integer().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS monitored_users (
///     id TEXT PRIMARY KEY,
///     username TEXT NOT NULL UNIQUE,
///     room_id TEXT,
///     monitoring INTEGER NOT NULL DEFAULT 1,
///     added_at_ms INTEGER NOT NULL,
///     last_checked_ms INTEGER
/// )
pub fn create_monitored_users_table() -> String {
    Table::create()
        .table(MonitoredUsers::Table)
        .if_not_exists()
        .col(ColumnDef::new(MonitoredUsers::Id).string().primary_key())
        .col(
            ColumnDef::new(MonitoredUsers::Username)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(MonitoredUsers::RoomId).string().null())
        .col(
            ColumnDef::new(MonitoredUsers::Monitoring)
                .integer()
                .not_null()
                .default(1),
        )
        .col(
            ColumnDef::new(MonitoredUsers::AddedAtMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(MonitoredUsers::LastCheckedMs)
                .big_integer()
                .null(),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS live_recordings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     username TEXT NOT NULL,
///     room_id TEXT NOT NULL,
///     start_time_ms INTEGER NOT NULL,
///     end_time_ms INTEGER,
///     file_path TEXT,
///     file_size INTEGER,
///     telegram_sent INTEGER NOT NULL DEFAULT 0,
///     status TEXT NOT NULL DEFAULT 'recording',
///     error_message TEXT
/// )
pub fn create_live_recordings_table() -> String {
    Table::create()
        .table(LiveRecordings::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(LiveRecordings::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(LiveRecordings::Username).string().not_null())
        .col(ColumnDef::new(LiveRecordings::RoomId).string().not_null())
        .col(
            ColumnDef::new(LiveRecordings::StartTimeMs)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(LiveRecordings::EndTimeMs).big_integer().null())
        .col(ColumnDef::new(LiveRecordings::FilePath).string().null())
        .col(ColumnDef::new(LiveRecordings::FileSize).big_integer().null())
        .col(
            ColumnDef::new(LiveRecordings::TelegramSent)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(LiveRecordings::Status)
                .string()
                .not_null()
                .default("recording"),
        )
        .col(ColumnDef::new(LiveRecordings::ErrorMessage).text().null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_live_recordings_username ON live_recordings(username, start_time_ms)
pub fn create_live_recordings_username_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_live_recordings_username")
        .table(LiveRecordings::Table)
        .col(LiveRecordings::Username)
        .col(LiveRecordings::StartTimeMs)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_live_recordings_status ON live_recordings(status)
pub fn create_live_recordings_status_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_live_recordings_status")
        .table(LiveRecordings::Table)
        .col(LiveRecordings::Status)
        .to_string(SqliteQueryBuilder)
}
