use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

use crate::constants::EXPECTED_DB_VERSION;
use crate::models::{
    AccountStatus, LiveRecording, MonitoredUserRecord, RecordingStatus, Role, User,
};
use crate::queries::{ddl, metadata, monitored, recordings, users};

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Open a file-based database pool for production use
/// Enables WAL mode and foreign keys, creating the file (and its directory) if needed
pub async fn open_database(db_path: &Path) -> Result<SqlitePool, DynError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| format!("Failed to open database '{}': {}", db_path.display(), e))?;

    Ok(pool)
}

/// Create an empty database in a temporary directory for testing
/// Keep the returned TempDir alive for as long as the pool is used
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), DynError> {
    let dir = tempfile::tempdir()?;
    let pool = open_database(&dir.path().join("test.sqlite")).await?;
    Ok((pool, dir))
}

/// Initialize database schema
/// Creates tables and indexes, then records or validates the schema version
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), DynError> {
    sqlx::query(&ddl::create_metadata_table()).execute(pool).await?;
    sqlx::query(&ddl::create_users_table()).execute(pool).await?;
    sqlx::query(&ddl::create_monitored_users_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_live_recordings_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_live_recordings_username_index())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_live_recordings_status_index())
        .execute(pool)
        .await?;

    match query_metadata(pool, "version").await? {
        None => {
            sqlx::query(&metadata::insert("version", EXPECTED_DB_VERSION))
                .execute(pool)
                .await?;
        }
        Some(version) if version != EXPECTED_DB_VERSION => {
            return Err(format!(
                "Unsupported database version: '{}'. This application only supports version '{}'",
                version, EXPECTED_DB_VERSION
            )
            .into());
        }
        Some(_) => {}
    }

    Ok(())
}

/// Query a single metadata value by key
pub async fn query_metadata(pool: &SqlitePool, key: &str) -> Result<Option<String>, DynError> {
    let row = sqlx::query(&metadata::select_by_key(key))
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get::<String, _>(0)))
}

// ============================================================================
// Users
// ============================================================================

fn user_from_row(row: &SqliteRow) -> Result<User, DynError> {
    let role: String = row.try_get(3)?;
    let status: String = row.try_get(4)?;
    Ok(User {
        id: row.try_get(0)?,
        username: row.try_get(1)?,
        password_hash: row.try_get(2)?,
        role: Role::parse(&role)?,
        status: AccountStatus::parse(&status)?,
        created_at_ms: row.try_get(5)?,
    })
}

/// Insert a user and return its id
pub async fn insert_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    role: Role,
    status: AccountStatus,
    created_at_ms: i64,
) -> Result<i64, DynError> {
    let sql = users::insert(
        username,
        password_hash,
        role.as_str(),
        status.as_str(),
        created_at_ms,
    );
    let result = sqlx::query(&sql).execute(pool).await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<User>, DynError> {
    let row = sqlx::query(&users::select_by_username(username))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, DynError> {
    let row = sqlx::query(&users::select_by_id(id))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, DynError> {
    let rows = sqlx::query(&users::select_all()).fetch_all(pool).await?;
    rows.iter().map(user_from_row).collect()
}

pub async fn list_users_by_status(
    pool: &SqlitePool,
    status: AccountStatus,
) -> Result<Vec<User>, DynError> {
    let rows = sqlx::query(&users::select_by_status(status.as_str()))
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_from_row).collect()
}

/// Returns true if a row was updated
pub async fn set_user_status(
    pool: &SqlitePool,
    id: i64,
    status: AccountStatus,
) -> Result<bool, DynError> {
    let result = sqlx::query(&users::update_status(id, status.as_str()))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_user_password_hash(
    pool: &SqlitePool,
    id: i64,
    password_hash: &str,
) -> Result<bool, DynError> {
    let result = sqlx::query(&users::update_password_hash(id, password_hash))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns true if a row was deleted
pub async fn delete_user(pool: &SqlitePool, id: i64) -> Result<bool, DynError> {
    let result = sqlx::query(&users::delete_by_id(id)).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Monitored users
// ============================================================================

pub async fn insert_monitored_user(
    pool: &SqlitePool,
    id: &str,
    username: &str,
    room_id: Option<&str>,
    added_at_ms: i64,
) -> Result<(), DynError> {
    sqlx::query(&monitored::insert(id, username, room_id, added_at_ms))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_monitored_users(
    pool: &SqlitePool,
) -> Result<Vec<MonitoredUserRecord>, DynError> {
    let rows = sqlx::query(&monitored::select_all()).fetch_all(pool).await?;
    rows.iter()
        .map(|row| -> Result<MonitoredUserRecord, DynError> {
            let monitoring: i64 = row.try_get(3)?;
            Ok(MonitoredUserRecord {
                id: row.try_get(0)?,
                username: row.try_get(1)?,
                room_id: row.try_get(2)?,
                monitoring: monitoring != 0,
                added_at_ms: row.try_get(4)?,
                last_checked_ms: row.try_get(5)?,
            })
        })
        .collect()
}

pub async fn delete_monitored_user(pool: &SqlitePool, id: &str) -> Result<bool, DynError> {
    let result = sqlx::query(&monitored::delete_by_id(id))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_monitored_room_id(
    pool: &SqlitePool,
    id: &str,
    room_id: &str,
) -> Result<(), DynError> {
    sqlx::query(&monitored::update_room_id(id, room_id))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_monitoring_flag(
    pool: &SqlitePool,
    id: &str,
    monitoring: bool,
) -> Result<(), DynError> {
    sqlx::query(&monitored::update_monitoring(id, monitoring))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_monitored_user(
    pool: &SqlitePool,
    id: &str,
    last_checked_ms: i64,
) -> Result<(), DynError> {
    sqlx::query(&monitored::update_last_checked(id, last_checked_ms))
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Live recordings
// ============================================================================

fn recording_from_row(row: &SqliteRow) -> Result<LiveRecording, DynError> {
    let telegram_sent: i64 = row.try_get(7)?;
    let status: String = row.try_get(8)?;
    Ok(LiveRecording {
        id: row.try_get(0)?,
        username: row.try_get(1)?,
        room_id: row.try_get(2)?,
        start_time_ms: row.try_get(3)?,
        end_time_ms: row.try_get(4)?,
        file_path: row.try_get(5)?,
        file_size: row.try_get(6)?,
        telegram_sent: telegram_sent != 0,
        status: RecordingStatus::parse(&status)?,
        error_message: row.try_get(9)?,
    })
}

/// Insert a row in `recording` state and return its id
pub async fn insert_recording(
    pool: &SqlitePool,
    username: &str,
    room_id: &str,
    start_time_ms: i64,
    file_path: &str,
) -> Result<i64, DynError> {
    let sql = recordings::insert(username, room_id, start_time_ms, file_path);
    let result = sqlx::query(&sql).execute(pool).await?;
    Ok(result.last_insert_rowid())
}

pub async fn finish_recording(
    pool: &SqlitePool,
    id: i64,
    end_time_ms: i64,
    file_size: Option<i64>,
    status: RecordingStatus,
    error_message: Option<&str>,
) -> Result<(), DynError> {
    let sql = recordings::finish(id, end_time_ms, file_size, status.as_str(), error_message);
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

pub async fn mark_recording_sent(pool: &SqlitePool, id: i64) -> Result<(), DynError> {
    sqlx::query(&recordings::mark_telegram_sent(id))
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark every row still in `recording` state as failed, returning how many were touched
pub async fn fail_unfinished_recordings(
    pool: &SqlitePool,
    end_time_ms: i64,
    error_message: &str,
) -> Result<u64, DynError> {
    let result = sqlx::query(&recordings::fail_unfinished(end_time_ms, error_message))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_recording(pool: &SqlitePool, id: i64) -> Result<Option<LiveRecording>, DynError> {
    let row = sqlx::query(&recordings::select_by_id(id))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(recording_from_row).transpose()
}

pub async fn list_recent_recordings(
    pool: &SqlitePool,
    limit: u64,
) -> Result<Vec<LiveRecording>, DynError> {
    let rows = sqlx::query(&recordings::select_recent(limit))
        .fetch_all(pool)
        .await?;
    rows.iter().map(recording_from_row).collect()
}

pub async fn list_recordings_for_user(
    pool: &SqlitePool,
    username: &str,
) -> Result<Vec<LiveRecording>, DynError> {
    let rows = sqlx::query(&recordings::select_by_username(username))
        .fetch_all(pool)
        .await?;
    rows.iter().map(recording_from_row).collect()
}
