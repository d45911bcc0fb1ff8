use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use crate::schema::LiveRecordings;

const RECORDING_COLUMNS: [LiveRecordings; 10] = [
    LiveRecordings::Id,
    LiveRecordings::Username,
    LiveRecordings::RoomId,
    LiveRecordings::StartTimeMs,
    LiveRecordings::EndTimeMs,
    LiveRecordings::FilePath,
    LiveRecordings::FileSize,
    LiveRecordings::TelegramSent,
    LiveRecordings::Status,
    LiveRecordings::ErrorMessage,
];

/// INSERT INTO live_recordings (username, room_id, start_time_ms, file_path, status) VALUES (?, ?, ?, ?, 'recording')
pub fn insert(username: &str, room_id: &str, start_time_ms: i64, file_path: &str) -> String {
    Query::insert()
        .into_table(LiveRecordings::Table)
        .columns([
            LiveRecordings::Username,
            LiveRecordings::RoomId,
            LiveRecordings::StartTimeMs,
            LiveRecordings::FilePath,
            LiveRecordings::Status,
        ])
        .values_panic([
            username.into(),
            room_id.into(),
            start_time_ms.into(),
            file_path.into(),
            "recording".into(),
        ])
        .to_string(SqliteQueryBuilder)
}

/// UPDATE live_recordings SET end_time_ms = ?, file_size = ?, status = ?, error_message = ? WHERE id = ?
pub fn finish(
    id: i64,
    end_time_ms: i64,
    file_size: Option<i64>,
    status: &str,
    error_message: Option<&str>,
) -> String {
    Query::update()
        .table(LiveRecordings::Table)
        .value(LiveRecordings::EndTimeMs, end_time_ms)
        .value(LiveRecordings::FileSize, file_size)
        .value(LiveRecordings::Status, status)
        .value(
            LiveRecordings::ErrorMessage,
            error_message.map(|m| m.to_string()),
        )
        .and_where(Expr::col(LiveRecordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE live_recordings SET telegram_sent = 1 WHERE id = ?
pub fn mark_telegram_sent(id: i64) -> String {
    Query::update()
        .table(LiveRecordings::Table)
        .value(LiveRecordings::TelegramSent, 1)
        .and_where(Expr::col(LiveRecordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE live_recordings SET status = 'failed', error_message = ?, end_time_ms = ? WHERE status = 'recording'
pub fn fail_unfinished(end_time_ms: i64, error_message: &str) -> String {
    Query::update()
        .table(LiveRecordings::Table)
        .value(LiveRecordings::Status, "failed")
        .value(LiveRecordings::ErrorMessage, error_message)
        .value(LiveRecordings::EndTimeMs, end_time_ms)
        .and_where(Expr::col(LiveRecordings::Status).eq("recording"))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM live_recordings WHERE id = ?
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(RECORDING_COLUMNS)
        .from(LiveRecordings::Table)
        .and_where(Expr::col(LiveRecordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM live_recordings ORDER BY start_time_ms DESC, id DESC LIMIT ?
pub fn select_recent(limit: u64) -> String {
    Query::select()
        .columns(RECORDING_COLUMNS)
        .from(LiveRecordings::Table)
        .order_by(LiveRecordings::StartTimeMs, Order::Desc)
        .order_by(LiveRecordings::Id, Order::Desc)
        .limit(limit)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM live_recordings WHERE username = ? ORDER BY start_time_ms DESC, id DESC
pub fn select_by_username(username: &str) -> String {
    Query::select()
        .columns(RECORDING_COLUMNS)
        .from(LiveRecordings::Table)
        .and_where(Expr::col(LiveRecordings::Username).eq(username))
        .order_by(LiveRecordings::StartTimeMs, Order::Desc)
        .order_by(LiveRecordings::Id, Order::Desc)
        .to_string(SqliteQueryBuilder)
}
