use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use crate::schema::MonitoredUsers;

/// INSERT INTO monitored_users (id, username, room_id, monitoring, added_at_ms) VALUES (?, ?, ?, 1, ?)
pub fn insert(id: &str, username: &str, room_id: Option<&str>, added_at_ms: i64) -> String {
    Query::insert()
        .into_table(MonitoredUsers::Table)
        .columns([
            MonitoredUsers::Id,
            MonitoredUsers::Username,
            MonitoredUsers::RoomId,
            MonitoredUsers::Monitoring,
            MonitoredUsers::AddedAtMs,
        ])
        .values_panic([
            id.into(),
            username.into(),
            room_id.map(|r| r.to_string()).into(),
            1.into(),
            added_at_ms.into(),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, username, room_id, monitoring, added_at_ms, last_checked_ms FROM monitored_users ORDER BY added_at_ms
pub fn select_all() -> String {
    Query::select()
        .columns([
            MonitoredUsers::Id,
            MonitoredUsers::Username,
            MonitoredUsers::RoomId,
            MonitoredUsers::Monitoring,
            MonitoredUsers::AddedAtMs,
            MonitoredUsers::LastCheckedMs,
        ])
        .from(MonitoredUsers::Table)
        .order_by(MonitoredUsers::AddedAtMs, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM monitored_users WHERE id = ?
pub fn delete_by_id(id: &str) -> String {
    Query::delete()
        .from_table(MonitoredUsers::Table)
        .and_where(Expr::col(MonitoredUsers::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE monitored_users SET room_id = ? WHERE id = ?
pub fn update_room_id(id: &str, room_id: &str) -> String {
    Query::update()
        .table(MonitoredUsers::Table)
        .value(MonitoredUsers::RoomId, room_id)
        .and_where(Expr::col(MonitoredUsers::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE monitored_users SET monitoring = ? WHERE id = ?
pub fn update_monitoring(id: &str, monitoring: bool) -> String {
    Query::update()
        .table(MonitoredUsers::Table)
        .value(MonitoredUsers::Monitoring, monitoring as i32)
        .and_where(Expr::col(MonitoredUsers::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE monitored_users SET last_checked_ms = ? WHERE id = ?
pub fn update_last_checked(id: &str, last_checked_ms: i64) -> String {
    Query::update()
        .table(MonitoredUsers::Table)
        .value(MonitoredUsers::LastCheckedMs, last_checked_ms)
        .and_where(Expr::col(MonitoredUsers::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
