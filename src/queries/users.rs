use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use crate::schema::Users;

const USER_COLUMNS: [Users; 6] = [
    Users::Id,
    Users::Username,
    Users::PasswordHash,
    Users::Role,
    Users::Status,
    Users::CreatedAtMs,
];

/// INSERT INTO users (username, password_hash, role, status, created_at_ms) VALUES (?, ?, ?, ?, ?)
pub fn insert(
    username: &str,
    password_hash: &str,
    role: &str,
    status: &str,
    created_at_ms: i64,
) -> String {
    Query::insert()
        .into_table(Users::Table)
        .columns([
            Users::Username,
            Users::PasswordHash,
            Users::Role,
            Users::Status,
            Users::CreatedAtMs,
        ])
        .values_panic([
            username.into(),
            password_hash.into(),
            role.into(),
            status.into(),
            created_at_ms.into(),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, username, password_hash, role, status, created_at_ms FROM users WHERE username = ?
pub fn select_by_username(username: &str) -> String {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .and_where(Expr::col(Users::Username).eq(username))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, username, password_hash, role, status, created_at_ms FROM users WHERE id = ?
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM users ORDER BY id
pub fn select_all() -> String {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .order_by(Users::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM users WHERE status = ? ORDER BY id
pub fn select_by_status(status: &str) -> String {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .and_where(Expr::col(Users::Status).eq(status))
        .order_by(Users::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE users SET status = ? WHERE id = ?
pub fn update_status(id: i64, status: &str) -> String {
    Query::update()
        .table(Users::Table)
        .value(Users::Status, status)
        .and_where(Expr::col(Users::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE users SET password_hash = ? WHERE id = ?
pub fn update_password_hash(id: i64, password_hash: &str) -> String {
    Query::update()
        .table(Users::Table)
        .value(Users::PasswordHash, password_hash)
        .and_where(Expr::col(Users::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM users WHERE id = ?
pub fn delete_by_id(id: i64) -> String {
    Query::delete()
        .from_table(Users::Table)
        .and_where(Expr::col(Users::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
