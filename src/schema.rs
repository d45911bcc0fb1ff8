use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Users table - operator accounts
#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Username,
    PasswordHash,
    Role,
    Status,
    CreatedAtMs,
}

/// Monitored users table - TikTok accounts watched for live broadcasts
#[derive(Iden)]
pub enum MonitoredUsers {
    Table,
    Id,
    Username,
    RoomId,
    Monitoring,
    AddedAtMs,
    LastCheckedMs,
}

/// Live recordings table - one row per capture session
#[derive(Iden)]
pub enum LiveRecordings {
    Table,
    Id,
    Username,
    RoomId,
    StartTimeMs,
    EndTimeMs,
    FilePath,
    FileSize,
    TelegramSent,
    Status,
    ErrorMessage,
}
