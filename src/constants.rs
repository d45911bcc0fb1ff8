use rand::Rng;

/// Expected database schema version
/// Databases written by another version are refused at startup
pub const EXPECTED_DB_VERSION: &str = "1";

/// Name of the cookie carrying the login session token
pub const SESSION_COOKIE: &str = "tiktok_reup_session";

/// Application id TikTok's webcast endpoints expect
pub const TIKTOK_AID: &str = "1988";

/// Generate a random session token
pub fn generate_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect::<String>()
}
