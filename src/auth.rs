use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::info;
use rand::Rng;
use sha2::Sha256;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;

use crate::constants::generate_session_token;
use crate::db;
use crate::models::{AccountStatus, Role, User};

const HASH_METHOD: &str = "pbkdf2:sha256";
const HASH_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 80;
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is pending admin approval")]
    PendingApproval,
    #[error("{0}")]
    InvalidUsername(String),
    #[error("Password must be at least 6 characters")]
    WeakPassword,
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("User not found")]
    UserNotFound,
    #[error("You cannot delete your own account")]
    CannotDeleteSelf,
    #[error("Database error: {0}")]
    Database(String),
}

impl From<db::DynError> for AuthError {
    fn from(e: db::DynError) -> Self {
        AuthError::Database(e.to_string())
    }
}

// ============================================================================
// Password hashing
// ============================================================================

fn derive(salt: &[u8], password: &str, iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Hash a password as `pbkdf2:sha256:<iterations>$<salt-hex>$<key-hex>`
pub fn hash_password(password: &str) -> String {
    let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
    let key = derive(&salt, password, HASH_ITERATIONS);
    format!(
        "{}:{}${}${}",
        HASH_METHOD,
        HASH_ITERATIONS,
        hex::encode(salt),
        hex::encode(key)
    )
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 3 {
        return false;
    }
    let iterations: u32 = match parts[0].strip_prefix(HASH_METHOD).and_then(|r| r.strip_prefix(':')) {
        Some(n) => match n.parse() {
            Ok(n) if n > 0 => n,
            _ => return false,
        },
        None => return false,
    };
    let (salt, expected) = match (hex::decode(parts[1]), hex::decode(parts[2])) {
        (Ok(salt), Ok(expected)) => (salt, expected),
        _ => return false,
    };
    derive(&salt, password, iterations)[..].ct_eq(&expected[..]).into()
}

// ============================================================================
// Accounts
// ============================================================================

/// Usernames are 3 to 80 characters of letters, digits, `_`, `.` and `-`
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AuthError::InvalidUsername(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(AuthError::InvalidUsername(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Create a pending account
pub async fn register(pool: &SqlitePool, username: &str, password: &str) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    create_user(pool, username, password, Role::User, AccountStatus::Pending).await
}

/// Insert an account with an explicit role and status. The same username and
/// password rules as `register` apply.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    role: Role,
    status: AccountStatus,
) -> Result<User, AuthError> {
    let username = username.trim();
    validate_username(username)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    if db::get_user_by_username(pool, username).await?.is_some() {
        return Err(AuthError::UsernameTaken(username.to_string()));
    }
    let hash = hash_password(password);
    let id = db::insert_user(
        pool,
        username,
        &hash,
        role,
        status,
        Utc::now().timestamp_millis(),
    )
    .await?;
    db::get_user_by_id(pool, id)
        .await?
        .ok_or(AuthError::UserNotFound)
}

/// Verify credentials; only approved accounts may log in
pub async fn authenticate(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    let user = db::get_user_by_username(pool, username)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_approved() {
        return Err(AuthError::PendingApproval);
    }
    Ok(user)
}

/// Create the configured admin account unless the username already exists.
/// Returns true when an account was created.
pub async fn seed_admin(pool: &SqlitePool, username: &str, password: &str) -> Result<bool, AuthError> {
    if db::get_user_by_username(pool, username).await?.is_some() {
        return Ok(false);
    }
    create_user(pool, username, password, Role::Admin, AccountStatus::Approved).await?;
    info!("Created admin account '{}'", username);
    Ok(true)
}

pub async fn change_password(
    pool: &SqlitePool,
    user: &User,
    current_password: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    if !verify_password(current_password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    if !db::set_user_password_hash(pool, user.id, &hash_password(new_password)).await? {
        return Err(AuthError::UserNotFound);
    }
    Ok(())
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, AuthError> {
    Ok(db::list_users(pool).await?)
}

pub async fn list_pending_users(pool: &SqlitePool) -> Result<Vec<User>, AuthError> {
    Ok(db::list_users_by_status(pool, AccountStatus::Pending).await?)
}

pub async fn approve_user(pool: &SqlitePool, id: i64) -> Result<User, AuthError> {
    if !db::set_user_status(pool, id, AccountStatus::Approved).await? {
        return Err(AuthError::UserNotFound);
    }
    let user = db::get_user_by_id(pool, id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    info!("Approved account '{}'", user.username);
    Ok(user)
}

/// Delete an account on behalf of `acting_user_id`
pub async fn delete_user(pool: &SqlitePool, acting_user_id: i64, id: i64) -> Result<(), AuthError> {
    if acting_user_id == id {
        return Err(AuthError::CannotDeleteSelf);
    }
    if !db::delete_user(pool, id).await? {
        return Err(AuthError::UserNotFound);
    }
    info!("Deleted account {}", id);
    Ok(())
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone)]
struct Session {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// In-memory login sessions keyed by cookie token. A restart logs everybody out.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Open a session for a user and return its token
    pub fn create(&self, user_id: i64) -> String {
        let token = generate_session_token();
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: Utc::now() + self.ttl,
            },
        );
        token
    }

    /// User id behind a live token; expired tokens are dropped
    pub fn get(&self, token: &str) -> Option<i64> {
        let user_id = {
            let session = self.sessions.get(token)?;
            if session.expires_at > Utc::now() {
                Some(session.user_id)
            } else {
                None
            }
        };
        if user_id.is_none() {
            self.sessions.remove(token);
        }
        user_id
    }

    pub fn remove(&self, token: &str) {
        self.sessions.remove(token);
    }

    /// Drop every session belonging to a user
    pub fn remove_user(&self, user_id: i64) {
        self.sessions.retain(|_, s| s.user_id != user_id);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
