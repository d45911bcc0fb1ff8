//! # Account Tests
//!
//! These tests cover the account lifecycle against a real SQLite file:
//! registration, approval, login, password changes and deletion.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test auth_test
//! ```

use tiktok_reup::auth::{self, AuthError};
use tiktok_reup::models::{AccountStatus, Role};

async fn create_test_database() -> (sqlx::SqlitePool, tempfile::TempDir) {
    let (pool, guard) = tiktok_reup::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    tiktok_reup::db::init_database_schema(&pool).await.unwrap();
    (pool, guard)
}

#[tokio::test]
async fn test_registered_account_needs_approval() {
    let (pool, _guard) = create_test_database().await;

    let user = auth::register(&pool, "newcomer", "secret1").await.unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(user.status, AccountStatus::Pending);

    let err = auth::authenticate(&pool, "newcomer", "secret1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::PendingApproval));

    let pending = auth::list_pending_users(&pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].username, "newcomer");

    let approved = auth::approve_user(&pool, user.id).await.unwrap();
    assert_eq!(approved.status, AccountStatus::Approved);
    assert!(auth::list_pending_users(&pool).await.unwrap().is_empty());

    let logged_in = auth::authenticate(&pool, "newcomer", "secret1")
        .await
        .unwrap();
    assert_eq!(logged_in.id, user.id);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let (pool, _guard) = create_test_database().await;
    auth::create_user(&pool, "alice", "hunter22", Role::User, AccountStatus::Approved)
        .await
        .unwrap();

    let wrong = auth::authenticate(&pool, "alice", "wrong-pass").await.unwrap_err();
    let unknown = auth::authenticate(&pool, "nobody", "hunter22").await.unwrap_err();
    assert_eq!(wrong.to_string(), unknown.to_string());
    assert!(matches!(wrong, AuthError::InvalidCredentials));

    let missing = auth::authenticate(&pool, "  ", "x").await.unwrap_err();
    assert!(matches!(missing, AuthError::MissingCredentials));
}

#[tokio::test]
async fn test_registration_validation() {
    let (pool, _guard) = create_test_database().await;

    assert!(matches!(
        auth::register(&pool, "ab", "secret1").await.unwrap_err(),
        AuthError::InvalidUsername(_)
    ));
    assert!(matches!(
        auth::register(&pool, "has space", "secret1").await.unwrap_err(),
        AuthError::InvalidUsername(_)
    ));
    assert!(matches!(
        auth::register(&pool, "shortpw", "12345").await.unwrap_err(),
        AuthError::WeakPassword
    ));

    auth::register(&pool, "taken", "secret1").await.unwrap();
    assert!(matches!(
        auth::register(&pool, "taken", "secret2").await.unwrap_err(),
        AuthError::UsernameTaken(_)
    ));
}

#[tokio::test]
async fn test_created_accounts_follow_registration_rules() {
    let (pool, _guard) = create_test_database().await;

    assert!(matches!(
        auth::create_user(&pool, "x", "secret1", Role::Admin, AccountStatus::Approved)
            .await
            .unwrap_err(),
        AuthError::InvalidUsername(_)
    ));
    assert!(matches!(
        auth::create_user(&pool, "operator", "123", Role::Admin, AccountStatus::Approved)
            .await
            .unwrap_err(),
        AuthError::WeakPassword
    ));
    assert!(auth::list_users(&pool).await.unwrap().is_empty());

    let user = auth::create_user(&pool, " operator ", "secret1", Role::Admin, AccountStatus::Approved)
        .await
        .unwrap();
    assert_eq!(user.username, "operator");
}

#[tokio::test]
async fn test_seed_admin_only_once() {
    let (pool, _guard) = create_test_database().await;

    assert!(auth::seed_admin(&pool, "admin", "password123").await.unwrap());
    assert!(!auth::seed_admin(&pool, "admin", "other-password").await.unwrap());

    // The original password still works after a second seed
    let admin = auth::authenticate(&pool, "admin", "password123").await.unwrap();
    assert!(admin.is_admin());
    assert!(admin.is_approved());
}

#[tokio::test]
async fn test_change_password() {
    let (pool, _guard) = create_test_database().await;
    let user = auth::create_user(&pool, "carol", "first-pw", Role::User, AccountStatus::Approved)
        .await
        .unwrap();

    assert!(matches!(
        auth::change_password(&pool, &user, "not-it", "second-pw").await.unwrap_err(),
        AuthError::InvalidCredentials
    ));
    assert!(matches!(
        auth::change_password(&pool, &user, "first-pw", "123").await.unwrap_err(),
        AuthError::WeakPassword
    ));

    auth::change_password(&pool, &user, "first-pw", "second-pw")
        .await
        .unwrap();
    assert!(auth::authenticate(&pool, "carol", "first-pw").await.is_err());
    assert!(auth::authenticate(&pool, "carol", "second-pw").await.is_ok());
}

#[tokio::test]
async fn test_delete_user() {
    let (pool, _guard) = create_test_database().await;
    let admin = auth::create_user(&pool, "boss", "password", Role::Admin, AccountStatus::Approved)
        .await
        .unwrap();
    let user = auth::register(&pool, "leaver", "password").await.unwrap();

    assert!(matches!(
        auth::delete_user(&pool, admin.id, admin.id).await.unwrap_err(),
        AuthError::CannotDeleteSelf
    ));

    auth::delete_user(&pool, admin.id, user.id).await.unwrap();
    assert!(matches!(
        auth::delete_user(&pool, admin.id, user.id).await.unwrap_err(),
        AuthError::UserNotFound
    ));

    let remaining: Vec<String> = auth::list_users(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.username)
        .collect();
    assert_eq!(remaining, vec!["boss"]);
}

#[tokio::test]
async fn test_approve_unknown_user() {
    let (pool, _guard) = create_test_database().await;
    assert!(matches!(
        auth::approve_user(&pool, 4242).await.unwrap_err(),
        AuthError::UserNotFound
    ));
}
