// Library interface for testing

pub mod auth;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod db;
pub mod forward;
pub mod models;
pub mod monitor;
pub mod queries;
pub mod recorder;
pub mod schema;
pub mod serve;
pub mod tiktok;
pub mod video;

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
