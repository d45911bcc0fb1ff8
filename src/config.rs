use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/tiktok_reup.sqlite")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_mb() -> u64 {
    20
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mkv".to_string(), "mov".to_string()]
}

/// Sessions last at most a year
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

fn default_session_ttl_hours() -> i64 {
    24
}

/// Application configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite database file (default: data/tiktok_reup.sqlite)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Root directory for uploads, processed videos and recordings (default: uploads)
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Maximum upload size in megabytes (default: 20)
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    /// Accepted video file extensions, compared case-insensitively
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Login session lifetime in hours (default: 24)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Account seeded as an approved admin on startup
    #[serde(default)]
    pub admin: AdminConfig,
    /// Live monitor defaults (maps to [monitor] section in TOML)
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// TikTok endpoints (maps to [tiktok] section in TOML)
    #[serde(default)]
    pub tiktok: TikTokConfig,
    /// Forwarding of finished recordings (maps to [telegram] section in TOML)
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "password123".to_string(),
        }
    }
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_start_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Live monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between liveness sweeps (default: 60)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Seconds to wait after a failed sweep (default: 30)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Where recordings are written (default: <upload_dir>/recordings)
    pub output_dir: Option<PathBuf>,
    /// ffmpeg binary used for recording and transformation (default: ffmpeg)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Upper bound on a single recording in seconds (default: until the broadcast ends)
    pub recording_duration_secs: Option<u64>,
    /// Attempts to launch the recorder before a target is marked as failed (default: 3)
    #[serde(default = "default_start_retries")]
    pub start_retries: u32,
    /// Start the monitoring loop on boot and when a user is added (default: true)
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            output_dir: None,
            ffmpeg_path: default_ffmpeg_path(),
            recording_duration_secs: None,
            start_retries: default_start_retries(),
            autostart: true,
        }
    }
}

fn default_tiktok_base_url() -> String {
    "https://www.tiktok.com".to_string()
}

fn default_webcast_url() -> String {
    "https://webcast.tiktok.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

/// TikTok endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TikTokConfig {
    #[serde(default = "default_tiktok_base_url")]
    pub base_url: String,
    #[serde(default = "default_webcast_url")]
    pub webcast_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Cookie profile name to look up in the credentials file
    pub credential_profile: Option<String>,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            base_url: default_tiktok_base_url(),
            webcast_url: default_webcast_url(),
            user_agent: default_user_agent(),
            credential_profile: None,
        }
    }
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

/// Telegram forwarding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Credential profile holding the bot token in the credentials file
    pub credential_profile: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chat_id: None,
            api_url: default_telegram_api_url(),
            credential_profile: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            upload_dir: default_upload_dir(),
            max_upload_mb: default_max_upload_mb(),
            allowed_extensions: default_allowed_extensions(),
            session_ttl_hours: default_session_ttl_hours(),
            admin: AdminConfig::default(),
            monitor: MonitorConfig::default(),
            tiktok: TikTokConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Validate values that serde cannot check on its own
    pub fn validate(&self) -> Result<(), String> {
        if self.monitor.check_interval_secs == 0 {
            return Err("monitor.check_interval_secs must be greater than 0".to_string());
        }
        if self.monitor.error_backoff_secs == 0 {
            return Err("monitor.error_backoff_secs must be greater than 0".to_string());
        }
        if self.monitor.recording_duration_secs == Some(0) {
            return Err("monitor.recording_duration_secs must be greater than 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("allowed_extensions must not be empty".to_string());
        }
        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }
        if self.session_ttl_hours <= 0 || self.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(format!(
                "session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            ));
        }
        if self.telegram.enabled && self.telegram.chat_id.is_none() {
            return Err("telegram.enabled is true but telegram.chat_id is missing".to_string());
        }
        Ok(())
    }

    /// Resolve relative directories against the current working directory
    pub fn resolve_paths(&mut self) -> Result<(), String> {
        let cwd = std::env::current_dir()
            .map_err(|e| format!("Failed to determine current directory: {}", e))?;
        if self.upload_dir.is_relative() {
            self.upload_dir = cwd.join(&self.upload_dir);
        }
        let output_dir = match self.monitor.output_dir.take() {
            Some(dir) if dir.is_relative() => cwd.join(dir),
            Some(dir) => dir,
            None => self.upload_dir.join("recordings"),
        };
        self.monitor.output_dir = Some(output_dir);
        Ok(())
    }

    /// Directory recordings are written to
    pub fn recordings_dir(&self) -> PathBuf {
        self.monitor
            .output_dir
            .clone()
            .unwrap_or_else(|| self.upload_dir.join("recordings"))
    }

    /// Directory transformed uploads are written to
    pub fn processed_dir(&self) -> PathBuf {
        self.upload_dir.join("processed")
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize) * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_mb, 20);
        assert_eq!(config.allowed_extensions, vec!["mp4", "mkv", "mov"]);
        assert_eq!(config.monitor.check_interval_secs, 60);
        assert_eq!(config.monitor.start_retries, 3);
        assert!(config.monitor.autostart);
        assert!(!config.telegram.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            port = 8080
            upload_dir = "/srv/uploads"

            [monitor]
            check_interval_secs = 120
            recording_duration_secs = 3600

            [telegram]
            enabled = true
            chat_id = "-100123"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.monitor.check_interval_secs, 120);
        assert_eq!(config.monitor.recording_duration_secs, Some(3600));
        assert_eq!(config.telegram.chat_id.as_deref(), Some("-100123"));
        assert_eq!(config.recordings_dir(), PathBuf::from("/srv/uploads/recordings"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_telegram_without_chat() {
        let config = AppConfig::from_toml("[telegram]\nenabled = true\n").unwrap();
        assert!(config.validate().unwrap_err().contains("chat_id"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = AppConfig::from_toml("[monitor]\ncheck_interval_secs = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_session_ttl() {
        let config = AppConfig::from_toml("session_ttl_hours = 9223372036854775807\n").unwrap();
        assert!(config.validate().unwrap_err().contains("session_ttl_hours"));

        let config = AppConfig::from_toml("session_ttl_hours = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml(&format!(
            "session_ttl_hours = {}\n",
            MAX_SESSION_TTL_HOURS
        ))
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_paths_keeps_absolute_dirs() {
        let mut config = AppConfig::from_toml(
            "upload_dir = \"/data/up\"\n[monitor]\noutput_dir = \"/data/rec\"\n",
        )
        .unwrap();
        config.resolve_paths().unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/data/up"));
        assert_eq!(config.recordings_dir(), PathBuf::from("/data/rec"));
        assert_eq!(config.processed_dir(), PathBuf::from("/data/up/processed"));
    }
}
